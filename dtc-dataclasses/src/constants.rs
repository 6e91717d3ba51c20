//! Numbers which are fixed by the DTC firmware 
//! and the DMA engine

/// Every packet on the DAQ and DCS channel 
/// is a multiple of this
pub const PACKET_SIZE          : usize = 16;

/// Each DMA buffer starts with a little endian u64 
/// which holds the (inclusive) byte count of the buffer
pub const BUFFER_HEADER_SIZE   : usize = 8;

/// The DMA engine can move at most 2^20 - 1 bytes
/// per descriptor
pub const MAX_DMA_BYTE_COUNT   : usize = 0xFFFFF;

/// Number of serial links on a DTC
pub const NLINKS               : u8    = 6;

/// Maximum number of ROCs which can be daisy chained 
/// behind a single link
pub const MAX_ROCS_PER_LINK    : u8    = 6;

/// A header with this byte count marks a buffer 
/// with no valid data (firmware filler)
pub const EMPTY_BUFFER_MARKER  : u16   = 0xCAFE;

/// Timestamps are 48 bit wide
pub const TIMESTAMP_MASK       : u64   = 0x0000_FFFF_FFFF_FFFF;

/// DDR images for the detector emulator need to 
/// be at least this large, smaller ones get padded
pub const MIN_EMULATOR_BLOCK   : usize = 80;

/// Value returned for a DCS register read which 
/// did not get an answer
pub const DCS_UNKNOWN_VALUE    : u16   = 0xFFFF;

/// Number of data words a block operation carries
/// in the first DCS packet
pub const DCS_FIRST_PACKET_WORDS : usize = 3;

/// Number of data words in each continuation 
/// packet of a block operation
pub const DCS_WORDS_PER_PACKET   : usize = 8;

/// Largest block a single DCS operation can carry.
/// The continuation count is a single byte.
pub const DCS_MAX_BLOCK_WORDS    : usize = DCS_FIRST_PACKET_WORDS + 255 * DCS_WORDS_PER_PACKET;
