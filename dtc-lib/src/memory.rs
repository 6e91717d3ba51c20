//! Access to the card: registers and DMA buffers
//!
//! Everything above this layer (DAQ/DCS engines, 
//! register control helpers) talks to the card 
//! only through the `DeviceTransport` trait. There 
//! are two implementations:
//!
//! * `dma::RingDevice`         - descriptor rings in host memory, 
//!                               registers through a BAR window
//! * `simulator::DTCSimulator` - the card in software
//!
//! A DMA buffer always starts with a little endian 
//! u64, which holds the byte count of the buffer 
//! including these 8 bytes.

use std::fmt;
use std::thread;
use std::time::Duration;

use dtc_dataclasses::constants::BUFFER_HEADER_SIZE;
use dtc_dataclasses::errors::DTCError;

use crate::registers::dont_care_mask;

/// Register and buffer operations are retried 
/// this many times before giving up
pub const RETRIES             : usize = 3;

/// Sleep between two attempts of a failed 
/// register access in microsec
pub const RETRY_SLEEP_USEC    : u64   = 10;

/// The DTC has two DMA channels
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DmaChannel {
  /// event data
  DAQ,
  /// register transactions with the ROCs
  DCS,
}

impl DmaChannel {
  pub fn to_u8(&self) -> u8 {
    match self {
      DmaChannel::DAQ => 0,
      DmaChannel::DCS => 1,
    }
  }

  pub fn from_u8(value : u8) -> Option<Self> {
    match value {
      0 => Some(DmaChannel::DAQ),
      1 => Some(DmaChannel::DCS),
      _ => None
    }
  }

  pub fn all() -> [DmaChannel;2] {
    [DmaChannel::DAQ, DmaChannel::DCS]
  }
}

impl fmt::Display for DmaChannel {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      DmaChannel::DAQ => write!(f, "<DmaChannel: DAQ>"),
      DmaChannel::DCS => write!(f, "<DmaChannel: DCS>"),
    }
  }
}

/// C2S - card to server (host), S2C - server to card
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DmaDirection {
  C2S,
  S2C,
}

impl fmt::Display for DmaDirection {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      DmaDirection::C2S => write!(f, "C2S"),
      DmaDirection::S2C => write!(f, "S2C"),
    }
  }
}

/// Position of a (channel, direction) in per ring tables
pub fn ring_slot(channel : DmaChannel, direction : DmaDirection) -> usize {
  let dir = match direction {
    DmaDirection::C2S => 0,
    DmaDirection::S2C => 1,
  };
  2 * channel.to_u8() as usize + dir
}

/// Number of (channel, direction) pairs
pub const NRINGS : usize = 4;

/// A copy of one DMA buffer
///
/// All accessors are bounds checked, reading 
/// beyond the end gives an error instead of 
/// garbage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DmaBuffer {
  data : Vec<u8>,
}

impl DmaBuffer {

  /// Wrap raw buffer content (including the 
  /// 8 byte count)
  pub fn new(data : Vec<u8>) -> Self {
    Self {
      data
    }
  }

  /// Nothing was ready
  pub fn empty() -> Self {
    Self {
      data : Vec::<u8>::new()
    }
  }

  /// Prepend the byte count to a payload
  pub fn from_payload(payload : &[u8]) -> Self {
    let mut data = Vec::<u8>::with_capacity(payload.len() + BUFFER_HEADER_SIZE);
    data.extend_from_slice(&((payload.len() + BUFFER_HEADER_SIZE) as u64).to_le_bytes());
    data.extend_from_slice(payload);
    Self::new(data)
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Physical size of the buffer copy
  pub fn len(&self) -> usize {
    self.data.len()
  }

  /// The byte count the buffer announces, 
  /// limited to what is actually there
  pub fn byte_count(&self) -> usize {
    if self.data.len() < BUFFER_HEADER_SIZE {
      return 0;
    }
    let mut raw = [0u8;8];
    raw.copy_from_slice(&self.data[0..BUFFER_HEADER_SIZE]);
    let count = u64::from_le_bytes(raw) as usize;
    if count > self.data.len() {
      debug!("Buffer announces {} bytes, but has only {}", count, self.data.len());
      return self.data.len();
    }
    count
  }

  /// The data after the byte count, up to 
  /// the announced size
  pub fn payload(&self) -> &[u8] {
    let count = self.byte_count();
    if count <= BUFFER_HEADER_SIZE {
      return &[];
    }
    &self.data[BUFFER_HEADER_SIZE..count]
  }

  /// Get `size` bytes starting at `offset` 
  pub fn get(&self, offset : usize, size : usize) -> Result<&[u8], DTCError> {
    if offset + size > self.data.len() {
      error!("Attempt to read {} bytes at {} from buffer of size {}!", size, offset, self.data.len());
      return Err(DTCError::DataCorruption);
    }
    Ok(&self.data[offset..offset + size])
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }
}

/// Raw access to the 32bit registers of the card
pub trait RegisterAccess : Send + Sync {

  fn read_register(&self, address : u16) -> Result<u32, DTCError>;

  fn write_register(&self, address : u16, value : u32) -> Result<(), DTCError>;

  /// Write a register and read it back.
  ///
  /// Bits the firmware changes on its own (self 
  /// clearing resets, status bits) are ignored
  /// in the comparison.
  fn write_register_checked(&self, address : u16, value : u32) -> Result<(), DTCError> {
    let mask = !dont_care_mask(address);
    for attempt in 0..RETRIES {
      self.write_register(address, value)?;
      let readback = self.read_register(address)?;
      if (readback & mask) == (value & mask) {
        return Ok(());
      }
      warn!("Register {:#06x} reads back {:#010x} after writing {:#010x} (attempt {})", 
            address, readback, value, attempt);
    }
    error!("Unable to set register {:#06x} to {:#010x}!", address, value);
    Err(DTCError::IoError)
  }
}

/// Everything the protocol engines need from the card
pub trait DeviceTransport : RegisterAccess {

  /// Get the next buffer of the channel.
  ///
  /// Waits up to `timeout_ms` for data, a timeout
  /// of 0 is a plain poll. Returns an empty buffer
  /// if nothing is ready. `DTCError::Timeout` means
  /// the card announced a buffer which did not 
  /// complete in time.
  fn read_data(&self, channel : DmaChannel, timeout_ms : u64) -> Result<DmaBuffer, DTCError>;

  /// Give the `count` oldest buffers handed out
  /// by `read_data` back to the card
  fn read_release(&self, channel : DmaChannel, count : usize) -> Result<(), DTCError>;

  /// Send a buffer to the card. The data has to 
  /// start with the 8 byte inclusive byte count.
  fn write_data(&self, channel : DmaChannel, data : &[u8]) -> Result<(), DTCError>;
}

/// Run a register/buffer operation, retry on 
/// `IoError` up to `RETRIES` times
pub fn with_retries<T, F>(mut op : F) -> Result<T, DTCError> 
  where F : FnMut() -> Result<T, DTCError> {
  let mut last_err = DTCError::IoError;
  for attempt in 0..RETRIES {
    match op() {
      Ok(value) => {
        return Ok(value);
      }
      Err(DTCError::IoError) => {
        debug!("I/O failure, attempt {} of {}", attempt + 1, RETRIES);
        last_err = DTCError::IoError;
        thread::sleep(Duration::from_micros(RETRY_SLEEP_USEC));
      }
      Err(err) => {
        return Err(err);
      }
    }
  }
  Err(last_err)
}
