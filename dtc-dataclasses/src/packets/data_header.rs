//! Data header packet (card -> host, DAQ channel)
//!
//! First packet of each data block, the payload 
//! packets follow immediately.
//!
//! ```text
//! byte 0-1   : byte count of the whole block (incl. header)
//! byte 2-3   : common header, hop count = ROC id
//! byte 4-5   : [10:0] packet count (packets after the header)
//! byte 6-11  : timestamp
//! byte 12    : status
//! byte 13    : data format version
//! byte 14-15 : reserved
//! ```

use std::fmt;

use crate::Timestamp;
use crate::constants::PACKET_SIZE;
use crate::packets::{
    DMAPacket,
    PacketType,
};
use crate::serialization::{
    Serialization,
    SerializationError,
    check_remaining,
    parse_u16,
    parse_u48,
    parse_u8,
};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DataHeaderPacket {
  pub byte_count   : u16,
  pub link_id      : u8,
  pub roc_id       : u8,
  pub subsystem    : u8,
  pub valid        : bool,
  pub packet_count : u16,
  pub timestamp    : Timestamp,
  pub status       : u8,
  pub version      : u8,
}

impl DataHeaderPacket {

  /// A consistent header for a block with 
  /// packet_count payload packets
  pub fn new(link_id      : u8,
             roc_id       : u8,
             timestamp    : Timestamp,
             packet_count : u16) -> Self {
    let packet_count = packet_count & 0x7ff;
    Self {
      byte_count   : (PACKET_SIZE * (1 + packet_count as usize)) as u16,
      link_id,
      roc_id,
      subsystem    : 0,
      valid        : true,
      packet_count,
      timestamp,
      status       : 0,
      version      : 1,
    }
  }

  /// The byte count has to account for the 
  /// header plus all following packets
  pub fn is_consistent(&self) -> bool {
    self.byte_count as usize == PACKET_SIZE * (1 + self.packet_count as usize)
  }

  /// Decode the header without checking the byte count
  ///
  /// Needed by the readout to tell a corrupted 
  /// header apart from a packet of the wrong type.
  pub fn from_bytestream_unchecked(stream : &[u8],
                                   pos    : &mut usize)
    -> Result<Self, SerializationError> {
    check_remaining(stream, *pos, Self::SIZE)?;
    let start  = *pos;
    let header = DMAPacket::from_bytestream(stream, pos)?;
    if header.packet_type != PacketType::DataHeader {
      *pos = start;
      return Err(SerializationError::IncorrectPacketType);
    }
    let packet_count = parse_u16(stream, pos) & 0x7ff;
    let timestamp    = Timestamp::new(parse_u48(stream, pos));
    let status       = parse_u8(stream, pos);
    let version      = parse_u8(stream, pos);
    *pos = start + Self::SIZE;
    Ok(Self {
      byte_count   : header.byte_count,
      link_id      : header.link_id,
      roc_id       : header.hop_count,
      subsystem    : header.subsystem,
      valid        : header.valid,
      packet_count,
      timestamp,
      status,
      version,
    })
  }
}

impl Serialization for DataHeaderPacket {
  const SIZE : usize = PACKET_SIZE;

  /// Decode and validate the header
  fn from_bytestream(stream : &[u8],
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    let start  = *pos;
    let header = Self::from_bytestream_unchecked(stream, pos)?;
    if !header.is_consistent() {
      error!("Data header byte count {} does not match packet count {}!",
             header.byte_count, header.packet_count);
      *pos = start;
      return Err(SerializationError::WrongByteSize);
    }
    Ok(header)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut head = DMAPacket::new(PacketType::DataHeader, self.link_id,
                                  self.roc_id, self.byte_count);
    head.subsystem = self.subsystem;
    head.valid     = self.valid;
    let mut stream = head.to_bytestream();
    stream.extend_from_slice(&(self.packet_count & 0x7ff).to_le_bytes());
    stream.extend_from_slice(&self.timestamp.to_le_bytes());
    stream.push(self.status);
    stream.push(self.version);
    stream.extend_from_slice(&[0u8;2]);
    stream
  }
}

impl fmt::Display for DataHeaderPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<DataHeaderPacket:");
    repr += &(format!("\n  link/roc     : {}/{}", self.link_id, self.roc_id));
    repr += &(format!("\n  byte count   : {}", self.byte_count));
    repr += &(format!("\n  packet count : {}", self.packet_count));
    repr += &(format!("\n  timestamp    : {}", self.timestamp));
    repr += &(format!("\n  status       : {:#04x}", self.status));
    repr += &(format!("\n  version      : {}>", self.version));
    write!(f, "{}", repr)
  }
}

#[cfg(feature = "random")]
impl crate::FromRandom for DataHeaderPacket {
  fn from_random() -> Self {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut header = Self::new(rng.gen_range(0..6),
                               rng.gen_range(0..6),
                               Timestamp::new(rng.gen::<u64>()),
                               rng.gen_range(0..0x7ff));
    header.status  = rng.gen::<u8>();
    header.version = rng.gen::<u8>();
    header
  }
}

#[cfg(test)]
mod test_data_header {
  use super::*;

  #[test]
  fn consistent_byte_count() {
    let header = DataHeaderPacket::new(1, 2, Timestamp::new(99), 3);
    assert_eq!(header.byte_count, 64);
    assert!(header.is_consistent());
    let bs = header.to_bytestream();
    let mut pos = 0;
    assert_eq!(DataHeaderPacket::from_bytestream(&bs, &mut pos).unwrap(), header);
    assert_eq!(pos, 16);
  }

  #[test]
  fn inconsistent_byte_count() {
    let mut header = DataHeaderPacket::new(1, 2, Timestamp::new(99), 3);
    header.byte_count = 48;
    let bs = header.to_bytestream();
    let mut pos = 0;
    assert_eq!(DataHeaderPacket::from_bytestream(&bs, &mut pos),
               Err(SerializationError::WrongByteSize));
    assert_eq!(pos, 0);
    let unchecked = DataHeaderPacket::from_bytestream_unchecked(&bs, &mut pos).unwrap();
    assert!(!unchecked.is_consistent());
  }
}
