//! Data request (host -> card, DAQ channel)
//!
//! Asks a single ROC behind a link for its 
//! data of a certain timestamp.

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
pub struct DataRequestPacket {
  pub link_id       : u8,
  pub roc_id        : u8,
  pub timestamp     : Timestamp,
  /// Number of packets the ROC should send, 
  /// only honored in debug mode
  pub request_count : u16,
  pub debug         : bool,
  /// 4 bit debug type
  pub debug_type    : u8,
}

impl DataRequestPacket {
  pub fn new(link_id : u8, roc_id : u8, timestamp : Timestamp) -> Self {
    Self {
      link_id,
      roc_id,
      timestamp,
      request_count : 0,
      debug         : false,
      debug_type    : 0,
    }
  }
}

impl Serialization for DataRequestPacket {
  const SIZE : usize = PACKET_SIZE;

  fn from_bytestream(stream : &[u8],
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    check_remaining(stream, *pos, Self::SIZE)?;
    let start  = *pos;
    let header = DMAPacket::from_bytestream(stream, pos)?;
    if header.packet_type != PacketType::DataRequest {
      *pos = start;
      return Err(SerializationError::IncorrectPacketType);
    }
    let request_count = parse_u16(stream, pos);
    let timestamp     = Timestamp::new(parse_u48(stream, pos));
    let debug_byte    = parse_u8(stream, pos);
    *pos = start + Self::SIZE;
    Ok(Self {
      link_id    : header.link_id,
      roc_id     : header.hop_count,
      timestamp,
      request_count,
      debug      : (debug_byte & 0x1) > 0,
      debug_type : debug_byte >> 4,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let header = DMAPacket::new(PacketType::DataRequest, self.link_id,
                                self.roc_id, Self::SIZE as u16);
    let mut stream = header.to_bytestream();
    stream.extend_from_slice(&self.request_count.to_le_bytes());
    stream.extend_from_slice(&self.timestamp.to_le_bytes());
    stream.push((self.debug as u8) | ((self.debug_type & 0xf) << 4));
    stream.extend_from_slice(&[0u8;3]);
    stream
  }
}

impl fmt::Display for DataRequestPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DataRequestPacket: link {} roc {} {} count {} debug {} ({})>",
           self.link_id, self.roc_id, self.timestamp,
           self.request_count, self.debug, self.debug_type)
  }
}

#[cfg(test)]
mod test_data_request {
  use super::*;

  #[test]
  fn roc_in_hop_count() {
    let mut dr = DataRequestPacket::new(2, 3, Timestamp::new(77));
    dr.debug         = true;
    dr.debug_type    = 0x5;
    dr.request_count = 12;
    let bs = dr.to_bytestream();
    assert_eq!(bs[3] & 0xf, 3);
    assert_eq!(bs[12], 0x51);
    let back = DataRequestPacket::from_bytestream(&bs, &mut 0).unwrap();
    assert_eq!(back, dr);
  }

  #[test]
  fn wrong_type_leaves_position() {
    let rr = crate::packets::ReadoutRequestPacket::new(0, Timestamp::new(1), false);
    let bs = rr.to_bytestream();
    let mut pos = 0;
    assert_eq!(DataRequestPacket::from_bytestream(&bs, &mut pos),
               Err(SerializationError::IncorrectPacketType));
    assert_eq!(pos, 0);
  }
}
