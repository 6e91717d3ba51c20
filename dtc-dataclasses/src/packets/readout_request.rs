//! Readout request (host -> card, DAQ channel)
//!
//! Tells a link that the data for a certain
//! timestamp will be requested soon.

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
    parse_u48,
};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ReadoutRequestPacket {
  pub link_id   : u8,
  pub timestamp : Timestamp,
  pub debug     : bool,
}

impl ReadoutRequestPacket {
  pub fn new(link_id : u8, timestamp : Timestamp, debug : bool) -> Self {
    Self {
      link_id,
      timestamp,
      debug,
    }
  }
}

impl Serialization for ReadoutRequestPacket {
  const SIZE : usize = PACKET_SIZE;

  fn from_bytestream(stream : &[u8],
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    check_remaining(stream, *pos, Self::SIZE)?;
    let start  = *pos;
    let header = DMAPacket::from_bytestream(stream, pos)?;
    if header.packet_type != PacketType::ReadoutRequest {
      *pos = start;
      return Err(SerializationError::IncorrectPacketType);
    }
    *pos += 2;
    let timestamp = Timestamp::new(parse_u48(stream, pos));
    let debug     = (stream[*pos] & 0x1) > 0;
    *pos = start + Self::SIZE;
    Ok(Self {
      link_id : header.link_id,
      timestamp,
      debug,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let header = DMAPacket::new(PacketType::ReadoutRequest, self.link_id, 0, Self::SIZE as u16);
    let mut stream = header.to_bytestream();
    stream.extend_from_slice(&[0u8;2]);
    stream.extend_from_slice(&self.timestamp.to_le_bytes());
    stream.push(self.debug as u8);
    stream.extend_from_slice(&[0u8;3]);
    stream
  }
}

impl fmt::Display for ReadoutRequestPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<ReadoutRequestPacket: link {} {} debug {}>",
           self.link_id, self.timestamp, self.debug)
  }
}

#[cfg(test)]
mod test_readout_request {
  use super::*;

  #[test]
  fn layout() {
    let rr = ReadoutRequestPacket::new(4, Timestamp::new(0x0A0B0C), true);
    let bs = rr.to_bytestream();
    assert_eq!(bs.len(), 16);
    assert_eq!(&bs[6..9], &[0x0C, 0x0B, 0x0A]);
    assert_eq!(bs[12], 1);
    let mut pos = 0;
    assert_eq!(ReadoutRequestPacket::from_bytestream(&bs, &mut pos).unwrap(), rr);
    assert_eq!(pos, 16);
  }
}
