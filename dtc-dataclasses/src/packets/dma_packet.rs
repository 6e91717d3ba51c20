//! The common header of all DMA packets
//!
//! ```text
//! byte 0-1 : byte count (of the whole packet, incl. continuation packets)
//! byte 2   : [3:0] link id, [7:4] packet type
//! byte 3   : [3:0] hop count, [6:4] subsystem, [7] valid
//! ```
//!
//! For requests which address a single ROC, the ROC
//! id travels in the hop count nibble.

use std::fmt;

use crate::packets::PacketType;
use crate::serialization::{
    Serialization,
    SerializationError,
    check_remaining,
    parse_u8,
    parse_u16,
};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DMAPacket {
  pub byte_count  : u16,
  pub packet_type : PacketType,
  pub link_id     : u8,
  pub hop_count   : u8,
  pub subsystem   : u8,
  pub valid       : bool,
}

impl DMAPacket {

  pub fn new(packet_type : PacketType,
             link_id     : u8,
             hop_count   : u8,
             byte_count  : u16) -> Self {
    Self {
      byte_count,
      packet_type,
      link_id     : link_id   & 0xf,
      hop_count   : hop_count & 0xf,
      subsystem   : 0,
      valid       : true,
    }
  }

  /// Take a look at the type of the packet at 
  /// position pos without decoding it.
  ///
  /// Returns None for an unknown type or if the 
  /// stream is too short.
  pub fn peek_type(bs : &[u8], pos : usize) -> Option<PacketType> {
    if pos + 3 > bs.len() {
      return None;
    }
    PacketType::from_u8(bs[pos + 2] >> 4)
  }

  /// Number of 16 byte packets which follow 
  /// the first one, according to byte count
  pub fn n_continuation_packets(&self) -> usize {
    (self.byte_count as usize / 16).saturating_sub(1)
  }
}

impl Serialization for DMAPacket {
  const SIZE : usize = 4;

  fn from_bytestream(stream : &[u8],
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    check_remaining(stream, *pos, Self::SIZE)?;
    let byte_count  = parse_u16(stream, pos);
    let link_type   = parse_u8(stream, pos);
    let hop_byte    = parse_u8(stream, pos);
    let packet_type = match PacketType::from_u8(link_type >> 4) {
      Some(pt) => pt,
      None     => {
        trace!("Unknown packet type {} in header", link_type >> 4);
        return Err(SerializationError::IncorrectPacketType);
      }
    };
    Ok(Self {
      byte_count,
      packet_type,
      link_id    : link_type & 0xf,
      hop_count  : hop_byte & 0xf,
      subsystem  : (hop_byte >> 4) & 0x7,
      valid      : (hop_byte & 0x80) > 0,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&self.byte_count.to_le_bytes());
    stream.push((self.link_id & 0xf) | (PacketType::as_u8(&self.packet_type) << 4));
    let mut hop_byte = (self.hop_count & 0xf) | ((self.subsystem & 0x7) << 4);
    if self.valid {
      hop_byte |= 0x80;
    }
    stream.push(hop_byte);
    stream
  }
}

impl fmt::Display for DMAPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DMAPacket: {} link {} hop {} subsystem {} valid {} byte count {}>",
           self.packet_type, self.link_id, self.hop_count,
           self.subsystem, self.valid, self.byte_count)
  }
}

#[cfg(test)]
mod test_dma_packet {
  use super::*;

  #[test]
  fn header_bit_layout() {
    let mut head = DMAPacket::new(PacketType::DataRequest, 3, 5, 16);
    head.subsystem = 2;
    let bs = head.to_bytestream();
    assert_eq!(bs, vec![16, 0, 0x23, 0x80 | 0x20 | 5]);
    let mut pos = 0;
    let back = DMAPacket::from_bytestream(&bs, &mut pos).unwrap();
    assert_eq!(back, head);
    assert_eq!(pos, 4);
  }

  #[test]
  fn unknown_type_is_rejected() {
    let bs = vec![16u8, 0, 0x71, 0x80];
    assert_eq!(DMAPacket::from_bytestream(&bs, &mut 0),
               Err(SerializationError::IncorrectPacketType));
    assert_eq!(DMAPacket::peek_type(&bs, 0), None);
  }
}
