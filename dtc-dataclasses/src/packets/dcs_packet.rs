//! DCS request/reply packets
//!
//! Register transactions with the ROCs behind 
//! the links. Requests and replies share the 
//! same layout:
//!
//! ```text
//! byte 0-3   : common header, hop count = ROC id
//! byte 4     : [3:0] operation, [4] request ack
//! byte 5     : number of continuation packets
//! byte 6-7   : address 1
//! byte 8-9   : data 1 (word count for block operations)
//! byte 10-11 : address 2 (first block word)
//! byte 12-13 : data 2    (second block word)
//! byte 14-15 : reserved  (third block word)
//! ```
//!
//! Block operations carry the remaining words in 
//! continuation packets, 8 words each.

use std::fmt;

use crate::constants::{
    PACKET_SIZE,
    DCS_FIRST_PACKET_WORDS,
    DCS_WORDS_PER_PACKET,
    DCS_MAX_BLOCK_WORDS,
};
use crate::errors::DTCError;
use crate::packets::{
    DMAPacket,
    PacketType,
};
use crate::serialization::{
    Serialization,
    SerializationError,
    check_remaining,
    parse_u16,
    parse_u8,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DCSOperationType {
  Read        = 0,
  Write       = 1,
  BlockRead   = 2,
  BlockWrite  = 3,
  DoubleRead  = 4,
  DoubleWrite = 5,
}

impl DCSOperationType {
  pub fn to_u8(&self) -> u8 {
    *self as u8
  }

  pub fn from_u8(value : u8) -> Option<Self> {
    match value {
      0 => Some(DCSOperationType::Read),
      1 => Some(DCSOperationType::Write),
      2 => Some(DCSOperationType::BlockRead),
      3 => Some(DCSOperationType::BlockWrite),
      4 => Some(DCSOperationType::DoubleRead),
      5 => Some(DCSOperationType::DoubleWrite),
      _ => None
    }
  }

  pub fn is_block(&self) -> bool {
    matches!(self, DCSOperationType::BlockRead | DCSOperationType::BlockWrite)
  }

  pub fn is_double(&self) -> bool {
    matches!(self, DCSOperationType::DoubleRead | DCSOperationType::DoubleWrite)
  }

  pub fn is_read(&self) -> bool {
    matches!(self, DCSOperationType::Read 
                 | DCSOperationType::BlockRead 
                 | DCSOperationType::DoubleRead)
  }
}

impl fmt::Display for DCSOperationType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      DCSOperationType::Read        => {repr = String::from("Read");}
      DCSOperationType::Write       => {repr = String::from("Write");}
      DCSOperationType::BlockRead   => {repr = String::from("BlockRead");}
      DCSOperationType::BlockWrite  => {repr = String::from("BlockWrite");}
      DCSOperationType::DoubleRead  => {repr = String::from("DoubleRead");}
      DCSOperationType::DoubleWrite => {repr = String::from("DoubleWrite");}
    }
    write!(f, "<DCSOperationType: {}>", repr)
  }
}

/// Number of continuation packets needed for 
/// a block of nwords
pub fn dcs_block_packet_count(nwords : usize) -> usize {
  if nwords <= DCS_FIRST_PACKET_WORDS {
    return 0;
  }
  (nwords - DCS_FIRST_PACKET_WORDS + DCS_WORDS_PER_PACKET - 1) / DCS_WORDS_PER_PACKET
}

/// Fields common to requests and replies
#[derive(Debug, Clone, PartialEq)]
struct DCSFields {
  link_id     : u8,
  roc_id      : u8,
  op          : DCSOperationType,
  request_ack : bool,
  address     : u16,
  data        : u16,
  address2    : u16,
  data2       : u16,
  block_data  : Vec<u16>,
}

impl DCSFields {

  fn encode(&self, packet_type : PacketType) -> Vec<u8> {
    let mut block = self.block_data.clone();
    let mut data  = self.data;
    let mut n_cont = 0usize;
    if self.op.is_block() {
      if block.len() > DCS_MAX_BLOCK_WORDS {
        error!("DCS block of {} words exceeds {} words, truncating!",
               block.len(), DCS_MAX_BLOCK_WORDS);
        block.truncate(DCS_MAX_BLOCK_WORDS);
      }
      if !block.is_empty() {
        data = block.len() as u16;
      }
      n_cont = dcs_block_packet_count(block.len());
      block.resize(DCS_FIRST_PACKET_WORDS + n_cont * DCS_WORDS_PER_PACKET, 0);
    }
    let byte_count = (PACKET_SIZE * (1 + n_cont)) as u16;
    let head       = DMAPacket::new(packet_type, self.link_id, self.roc_id, byte_count);
    let mut stream = head.to_bytestream();
    stream.push(self.op.to_u8() | ((self.request_ack as u8) << 4));
    stream.push(n_cont as u8);
    stream.extend_from_slice(&self.address.to_le_bytes());
    stream.extend_from_slice(&data.to_le_bytes());
    if self.op.is_block() {
      for w in block {
        stream.extend_from_slice(&w.to_le_bytes());
      }
    } else {
      stream.extend_from_slice(&self.address2.to_le_bytes());
      stream.extend_from_slice(&self.data2.to_le_bytes());
      stream.extend_from_slice(&[0u8;2]);
    }
    stream
  }

  /// Block payloads are truncated to the word count
  /// given in the data field, trailing words and 
  /// packets beyond are skipped.
  fn decode(stream      : &[u8],
            pos         : &mut usize,
            packet_type : PacketType) -> Result<Self, SerializationError> {
    check_remaining(stream, *pos, PACKET_SIZE)?;
    let start = *pos;
    let head  = DMAPacket::from_bytestream(stream, pos)?;
    if head.packet_type != packet_type {
      *pos = start;
      return Err(SerializationError::IncorrectPacketType);
    }
    let op_byte = parse_u8(stream, pos);
    let n_cont  = parse_u8(stream, pos) as usize;
    let op      = match DCSOperationType::from_u8(op_byte & 0xf) {
      Some(op) => op,
      None     => {
        *pos = start;
        return Err(SerializationError::UnknownOperation);
      }
    };
    if head.n_continuation_packets() != n_cont {
      error!("DCS packet byte count {} does not match {} continuation packets!",
             head.byte_count, n_cont);
      *pos = start;
      return Err(SerializationError::WrongByteSize);
    }
    let total_size = PACKET_SIZE * (1 + n_cont);
    if start + total_size > stream.len() {
      *pos = start;
      return Err(SerializationError::StreamTooShort);
    }
    let address = parse_u16(stream, pos);
    let data    = parse_u16(stream, pos);
    let mut fields = DCSFields {
      link_id     : head.link_id,
      roc_id      : head.hop_count,
      op,
      request_ack : (op_byte & 0x10) > 0,
      address,
      data,
      address2    : 0,
      data2       : 0,
      block_data  : Vec::<u16>::new(),
    };
    if op.is_block() {
      let nwords = data as usize;
      let mut processed_words = 0usize;
      let mut word_pos = start + 10;
      let mut packet_end = start + PACKET_SIZE;
      let mut packet = 0usize;
      while processed_words < nwords {
        if word_pos >= packet_end {
          packet += 1;
          if packet > n_cont {
            break;
          }
          word_pos   = start + packet * PACKET_SIZE;
          packet_end = word_pos + PACKET_SIZE;
        }
        fields.block_data.push(parse_u16(stream, &mut word_pos));
        processed_words += 1;
      }
      if processed_words < nwords {
        debug!("DCS block announced {} words, but carries only {}", nwords, processed_words);
      }
    } else {
      fields.address2 = parse_u16(stream, pos);
      fields.data2    = parse_u16(stream, pos);
    }
    *pos = start + total_size;
    Ok(fields)
  }
}

/// A register transaction request for a single ROC
#[derive(Debug, Clone, PartialEq)]
pub struct DCSRequestPacket {
  pub link_id     : u8,
  pub roc_id      : u8,
  pub op          : DCSOperationType,
  /// Ask the ROC to acknowledge a write
  pub request_ack : bool,
  pub address     : u16,
  /// Register value, or the number of words
  /// for block operations
  pub data        : u16,
  pub address2    : u16,
  pub data2       : u16,
  /// Payload of a block write
  pub block_data  : Vec<u16>,
}

impl DCSRequestPacket {

  pub fn new(link_id : u8, roc_id : u8, op : DCSOperationType) -> Self {
    Self {
      link_id,
      roc_id,
      op,
      request_ack : false,
      address     : 0,
      data        : 0,
      address2    : 0,
      data2       : 0,
      block_data  : Vec::<u16>::new(),
    }
  }

  pub fn read(link_id : u8, roc_id : u8, address : u16) -> Self {
    let mut req = Self::new(link_id, roc_id, DCSOperationType::Read);
    req.address = address;
    req
  }

  pub fn write(link_id : u8, roc_id : u8, address : u16, data : u16, request_ack : bool) -> Self {
    let mut req = Self::new(link_id, roc_id, DCSOperationType::Write);
    req.address     = address;
    req.data        = data;
    req.request_ack = request_ack;
    req
  }

  pub fn block_read(link_id : u8, roc_id : u8, address : u16, word_count : u16) -> Self {
    let mut req = Self::new(link_id, roc_id, DCSOperationType::BlockRead);
    req.address = address;
    req.data    = word_count;
    req
  }

  /// Fails with `PacketTooLarge` for more than
  /// `DCS_MAX_BLOCK_WORDS` words
  pub fn block_write(link_id : u8, roc_id : u8, address : u16, words : &[u16], request_ack : bool)
    -> Result<Self, DTCError> {
    if words.len() > DCS_MAX_BLOCK_WORDS {
      return Err(DTCError::PacketTooLarge);
    }
    let mut req = Self::new(link_id, roc_id, DCSOperationType::BlockWrite);
    req.address     = address;
    req.data        = words.len() as u16;
    req.block_data  = words.to_vec();
    req.request_ack = request_ack;
    Ok(req)
  }

  fn fields(&self) -> DCSFields {
    DCSFields {
      link_id     : self.link_id,
      roc_id      : self.roc_id,
      op          : self.op,
      request_ack : self.request_ack,
      address     : self.address,
      data        : self.data,
      address2    : self.address2,
      data2       : self.data2,
      block_data  : self.block_data.clone(),
    }
  }
}

impl Serialization for DCSRequestPacket {
  
  fn from_bytestream(stream : &[u8],
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    let f = DCSFields::decode(stream, pos, PacketType::DCSRequest)?;
    Ok(Self {
      link_id     : f.link_id,
      roc_id      : f.roc_id,
      op          : f.op,
      request_ack : f.request_ack,
      address     : f.address,
      data        : f.data,
      address2    : f.address2,
      data2       : f.data2,
      block_data  : f.block_data,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    self.fields().encode(PacketType::DCSRequest)
  }
}

impl fmt::Display for DCSRequestPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DCSRequestPacket: {} link {} roc {} addr {:#06x} data {:#06x} addr2 {:#06x} data2 {:#06x} nblock {}>",
           self.op, self.link_id, self.roc_id, self.address,
           self.data, self.address2, self.data2, self.block_data.len())
  }
}

/// The answer of a ROC to a DCS request
#[derive(Debug, Clone, PartialEq)]
pub struct DCSReplyPacket {
  pub link_id     : u8,
  pub roc_id      : u8,
  pub op          : DCSOperationType,
  pub request_ack : bool,
  pub address     : u16,
  pub data        : u16,
  pub address2    : u16,
  pub data2       : u16,
  /// Payload of a block read, exactly
  /// `data` words long
  pub block_data  : Vec<u16>,
}

impl DCSReplyPacket {

  pub fn new(link_id : u8, roc_id : u8, op : DCSOperationType) -> Self {
    Self {
      link_id,
      roc_id,
      op,
      request_ack : false,
      address     : 0,
      data        : 0,
      address2    : 0,
      data2       : 0,
      block_data  : Vec::<u16>::new(),
    }
  }

  /// Does this reply answer a request for 
  /// (link, address)?
  pub fn matches(&self, link_id : u8, address : u16) -> bool {
    self.link_id == link_id && self.address == address
  }

  fn fields(&self) -> DCSFields {
    DCSFields {
      link_id     : self.link_id,
      roc_id      : self.roc_id,
      op          : self.op,
      request_ack : self.request_ack,
      address     : self.address,
      data        : self.data,
      address2    : self.address2,
      data2       : self.data2,
      block_data  : self.block_data.clone(),
    }
  }
}

impl Serialization for DCSReplyPacket {
  
  fn from_bytestream(stream : &[u8],
                     pos    : &mut usize)
    -> Result<Self, SerializationError> {
    let f = DCSFields::decode(stream, pos, PacketType::DCSReply)?;
    Ok(Self {
      link_id     : f.link_id,
      roc_id      : f.roc_id,
      op          : f.op,
      request_ack : f.request_ack,
      address     : f.address,
      data        : f.data,
      address2    : f.address2,
      data2       : f.data2,
      block_data  : f.block_data,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    self.fields().encode(PacketType::DCSReply)
  }
}

impl fmt::Display for DCSReplyPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DCSReplyPacket: {} link {} roc {} addr {:#06x} data {:#06x} addr2 {:#06x} data2 {:#06x} nblock {}>",
           self.op, self.link_id, self.roc_id, self.address,
           self.data, self.address2, self.data2, self.block_data.len())
  }
}

#[cfg(test)]
mod test_dcs_packet {
  use super::*;

  #[test]
  fn continuation_packet_count() {
    assert_eq!(dcs_block_packet_count(0), 0);
    assert_eq!(dcs_block_packet_count(3), 0);
    assert_eq!(dcs_block_packet_count(4), 1);
    assert_eq!(dcs_block_packet_count(11), 1);
    assert_eq!(dcs_block_packet_count(12), 2);
  }

  #[test]
  fn single_read_layout() {
    let req = DCSRequestPacket::read(2, 1, 5);
    let bs  = req.to_bytestream();
    assert_eq!(bs.len(), 16);
    assert_eq!(bs[2] >> 4, PacketType::DCSREQUEST);
    assert_eq!(bs[4], 0);
    assert_eq!(u16::from_le_bytes([bs[6], bs[7]]), 5);
    let back = DCSRequestPacket::from_bytestream(&bs, &mut 0).unwrap();
    assert_eq!(back, req);
  }

  #[test]
  fn block_write_spans_packets() {
    let words : Vec<u16> = (0..13).collect();
    let req = DCSRequestPacket::block_write(0, 0, 0x10, &words, true).unwrap();
    let bs  = req.to_bytestream();
    // 3 words in the first, 8 + 2 in the continuation packets
    assert_eq!(bs.len(), 48);
    assert_eq!(bs[5], 2);
    assert_eq!(bs[4], 0x13);
    let back = DCSRequestPacket::from_bytestream(&bs, &mut 0).unwrap();
    assert_eq!(back.block_data, words);
  }

  #[test]
  fn block_write_size_limit() {
    let words : Vec<u16> = (0..DCS_MAX_BLOCK_WORDS as u16).collect();
    let req = DCSRequestPacket::block_write(3, 1, 0x20, &words, false).unwrap();
    let bs  = req.to_bytestream();
    assert_eq!(bs.len(), 16 * 256);
    assert_eq!(bs[5], 255);
    let back = DCSRequestPacket::from_bytestream(&bs, &mut 0).unwrap();
    assert_eq!(back.block_data.len(), DCS_MAX_BLOCK_WORDS);
    assert_eq!(back.block_data, words);

    let words : Vec<u16> = vec![7; DCS_MAX_BLOCK_WORDS + 1];
    assert_eq!(DCSRequestPacket::block_write(3, 1, 0x20, &words, false),
               Err(DTCError::PacketTooLarge));
  }

  #[test]
  fn oversized_reply_is_truncated() {
    let mut reply = DCSReplyPacket::new(0, 0, DCSOperationType::BlockRead);
    reply.block_data = vec![1; DCS_MAX_BLOCK_WORDS + 57];
    let bs = reply.to_bytestream();
    assert_eq!(bs[5], 255);
    let back = DCSReplyPacket::from_bytestream(&bs, &mut 0).unwrap();
    assert_eq!(back.block_data.len(), DCS_MAX_BLOCK_WORDS);
  }

  #[test]
  fn block_read_truncates_to_word_count() {
    let mut reply = DCSReplyPacket::new(1, 0, DCSOperationType::BlockRead);
    reply.address    = 7;
    reply.block_data = (100..112).collect();
    let mut bs = reply.to_bytestream();
    // claim fewer words than physically present
    bs[8] = 5;
    bs[9] = 0;
    let mut pos = 0;
    let back = DCSReplyPacket::from_bytestream(&bs, &mut pos).unwrap();
    assert_eq!(back.block_data, vec![100, 101, 102, 103, 104]);
    // all declared packets are consumed
    assert_eq!(pos, bs.len());
  }

  #[test]
  fn reply_matching() {
    let mut reply = DCSReplyPacket::new(2, 0, DCSOperationType::Read);
    reply.address = 5;
    assert!(reply.matches(2, 5));
    assert!(!reply.matches(1, 5));
    assert!(!reply.matches(2, 6));
  }
}
