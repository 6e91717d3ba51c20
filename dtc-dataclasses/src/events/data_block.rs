use std::fmt;

use crate::Timestamp;
use crate::constants::PACKET_SIZE;
use crate::packets::DataHeaderPacket;
use crate::serialization::Serialization;

/// One block of data from a single ROC
///
/// The block owns a copy of its bytes, so it 
/// stays valid after the DMA buffer it came 
/// from has been handed back to the card.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
  pub header : DataHeaderPacket,
  /// The raw bytes of the block, including
  /// the 16 header bytes
  pub data   : Vec<u8>,
}

impl DataBlock {
  
  pub fn new(header : DataHeaderPacket, data : Vec<u8>) -> Self {
    Self {
      header,
      data,
    }
  }

  /// Build a block from a header and the payload
  /// packets following it
  pub fn from_payload(header : DataHeaderPacket, payload : &[u8]) -> Self {
    let mut data = header.to_bytestream();
    data.extend_from_slice(payload);
    Self::new(header, data)
  }

  pub fn timestamp(&self) -> Timestamp {
    self.header.timestamp
  }

  pub fn link_id(&self) -> u8 {
    self.header.link_id
  }

  /// The bytes after the header packet
  pub fn payload(&self) -> &[u8] {
    if self.data.len() <= PACKET_SIZE {
      return &[];
    }
    &self.data[PACKET_SIZE..]
  }

  pub fn size(&self) -> usize {
    self.data.len()
  }
}

impl fmt::Display for DataBlock {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DataBlock: link {} roc {} {} {} bytes>",
           self.header.link_id, self.header.roc_id,
           self.header.timestamp, self.data.len())
  }
}

#[cfg(feature = "random")]
impl crate::FromRandom for DataBlock {
  fn from_random() -> Self {
    use rand::Rng;
    let mut rng    = rand::thread_rng();
    let header     = DataHeaderPacket::new(rng.gen_range(0..6),
                                           rng.gen_range(0..6),
                                           Timestamp::new(rng.gen::<u64>()),
                                           rng.gen_range(0..32));
    let payload : Vec<u8> = (0..header.packet_count as usize * PACKET_SIZE)
      .map(|_| rng.gen::<u8>())
      .collect();
    Self::from_payload(header, &payload)
  }
}
