use std::fmt;

use crate::Timestamp;
use crate::events::DataBlock;

/// All blocks of one event which came 
/// in over the same link, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct SubEvent {
  pub link_id : u8,
  pub blocks  : Vec<DataBlock>,
}

impl SubEvent {
  pub fn new(link_id : u8) -> Self {
    Self {
      link_id,
      blocks : Vec::<DataBlock>::new(),
    }
  }
}

impl fmt::Display for SubEvent {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<SubEvent: link {} nblocks {}>", self.link_id, self.blocks.len())
  }
}

/// The data of all ROCs for a single timestamp
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
  pub timestamp  : Timestamp,
  pub sub_events : Vec<SubEvent>,
}

impl Event {

  pub fn new(timestamp : Timestamp) -> Self {
    Self {
      timestamp,
      sub_events : Vec::<SubEvent>::new(),
    }
  }

  /// Sort a block into the sub event of its link.
  ///
  /// Sub events are created in the order their 
  /// links first show up.
  pub fn add_block(&mut self, block : DataBlock) {
    let link_id = block.link_id();
    match self.sub_events.iter_mut().find(|se| se.link_id == link_id) {
      Some(se) => se.blocks.push(block),
      None     => {
        let mut se = SubEvent::new(link_id);
        se.blocks.push(block);
        self.sub_events.push(se);
      }
    }
  }

  pub fn n_blocks(&self) -> usize {
    self.sub_events.iter().map(|se| se.blocks.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.n_blocks() == 0
  }

  pub fn blocks(&self) -> impl Iterator<Item = &DataBlock> {
    self.sub_events.iter().flat_map(|se| se.blocks.iter())
  }

  /// Total size of all blocks in bytes
  pub fn size(&self) -> usize {
    self.blocks().map(|b| b.size()).sum()
  }
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<Event: {}", self.timestamp);
    for se in &self.sub_events {
      repr += &(format!("\n  {}", se));
    }
    repr += ">";
    write!(f, "{}", repr)
  }
}

#[cfg(test)]
mod test_event {
  use super::*;
  use crate::packets::DataHeaderPacket;

  fn block(link : u8, roc : u8) -> DataBlock {
    let header = DataHeaderPacket::new(link, roc, Timestamp::new(10), 1);
    DataBlock::from_payload(header, &[0xab;16])
  }

  #[test]
  fn blocks_are_grouped_by_link() {
    let mut ev = Event::new(Timestamp::new(10));
    assert!(ev.is_empty());
    ev.add_block(block(1,0));
    ev.add_block(block(0,0));
    ev.add_block(block(1,1));
    assert_eq!(ev.n_blocks(), 3);
    assert_eq!(ev.sub_events.len(), 2);
    assert_eq!(ev.sub_events[0].link_id, 1);
    assert_eq!(ev.sub_events[0].blocks[1].header.roc_id, 1);
    assert_eq!(ev.size(), 3*32);
    assert_eq!(ev.sub_events[1].blocks[0].payload(), &[0xab;16]);
  }
}
