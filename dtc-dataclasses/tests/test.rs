#[cfg(test)]
pub mod tests {

  extern crate rand;
  use rand::Rng;
  use dtc_dataclasses::FromRandom;
  use dtc_dataclasses::Timestamp;
  use dtc_dataclasses::constants::PACKET_SIZE;
  use dtc_dataclasses::events::{DataBlock, Event};
  use dtc_dataclasses::packets::{
    DataHeaderPacket,
    DCSOperationType,
    DCSReplyPacket,
    DCSRequestPacket,
    DMAPacket,
    PacketType,
  };
  use dtc_dataclasses::serialization::Serialization;

  #[test]
  fn serialization_circle_test_for_dataheader() {
    for _n in 0..100 {
      let header = DataHeaderPacket::from_random();
      let stream = header.to_bytestream();
      let mut pos = 0usize;
      let back = DataHeaderPacket::from_bytestream(&stream, &mut pos).unwrap();
      assert_eq!(back, header);
      assert_eq!(pos, PACKET_SIZE);
    }
  }

  #[test]
  fn datablocks_in_a_row() {
    // blocks written back to back can be walked 
    // with the byte count of each header
    let mut stream = Vec::<u8>::new();
    let mut blocks = Vec::<DataBlock>::new();
    for _ in 0..20 {
      let block = DataBlock::from_random();
      stream.extend_from_slice(&block.data);
      blocks.push(block);
    }
    let mut pos = 0usize;
    for block in blocks {
      let start  = pos;
      let header = DataHeaderPacket::from_bytestream(&stream, &mut pos).unwrap();
      assert_eq!(header, block.header);
      assert_eq!(DMAPacket::peek_type(&stream, start), Some(PacketType::DataHeader));
      pos = start + header.byte_count as usize;
    }
    assert_eq!(pos, stream.len());
  }

  #[test]
  fn dcs_block_reply_random_lengths() {
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
      let nwords = rng.gen_range(0..200usize);
      let mut reply = DCSReplyPacket::new(rng.gen_range(0..6), 0, DCSOperationType::BlockRead);
      reply.address    = rng.gen::<u16>();
      reply.block_data = (0..nwords).map(|_| rng.gen::<u16>()).collect();
      let stream = reply.to_bytestream();
      assert_eq!(stream.len() % PACKET_SIZE, 0);
      let back = DCSReplyPacket::from_bytestream(&stream, &mut 0).unwrap();
      assert_eq!(back.block_data, reply.block_data);
      assert_eq!(back.data as usize, nwords);
    }
  }

  #[test]
  fn dcs_double_request() {
    let mut req = DCSRequestPacket::new(3, 2, DCSOperationType::DoubleWrite);
    req.address  = 1;
    req.data     = 0xbeef;
    req.address2 = 2;
    req.data2    = 0xcafe;
    let stream = req.to_bytestream();
    assert_eq!(stream.len(), PACKET_SIZE);
    let back = DCSRequestPacket::from_bytestream(&stream, &mut 0).unwrap();
    assert_eq!(back, req);
    // a request is not a reply
    assert!(DCSReplyPacket::from_bytestream(&stream, &mut 0).is_err());
  }

  #[test]
  fn event_from_random_blocks() {
    let ts = Timestamp::from_random();
    let mut ev = Event::new(ts);
    for _ in 0..12 {
      let mut block = DataBlock::from_random();
      block.header.timestamp = ts;
      ev.add_block(block);
    }
    assert_eq!(ev.n_blocks(), 12);
    assert!(ev.sub_events.len() <= 6);
    assert!(ev.blocks().all(|b| b.timestamp() == ts));
  }
}
