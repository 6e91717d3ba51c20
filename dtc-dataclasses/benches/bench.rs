use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[macro_use]
extern crate log;

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::events::DataBlock;
use dtc_dataclasses::packets::{
    DataHeaderPacket,
    DCSOperationType,
    DCSReplyPacket,
};
use dtc_dataclasses::serialization::Serialization;

/// Walk a buffer with many small data blocks,
/// which is what the DAQ readout does
fn bench_walk_blocks_helper(stream : &[u8]) {
  let mut pos = 0usize;
  while pos < stream.len() {
    let start = pos;
    match DataHeaderPacket::from_bytestream(stream, &mut pos) {
      Err(err) => {
        error!("Can't unpack header! {err}");
        break;
      },
      Ok(header) => {
        pos = start + header.byte_count as usize;
      }
    }
  }
}

fn bench_dcs_block_helper(stream : &[u8]) {
  match DCSReplyPacket::from_bytestream(stream, &mut 0) {
    Err(err) => {
      error!("Can't unpack dcs reply! {err}");
    },
    Ok(_) => (),
  }
}

fn criterion_benchmark(c: &mut Criterion) {
  let mut stream = Vec::<u8>::new();
  for k in 0..1000u64 {
    let header = DataHeaderPacket::new((k % 6) as u8, 0, Timestamp::new(k), 4);
    let block  = DataBlock::from_payload(header, &[0u8;64]);
    stream.extend_from_slice(&block.data);
  }
  c.bench_function("walk 1000 data blocks", 
                   |b| b.iter(|| bench_walk_blocks_helper(black_box(&stream))));
  
  let mut reply = DCSReplyPacket::new(0, 0, DCSOperationType::BlockRead);
  reply.block_data = (0..1024).collect();
  let dcs_stream = reply.to_bytestream();
  c.bench_function("dcs block reply 1024 words", 
                   |b| b.iter(|| bench_dcs_block_helper(black_box(&dcs_stream))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
