//! Payloads of the simulated ROCs
//!
//! Everything is a pure function of (timestamp, 
//! link, roc, packet index), so the same request 
//! always gets the same answer.

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::constants::PACKET_SIZE;

use crate::simulator::SimMode;

/// Number of payload packets a ROC sends for 
/// a timestamp, if the data request does not
/// ask for a specific count
pub fn packet_count(mode : SimMode, ts : Timestamp, link : u8, roc : u8) -> u16 {
  match mode {
    SimMode::Calorimeter => 2 + ((ts.value() + roc as u64) % 3) as u16,
    SimMode::CosmicVeto  => 1,
    SimMode::Performance => 8,
    // tracker like data for everything else
    _ => 1 + ((ts.value() + link as u64) % 4) as u16,
  }
}

fn word(mode : SimMode, ts : Timestamp, link : u8, roc : u8, packet : usize, w : usize) -> u16 {
  let ts_low = (ts.value() & 0xFFFF) as u16;
  let id     = ((link as u16) << 4) | roc as u16;
  match mode {
    SimMode::Calorimeter => {
      // [channel id, then 7 adc samples of a pulse]
      if w == 0 {
        (id << 8) | (packet as u16 & 0xFF)
      } else {
        let peak = 400u16.wrapping_add(ts_low & 0xFF);
        let dist = (w as i32 - 3).unsigned_abs() as u16;
        peak >> dist
      }
    }
    SimMode::CosmicVeto => {
      0xC000 | (id << 6) | ((ts_low.wrapping_add(w as u16)) & 0x3F)
    }
    SimMode::Performance => {
      // a counter across the whole block
      (packet * 8 + w) as u16
    }
    _ => {
      // [straw index, tdc, tot, 5 adc samples]
      match w {
        0 => (id << 7) | (packet as u16 & 0x7F),
        1 => ts_low.wrapping_add(packet as u16),
        2 => (packet as u16 + link as u16) & 0xF,
        _ => 0x100 + ((w as u16) << 4) + roc as u16,
      }
    }
  }
}

/// The payload packets (without header) of one 
/// data block
pub fn payload(mode : SimMode, ts : Timestamp, link : u8, roc : u8, npackets : usize) -> Vec<u8> {
  let mut data = Vec::<u8>::with_capacity(npackets * PACKET_SIZE);
  for packet in 0..npackets {
    for w in 0..PACKET_SIZE/2 {
      data.extend_from_slice(&word(mode, ts, link, roc, packet, w).to_le_bytes());
    }
  }
  data
}
