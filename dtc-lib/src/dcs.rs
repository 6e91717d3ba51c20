//! Register transactions with the ROCs over the DCS channel
//!
//! Every request is answered (if at all) by a reply 
//! carrying the link and address of the request. 
//! Replies for other requests (late answers of an 
//! earlier transaction) are skipped. If nothing comes 
//! back, the request is sent again, up to the given 
//! number of retries. Running out of retries is not
//! an error, reads then return `DCS_UNKNOWN_VALUE`.

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
};
use std::thread;
use std::time::Duration;

use dtc_dataclasses::constants::{
    DCS_MAX_BLOCK_WORDS,
    DCS_UNKNOWN_VALUE,
    EMPTY_BUFFER_MARKER,
    PACKET_SIZE,
};
use dtc_dataclasses::errors::DTCError;
use dtc_dataclasses::packets::{
    DCSOperationType,
    DCSReplyPacket,
    DCSRequestPacket,
    DMAPacket,
    PacketType,
};
use dtc_dataclasses::serialization::Serialization;

use crate::memory::*;

/// Time the ROC needs to answer in microsec
pub const DCS_SETTLE_USEC     : u64   = 2500;
pub const DCS_DEFAULT_RETRIES : usize = 10;

/// ROC registers used to reach the extended 
/// register space
pub const EXT_REG_BLOCK   : u16 = 12;
pub const EXT_REG_ADDRESS : u16 = 13;
pub const EXT_REG_DATA    : u16 = 22;
/// set in the address register to start the read
pub const EXT_REG_STROBE  : u16 = 0x8000;

#[derive(Debug, Default)]
struct DcsCursor {
  buffer : Option<DmaBuffer>,
  offset : usize,
}

pub struct DCSEngine {
  device          : Arc<dyn DeviceTransport>,
  cursor          : Mutex<DcsCursor>,
  read_timeout_ms : u64,
  settle          : Duration,
}

impl DCSEngine {

  pub fn new(device : Arc<dyn DeviceTransport>, read_timeout_ms : u64) -> Self {
    Self {
      device,
      cursor : Mutex::new(DcsCursor::default()),
      read_timeout_ms,
      settle : Duration::from_micros(DCS_SETTLE_USEC),
    }
  }

  /// Change the time to wait for the ROC
  pub fn set_settle_time(&mut self, settle : Duration) {
    self.settle = settle;
  }

  fn lock(&self) -> Result<MutexGuard<'_, DcsCursor>, DTCError> {
    match self.cursor.lock() {
      Ok(c)    => Ok(c),
      Err(err) => {
        error!("DCS cursor poisoned! {err}");
        Err(DTCError::IoError)
      }
    }
  }

  fn send(&self, req : &DCSRequestPacket) -> Result<(), DTCError> {
    trace!("Sending {}", req);
    let buffer = DmaBuffer::from_payload(&req.to_bytestream());
    self.device.write_data(DmaChannel::DCS, buffer.as_bytes())
  }

  /// Drop the current buffer and hand it back
  fn leave_buffer(&self, cursor : &mut DcsCursor) -> Result<(), DTCError> {
    if cursor.buffer.take().is_some() {
      cursor.offset = 0;
      self.device.read_release(DmaChannel::DCS, 1)?;
    }
    Ok(())
  }

  /// The next reply in the DCS stream, None if
  /// there is nothing within the timeout
  pub fn read_next_dcs_packet(&self, timeout_ms : u64) -> Result<Option<DCSReplyPacket>, DTCError> {
    let mut cursor = self.lock()?;
    loop {
      if cursor.buffer.is_none() {
        let buffer = self.device.read_data(DmaChannel::DCS, timeout_ms)?;
        if buffer.is_empty() {
          return Ok(None);
        }
        cursor.buffer = Some(buffer);
        cursor.offset = 0;
      }
      let offset = cursor.offset;
      let parsed = match &cursor.buffer {
        None         => continue,
        Some(buffer) => {
          let payload = buffer.payload();
          if offset + PACKET_SIZE > payload.len() {
            None
          } else {
            let marker = u16::from_le_bytes([payload[offset], payload[offset + 1]]);
            if marker == 0 || marker == EMPTY_BUFFER_MARKER {
              None
            } else if DMAPacket::peek_type(payload, offset) != Some(PacketType::DCSReply) {
              warn!("Unexpected packet in the DCS stream, skipping the buffer");
              None
            } else {
              let mut pos = offset;
              Some(DCSReplyPacket::from_bytestream(payload, &mut pos).map(|r| (r, pos)))
            }
          }
        }
      };
      match parsed {
        None => {
          self.leave_buffer(&mut cursor)?;
        }
        Some(Err(err)) => {
          error!("Unable to decode DCS reply! {err}");
          self.leave_buffer(&mut cursor)?;
          return Err(DTCError::from(err));
        }
        Some(Ok((reply, pos))) => {
          trace!("Got {}", reply);
          cursor.offset = pos;
          return Ok(Some(reply));
        }
      }
    }
  }

  /// Send a request and wait for the matching reply
  fn transact(&self, req : &DCSRequestPacket, retries : usize) -> Result<Option<DCSReplyPacket>, DTCError> {
    self.send(req)?;
    thread::sleep(self.settle);
    for attempt in 0..retries {
      loop {
        match self.read_next_dcs_packet(self.read_timeout_ms) {
          Ok(Some(reply)) => {
            if reply.matches(req.link_id, req.address) && reply.op == req.op {
              return Ok(Some(reply));
            }
            warn!("Skipping stale reply {}", reply);
          }
          Ok(None) => break,
          Err(DTCError::Timeout) => {
            debug!("Reply buffer for {} did not complete in attempt {}", req, attempt);
            break;
          }
          Err(err) if err.is_corruption() || err == DTCError::WrongPacketType => {
            warn!("Corrupted DCS reply in attempt {}! {err}", attempt);
            break;
          }
          Err(err) => return Err(err),
        }
      }
      if attempt + 1 == retries {
        break;
      }
      debug!("No reply for {} (attempt {} of {}), sending again", req, attempt + 1, retries);
      self.send(req)?;
      thread::sleep(self.settle);
    }
    warn!("Giving up on {} after {} attempts", req, retries);
    Ok(None)
  }

  pub fn read_roc_register(&self, link_id : u8, roc_id : u8, address : u16, retries : usize) 
    -> Result<u16, DTCError> {
    let req = DCSRequestPacket::read(link_id, roc_id, address);
    match self.transact(&req, retries)? {
      Some(reply) => Ok(reply.data),
      None        => Ok(DCS_UNKNOWN_VALUE),
    }
  }

  pub fn read_roc_register_double(&self, 
                                  link_id  : u8,
                                  roc_id   : u8,
                                  address  : u16,
                                  address2 : u16,
                                  retries  : usize) -> Result<(u16, u16), DTCError> {
    let mut req = DCSRequestPacket::new(link_id, roc_id, DCSOperationType::DoubleRead);
    req.address  = address;
    req.address2 = address2;
    match self.transact(&req, retries)? {
      Some(reply) => Ok((reply.data, reply.data2)),
      None        => Ok((DCS_UNKNOWN_VALUE, DCS_UNKNOWN_VALUE)),
    }
  }

  pub fn write_roc_register(&self, 
                            link_id     : u8,
                            roc_id      : u8,
                            address     : u16,
                            data        : u16,
                            request_ack : bool) -> Result<(), DTCError> {
    self.send(&DCSRequestPacket::write(link_id, roc_id, address, data, request_ack))
  }

  pub fn write_roc_register_double(&self, 
                                   link_id  : u8,
                                   roc_id   : u8,
                                   address  : u16,
                                   data     : u16,
                                   address2 : u16,
                                   data2    : u16) -> Result<(), DTCError> {
    let mut req = DCSRequestPacket::new(link_id, roc_id, DCSOperationType::DoubleWrite);
    req.address  = address;
    req.data     = data;
    req.address2 = address2;
    req.data2    = data2;
    self.send(&req)
  }

  /// Read word_count words starting at address.
  /// Returns an empty vector if there is no reply.
  pub fn read_roc_block(&self, 
                        link_id    : u8,
                        roc_id     : u8,
                        address    : u16,
                        word_count : u16,
                        retries    : usize) -> Result<Vec<u16>, DTCError> {
    if word_count as usize > DCS_MAX_BLOCK_WORDS {
      error!("Block read of {} words exceeds {} words!", word_count, DCS_MAX_BLOCK_WORDS);
      return Err(DTCError::PacketTooLarge);
    }
    let req = DCSRequestPacket::block_read(link_id, roc_id, address, word_count);
    match self.transact(&req, retries)? {
      Some(reply) => {
        if reply.block_data.len() != word_count as usize {
          warn!("Asked for {} words, got {}", word_count, reply.block_data.len());
        }
        Ok(reply.block_data)
      }
      None => Ok(Vec::<u16>::new()),
    }
  }

  pub fn write_roc_block(&self, 
                         link_id     : u8,
                         roc_id      : u8,
                         address     : u16,
                         words       : &[u16],
                         request_ack : bool) -> Result<(), DTCError> {
    let req = DCSRequestPacket::block_write(link_id, roc_id, address, words, request_ack)?;
    self.send(&req)
  }

  /// Read a register of the extended ROC register 
  /// space, which is reached through a block and 
  /// an address register
  pub fn read_ext_roc_register(&self, 
                               link_id : u8,
                               roc_id  : u8,
                               block   : u16,
                               address : u16,
                               retries : usize) -> Result<u16, DTCError> {
    self.write_roc_register(link_id, roc_id, EXT_REG_BLOCK, block, false)?;
    self.write_roc_register(link_id, roc_id, EXT_REG_ADDRESS, address & !EXT_REG_STROBE, false)?;
    self.write_roc_register(link_id, roc_id, EXT_REG_ADDRESS, address | EXT_REG_STROBE, false)?;
    self.read_roc_register(link_id, roc_id, EXT_REG_DATA, retries)
  }

  /// Give back the buffer the cursor is in
  pub fn release_buffers(&self) -> Result<(), DTCError> {
    let mut cursor = self.lock()?;
    self.leave_buffer(&mut cursor)
  }
}

#[cfg(test)]
mod test_dcs {
  use super::*;
  use crate::dma::RingDevice;
  use crate::simulator::{
    DTCSimulator,
    RegisterMap,
    SimMode,
  };

  fn setup() -> (Arc<DTCSimulator>, DCSEngine) {
    let sim     = Arc::new(DTCSimulator::new(SimMode::Tracker, 8, 0x1000));
    let mut dcs = DCSEngine::new(sim.clone(), 0);
    dcs.set_settle_time(Duration::from_micros(10));
    (sim, dcs)
  }

  #[test]
  fn read_echoes_address() {
    let (_sim, dcs) = setup();
    assert_eq!(dcs.read_roc_register(2, 0, 5, DCS_DEFAULT_RETRIES).unwrap(), 5);
  }

  #[test]
  fn write_then_read() {
    let (_sim, dcs) = setup();
    dcs.write_roc_register(1, 1, 0x10, 0x1234, false).unwrap();
    assert_eq!(dcs.read_roc_register(1, 1, 0x10, 3).unwrap(), 0x1234);
    // other ROCs are not affected
    assert_eq!(dcs.read_roc_register(1, 0, 0x10, 3).unwrap(), 0x10);
  }

  #[test]
  fn silent_rocs_give_sentinel() {
    let (sim, dcs) = setup();
    sim.set_silent(true);
    assert_eq!(dcs.read_roc_register(0, 0, 1, 3).unwrap(), DCS_UNKNOWN_VALUE);
    assert!(dcs.read_roc_block(0, 0, 1, 20, 2).unwrap().is_empty());
  }

  #[test]
  fn retry_budget_bounds_the_requests() {
    let (sim, dcs) = setup();
    sim.set_silent(true);
    assert_eq!(dcs.read_roc_register(0, 0, 1, 3).unwrap(), DCS_UNKNOWN_VALUE);
    let sent = sim.tracker().snapshot(DmaChannel::DCS, DmaDirection::S2C).unwrap();
    assert_eq!(sent.stats.total_buffers(), 3);
  }

  #[test]
  fn incomplete_reply_buffer_gives_sentinel() {
    let regs    = Arc::new(RegisterMap::new());
    let device  = Arc::new(RingDevice::new(regs, 4, 256, false).unwrap());
    device.card_port().announce(DmaChannel::DCS).unwrap();
    let mut dcs = DCSEngine::new(device, 1);
    dcs.set_settle_time(Duration::from_micros(10));
    assert_eq!(dcs.read_roc_register(0, 0, 1, 2).unwrap(), DCS_UNKNOWN_VALUE);
  }

  #[test]
  fn oversized_blocks_are_refused() {
    let (_sim, dcs) = setup();
    let words = vec![1u16; DCS_MAX_BLOCK_WORDS + 1];
    assert_eq!(dcs.write_roc_block(0, 0, 0, &words, false), Err(DTCError::PacketTooLarge));
    assert_eq!(dcs.read_roc_block(0, 0, 0, DCS_MAX_BLOCK_WORDS as u16 + 1, 1), 
               Err(DTCError::PacketTooLarge));
  }

  #[test]
  fn stale_ack_is_skipped() {
    let (_sim, dcs) = setup();
    dcs.write_roc_register(0, 0, 3, 0xAA, true).unwrap();
    assert_eq!(dcs.read_roc_register(0, 0, 4, 3).unwrap(), 4);
  }

  #[test]
  fn double_read_write() {
    let (_sim, dcs) = setup();
    dcs.write_roc_register_double(3, 2, 7, 70, 8, 80).unwrap();
    assert_eq!(dcs.read_roc_register_double(3, 2, 7, 8, 3).unwrap(), (70, 80));
  }

  #[test]
  fn block_over_several_packets() {
    let (_sim, dcs) = setup();
    let words : Vec<u16> = (0..21).map(|k| 0x100 + k).collect();
    dcs.write_roc_block(4, 0, 0x40, &words, false).unwrap();
    let back = dcs.read_roc_block(4, 0, 0x40, 21, 3).unwrap();
    assert_eq!(back, words);
    let unset = dcs.read_roc_block(4, 0, 0x200, 12, 3).unwrap();
    assert_eq!(unset.len(), 12);
    assert_eq!(unset[11], 0x20B);
  }

  #[test]
  fn extended_register() {
    let (_sim, dcs) = setup();
    assert_eq!(dcs.read_ext_roc_register(0, 0, 1, 0x20, 3).unwrap(), EXT_REG_DATA);
  }
}
