//! Event readout over the DAQ channel
//!
//! A readout request goes to every active link, 
//! followed by a data request per ROC. The ROCs 
//! answer with data blocks (a header packet plus 
//! payload packets), which are collected into an 
//! event as long as they carry the same timestamp.
//!
//! The DMA buffers the blocks come from stay held
//! until the client gives them back with 
//! `release_buffers`.

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
};
use std::thread;
use std::time::Duration;

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::constants::{
    EMPTY_BUFFER_MARKER,
    MAX_ROCS_PER_LINK,
    MIN_EMULATOR_BLOCK,
    NLINKS,
    PACKET_SIZE,
};
use dtc_dataclasses::errors::DTCError;
use dtc_dataclasses::events::{
    DataBlock,
    Event,
};
use dtc_dataclasses::packets::{
    DataHeaderPacket,
    DataRequestPacket,
    DMAPacket,
    PacketType,
    ReadoutRequestPacket,
};
use dtc_dataclasses::serialization::Serialization;

use crate::memory::*;
use crate::registers::{
    LINK_ENABLE,
    ROC_EMULATION_COUNT,
};

/// Attempts to find the next data header
pub const HEADER_READ_ATTEMPTS : usize = 3;
/// Sleep between two attempts in millisec
pub const HEADER_RETRY_MSEC    : u64   = 1;

/// The outcome of reading at the cursor
#[derive(Debug, Clone, PartialEq)]
pub enum BlockRead {
  Data(DataBlock),
  /// No more (valid) data
  EndOfStream,
}

/// A link which takes part in the readout
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ActiveLink {
  pub link_id : u8,
  pub n_rocs  : u8,
}

/// Links which transmit and are not in timing 
/// mode, with the number of ROCs behind them
pub fn active_links<R : RegisterAccess + ?Sized>(regs : &R) -> Result<Vec<ActiveLink>, DTCError> {
  let enable = with_retries(|| regs.read_register(LINK_ENABLE))?;
  let rocs   = with_retries(|| regs.read_register(ROC_EMULATION_COUNT))?;
  let mut links = Vec::<ActiveLink>::new();
  for link_id in 0..NLINKS {
    let transmit = (enable >> link_id) & 0x1 > 0;
    let timing   = (enable >> (16 + link_id)) & 0x1 > 0;
    if !transmit || timing {
      continue;
    }
    let n_rocs = ((rocs >> (3 * link_id as u32)) & 0x7) as u8;
    links.push(ActiveLink {
      link_id,
      n_rocs : n_rocs.min(MAX_ROCS_PER_LINK),
    });
  }
  Ok(links)
}

/// Buffers the engine holds plus where 
/// to continue reading
#[derive(Debug, Default)]
struct DmaInfo {
  buffers : Vec<DmaBuffer>,
  /// (index into buffers, offset into its payload)
  cursor  : Option<(usize, usize)>,
}

pub struct DAQEngine {
  device          : Arc<dyn DeviceTransport>,
  info            : Mutex<DmaInfo>,
  read_timeout_ms : u64,
}

impl DAQEngine {

  pub fn new(device : Arc<dyn DeviceTransport>, read_timeout_ms : u64) -> Self {
    Self {
      device,
      info : Mutex::new(DmaInfo::default()),
      read_timeout_ms,
    }
  }

  pub fn device(&self) -> &dyn DeviceTransport {
    self.device.as_ref()
  }

  fn lock(&self) -> Result<MutexGuard<'_, DmaInfo>, DTCError> {
    match self.info.lock() {
      Ok(info) => Ok(info),
      Err(err) => {
        error!("DAQ buffer bookkeeping poisoned! {err}");
        Err(DTCError::IoError)
      }
    }
  }

  fn send(&self, packet : &[u8]) -> Result<(), DTCError> {
    let buffer = DmaBuffer::from_payload(packet);
    self.device.write_data(DmaChannel::DAQ, buffer.as_bytes())
  }

  pub fn send_readout_request(&self, link_id : u8, timestamp : Timestamp, debug : bool) 
    -> Result<(), DTCError> {
    let req = ReadoutRequestPacket::new(link_id, timestamp, debug);
    trace!("Sending {}", req);
    self.send(&req.to_bytestream())
  }

  pub fn send_data_request(&self, link_id : u8, roc_id : u8, timestamp : Timestamp) 
    -> Result<(), DTCError> {
    let req = DataRequestPacket::new(link_id, roc_id, timestamp);
    trace!("Sending {}", req);
    self.send(&req.to_bytestream())
  }

  /// The readout request for every active link
  /// followed by the data requests for its ROCs
  pub fn send_requests(&self, timestamp : Timestamp) -> Result<(), DTCError> {
    for link in active_links(self.device.as_ref())? {
      self.send_link_requests(&link, timestamp)?;
    }
    Ok(())
  }

  pub fn send_link_requests(&self, link : &ActiveLink, timestamp : Timestamp) -> Result<(), DTCError> {
    self.send_readout_request(link.link_id, timestamp, false)?;
    for roc_id in 0..link.n_rocs {
      self.send_data_request(link.link_id, roc_id, timestamp)?;
    }
    Ok(())
  }

  /// Put a buffer into the detector emulator memory
  ///
  /// The size word covers the data only, but at least 
  /// MIN_EMULATOR_BLOCK bytes go over the wire.
  pub fn write_detector_emulator_data(&self, data : &[u8]) -> Result<(), DTCError> {
    let mut image = DmaBuffer::from_payload(data).as_bytes().to_vec();
    if data.len() < MIN_EMULATOR_BLOCK {
      image.resize(image.len() + MIN_EMULATOR_BLOCK - data.len(), 0);
    }
    debug!("Writing {} bytes ({} on the wire) to the detector emulator", data.len(), image.len());
    self.device.write_data(DmaChannel::DAQ, &image)
  }

  /// Move the cursor to the next data header, 
  /// fetching buffers as needed. Nothing is consumed.
  fn seek_header(&self, info : &mut DmaInfo) -> Result<Option<DataHeaderPacket>, DTCError> {
    let mut attempt = 0usize;
    while attempt < HEADER_READ_ATTEMPTS {
      if let Some((idx, offset)) = info.cursor {
        let payload = info.buffers[idx].payload();
        if offset + PACKET_SIZE > payload.len() {
          debug!("Buffer {} consumed", idx);
          info.cursor = None;
          continue;
        }
        let marker = u16::from_le_bytes([payload[offset], payload[offset + 1]]);
        if marker == 0 || marker == EMPTY_BUFFER_MARKER {
          debug!("No valid data in the rest of buffer {} ({:#06x})", idx, marker);
          info.cursor = None;
          continue;
        }
        if DMAPacket::peek_type(payload, offset) != Some(PacketType::DataHeader) {
          warn!("No data header at offset {} of buffer {}, skipping the buffer", offset, idx);
          info.cursor = None;
          return Ok(None);
        }
        let mut pos = offset;
        let header  = DataHeaderPacket::from_bytestream_unchecked(payload, &mut pos)?;
        if !header.is_consistent() {
          error!("Corrupted data header {}!", header);
          info.cursor = None;
          return Err(DTCError::DataCorruption);
        }
        return Ok(Some(header));
      }
      let buffer = match self.device.read_data(DmaChannel::DAQ, self.read_timeout_ms) {
        Err(DTCError::Timeout) => {
          debug!("DAQ buffer did not complete in attempt {}", attempt);
          DmaBuffer::empty()
        }
        Err(err)   => return Err(err),
        Ok(buffer) => buffer,
      };
      if buffer.is_empty() {
        attempt += 1;
        thread::sleep(Duration::from_millis(HEADER_RETRY_MSEC));
        continue;
      }
      debug!("Got DAQ buffer with {} bytes", buffer.byte_count());
      info.buffers.push(buffer);
      info.cursor = Some((info.buffers.len() - 1, 0));
    }
    Ok(None)
  }

  /// Copy the block at the cursor, which has to 
  /// start with the given header
  fn take_block(info : &mut DmaInfo, mut header : DataHeaderPacket) -> Result<DataBlock, DTCError> {
    let (idx, offset) = match info.cursor {
      Some(c) => c,
      None    => return Err(DTCError::DataCorruption),
    };
    let payload   = info.buffers[idx].payload();
    let remaining = payload.len() - offset;
    let mut size  = header.byte_count as usize;
    if size > remaining {
      warn!("Block of {} bytes overruns the buffer, clamping to {} bytes!", size, remaining);
      size = remaining;
      header.byte_count = size as u16;
    }
    let mut data = payload[offset..offset + size].to_vec();
    data[0..2].copy_from_slice(&header.byte_count.to_le_bytes());
    info.cursor = Some((idx, offset + size));
    trace!("Read {}", header);
    Ok(DataBlock::new(header, data))
  }

  /// The block at the cursor
  pub fn read_next_block(&self) -> Result<BlockRead, DTCError> {
    let mut info = self.lock()?;
    match self.seek_header(&mut info)? {
      None         => Ok(BlockRead::EndOfStream),
      Some(header) => Ok(BlockRead::Data(Self::take_block(&mut info, header)?)),
    }
  }

  /// Collect all blocks with the timestamp of the 
  /// next header, without sending any requests.
  ///
  /// If a timestamp is requested and the next block 
  /// has a different one, the block stays where it 
  /// is and `TimestampMismatch` is returned.
  pub fn read_event(&self, requested : Option<Timestamp>) -> Result<Event, DTCError> {
    let mut info = self.lock()?;
    let header = match self.seek_header(&mut info)? {
      None    => {
        debug!("No data, returning empty event");
        return Ok(Event::new(requested.unwrap_or_default()));
      }
      Some(h) => h,
    };
    if let Some(ts) = requested {
      if ts != header.timestamp {
        warn!("Requested {}, but got {}", ts, header.timestamp);
        return Err(DTCError::TimestampMismatch);
      }
    }
    let timestamp = header.timestamp;
    let mut event = Event::new(timestamp);
    event.add_block(Self::take_block(&mut info, header)?);
    loop {
      match self.seek_header(&mut info)? {
        Some(next) if next.timestamp == timestamp => {
          event.add_block(Self::take_block(&mut info, next)?);
        }
        _ => break,
      }
    }
    debug!("Assembled event {} with {} blocks", timestamp, event.n_blocks());
    Ok(event)
  }

  /// Request the data for a timestamp (0 if none 
  /// is given) and assemble the event
  pub fn get_data(&self, timestamp : Option<Timestamp>) -> Result<Event, DTCError> {
    self.send_requests(timestamp.unwrap_or_default())?;
    self.read_event(timestamp)
  }

  /// Number of buffers currently held
  pub fn held_buffers(&self) -> Result<usize, DTCError> {
    Ok(self.lock()?.buffers.len())
  }

  /// Hand every buffer the cursor is done with 
  /// back to the card
  pub fn release_buffers(&self) -> Result<usize, DTCError> {
    let mut info = self.lock()?;
    let nrelease = match info.cursor {
      None => info.buffers.len(),
      Some((idx, offset)) => {
        if offset + PACKET_SIZE > info.buffers[idx].payload().len() {
          idx + 1
        } else {
          idx
        }
      }
    };
    if nrelease == 0 {
      return Ok(0);
    }
    self.device.read_release(DmaChannel::DAQ, nrelease)?;
    info.buffers.drain(0..nrelease);
    info.cursor = match info.cursor {
      Some((idx, offset)) if idx >= nrelease => Some((idx - nrelease, offset)),
      _ => None,
    };
    debug!("Released {} DAQ buffers", nrelease);
    Ok(nrelease)
  }

  /// Give back everything, including data 
  /// which has not been read yet
  pub fn release_all_buffers(&self) -> Result<usize, DTCError> {
    let mut info = self.lock()?;
    let nrelease = info.buffers.len();
    if nrelease > 0 {
      self.device.read_release(DmaChannel::DAQ, nrelease)?;
    }
    info.buffers.clear();
    info.cursor = None;
    Ok(nrelease)
  }

  /// Where the next read starts, (buffer, offset)
  pub fn cursor(&self) -> Result<Option<(usize, usize)>, DTCError> {
    Ok(self.lock()?.cursor)
  }
}

#[cfg(test)]
mod test_daq {
  use super::*;
  use crate::dma::RingDevice;
  use crate::registers::DETECTOR_EMULATOR;
  use crate::simulator::{
    DTCSimulator,
    RegisterMap,
    SimMode,
  };

  fn setup(links : u32, rocs : u32) -> (Arc<DTCSimulator>, DAQEngine) {
    let sim = Arc::new(DTCSimulator::new(SimMode::Tracker, 8, 0x4000));
    sim.write_register(LINK_ENABLE, links).unwrap();
    sim.write_register(ROC_EMULATION_COUNT, rocs).unwrap();
    let daq = DAQEngine::new(sim.clone(), 0);
    (sim, daq)
  }

  #[test]
  fn incomplete_buffer_gives_empty_event() {
    let regs   = Arc::new(RegisterMap::new());
    let device = Arc::new(RingDevice::new(regs, 4, 256, false).unwrap());
    device.card_port().announce(DmaChannel::DAQ).unwrap();
    let daq   = DAQEngine::new(device.clone(), 1);
    let event = daq.read_event(None).unwrap();
    assert_eq!(event.n_blocks(), 0);
    assert_eq!(device.channel_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap().held, 0);
  }

  #[test]
  fn timing_links_are_skipped() {
    let (sim, _daq) = setup(0x0201_0303, 0b010_011);
    let links = active_links(sim.as_ref()).unwrap();
    assert_eq!(links, vec![ActiveLink { link_id : 1, n_rocs : 2 }]);
  }

  #[test]
  fn get_data_one_link() {
    let (_sim, daq) = setup(0x0101, 3);
    let ts    = Timestamp::new(0xABC);
    let event = daq.get_data(Some(ts)).unwrap();
    assert_eq!(event.timestamp, ts);
    assert_eq!(event.n_blocks(), 3);
    assert_eq!(event.sub_events.len(), 1);
    for block in event.blocks() {
      assert_eq!(block.timestamp(), ts);
      assert!(block.header.is_consistent());
      assert_eq!(block.size(), block.header.byte_count as usize);
    }
    // nothing new was requested
    assert!(daq.read_event(None).unwrap().is_empty());
    // one buffer per data request
    assert_eq!(daq.release_buffers().unwrap(), 3);
    assert_eq!(daq.held_buffers().unwrap(), 0);
  }

  #[test]
  fn mismatch_keeps_cursor() {
    let (_sim, daq) = setup(0x0101, 1);
    daq.send_requests(Timestamp::new(5)).unwrap();
    assert_eq!(daq.read_event(Some(Timestamp::new(6))), Err(DTCError::TimestampMismatch));
    assert_eq!(daq.cursor().unwrap(), Some((0, 0)));
    let event = daq.read_event(Some(Timestamp::new(5))).unwrap();
    assert_eq!(event.n_blocks(), 1);
  }

  #[test]
  fn corrupted_header_resets_cursor() {
    let (sim, daq) = setup(0x0101, 1);
    sim.write_register(DETECTOR_EMULATOR, 1).unwrap();
    let mut header = DataHeaderPacket::new(0, 0, Timestamp::new(9), 2);
    header.byte_count = 32;
    let mut data = header.to_bytestream();
    data.extend_from_slice(&[0u8;32]);
    daq.write_detector_emulator_data(&data).unwrap();
    assert_eq!(daq.read_event(None), Err(DTCError::DataCorruption));
    assert_eq!(daq.cursor().unwrap(), None);
  }

  #[test]
  fn overrun_is_clamped() {
    let (sim, daq) = setup(0x0101, 1);
    sim.write_register(DETECTOR_EMULATOR, 1).unwrap();
    // announces 176 bytes, but only 112 are there
    let header   = DataHeaderPacket::new(0, 0, Timestamp::new(9), 10);
    let mut data = header.to_bytestream();
    data.extend_from_slice(&[7u8;96]);
    daq.write_detector_emulator_data(&data).unwrap();
    let block = match daq.read_next_block().unwrap() {
      BlockRead::Data(block) => block,
      BlockRead::EndOfStream => panic!("no block"),
    };
    assert_eq!(block.size(), 112);
    assert_eq!(block.header.byte_count, 112);
    assert_eq!(daq.read_next_block().unwrap(), BlockRead::EndOfStream);
  }
}
