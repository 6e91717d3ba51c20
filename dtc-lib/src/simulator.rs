//! A software DTC
//!
//! The simulator implements the same transport as
//! the hardware path, so everything above it can 
//! run without a card. It keeps the same index 
//! bookkeeping as the real rings (via the 
//! `ChannelIndexTracker`), answers readout/data 
//! requests with generated data blocks and DCS 
//! requests from a register file per ROC.

pub mod register_map;
pub mod patterns;

pub use register_map::RegisterMap;

use std::collections::{
    HashMap,
    VecDeque,
};
use std::fmt;
use std::fs;
use std::sync::{
    Mutex,
    MutexGuard,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use serde::{
    Deserialize,
    Serialize,
};

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::constants::{
    BUFFER_HEADER_SIZE,
    PACKET_SIZE,
};
use dtc_dataclasses::errors::DTCError;
use dtc_dataclasses::packets::{
    DataHeaderPacket,
    DataRequestPacket,
    DCSOperationType,
    DCSReplyPacket,
    DCSRequestPacket,
    DMAPacket,
    PacketType,
    ReadoutRequestPacket,
};
use dtc_dataclasses::serialization::Serialization;

use crate::dma::ring::idx_add;
use crate::dma::tracker::ChannelIndexTracker;
use crate::memory::*;
use crate::registers::{
    DETECTOR_EMULATOR,
    DMA_CONTROL_STATUS,
    DMA_CTRL_ENABLE,
    DMA_CTRL_ERROR_MASK,
    dma_engine_base,
};

/// Ring geometry of the simulated card
pub const SIM_NUM_BUFFS : usize = 16;
pub const SIM_BUFF_SIZE : usize = 0x8000;

/// What the card (simulated or not) does, as 
/// selected by DTCLIB_SIM_ENABLE
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimMode {
  Disabled,
  Tracker,
  Calorimeter,
  CosmicVeto,
  NoCFO,
  ROCEmulator,
  Loopback,
  Performance,
  LargeFile,
  Hardware,
}

impl SimMode {

  /// Accepts the digit, the single letter or 
  /// the full name (case insensitive)
  pub fn from_env_str(value : &str) -> Option<Self> {
    match value.trim().to_lowercase().as_str() {
      "0" | "d" | "disabled"    => Some(SimMode::Disabled),
      "1" | "t" | "tracker"     => Some(SimMode::Tracker),
      "2" | "c" | "calorimeter" => Some(SimMode::Calorimeter),
      "3" | "v" | "cosmicveto"  => Some(SimMode::CosmicVeto),
      "4" | "n" | "nocfo"       => Some(SimMode::NoCFO),
      "5" | "r" | "rocemulator" => Some(SimMode::ROCEmulator),
      "6" | "l" | "loopback"    => Some(SimMode::Loopback),
      "7" | "p" | "performance" => Some(SimMode::Performance),
      "8" | "f" | "largefile"   => Some(SimMode::LargeFile),
      "h" | "hardware"          => Some(SimMode::Hardware),
      _ => None
    }
  }

  /// Disabled and Hardware talk to a real card
  pub fn is_simulated(&self) -> bool {
    !matches!(self, SimMode::Disabled | SimMode::Hardware)
  }
}

impl Default for SimMode {
  fn default() -> Self {
    SimMode::Tracker
  }
}

impl fmt::Display for SimMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      SimMode::Disabled    => "Disabled",
      SimMode::Tracker     => "Tracker",
      SimMode::Calorimeter => "Calorimeter",
      SimMode::CosmicVeto  => "CosmicVeto",
      SimMode::NoCFO       => "NoCFO",
      SimMode::ROCEmulator => "ROCEmulator",
      SimMode::Loopback    => "Loopback",
      SimMode::Performance => "Performance",
      SimMode::LargeFile   => "LargeFile",
      SimMode::Hardware    => "Hardware",
    };
    write!(f, "<SimMode: {}>", repr)
  }
}

/// Split a DDR image file into its records
///
/// Each record is a u64 byte count (including 
/// the count itself) followed by the data.
pub fn parse_ddr_records(bytes : &[u8]) -> Result<Vec<Vec<u8>>, DTCError> {
  let mut records = Vec::<Vec<u8>>::new();
  let mut pos = 0usize;
  while pos + BUFFER_HEADER_SIZE <= bytes.len() {
    let mut raw = [0u8;8];
    raw.copy_from_slice(&bytes[pos..pos + BUFFER_HEADER_SIZE]);
    let size = u64::from_le_bytes(raw) as usize;
    if size < BUFFER_HEADER_SIZE || pos + size > bytes.len() {
      error!("DDR record at {} announces {} bytes, but only {} are left!", pos, size, bytes.len() - pos);
      return Err(DTCError::DataCorruption);
    }
    records.push(bytes[pos..pos + size].to_vec());
    pos += size;
  }
  if pos != bytes.len() {
    warn!("Ignoring {} trailing bytes of DDR image", bytes.len() - pos);
  }
  Ok(records)
}

/// Everything the simulated card remembers
struct SimState {
  /// C2S ring content per channel
  c2s_buffers   : Vec<Vec<Vec<u8>>>,
  /// buffers waiting for a free descriptor
  outbox        : Vec<VecDeque<Vec<u8>>>,
  /// latest readout request per link
  readouts      : HashMap<u8, Timestamp>,
  data_requests : Vec<DataRequestPacket>,
  /// (link, roc, address) -> value
  roc_registers : HashMap<(u8, u8, u16), u16>,
  ddr_images    : Vec<Vec<u8>>,
  ddr_replay    : usize,
}

pub struct DTCSimulator {
  mode      : SimMode,
  regs      : RegisterMap,
  tracker   : ChannelIndexTracker,
  num_buffs : usize,
  buff_size : usize,
  state     : Mutex<SimState>,
  /// ROCs do not answer DCS requests
  silent    : AtomicBool,
}

impl DTCSimulator {

  pub fn new(mode : SimMode, num_buffs : usize, buff_size : usize) -> Self {
    let num_buffs = num_buffs.max(2);
    let buff_size = buff_size.max(BUFFER_HEADER_SIZE + PACKET_SIZE);
    info!("Simulating a DTC in mode {} with {} x {} byte buffers", mode, num_buffs, buff_size);
    let state = SimState {
      c2s_buffers   : vec![vec![Vec::<u8>::new();num_buffs];DmaChannel::all().len()],
      outbox        : vec![VecDeque::<Vec<u8>>::new();DmaChannel::all().len()],
      readouts      : HashMap::new(),
      data_requests : Vec::new(),
      roc_registers : HashMap::new(),
      ddr_images    : Vec::new(),
      ddr_replay    : 0,
    };
    Self {
      mode,
      regs      : RegisterMap::new(),
      tracker   : ChannelIndexTracker::new(num_buffs, buff_size),
      num_buffs,
      buff_size,
      state     : Mutex::new(state),
      silent    : AtomicBool::new(false),
    }
  }

  pub fn mode(&self) -> SimMode {
    self.mode
  }

  pub fn registers(&self) -> &RegisterMap {
    &self.regs
  }

  pub fn tracker(&self) -> &ChannelIndexTracker {
    &self.tracker
  }

  /// Let the ROCs stop answering DCS requests
  pub fn set_silent(&self, silent : bool) {
    self.silent.store(silent, Ordering::Relaxed);
  }

  fn lock(&self) -> Result<MutexGuard<'_, SimState>, DTCError> {
    match self.state.lock() {
      Ok(state) => Ok(state),
      Err(err)  => {
        error!("Simulator state poisoned! {err}");
        Err(DTCError::IoError)
      }
    }
  }

  fn emulator_enabled(&self) -> bool {
    (self.regs.get(DETECTOR_EMULATOR) & 0x1) > 0
  }

  /// A stopped engine or one with latched 
  /// errors does not move any data
  fn engine_ready(&self, channel : DmaChannel, direction : DmaDirection) -> bool {
    let c2s   = direction == DmaDirection::C2S;
    let value = self.regs.get(dma_engine_base(c2s, channel.to_u8()) + DMA_CONTROL_STATUS);
    (value & DMA_CTRL_ENABLE) > 0 && (value & DMA_CTRL_ERROR_MASK) == 0
  }

  /// Preload the detector emulator memory from 
  /// a file and switch the emulator on
  pub fn load_ddr_file(&self, filename : &str) -> Result<usize, DTCError> {
    let bytes = match fs::read(filename) {
      Ok(b)    => b,
      Err(err) => {
        error!("Unable to read DDR image {}! {err}", filename);
        return Err(DTCError::IoError);
      }
    };
    let records = parse_ddr_records(&bytes)?;
    let nrecords = records.len();
    self.lock()?.ddr_images.extend(records);
    self.regs.set(DETECTOR_EMULATOR, self.regs.get(DETECTOR_EMULATOR) | 0x1);
    info!("Loaded {} DDR records from {}", nrecords, filename);
    Ok(nrecords)
  }

  /// Number of DDR images in the emulator memory
  pub fn ddr_image_count(&self) -> Result<usize, DTCError> {
    Ok(self.lock()?.ddr_images.len())
  }

  /// Data requests which did not see a 
  /// matching readout request yet
  pub fn pending_data_requests(&self) -> Result<usize, DTCError> {
    Ok(self.lock()?.data_requests.len())
  }

  /// Move buffers from the outbox into the 
  /// ring, as long as there is space
  fn fill_ring(&self, state : &mut SimState, channel : DmaChannel) -> Result<(), DTCError> {
    let chn = channel.to_u8() as usize;
    if !self.engine_ready(channel, DmaDirection::C2S) {
      trace!("C2S engine of {} not ready, {} buffers wait", channel, state.outbox[chn].len());
      return Ok(());
    }
    loop {
      let ring = self.tracker.snapshot(channel, DmaDirection::C2S)?;
      if ring.faulted {
        return Err(DTCError::RingIndexOutOfRange);
      }
      // one descriptor always stays free
      if ring.available(DmaDirection::C2S) >= self.num_buffs - 1 {
        break;
      }
      let buffer = match state.outbox[chn].pop_front() {
        None    => break,
        Some(b) => b,
      };
      let nbytes = buffer.len();
      state.c2s_buffers[chn][ring.hw_idx] = buffer;
      self.tracker.set_hw_idx(channel, DmaDirection::C2S, idx_add(ring.hw_idx, 1, self.num_buffs))?;
      self.tracker.record_sample(channel, DmaDirection::C2S, 1, nbytes)?;
    }
    Ok(())
  }

  fn emit(&self, state : &mut SimState, channel : DmaChannel, payload : &[u8]) -> Result<(), DTCError> {
    trace!("Simulator emits {} bytes on {}", payload.len(), channel);
    state.outbox[channel.to_u8() as usize].push_back(DmaBuffer::from_payload(payload).as_bytes().to_vec());
    self.fill_ring(state, channel)
  }

  /// Answer all data requests for (link, ts), 
  /// provided the link has seen the readout 
  /// request for ts
  fn respond_daq(&self, state : &mut SimState, link : u8, ts : Timestamp) -> Result<(), DTCError> {
    if state.readouts.get(&link) != Some(&ts) {
      return Ok(());
    }
    let (ready, pending) : (Vec<DataRequestPacket>, Vec<DataRequestPacket>) = state.data_requests
      .drain(..)
      .partition(|req| req.link_id == link && req.timestamp == ts);
    state.data_requests = pending;
    let max_payload = self.buff_size - BUFFER_HEADER_SIZE;
    let mut payload = Vec::<u8>::new();
    for req in ready {
      let npackets = if req.request_count > 0 {
        req.request_count
      } else {
        patterns::packet_count(self.mode, ts, link, req.roc_id)
      };
      let header = DataHeaderPacket::new(link, req.roc_id, ts, npackets);
      let mut block = header.to_bytestream();
      block.extend_from_slice(&patterns::payload(self.mode, ts, link, req.roc_id, header.packet_count as usize));
      if block.len() > max_payload {
        warn!("Block of {} bytes does not fit into a buffer, truncating!", block.len());
        block.truncate(max_payload);
      }
      if !payload.is_empty() && payload.len() + block.len() > max_payload {
        self.emit(state, DmaChannel::DAQ, &payload)?;
        payload.clear();
      }
      payload.extend_from_slice(&block);
    }
    if !payload.is_empty() {
      self.emit(state, DmaChannel::DAQ, &payload)?;
    }
    Ok(())
  }

  fn handle_daq(&self, state : &mut SimState, data : &[u8]) -> Result<(), DTCError> {
    if self.emulator_enabled() {
      debug!("Storing {} bytes in the detector emulator memory", data.len());
      state.ddr_images.push(data.to_vec());
      return Ok(());
    }
    let stream  = DmaBuffer::new(data.to_vec());
    let payload = stream.payload();
    let mut pos = 0usize;
    while pos + PACKET_SIZE <= payload.len() {
      match DMAPacket::peek_type(payload, pos) {
        Some(PacketType::ReadoutRequest) => {
          let req = ReadoutRequestPacket::from_bytestream(payload, &mut pos)?;
          trace!("Simulator got {}", req);
          state.readouts.insert(req.link_id, req.timestamp);
          self.respond_daq(state, req.link_id, req.timestamp)?;
        }
        Some(PacketType::DataRequest) => {
          let req = DataRequestPacket::from_bytestream(payload, &mut pos)?;
          trace!("Simulator got {}", req);
          let (link, ts) = (req.link_id, req.timestamp);
          state.data_requests.push(req);
          self.respond_daq(state, link, ts)?;
        }
        other => {
          warn!("Simulator ignores packet of type {:?} on the DAQ channel", other);
          pos += PACKET_SIZE;
        }
      }
    }
    Ok(())
  }

  fn roc_register(state : &SimState, link : u8, roc : u8, address : u16) -> u16 {
    match state.roc_registers.get(&(link, roc, address)) {
      Some(value) => *value,
      // unset registers read back their address
      None        => address,
    }
  }

  fn answer_dcs(&self, state : &mut SimState, req : &DCSRequestPacket) -> Option<DCSReplyPacket> {
    let mut reply = DCSReplyPacket::new(req.link_id, req.roc_id, req.op);
    reply.request_ack = req.request_ack;
    reply.address     = req.address;
    reply.data        = req.data;
    reply.address2    = req.address2;
    reply.data2       = req.data2;
    let (link, roc) = (req.link_id, req.roc_id);
    match req.op {
      DCSOperationType::Read => {
        reply.data = Self::roc_register(state, link, roc, req.address);
        Some(reply)
      }
      DCSOperationType::DoubleRead => {
        reply.data  = Self::roc_register(state, link, roc, req.address);
        reply.data2 = Self::roc_register(state, link, roc, req.address2);
        Some(reply)
      }
      DCSOperationType::Write => {
        state.roc_registers.insert((link, roc, req.address), req.data);
        if req.request_ack { Some(reply) } else { None }
      }
      DCSOperationType::DoubleWrite => {
        state.roc_registers.insert((link, roc, req.address),  req.data);
        state.roc_registers.insert((link, roc, req.address2), req.data2);
        if req.request_ack { Some(reply) } else { None }
      }
      DCSOperationType::BlockRead => {
        for k in 0..req.data {
          let address = req.address.wrapping_add(k);
          reply.block_data.push(Self::roc_register(state, link, roc, address));
        }
        Some(reply)
      }
      DCSOperationType::BlockWrite => {
        for (k, word) in req.block_data.iter().enumerate() {
          state.roc_registers.insert((link, roc, req.address.wrapping_add(k as u16)), *word);
        }
        if req.request_ack { Some(reply) } else { None }
      }
    }
  }

  fn handle_dcs(&self, state : &mut SimState, data : &[u8]) -> Result<(), DTCError> {
    let stream  = DmaBuffer::new(data.to_vec());
    let payload = stream.payload();
    let mut pos = 0usize;
    while pos + PACKET_SIZE <= payload.len() {
      match DMAPacket::peek_type(payload, pos) {
        Some(PacketType::DCSRequest) => {
          let req = DCSRequestPacket::from_bytestream(payload, &mut pos)?;
          trace!("Simulator got {}", req);
          let reply = self.answer_dcs(state, &req);
          if self.silent.load(Ordering::Relaxed) {
            continue;
          }
          if let Some(reply) = reply {
            self.emit(state, DmaChannel::DCS, &reply.to_bytestream())?;
          }
        }
        other => {
          warn!("Simulator ignores packet of type {:?} on the DCS channel", other);
          pos += PACKET_SIZE;
        }
      }
    }
    Ok(())
  }
}

impl RegisterAccess for DTCSimulator {

  fn read_register(&self, address : u16) -> Result<u32, DTCError> {
    self.regs.read_register(address)
  }

  fn write_register(&self, address : u16, value : u32) -> Result<(), DTCError> {
    self.regs.write_register(address, value)
  }
}

impl DeviceTransport for DTCSimulator {

  /// Never blocks, the timeout is not used
  fn read_data(&self, channel : DmaChannel, _timeout_ms : u64) -> Result<DmaBuffer, DTCError> {
    let mut state = self.lock()?;
    let chn = channel.to_u8() as usize;
    if channel == DmaChannel::DAQ 
      && self.emulator_enabled() 
      && self.tracker.unread(channel)? == 0
      && state.outbox[chn].is_empty()
      && state.ddr_replay < state.ddr_images.len() {
      let image = state.ddr_images[state.ddr_replay].clone();
      state.ddr_replay += 1;
      debug!("Replaying DDR image {} ({} bytes)", state.ddr_replay, image.len());
      state.outbox[chn].push_back(image);
    }
    self.fill_ring(&mut state, channel)?;
    match self.tracker.next_unread(channel)? {
      None      => Ok(DmaBuffer::empty()),
      Some(idx) => {
        self.tracker.hold(channel)?;
        Ok(DmaBuffer::new(state.c2s_buffers[chn][idx].clone()))
      }
    }
  }

  fn read_release(&self, channel : DmaChannel, count : usize) -> Result<(), DTCError> {
    let mut state = self.lock()?;
    let released  = self.tracker.release(channel, count)?;
    for idx in released {
      state.c2s_buffers[channel.to_u8() as usize][idx].clear();
    }
    self.fill_ring(&mut state, channel)
  }

  fn write_data(&self, channel : DmaChannel, data : &[u8]) -> Result<(), DTCError> {
    if data.len() > self.buff_size {
      error!("Can not send {} bytes, buffers are {} bytes!", data.len(), self.buff_size);
      return Err(DTCError::PacketTooLarge);
    }
    if !self.engine_ready(channel, DmaDirection::S2C) {
      warn!("S2C engine of {} not ready, dropping {} bytes", channel, data.len());
      return Ok(());
    }
    let mut state = self.lock()?;
    // the simulated engine completes right away
    let sw_idx = self.tracker.advance(channel, DmaDirection::S2C, 1)?;
    self.tracker.set_hw_idx(channel, DmaDirection::S2C, sw_idx)?;
    self.tracker.record_sample(channel, DmaDirection::S2C, 1, data.len())?;
    match channel {
      DmaChannel::DAQ => self.handle_daq(&mut state, data),
      DmaChannel::DCS => self.handle_dcs(&mut state, data),
    }
  }
}

#[cfg(test)]
mod test_simulator {
  use super::*;
  use crate::dma::{
    DmaEngineController,
    HealAction,
  };
  use crate::registers::{
    DMA_CTRL_FETCH_ERROR,
    DMA_CTRL_USER_RESET,
  };

  fn dcs_buffer(req : &DCSRequestPacket) -> Vec<u8> {
    DmaBuffer::from_payload(&req.to_bytestream()).as_bytes().to_vec()
  }

  #[test]
  fn sim_mode_from_env() {
    assert_eq!(SimMode::from_env_str("1"), Some(SimMode::Tracker));
    assert_eq!(SimMode::from_env_str("V"), Some(SimMode::CosmicVeto));
    assert_eq!(SimMode::from_env_str("performance"), Some(SimMode::Performance));
    assert_eq!(SimMode::from_env_str("H"), Some(SimMode::Hardware));
    assert_eq!(SimMode::from_env_str("x"), None);
    assert!(!SimMode::Disabled.is_simulated());
    assert!(SimMode::Loopback.is_simulated());
  }

  #[test]
  fn nothing_ready_is_empty() {
    let sim = DTCSimulator::new(SimMode::Tracker, 4, 1024);
    assert!(sim.read_data(DmaChannel::DAQ, 0).unwrap().is_empty());
    assert!(sim.read_data(DmaChannel::DCS, 100).unwrap().is_empty());
  }

  #[test]
  fn dcs_read_unset_register() {
    let sim = DTCSimulator::new(SimMode::Tracker, 4, 1024);
    sim.write_data(DmaChannel::DCS, &dcs_buffer(&DCSRequestPacket::read(2, 0, 5))).unwrap();
    let buffer = sim.read_data(DmaChannel::DCS, 0).unwrap();
    let mut pos = 0;
    let reply = DCSReplyPacket::from_bytestream(buffer.payload(), &mut pos).unwrap();
    assert!(reply.matches(2, 5));
    assert_eq!(reply.data, 5);
  }

  #[test]
  fn dcs_write_without_ack_is_quiet() {
    let sim = DTCSimulator::new(SimMode::Tracker, 4, 1024);
    sim.write_data(DmaChannel::DCS, &dcs_buffer(&DCSRequestPacket::write(1, 0, 7, 0xBEEF, false))).unwrap();
    assert!(sim.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
    sim.write_data(DmaChannel::DCS, &dcs_buffer(&DCSRequestPacket::read(1, 0, 7))).unwrap();
    let buffer = sim.read_data(DmaChannel::DCS, 0).unwrap();
    let mut pos = 0;
    let reply = DCSReplyPacket::from_bytestream(buffer.payload(), &mut pos).unwrap();
    assert_eq!(reply.data, 0xBEEF);
  }

  #[test]
  fn outbox_waits_for_release() {
    let sim = DTCSimulator::new(SimMode::Tracker, 4, 1024);
    for addr in 0..6u16 {
      sim.write_data(DmaChannel::DCS, &dcs_buffer(&DCSRequestPacket::read(0, 0, addr))).unwrap();
    }
    // 3 in the ring, 3 in the outbox
    for _ in 0..3 {
      assert!(!sim.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
    }
    assert!(sim.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
    sim.read_release(DmaChannel::DCS, 3).unwrap();
    for _ in 0..3 {
      assert!(!sim.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
    }
  }

  #[test]
  fn data_needs_readout_request() {
    let sim = DTCSimulator::new(SimMode::Tracker, 8, 4096);
    let ts  = Timestamp::new(17);
    let req = DataRequestPacket::new(0, 0, ts);
    sim.write_data(DmaChannel::DAQ, DmaBuffer::from_payload(&req.to_bytestream()).as_bytes()).unwrap();
    assert!(sim.read_data(DmaChannel::DAQ, 0).unwrap().is_empty());
    assert_eq!(sim.pending_data_requests().unwrap(), 1);
    let readout = ReadoutRequestPacket::new(0, ts, false);
    sim.write_data(DmaChannel::DAQ, DmaBuffer::from_payload(&readout.to_bytestream()).as_bytes()).unwrap();
    assert_eq!(sim.pending_data_requests().unwrap(), 0);
    let buffer = sim.read_data(DmaChannel::DAQ, 0).unwrap();
    let mut pos = 0;
    let header = DataHeaderPacket::from_bytestream(buffer.payload(), &mut pos).unwrap();
    assert_eq!(header.timestamp, ts);
    assert_eq!(buffer.payload().len(), header.byte_count as usize);
  }

  #[test]
  fn stopped_engine_holds_data_until_healed() {
    let sim = DTCSimulator::new(SimMode::Tracker, 8, 4096);
    let ts  = Timestamp::new(5);
    sim.write_register(0x2004, 0).unwrap();
    let readout = ReadoutRequestPacket::new(0, ts, false);
    let req     = DataRequestPacket::new(0, 0, ts);
    sim.write_data(DmaChannel::DAQ, DmaBuffer::from_payload(&readout.to_bytestream()).as_bytes()).unwrap();
    sim.write_data(DmaChannel::DAQ, DmaBuffer::from_payload(&req.to_bytestream()).as_bytes()).unwrap();
    assert!(sim.read_data(DmaChannel::DAQ, 0).unwrap().is_empty());
    let engine = DmaEngineController::new(DmaChannel::DAQ, DmaDirection::C2S, false);
    assert_eq!(engine.check_and_heal(sim.registers()).unwrap(), HealAction::ReEnabled);
    let buffer = sim.read_data(DmaChannel::DAQ, 0).unwrap();
    let header = DataHeaderPacket::from_bytestream(buffer.payload(), &mut 0).unwrap();
    assert_eq!(header.timestamp, ts);
  }

  #[test]
  fn stopped_s2c_engine_drops_requests() {
    let sim = DTCSimulator::new(SimMode::Tracker, 4, 1024);
    sim.registers().latch_engine_error(false, DmaChannel::DCS.to_u8(), DMA_CTRL_FETCH_ERROR);
    sim.write_data(DmaChannel::DCS, &dcs_buffer(&DCSRequestPacket::read(0, 0, 3))).unwrap();
    assert!(sim.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
    let engine = DmaEngineController::new(DmaChannel::DCS, DmaDirection::S2C, false);
    sim.write_register(engine.register(DMA_CONTROL_STATUS), DMA_CTRL_USER_RESET).unwrap();
    engine.check_and_heal(sim.registers()).unwrap();
    sim.write_data(DmaChannel::DCS, &dcs_buffer(&DCSRequestPacket::read(0, 0, 3))).unwrap();
    assert!(!sim.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
  }

  #[test]
  fn ddr_records() {
    let mut bytes = Vec::<u8>::new();
    bytes.extend_from_slice(DmaBuffer::from_payload(&[1u8;10]).as_bytes());
    bytes.extend_from_slice(DmaBuffer::from_payload(&[2u8;100]).as_bytes());
    let records = parse_ddr_records(&bytes).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(DmaBuffer::new(records[1].clone()).payload(), &[2u8;100]);
    bytes.extend_from_slice(&(64u64).to_le_bytes());
    assert_eq!(parse_ddr_records(&bytes), Err(DTCError::DataCorruption));
  }
}
