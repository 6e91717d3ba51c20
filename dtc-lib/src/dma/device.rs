//! The hardware path: descriptor rings in host memory
//!
//! `RingDevice` implements `DeviceTransport` on top of 
//! a register window (anything implementing 
//! `RegisterAccess`) and four descriptor rings, one 
//! per (channel, direction). A poller thread per 
//! channel keeps the hardware indices up to date and 
//! heals the engines.
//!
//! The `CardPort` is the other end of the rings, it 
//! does what the DMA engines of the card would do. 
//! It is used to run the hardware path without a card.

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
};
use std::thread;
use std::time::{
    Duration,
    Instant,
};

use dtc_dataclasses::constants::MAX_DMA_BYTE_COUNT;
use dtc_dataclasses::errors::DTCError;

use crate::dma::descriptor::{
    C2SDescriptor,
    S2CDescriptor,
};
use crate::dma::engine::{
    DmaEngineController,
    EngineState,
    HealAction,
};
use crate::dma::poller::{
    ChannelPoller,
    PollerWaker,
    ServiceRoutine,
    IDLE_POLL_MSEC,
};
use crate::dma::ring::{
    dma_addr_to_idx,
    idx_add,
    idx_delta,
    DescriptorRing,
};
use crate::dma::tracker::{
    ChannelIndexState,
    ChannelIndexTracker,
};
use crate::memory::*;
use crate::registers::*;

/// Bus address of the first descriptor ring
pub const DESC_BUS_BASE   : u32 = 0x1000_0000;
/// Spacing of the descriptor rings
pub const DESC_BUS_STRIDE : u32 = 0x0010_0000;
/// Bus address of the first data buffer
pub const BUFF_BUS_BASE   : u64 = 0x2_0000_0000;
/// Spacing of the buffer areas of the rings
pub const BUFF_BUS_STRIDE : u64 = 0x1000_0000;

/// Sleep between two looks at the rings 
/// while waiting for data in microsec
pub const WAIT_SLEEP_USEC : u64 = 50;

/// How long write_data waits for a free 
/// host -> card descriptor in millisec
pub const WRITE_WAIT_MSEC : u64 = 100;

fn all_rings() -> [(DmaChannel, DmaDirection);NRINGS] {
  [(DmaChannel::DAQ, DmaDirection::C2S),
   (DmaChannel::DAQ, DmaDirection::S2C),
   (DmaChannel::DCS, DmaDirection::C2S),
   (DmaChannel::DCS, DmaDirection::S2C)]
}

/// Everything shared between the client and 
/// the poller threads
struct RingCore<R : RegisterAccess> {
  regs      : Arc<R>,
  rings     : Vec<Mutex<DescriptorRing>>,
  tracker   : ChannelIndexTracker,
  engines   : Vec<DmaEngineController>,
  /// serializes interrupt and tick servicing 
  /// of a channel
  service   : Vec<Mutex<()>>,
  buff_size : usize,
}

impl<R : RegisterAccess> RingCore<R> {

  fn ring(&self, channel : DmaChannel, direction : DmaDirection) 
    -> Result<MutexGuard<'_, DescriptorRing>, DTCError> {
    match self.rings[ring_slot(channel, direction)].lock() {
      Ok(ring) => Ok(ring),
      Err(err) => {
        error!("Ring {} {} poisoned! {err}", channel, direction);
        Err(DTCError::IoError)
      }
    }
  }

  fn engine(&self, channel : DmaChannel, direction : DmaDirection) -> DmaEngineController {
    self.engines[ring_slot(channel, direction)]
  }

  fn read_reg(&self, address : u16) -> Result<u32, DTCError> {
    with_retries(|| self.regs.read_register(address))
  }

  fn write_reg(&self, address : u16, value : u32) -> Result<(), DTCError> {
    with_retries(|| self.regs.write_register(address, value))
  }

  /// Take over the completion pointer of one engine.
  /// Returns the number of newly completed descriptors.
  fn update_hw_idx(&self, channel : DmaChannel, direction : DmaDirection) -> Result<usize, DTCError> {
    let engine  = self.engine(channel, direction);
    let pointer = self.read_reg(engine.register(DMA_COMPLETED_DESC_PTR))?;
    if pointer == 0 {
      // nothing completed since the rings were set up
      return Ok(0);
    }
    let ring = self.ring(channel, direction)?;
    let idx  = match dma_addr_to_idx(pointer, ring.desc_base(), ring.num_buffs()) {
      Ok(idx)  => idx,
      Err(err) => {
        error!("Completion pointer {:#010x} of {} {} is not part of the ring, stopping the channel!",
               pointer, channel, direction);
        self.tracker.set_faulted(channel, direction)?;
        return Err(err);
      }
    };
    let n        = ring.num_buffs();
    let state    = self.tracker.snapshot(channel, direction)?;
    let hw_idx   = idx_add(idx, 1, n);
    let moved    = self.tracker.set_hw_idx(channel, direction, hw_idx)?;
    if moved > 0 {
      let mut nbytes = 0usize;
      for k in 0..moved {
        let raw = ring.raw(idx_add(state.hw_idx, k, n));
        nbytes += match direction {
          DmaDirection::C2S => C2SDescriptor::unpack(&raw).rsvd_byte_cnt as usize,
          DmaDirection::S2C => S2CDescriptor::unpack(&raw).byte_count as usize,
        };
      }
      trace!("{} {} completed {} buffers ({} bytes)", channel, direction, moved, nbytes);
      self.tracker.record_sample(channel, direction, moved, nbytes)?;
    }
    Ok(moved)
  }

  /// Service routine of a channel, run by the 
  /// poller and by the client while waiting.
  ///
  /// Returns true if the rings moved.
  fn service(&self, channel : DmaChannel) -> Result<bool, DTCError> {
    let _guard = match self.service[channel.to_u8() as usize].lock() {
      Ok(g)    => g,
      Err(err) => {
        error!("Service lock of {} poisoned! {err}", channel);
        return Err(DTCError::IoError);
      }
    };
    let mut moved = 0usize;
    for direction in [DmaDirection::C2S, DmaDirection::S2C] {
      let engine = self.engine(channel, direction);
      match engine.check_and_heal(self.regs.as_ref()) {
        Ok(HealAction::Nothing) => (),
        Ok(action) => debug!("Engine {} {} healed: {:?}", channel, direction, action),
        Err(err)   => error!("Unable to heal engine {} {}! {err}", channel, direction),
      }
      moved += self.update_hw_idx(channel, direction)?;
    }
    Ok(moved > 0)
  }
}

pub struct RingDevice<R : RegisterAccess + 'static> {
  core    : Arc<RingCore<R>>,
  pollers : Vec<ChannelPoller>,
}

impl<R : RegisterAccess + 'static> RingDevice<R> {

  /// Allocate the rings, program and enable the 
  /// engines and start the pollers.
  ///
  /// # Arguments
  ///
  /// * regs           : register window of the card
  /// * num_buffs      : descriptors per ring
  /// * buff_size      : size of each DMA buffer in bytes
  /// * use_interrupts : enable engine interrupts
  pub fn new(regs           : Arc<R>,
             num_buffs      : usize,
             buff_size      : usize,
             use_interrupts : bool) -> Result<Self, DTCError> {
    let buff_size   = buff_size.min(MAX_DMA_BYTE_COUNT);
    let mut rings   = Vec::<Mutex<DescriptorRing>>::with_capacity(NRINGS);
    let mut engines = Vec::<DmaEngineController>::with_capacity(NRINGS);
    for (channel, direction) in all_rings() {
      let slot = ring_slot(channel, direction);
      let ring = DescriptorRing::new(direction,
                                     DESC_BUS_BASE + DESC_BUS_STRIDE * slot as u32,
                                     BUFF_BUS_BASE + BUFF_BUS_STRIDE * slot as u64,
                                     num_buffs,
                                     buff_size);
      let engine = DmaEngineController::new(channel, direction, use_interrupts);
      // program the engine
      with_retries(|| regs.write_register(engine.register(DMA_NEXT_DESC_PTR), ring.desc_base()))?;
      let sw_ptr = match direction {
        DmaDirection::C2S => ring.desc_addr(ring.num_buffs() - 1),
        DmaDirection::S2C => 0,
      };
      with_retries(|| regs.write_register(engine.register(DMA_SW_DESC_PTR), sw_ptr))?;
      with_retries(|| regs.write_register(engine.register(DMA_COMPLETED_DESC_PTR), 0))?;
      engine.enable(regs.as_ref())?;
      rings.push(Mutex::new(ring));
      engines.push(engine);
    }
    let num_buffs = match rings[0].lock() {
      Ok(ring) => ring.num_buffs(),
      Err(_)   => num_buffs,
    };
    let core = Arc::new(RingCore {
      regs,
      rings,
      tracker   : ChannelIndexTracker::new(num_buffs, buff_size),
      engines,
      service   : vec![Mutex::new(()), Mutex::new(())],
      buff_size,
    });
    let mut pollers = Vec::<ChannelPoller>::new();
    for channel in DmaChannel::all() {
      let poll_core = core.clone();
      let routine : ServiceRoutine = Arc::new(move || poll_core.service(channel));
      let name = format!("dtc-poller-{}", channel.to_u8());
      pollers.push(ChannelPoller::spawn(&name, routine, Duration::from_millis(IDLE_POLL_MSEC)));
    }
    info!("Initialized {} descriptor rings with {} x {} bytes", NRINGS, num_buffs, buff_size);
    Ok(Self {
      core,
      pollers,
    })
  }

  /// Interrupt notification for a channel
  pub fn interrupt(&self, channel : DmaChannel) {
    self.pollers[channel.to_u8() as usize].wake();
  }

  /// Service a channel from the calling thread
  pub fn service_channel(&self, channel : DmaChannel) -> Result<bool, DTCError> {
    self.core.service(channel)
  }

  pub fn channel_state(&self, channel : DmaChannel, direction : DmaDirection) 
    -> Result<ChannelIndexState, DTCError> {
    self.core.tracker.snapshot(channel, direction)
  }

  pub fn engine_state(&self, channel : DmaChannel, direction : DmaDirection) 
    -> Result<EngineState, DTCError> {
    self.core.engine(channel, direction).state(self.core.regs.as_ref())
  }

  /// Get the other end of the rings
  pub fn card_port(&self) -> CardPort<R> {
    CardPort {
      core   : self.core.clone(),
      wakers : self.pollers.iter().map(|p| p.waker()).collect(),
      cursor : Mutex::new([0usize;NRINGS]),
    }
  }

  /// Hand out the next completed C2S buffer, if any.
  /// Returns None if nothing is there, Some(None) if 
  /// the next buffer is announced but not complete
  fn try_hand_out(&self, channel : DmaChannel) -> Result<Option<Option<DmaBuffer>>, DTCError> {
    let idx = match self.core.tracker.next_unread(channel)? {
      None      => return Ok(None),
      Some(idx) => idx,
    };
    let ring = self.core.ring(channel, DmaDirection::C2S)?;
    if !ring.complete_bit(idx) {
      return Ok(Some(None));
    }
    let desc   = C2SDescriptor::unpack(&ring.raw(idx));
    let nbytes = (desc.rsvd_byte_cnt as usize).min(ring.buff_size());
    let data   = ring.buffer(idx)[..nbytes].to_vec();
    drop(ring);
    let held_idx = self.core.tracker.hold(channel)?;
    debug!("Handing out buffer {} of {} ({} bytes)", held_idx, channel, nbytes);
    Ok(Some(Some(DmaBuffer::new(data))))
  }
}

impl<R : RegisterAccess + 'static> Drop for RingDevice<R> {
  fn drop(&mut self) {
    for poller in self.pollers.iter_mut() {
      poller.stop();
    }
    for (channel, direction) in all_rings() {
      match self.core.engine(channel, direction).disable(self.core.regs.as_ref()) {
        Err(err) => error!("Unable to disable engine {} {}! {err}", channel, direction),
        Ok(_)    => ()
      }
    }
  }
}

impl<R : RegisterAccess + 'static> RegisterAccess for RingDevice<R> {
  
  fn read_register(&self, address : u16) -> Result<u32, DTCError> {
    self.core.read_reg(address)
  }

  fn write_register(&self, address : u16, value : u32) -> Result<(), DTCError> {
    self.core.write_reg(address, value)
  }
}

impl<R : RegisterAccess + 'static> DeviceTransport for RingDevice<R> {

  fn read_data(&self, channel : DmaChannel, timeout_ms : u64) -> Result<DmaBuffer, DTCError> {
    let start     = Instant::now();
    let timeout   = Duration::from_millis(timeout_ms);
    loop {
      self.core.service(channel)?;
      let announced = match self.try_hand_out(channel)? {
        Some(Some(buffer)) => return Ok(buffer),
        Some(None)         => true,
        None               => false,
      };
      if start.elapsed() >= timeout {
        if announced {
          warn!("Buffer of {} announced, but not completed within {} ms", channel, timeout_ms);
          return Err(DTCError::Timeout);
        }
        return Ok(DmaBuffer::empty());
      }
      thread::sleep(Duration::from_micros(WAIT_SLEEP_USEC));
    }
  }

  fn read_release(&self, channel : DmaChannel, count : usize) -> Result<(), DTCError> {
    let released = self.core.tracker.release(channel, count)?;
    if released.is_empty() {
      return Ok(());
    }
    let mut ring = self.core.ring(channel, DmaDirection::C2S)?;
    for idx in &released {
      ring.reset_descriptor(*idx);
    }
    let state  = self.core.tracker.snapshot(channel, DmaDirection::C2S)?;
    // the engine may fill up to the descriptor before sw_idx
    let sw_ptr = ring.desc_addr(idx_add(state.sw_idx, ring.num_buffs() - 1, ring.num_buffs()));
    drop(ring);
    let engine = self.core.engine(channel, DmaDirection::C2S);
    self.core.write_reg(engine.register(DMA_SW_DESC_PTR), sw_ptr)?;
    debug!("Released {} buffers of {}", released.len(), channel);
    Ok(())
  }

  fn write_data(&self, channel : DmaChannel, data : &[u8]) -> Result<(), DTCError> {
    if data.len() > self.core.buff_size {
      error!("Can not send {} bytes, buffers are {} bytes!", data.len(), self.core.buff_size);
      return Err(DTCError::PacketTooLarge);
    }
    let start = Instant::now();
    loop {
      self.core.service(channel)?;
      let state = self.core.tracker.snapshot(channel, DmaDirection::S2C)?;
      // keep one descriptor free, otherwise a full 
      // ring looks like an empty one
      if state.available(DmaDirection::S2C) > 1 {
        let mut ring = self.core.ring(channel, DmaDirection::S2C)?;
        if ring.complete_bit(state.sw_idx) {
          ring.buffer_mut(state.sw_idx)[..data.len()].copy_from_slice(data);
          let mut desc = S2CDescriptor::unpack(&ring.raw(state.sw_idx));
          desc.byte_count   = data.len() as u32;
          desc.byte_cnt     = data.len() as u32;
          desc.complete     = false;
          desc.error        = false;
          desc.start_of_pkt = true;
          desc.end_of_pkt   = true;
          ring.set_raw(state.sw_idx, desc.pack());
          let sw_ptr = ring.desc_addr(state.sw_idx);
          drop(ring);
          self.core.tracker.advance(channel, DmaDirection::S2C, 1)?;
          let engine = self.core.engine(channel, DmaDirection::S2C);
          self.core.write_reg(engine.register(DMA_SW_DESC_PTR), sw_ptr)?;
          trace!("Submitted {} bytes on {}", data.len(), channel);
          return Ok(());
        }
      }
      if start.elapsed() >= Duration::from_millis(WRITE_WAIT_MSEC) {
        error!("No free descriptor for {}!", channel);
        return Err(DTCError::RingFull);
      }
      thread::sleep(Duration::from_micros(WAIT_SLEEP_USEC));
    }
  }
}

/// What the DMA engines of the card do with the rings
pub struct CardPort<R : RegisterAccess> {
  core   : Arc<RingCore<R>>,
  wakers : Vec<PollerWaker>,
  /// next C2S descriptor to fill, next 
  /// S2C descriptor to fetch
  cursor : Mutex<[usize;NRINGS]>,
}

impl<R : RegisterAccess> CardPort<R> {

  fn engine_enabled(&self, channel : DmaChannel, direction : DmaDirection) -> Result<bool, DTCError> {
    let engine = self.core.engine(channel, direction);
    let value  = self.core.read_reg(engine.register(DMA_CONTROL_STATUS))?;
    Ok((value & DMA_CTRL_ENABLE) > 0 && (value & DMA_CTRL_ERROR_MASK) == 0)
  }

  /// Fill the next C2S buffer of the channel and 
  /// raise an interrupt. The data is the complete 
  /// buffer, starting with the 8 byte count.
  ///
  /// Returns false if the engine is not running
  /// or the host has not released enough buffers.
  pub fn send(&self, channel : DmaChannel, data : &[u8]) -> Result<bool, DTCError> {
    if !self.engine_enabled(channel, DmaDirection::C2S)? {
      return Ok(false);
    }
    let slot   = ring_slot(channel, DmaDirection::C2S);
    let engine = self.core.engine(channel, DmaDirection::C2S);
    let mut cursor = match self.cursor.lock() {
      Ok(c)    => c,
      Err(err) => {
        error!("Card cursor poisoned! {err}");
        return Err(DTCError::IoError);
      }
    };
    let mut ring = self.core.ring(channel, DmaDirection::C2S)?;
    let n        = ring.num_buffs();
    let sw_ptr   = self.core.read_reg(engine.register(DMA_SW_DESC_PTR))?;
    let limit    = idx_add(dma_addr_to_idx(sw_ptr, ring.desc_base(), n)?, 1, n);
    let idx      = cursor[slot];
    if idx_add(idx, 1, n) == limit {
      trace!("C2S ring of {} full", channel);
      return Ok(false);
    }
    let nbytes = data.len().min(ring.buff_size());
    ring.buffer_mut(idx)[..nbytes].copy_from_slice(&data[..nbytes]);
    let mut desc = C2SDescriptor::unpack(&ring.raw(idx));
    desc.complete      = true;
    desc.error         = false;
    desc.short         = nbytes < ring.buff_size();
    desc.rsvd_byte_cnt = nbytes as u32;
    ring.set_raw(idx, desc.pack());
    let desc_addr = ring.desc_addr(idx);
    drop(ring);
    cursor[slot] = idx_add(idx, 1, n);
    drop(cursor);
    self.core.write_reg(engine.register(DMA_COMPLETED_DESC_PTR), desc_addr)?;
    self.wakers[channel.to_u8() as usize].wake();
    Ok(true)
  }

  /// Fetch everything the host submitted on 
  /// the channel
  pub fn receive(&self, channel : DmaChannel) -> Result<Vec<Vec<u8>>, DTCError> {
    let mut received = Vec::<Vec<u8>>::new();
    if !self.engine_enabled(channel, DmaDirection::S2C)? {
      return Ok(received);
    }
    let engine = self.core.engine(channel, DmaDirection::S2C);
    let sw_ptr = self.core.read_reg(engine.register(DMA_SW_DESC_PTR))?;
    if sw_ptr == 0 {
      return Ok(received);
    }
    let slot = ring_slot(channel, DmaDirection::S2C);
    let mut cursor = match self.cursor.lock() {
      Ok(c)    => c,
      Err(err) => {
        error!("Card cursor poisoned! {err}");
        return Err(DTCError::IoError);
      }
    };
    let mut ring = self.core.ring(channel, DmaDirection::S2C)?;
    let n        = ring.num_buffs();
    let end      = idx_add(dma_addr_to_idx(sw_ptr, ring.desc_base(), n)?, 1, n);
    let mut last = None;
    while cursor[slot] != end {
      let idx      = cursor[slot];
      let mut desc = S2CDescriptor::unpack(&ring.raw(idx));
      let nbytes   = (desc.byte_count as usize).min(ring.buff_size());
      received.push(ring.buffer(idx)[..nbytes].to_vec());
      desc.complete = true;
      ring.set_raw(idx, desc.pack());
      last = Some(ring.desc_addr(idx));
      cursor[slot] = idx_add(idx, 1, n);
    }
    drop(ring);
    drop(cursor);
    if let Some(desc_addr) = last {
      self.core.write_reg(engine.register(DMA_COMPLETED_DESC_PTR), desc_addr)?;
      self.wakers[channel.to_u8() as usize].wake();
    }
    Ok(received)
  }

  /// Move the completion pointer onto the next C2S
  /// descriptor without filling it. The next `send`
  /// completes that descriptor.
  pub fn announce(&self, channel : DmaChannel) -> Result<(), DTCError> {
    let engine = self.core.engine(channel, DmaDirection::C2S);
    let idx    = match self.cursor.lock() {
      Ok(c)    => c[ring_slot(channel, DmaDirection::C2S)],
      Err(_)   => return Err(DTCError::IoError),
    };
    let ring      = self.core.ring(channel, DmaDirection::C2S)?;
    let desc_addr = ring.desc_addr(idx);
    drop(ring);
    self.core.write_reg(engine.register(DMA_COMPLETED_DESC_PTR), desc_addr)
  }

  /// Report a completion pointer which is not 
  /// part of the ring
  pub fn corrupt_completion(&self, channel : DmaChannel) -> Result<(), DTCError> {
    let engine = self.core.engine(channel, DmaDirection::C2S);
    let ring   = self.core.ring(channel, DmaDirection::C2S)?;
    let bogus  = ring.desc_addr(0) + 32 * ring.num_buffs() as u32;
    drop(ring);
    self.core.write_reg(engine.register(DMA_COMPLETED_DESC_PTR), bogus)
  }

  /// Number of descriptors between the card 
  /// and the host on the C2S side
  pub fn c2s_pending(&self, channel : DmaChannel) -> Result<usize, DTCError> {
    let state = self.core.tracker.snapshot(channel, DmaDirection::C2S)?;
    let cursor = match self.cursor.lock() {
      Ok(c)    => c[ring_slot(channel, DmaDirection::C2S)],
      Err(_)   => return Err(DTCError::IoError),
    };
    Ok(idx_delta(cursor, state.sw_idx, state.num_buffs))
  }
}

#[cfg(test)]
mod test_device {
  use super::*;
  use crate::simulator::RegisterMap;

  fn make_device(num_buffs : usize) -> (Arc<RegisterMap>, RingDevice<RegisterMap>) {
    let regs   = Arc::new(RegisterMap::new());
    let device = RingDevice::new(regs.clone(), num_buffs, 256, true).unwrap();
    (regs, device)
  }

  #[test]
  fn card_to_host() {
    let (_regs, device) = make_device(4);
    let card = device.card_port();
    assert!(device.read_data(DmaChannel::DAQ, 0).unwrap().is_empty());
    let payload = DmaBuffer::from_payload(&[1u8;32]);
    assert!(card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    let buffer = device.read_data(DmaChannel::DAQ, 100).unwrap();
    assert_eq!(buffer.payload(), &[1u8;32]);
    assert_eq!(device.channel_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap().held, 1);
    device.read_release(DmaChannel::DAQ, 1).unwrap();
    let state = device.channel_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap();
    assert_eq!(state.held, 0);
    assert_eq!(state.sw_idx, 1);
    assert_eq!(state.hw_idx, 1);
  }

  #[test]
  fn incomplete_descriptor_is_not_handed_out() {
    let (_regs, device) = make_device(4);
    let card = device.card_port();
    card.announce(DmaChannel::DAQ).unwrap();
    assert_eq!(device.read_data(DmaChannel::DAQ, 5), Err(DTCError::Timeout));
    assert_eq!(device.read_data(DmaChannel::DAQ, 0), Err(DTCError::Timeout));
    assert_eq!(device.channel_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap().held, 0);
    // now the card finishes the transfer
    let payload = DmaBuffer::from_payload(&[9u8;24]);
    assert!(card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    let buffer = device.read_data(DmaChannel::DAQ, 100).unwrap();
    assert_eq!(buffer.payload(), &[9u8;24]);
    assert_eq!(device.channel_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap().held, 1);
  }

  #[test]
  fn card_stops_at_unreleased_buffers() {
    let (_regs, device) = make_device(4);
    let card = device.card_port();
    let payload = DmaBuffer::from_payload(&[2u8;16]);
    // one descriptor always stays free
    assert!(card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    assert!(card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    assert!(card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    assert!(!card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    for _ in 0..3 {
      assert!(!device.read_data(DmaChannel::DAQ, 100).unwrap().is_empty());
    }
    device.read_release(DmaChannel::DAQ, 3).unwrap();
    assert!(card.send(DmaChannel::DAQ, payload.as_bytes()).unwrap());
    assert_eq!(card.c2s_pending(DmaChannel::DAQ).unwrap(), 1);
  }

  #[test]
  fn host_to_card() {
    let (_regs, device) = make_device(4);
    let card = device.card_port();
    for k in 0..10u8 {
      let buffer = DmaBuffer::from_payload(&[k;16]);
      device.write_data(DmaChannel::DCS, buffer.as_bytes()).unwrap();
      let received = card.receive(DmaChannel::DCS).unwrap();
      assert_eq!(received.len(), 1);
      assert_eq!(DmaBuffer::new(received[0].clone()).payload(), &[k;16]);
    }
    assert!(device.write_data(DmaChannel::DCS, &[0u8;512]).is_err());
  }

  #[test]
  fn bogus_completion_pointer_faults_channel() {
    let (_regs, device) = make_device(4);
    let card = device.card_port();
    card.corrupt_completion(DmaChannel::DAQ).unwrap();
    assert_eq!(device.read_data(DmaChannel::DAQ, 0), Err(DTCError::RingIndexOutOfRange));
    assert_eq!(device.read_data(DmaChannel::DAQ, 0), Err(DTCError::RingIndexOutOfRange));
    assert!(device.channel_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap().faulted);
    // the other channel keeps working
    assert!(device.read_data(DmaChannel::DCS, 0).unwrap().is_empty());
  }

  #[test]
  fn latched_engine_error_is_healed() {
    let (regs, device) = make_device(4);
    regs.latch_engine_error(true, 0, DMA_CTRL_FETCH_ERROR);
    // the poller might get there first
    device.service_channel(DmaChannel::DAQ).unwrap();
    assert_eq!(device.engine_state(DmaChannel::DAQ, DmaDirection::C2S).unwrap(), 
               EngineState::Running);
  }
}
