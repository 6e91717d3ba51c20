//! Index bookkeeping of the descriptor rings
//!
//! For each (channel, direction) the tracker keeps 
//!
//! * hw_idx - advanced by the poll/interrupt context from 
//!            what the engine reports
//! * sw_idx - advanced by the client context when buffers
//!            are consumed (C2S) or submitted (S2C)
//! * held   - C2S buffers handed out to the client, 
//!            but not yet released
//!
//! Each (channel, direction) sits behind its own 
//! lock, which is only held for the update itself.

use std::fmt;
use std::sync::{
    Mutex,
    MutexGuard,
};
use std::time::Instant;

use dtc_dataclasses::errors::DTCError;

use crate::dma::ring::{
    idx_add,
    idx_delta,
};
use crate::memory::{
    ring_slot,
    DmaChannel,
    DmaDirection,
    NRINGS,
};

/// Number of service samples kept per channel
pub const STATS_RING_SIZE : usize = 64;

#[derive(Debug, Copy, Clone)]
pub struct ServiceSample {
  pub time    : Instant,
  /// buffers completed since the last sample
  pub buffers : usize,
  pub bytes   : usize,
}

/// Last STATS_RING_SIZE service samples
#[derive(Debug, Clone)]
pub struct StatsRing {
  samples : Vec<ServiceSample>,
  next    : usize,
}

impl StatsRing {
  pub fn new() -> Self {
    Self {
      samples : Vec::<ServiceSample>::with_capacity(STATS_RING_SIZE),
      next    : 0,
    }
  }

  pub fn push(&mut self, sample : ServiceSample) {
    if self.samples.len() < STATS_RING_SIZE {
      self.samples.push(sample);
    } else {
      self.samples[self.next] = sample;
    }
    self.next = idx_add(self.next, 1, STATS_RING_SIZE);
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn total_buffers(&self) -> usize {
    self.samples.iter().map(|s| s.buffers).sum()
  }

  pub fn total_bytes(&self) -> usize {
    self.samples.iter().map(|s| s.bytes).sum()
  }

  /// Throughput over the time covered by the samples 
  /// in bytes/s
  pub fn rate(&self) -> f64 {
    if self.samples.len() < 2 {
      return 0.0;
    }
    let mut first = self.samples[0].time;
    let mut last  = self.samples[0].time;
    for s in &self.samples {
      if s.time < first { first = s.time; }
      if s.time > last  { last  = s.time; }
    }
    let dt = (last - first).as_secs_f64();
    if dt == 0.0 {
      return 0.0;
    }
    self.total_bytes() as f64 / dt
  }
}

impl Default for StatsRing {
  fn default() -> Self {
    Self::new()
  }
}

/// State of one (channel, direction)
#[derive(Debug, Clone)]
pub struct ChannelIndexState {
  pub hw_idx    : usize,
  pub sw_idx    : usize,
  pub held      : usize,
  pub num_buffs : usize,
  pub buff_size : usize,
  /// the engine reported an impossible index, 
  /// nothing moves until the channel is reset
  pub faulted   : bool,
  pub stats     : StatsRing,
}

impl ChannelIndexState {
  pub fn new(num_buffs : usize, buff_size : usize) -> Self {
    Self {
      hw_idx    : 0,
      sw_idx    : 0,
      held      : 0,
      num_buffs : num_buffs.max(1),
      buff_size,
      faulted   : false,
      stats     : StatsRing::new(),
    }
  }

  /// C2S : filled buffers the host has not consumed,
  /// S2C : buffers the host may still submit
  pub fn available(&self, direction : DmaDirection) -> usize {
    let n = self.num_buffs;
    match direction {
      DmaDirection::C2S => idx_delta(self.hw_idx, self.sw_idx, n),
      DmaDirection::S2C => n - idx_delta(self.sw_idx, self.hw_idx, n),
    }
  }
}

impl fmt::Display for ChannelIndexState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<ChannelIndexState: hw {} sw {} held {} nbuffs {} size {} faulted {}>",
           self.hw_idx, self.sw_idx, self.held, self.num_buffs, self.buff_size, self.faulted)
  }
}

pub struct ChannelIndexTracker {
  states : Vec<Mutex<ChannelIndexState>>,
}

impl ChannelIndexTracker {

  /// All rings get the same geometry
  pub fn new(num_buffs : usize, buff_size : usize) -> Self {
    let mut states = Vec::<Mutex<ChannelIndexState>>::with_capacity(NRINGS);
    for _ in 0..NRINGS {
      states.push(Mutex::new(ChannelIndexState::new(num_buffs, buff_size)));
    }
    Self {
      states
    }
  }

  fn lock(&self, channel : DmaChannel, direction : DmaDirection) 
    -> Result<MutexGuard<'_, ChannelIndexState>, DTCError> {
    match self.states[ring_slot(channel, direction)].lock() {
      Ok(state) => Ok(state),
      Err(err)  => {
        error!("Index state of {} {} poisoned! {err}", channel, direction);
        Err(DTCError::IoError)
      }
    }
  }

  fn lock_healthy(&self, channel : DmaChannel, direction : DmaDirection) 
    -> Result<MutexGuard<'_, ChannelIndexState>, DTCError> {
    let state = self.lock(channel, direction)?;
    if state.faulted {
      return Err(DTCError::RingIndexOutOfRange);
    }
    Ok(state)
  }

  /// A copy of the current state
  pub fn snapshot(&self, channel : DmaChannel, direction : DmaDirection) 
    -> Result<ChannelIndexState, DTCError> {
    Ok(self.lock(channel, direction)?.clone())
  }

  pub fn num_buffs(&self, channel : DmaChannel, direction : DmaDirection) -> Result<usize, DTCError> {
    Ok(self.lock(channel, direction)?.num_buffs)
  }

  pub fn available(&self, channel : DmaChannel, direction : DmaDirection) -> Result<usize, DTCError> {
    Ok(self.lock_healthy(channel, direction)?.available(direction))
  }

  /// C2S buffers which are filled, but not 
  /// yet handed out
  pub fn unread(&self, channel : DmaChannel) -> Result<usize, DTCError> {
    let state = self.lock_healthy(channel, DmaDirection::C2S)?;
    Ok(state.available(DmaDirection::C2S).saturating_sub(state.held))
  }

  /// Index of the next C2S buffer to hand out,
  /// if there is one
  pub fn next_unread(&self, channel : DmaChannel) -> Result<Option<usize>, DTCError> {
    let state = self.lock_healthy(channel, DmaDirection::C2S)?;
    if state.available(DmaDirection::C2S) <= state.held {
      return Ok(None);
    }
    Ok(Some(idx_add(state.sw_idx, state.held, state.num_buffs)))
  }

  /// Advance the software index, returns the new index
  pub fn advance(&self, channel : DmaChannel, direction : DmaDirection, count : usize) 
    -> Result<usize, DTCError> {
    let mut state = self.lock_healthy(channel, direction)?;
    state.sw_idx = idx_add(state.sw_idx, count, state.num_buffs);
    Ok(state.sw_idx)
  }

  /// Take over a freshly read hardware index.
  ///
  /// An index outside of the ring faults the channel.
  pub fn set_hw_idx(&self, channel : DmaChannel, direction : DmaDirection, idx : usize) 
    -> Result<usize, DTCError> {
    let mut state = self.lock_healthy(channel, direction)?;
    if idx >= state.num_buffs {
      error!("Hardware index {} for {} {} outside of ring with {} entries!",
             idx, channel, direction, state.num_buffs);
      state.faulted = true;
      return Err(DTCError::RingIndexOutOfRange);
    }
    let moved    = idx_delta(idx, state.hw_idx, state.num_buffs);
    state.hw_idx = idx;
    Ok(moved)
  }

  /// Mark the channel as inconsistent with the hardware
  pub fn set_faulted(&self, channel : DmaChannel, direction : DmaDirection) -> Result<(), DTCError> {
    self.lock(channel, direction)?.faulted = true;
    Ok(())
  }

  /// Count one more buffer as handed out to the client
  pub fn hold(&self, channel : DmaChannel) -> Result<usize, DTCError> {
    let mut state = self.lock_healthy(channel, DmaDirection::C2S)?;
    if state.held >= state.available(DmaDirection::C2S) {
      return Err(DTCError::RingIndexOutOfRange);
    }
    let idx = idx_add(state.sw_idx, state.held, state.num_buffs);
    state.held += 1;
    Ok(idx)
  }

  /// Give back up to count held C2S buffers. 
  /// Returns the indices which got released.
  pub fn release(&self, channel : DmaChannel, count : usize) -> Result<Vec<usize>, DTCError> {
    let mut state = self.lock_healthy(channel, DmaDirection::C2S)?;
    let count = count.min(state.held);
    let mut released = Vec::<usize>::with_capacity(count);
    for k in 0..count {
      released.push(idx_add(state.sw_idx, k, state.num_buffs));
    }
    state.sw_idx = idx_add(state.sw_idx, count, state.num_buffs);
    state.held  -= count;
    Ok(released)
  }

  pub fn held(&self, channel : DmaChannel) -> Result<usize, DTCError> {
    Ok(self.lock(channel, DmaDirection::C2S)?.held)
  }

  pub fn record_sample(&self, channel : DmaChannel, direction : DmaDirection, buffers : usize, bytes : usize) 
    -> Result<(), DTCError> {
    let mut state = self.lock(channel, direction)?;
    state.stats.push(ServiceSample {
      time : Instant::now(),
      buffers,
      bytes,
    });
    Ok(())
  }

  /// Back to the power on state, this also 
  /// clears a fault
  pub fn reset(&self, channel : DmaChannel, direction : DmaDirection) -> Result<(), DTCError> {
    let mut state = self.lock(channel, direction)?;
    let fresh = ChannelIndexState::new(state.num_buffs, state.buff_size);
    *state = fresh;
    Ok(())
  }
}

#[cfg(test)]
mod test_tracker {
  use super::*;

  #[test]
  fn available_accounts_for_ring() {
    let n = 8;
    for hw in 0..n {
      for sw in 0..n {
        let mut state = ChannelIndexState::new(n, 64);
        state.hw_idx = hw;
        state.sw_idx = sw;
        let c2s = state.available(DmaDirection::C2S);
        if hw != sw {
          assert_eq!(c2s + idx_delta(sw, hw, n), n);
        } else {
          assert_eq!(c2s, 0);
          assert_eq!(state.available(DmaDirection::S2C), n);
        }
        assert!(state.available(DmaDirection::S2C) <= n);
      }
    }
  }

  #[test]
  fn hold_and_release() {
    let tracker = ChannelIndexTracker::new(4, 64);
    assert_eq!(tracker.next_unread(DmaChannel::DAQ).unwrap(), None);
    tracker.set_hw_idx(DmaChannel::DAQ, DmaDirection::C2S, 3).unwrap();
    assert_eq!(tracker.unread(DmaChannel::DAQ).unwrap(), 3);
    assert_eq!(tracker.hold(DmaChannel::DAQ).unwrap(), 0);
    assert_eq!(tracker.hold(DmaChannel::DAQ).unwrap(), 1);
    assert_eq!(tracker.next_unread(DmaChannel::DAQ).unwrap(), Some(2));
    assert_eq!(tracker.release(DmaChannel::DAQ, 5).unwrap(), vec![0, 1]);
    let state = tracker.snapshot(DmaChannel::DAQ, DmaDirection::C2S).unwrap();
    assert_eq!(state.sw_idx, 2);
    assert_eq!(state.held, 0);
    assert_eq!(tracker.unread(DmaChannel::DAQ).unwrap(), 1);
    // the DCS channel is independent
    assert_eq!(tracker.unread(DmaChannel::DCS).unwrap(), 0);
  }

  #[test]
  fn out_of_range_faults_channel() {
    let tracker = ChannelIndexTracker::new(4, 64);
    assert_eq!(tracker.set_hw_idx(DmaChannel::DCS, DmaDirection::C2S, 4),
               Err(DTCError::RingIndexOutOfRange));
    assert_eq!(tracker.available(DmaChannel::DCS, DmaDirection::C2S),
               Err(DTCError::RingIndexOutOfRange));
    assert_eq!(tracker.advance(DmaChannel::DCS, DmaDirection::C2S, 1),
               Err(DTCError::RingIndexOutOfRange));
    tracker.reset(DmaChannel::DCS, DmaDirection::C2S).unwrap();
    assert_eq!(tracker.available(DmaChannel::DCS, DmaDirection::C2S), Ok(0));
  }

  #[test]
  fn stats_ring_keeps_last_samples() {
    let tracker = ChannelIndexTracker::new(4, 64);
    for _ in 0..100 {
      tracker.record_sample(DmaChannel::DAQ, DmaDirection::C2S, 1, 10).unwrap();
    }
    let state = tracker.snapshot(DmaChannel::DAQ, DmaDirection::C2S).unwrap();
    assert_eq!(state.stats.len(), STATS_RING_SIZE);
    assert_eq!(state.stats.total_bytes(), 10*STATS_RING_SIZE);
  }
}
