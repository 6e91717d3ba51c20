//! State machine of a single DMA engine
//!
//! The engine state is derived from its control/status 
//! register each time, the controller itself keeps no 
//! state besides its configuration. 
//!
//! `check_and_heal` is run from the poller on every 
//! interrupt and every tick. Latched errors of a C2S 
//! engine trigger a user reset followed by a full 
//! reset, a disabled engine gets enabled again. A 
//! healthy engine is left alone.

use std::fmt;
use std::thread;
use std::time::Duration;

use dtc_dataclasses::errors::DTCError;

use crate::memory::{
    DmaChannel,
    DmaDirection,
    RegisterAccess,
};
use crate::registers::*;

/// Maximum number of status polls while waiting
/// for a reset bit to clear
pub const RESET_SPIN_LIMIT : usize = 1000;

/// Sleep between two polls of the reset bits
/// in microsec
pub const RESET_SPIN_USEC  : u64   = 1;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum EngineState {
  /// not enabled
  Idle,
  /// enabled and moving data
  Running,
  /// enabled, waiting for descriptors
  Waiting,
  /// one of the error bits is set
  ErrorLatched,
  /// a reset is in progress
  Resetting,
}

impl EngineState {
  pub fn from_control(value : u32) -> Self {
    if (value & (DMA_CTRL_USER_RESET | DMA_CTRL_RESET)) > 0 {
      return EngineState::Resetting;
    }
    if (value & DMA_CTRL_ERROR_MASK) > 0 {
      return EngineState::ErrorLatched;
    }
    if (value & DMA_CTRL_ENABLE) == 0 {
      return EngineState::Idle;
    }
    if (value & DMA_CTRL_RUNNING) > 0 {
      return EngineState::Running;
    }
    EngineState::Waiting
  }
}

impl fmt::Display for EngineState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      EngineState::Idle         => "Idle",
      EngineState::Running      => "Running",
      EngineState::Waiting      => "Waiting",
      EngineState::ErrorLatched => "ErrorLatched",
      EngineState::Resetting    => "Resetting",
    };
    write!(f, "<EngineState: {}>", repr)
  }
}

/// What check_and_heal had to do
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum HealAction {
  Nothing,
  ReEnabled,
  Reset,
}

#[derive(Debug, Copy, Clone)]
pub struct DmaEngineController {
  pub channel        : DmaChannel,
  pub direction      : DmaDirection,
  /// also set the interrupt enable bit
  /// when (re)enabling
  pub use_interrupts : bool,
}

impl DmaEngineController {

  pub fn new(channel : DmaChannel, direction : DmaDirection, use_interrupts : bool) -> Self {
    Self {
      channel,
      direction,
      use_interrupts,
    }
  }

  /// Start of the register block of this engine
  pub fn base(&self) -> u16 {
    dma_engine_base(self.direction == DmaDirection::C2S, self.channel.to_u8())
  }

  pub fn register(&self, offset : u16) -> u16 {
    self.base() + offset
  }

  pub fn read_control(&self, regs : &dyn RegisterAccess) -> Result<u32, DTCError> {
    regs.read_register(self.register(DMA_CONTROL_STATUS))
  }

  pub fn state(&self, regs : &dyn RegisterAccess) -> Result<EngineState, DTCError> {
    Ok(EngineState::from_control(self.read_control(regs)?))
  }

  fn enable_bits(&self) -> u32 {
    if self.use_interrupts {
      DMA_CTRL_ENABLE | DMA_CTRL_INT_ENABLE
    } else {
      DMA_CTRL_ENABLE
    }
  }

  pub fn enable(&self, regs : &dyn RegisterAccess) -> Result<(), DTCError> {
    debug!("Enabling DMA engine {} {}", self.channel, self.direction);
    regs.write_register(self.register(DMA_CONTROL_STATUS), self.enable_bits())
  }

  pub fn disable(&self, regs : &dyn RegisterAccess) -> Result<(), DTCError> {
    debug!("Disabling DMA engine {} {}", self.channel, self.direction);
    regs.write_register(self.register(DMA_CONTROL_STATUS), 0)
  }

  /// Set a self clearing bit and wait until 
  /// the engine clears it again
  fn spin_reset(&self, regs : &dyn RegisterAccess, bit : u32) -> Result<(), DTCError> {
    let address = self.register(DMA_CONTROL_STATUS);
    regs.write_register(address, bit)?;
    for _ in 0..RESET_SPIN_LIMIT {
      if (regs.read_register(address)? & bit) == 0 {
        return Ok(());
      }
      thread::sleep(Duration::from_micros(RESET_SPIN_USEC));
    }
    error!("DMA engine {} {} stuck in reset ({:#06x})!", self.channel, self.direction, bit);
    Err(DTCError::EngineResetTimeout)
  }

  /// User reset, full reset, enable
  pub fn reset(&self, regs : &dyn RegisterAccess) -> Result<(), DTCError> {
    warn!("Resetting DMA engine {} {}", self.channel, self.direction);
    self.spin_reset(regs, DMA_CTRL_USER_RESET)?;
    self.spin_reset(regs, DMA_CTRL_RESET)?;
    self.enable(regs)
  }

  /// Bring the engine back into a working state, 
  /// if needed. Idempotent.
  pub fn check_and_heal(&self, regs : &dyn RegisterAccess) -> Result<HealAction, DTCError> {
    let value = self.read_control(regs)?;
    if (value & DMA_CTRL_ERROR_MASK) > 0 {
      if self.direction == DmaDirection::C2S {
        warn!("DMA engine {} {} latched errors {:#06x}", self.channel, self.direction, 
              value & DMA_CTRL_ERROR_MASK);
        self.reset(regs)?;
        return Ok(HealAction::Reset);
      }
      debug!("Ignoring error bits {:#06x} of S2C engine {}", value & DMA_CTRL_ERROR_MASK, self.channel);
    }
    if (value & DMA_CTRL_ENABLE) == 0 {
      self.enable(regs)?;
      return Ok(HealAction::ReEnabled);
    }
    Ok(HealAction::Nothing)
  }
}

#[cfg(test)]
mod test_engine {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// Engine registers with self clearing resets
  struct FakeEngine {
    regs   : Mutex<HashMap<u16, u32>>,
    writes : Mutex<usize>,
  }

  impl FakeEngine {
    fn new(control : u32) -> Self {
      let mut regs = HashMap::new();
      regs.insert(0x2004, control);
      Self {
        regs   : Mutex::new(regs),
        writes : Mutex::new(0),
      }
    }
  }

  impl RegisterAccess for FakeEngine {
    fn read_register(&self, address : u16) -> Result<u32, DTCError> {
      Ok(*self.regs.lock().unwrap().get(&address).unwrap_or(&0))
    }
    fn write_register(&self, address : u16, value : u32) -> Result<(), DTCError> {
      *self.writes.lock().unwrap() += 1;
      let mut value = value;
      if (value & (DMA_CTRL_USER_RESET | DMA_CTRL_RESET)) > 0 {
        // resets finish immediately and clear everything
        value = 0;
      } else if (value & DMA_CTRL_ENABLE) > 0 {
        value |= DMA_CTRL_RUNNING;
      }
      self.regs.lock().unwrap().insert(address, value);
      Ok(())
    }
  }

  #[test]
  fn healthy_engine_no_writes() {
    let fake = FakeEngine::new(DMA_CTRL_ENABLE | DMA_CTRL_RUNNING);
    let ctrl = DmaEngineController::new(DmaChannel::DAQ, DmaDirection::C2S, false);
    assert_eq!(ctrl.state(&fake).unwrap(), EngineState::Running);
    for _ in 0..10 {
      assert_eq!(ctrl.check_and_heal(&fake).unwrap(), HealAction::Nothing);
    }
    assert_eq!(*fake.writes.lock().unwrap(), 0);
  }

  #[test]
  fn error_triggers_reset() {
    let fake = FakeEngine::new(DMA_CTRL_ENABLE | DMA_CTRL_FETCH_ERROR);
    let ctrl = DmaEngineController::new(DmaChannel::DAQ, DmaDirection::C2S, true);
    assert_eq!(ctrl.state(&fake).unwrap(), EngineState::ErrorLatched);
    assert_eq!(ctrl.check_and_heal(&fake).unwrap(), HealAction::Reset);
    let value = fake.read_register(0x2004).unwrap();
    assert_eq!(value & DMA_CTRL_ERROR_MASK, 0);
    assert!((value & DMA_CTRL_INT_ENABLE) > 0);
    assert_eq!(ctrl.state(&fake).unwrap(), EngineState::Running);
    // user reset, reset, enable
    assert_eq!(*fake.writes.lock().unwrap(), 3);
  }

  #[test]
  fn disabled_engine_is_reenabled() {
    let fake = FakeEngine::new(0);
    let ctrl = DmaEngineController::new(DmaChannel::DAQ, DmaDirection::C2S, false);
    assert_eq!(ctrl.state(&fake).unwrap(), EngineState::Idle);
    assert_eq!(ctrl.check_and_heal(&fake).unwrap(), HealAction::ReEnabled);
    assert_eq!(ctrl.check_and_heal(&fake).unwrap(), HealAction::Nothing);
  }

  #[test]
  fn decode_states() {
    assert_eq!(EngineState::from_control(DMA_CTRL_ENABLE), EngineState::Waiting);
    assert_eq!(EngineState::from_control(DMA_CTRL_RESET | DMA_CTRL_ABORT_ERROR), EngineState::Resetting);
    assert_eq!(EngineState::from_control(DMA_CTRL_ENABLE | DMA_CTRL_CHAIN_END), EngineState::ErrorLatched);
  }
}
