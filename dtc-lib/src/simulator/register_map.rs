//! Register file of the simulated card
//!
//! Behaves like the firmware as far as the host 
//! can tell: power on defaults, self clearing 
//! reset bits, read only monitor registers and 
//! DMA engines which start running when enabled.

use std::collections::HashMap;
use std::sync::Mutex;

use dtc_dataclasses::errors::DTCError;

use crate::memory::RegisterAccess;
use crate::registers::*;

/// Firmware version reported by the simulator
pub const SIM_DESIGN_VERSION : u32 = 0x0002_0105;
/// flavor D, 2024-10-19 14h, link speed flag set
pub const SIM_DESIGN_DATE    : u32 = 0xD24A_1971;
/// about 45 C
pub const SIM_TEMPERATURE    : u32 = 0xA1A;
/// 1.0 V
pub const SIM_VCCINT         : u32 = 0x555;
/// 1.8 V
pub const SIM_VCCAUX         : u32 = 0x999;
/// 1.0 V
pub const SIM_VCCBRAM        : u32 = 0x555;
/// all 6 links transmit and receive
pub const SIM_LINK_ENABLE    : u32 = 0x3F3F;
/// one ROC per link
pub const SIM_ROC_COUNT      : u32 = 0x9249;

#[derive(Debug)]
pub struct RegisterMap {
  regs : Mutex<HashMap<u16, u32>>,
}

impl RegisterMap {

  pub fn new() -> Self {
    let map = Self {
      regs : Mutex::new(HashMap::<u16, u32>::new()),
    };
    map.power_on();
    map
  }

  /// Load the power on defaults
  pub fn power_on(&self) {
    let mut regs = HashMap::<u16, u32>::new();
    regs.insert(DESIGN_VERSION,      SIM_DESIGN_VERSION);
    regs.insert(DESIGN_DATE,         SIM_DESIGN_DATE);
    regs.insert(FPGA_TEMPERATURE,    SIM_TEMPERATURE);
    regs.insert(FPGA_VCCINT,         SIM_VCCINT);
    regs.insert(FPGA_VCCAUX,         SIM_VCCAUX);
    regs.insert(FPGA_VCCBRAM,        SIM_VCCBRAM);
    regs.insert(FPGA_MONITOR_ALARM,  0);
    regs.insert(DTC_CONTROL,         0);
    regs.insert(LINK_ENABLE,         SIM_LINK_ENABLE);
    regs.insert(ROC_EMULATION_COUNT, SIM_ROC_COUNT);
    regs.insert(DETECTOR_EMULATOR,   0);
    for chn in 0..2u8 {
      for c2s in [false, true] {
        let base = dma_engine_base(c2s, chn);
        let caps = if c2s { 0x3 } else { 0x1 };
        regs.insert(base + DMA_CAPABILITIES,   caps);
        regs.insert(base + DMA_CONTROL_STATUS, DMA_CTRL_ENABLE | DMA_CTRL_RUNNING);
      }
    }
    match self.regs.lock() {
      Ok(mut map) => {
        *map = regs;
      }
      Err(err) => {
        error!("Register map poisoned! {err}");
      }
    }
  }

  /// Register value as the firmware sees it, 
  /// no side effects
  pub fn get(&self, address : u16) -> u32 {
    match self.regs.lock() {
      Ok(map) => *map.get(&address).unwrap_or(&0),
      Err(err) => {
        error!("Register map poisoned! {err}");
        0
      }
    }
  }

  /// Firmware side write, bypasses all the 
  /// register semantics
  pub fn set(&self, address : u16, value : u32) {
    match self.regs.lock() {
      Ok(mut map) => {
        map.insert(address, value);
      }
      Err(err) => {
        error!("Register map poisoned! {err}");
      }
    }
  }

  /// Let an engine run into an error
  pub fn latch_engine_error(&self, c2s : bool, channel : u8, bits : u32) {
    let address = dma_engine_base(c2s, channel) + DMA_CONTROL_STATUS;
    let value   = self.get(address);
    self.set(address, value | (bits & DMA_CTRL_ERROR_MASK));
  }

  fn is_engine_control(address : u16) -> bool {
    address < 0x4000 && (address % DMA_ENGINE_STRIDE) == DMA_CONTROL_STATUS
  }
}

impl Default for RegisterMap {
  fn default() -> Self {
    Self::new()
  }
}

impl RegisterAccess for RegisterMap {

  fn read_register(&self, address : u16) -> Result<u32, DTCError> {
    let value = self.get(address);
    trace!("Read {:#010x} from register {:#06x}", value, address);
    Ok(value)
  }

  fn write_register(&self, address : u16, value : u32) -> Result<(), DTCError> {
    trace!("Write {:#010x} to register {:#06x}", value, address);
    match address {
      DESIGN_VERSION | DESIGN_DATE | FPGA_TEMPERATURE | FPGA_VCCINT 
        | FPGA_VCCAUX | FPGA_VCCBRAM | FPGA_MONITOR_ALARM => {
        debug!("Ignoring write to read only register {:#06x}", address);
      }
      DTC_CONTROL => {
        if (value & CONTROL_SOFT_RESET) > 0 {
          debug!("Soft reset");
        }
        if (value & CONTROL_HARD_RESET) > 0 {
          debug!("Hard reset");
          self.power_on();
        }
        if (value & CONTROL_SERDES_RESET) > 0 {
          debug!("SERDES reset");
        }
        self.set(DTC_CONTROL, value & !CONTROL_SELF_CLEARING);
      }
      _ => {
        if Self::is_engine_control(address) {
          if (value & (DMA_CTRL_USER_RESET | DMA_CTRL_RESET)) > 0 {
            // resets complete right away and 
            // leave the engine disabled
            self.set(address, 0);
          } else {
            let latched = self.get(address) & DMA_CTRL_ERROR_MASK;
            let mut new = latched | (value & (DMA_CTRL_ENABLE | DMA_CTRL_INT_ENABLE));
            if (value & DMA_CTRL_ENABLE) > 0 {
              new |= DMA_CTRL_RUNNING;
            }
            self.set(address, new);
          }
        } else {
          self.set(address, value);
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test_register_map {
  use super::*;

  #[test]
  fn self_clearing_control_bits() {
    let map = RegisterMap::new();
    map.write_register(DTC_CONTROL, CONTROL_SOFT_RESET | CONTROL_SERDES_RESET | (1 << 16)).unwrap();
    assert_eq!(map.read_register(DTC_CONTROL).unwrap(), 1 << 16);
    assert!(map.write_register_checked(DTC_CONTROL, CONTROL_CABLE_DELAY).is_ok());
  }

  #[test]
  fn read_only_registers() {
    let map = RegisterMap::new();
    map.write_register(DESIGN_VERSION, 0).unwrap();
    assert_eq!(map.read_register(DESIGN_VERSION).unwrap(), SIM_DESIGN_VERSION);
    assert!(map.write_register_checked(DESIGN_VERSION, 0).is_err());
  }

  #[test]
  fn engine_errors_survive_enable() {
    let map = RegisterMap::new();
    map.latch_engine_error(true, 0, DMA_CTRL_ABORT_ERROR);
    map.write_register(0x2004, DMA_CTRL_ENABLE).unwrap();
    assert!((map.get(0x2004) & DMA_CTRL_ABORT_ERROR) > 0);
    map.write_register(0x2004, DMA_CTRL_USER_RESET).unwrap();
    assert_eq!(map.get(0x2004), 0);
  }
}
