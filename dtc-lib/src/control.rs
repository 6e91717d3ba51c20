//! Convenience functions to set and read
//! the control and monitoring registers
//!
//! All functions work with anything which gives 
//! register access, the simulator as well as a 
//! real card.

use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{
    NaiveDate,
    NaiveDateTime,
};

use dtc_dataclasses::constants::{
    MAX_ROCS_PER_LINK,
    NLINKS,
};
use dtc_dataclasses::errors::DTCError;

use crate::dma::engine::{
    RESET_SPIN_LIMIT,
    RESET_SPIN_USEC,
};
use crate::memory::*;
use crate::registers::*;

fn read_reg<R : RegisterAccess + ?Sized>(regs : &R, address : u16) -> Result<u32, DTCError> {
  with_retries(|| regs.read_register(address))
}

fn write_reg<R : RegisterAccess + ?Sized>(regs : &R, address : u16, value : u32) -> Result<(), DTCError> {
  with_retries(|| regs.write_register(address, value))
}

pub fn get_design_version<R : RegisterAccess + ?Sized>(regs : &R) -> Result<u32, DTCError> {
  read_reg(regs, DESIGN_VERSION)
}

fn bcd(value : u32) -> u32 {
  (value >> 4) * 10 + (value & 0xf)
}

/// Build information of the firmware
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DesignDate {
  /// C, D or E
  pub flavor     : char,
  pub built      : NaiveDateTime,
  pub link_speed : bool,
}

impl DesignDate {
  pub fn from_register(value : u32) -> Result<Self, DTCError> {
    let flavor = match value >> 28 {
      0xC => 'C',
      0xD => 'D',
      0xE => 'E',
      other => {
        warn!("Unknown firmware flavor {:#x}", other);
        '?'
      }
    };
    let year  = 2000 + bcd((value >> 20) & 0xFF) as i32;
    let month = (value >> 16) & 0xF;
    let day   = bcd((value >> 8) & 0xFF);
    let hour  = (value >> 3) & 0x1F;
    let built = NaiveDate::from_ymd_opt(year, month, day)
      .and_then(|date| date.and_hms_opt(hour, 0, 0));
    match built {
      None => {
        error!("Design date {:#010x} is not a valid date!", value);
        Err(DTCError::DataCorruption)
      }
      Some(built) => Ok(Self {
        flavor,
        built,
        link_speed : (value & 0x1) > 0,
      })
    }
  }
}

impl fmt::Display for DesignDate {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DesignDate: {} {} link speed flag {}>", 
           self.flavor, self.built.format("%Y-%m-%d %Hh"), self.link_speed)
  }
}

pub fn get_design_date<R : RegisterAccess + ?Sized>(regs : &R) -> Result<DesignDate, DTCError> {
  DesignDate::from_register(read_reg(regs, DESIGN_DATE)?)
}

/// Sysmon temperature in degree Celsius
pub fn temperature_from_raw(raw : u32) -> f32 {
  ((raw & 0xFFF) as f32) * 503.975 / 4096.0 - 273.15
}

/// Sysmon supply voltage in V
pub fn voltage_from_raw(raw : u32) -> f32 {
  ((raw & 0xFFF) as f32) / 4095.0 * 3.0
}

pub fn get_fpga_temperature<R : RegisterAccess + ?Sized>(regs : &R) -> Result<f32, DTCError> {
  Ok(temperature_from_raw(read_reg(regs, FPGA_TEMPERATURE)?))
}

pub fn get_fpga_vccint<R : RegisterAccess + ?Sized>(regs : &R) -> Result<f32, DTCError> {
  Ok(voltage_from_raw(read_reg(regs, FPGA_VCCINT)?))
}

pub fn get_fpga_vccaux<R : RegisterAccess + ?Sized>(regs : &R) -> Result<f32, DTCError> {
  Ok(voltage_from_raw(read_reg(regs, FPGA_VCCAUX)?))
}

pub fn get_fpga_vccbram<R : RegisterAccess + ?Sized>(regs : &R) -> Result<f32, DTCError> {
  Ok(voltage_from_raw(read_reg(regs, FPGA_VCCBRAM)?))
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct MonitorAlarms {
  pub die_temp  : bool,
  pub any       : bool,
  pub vccbram   : bool,
  pub vccaux    : bool,
  pub vccint    : bool,
  pub user_temp : bool,
}

impl MonitorAlarms {
  pub fn from_register(value : u32) -> Self {
    Self {
      die_temp  : (value & ALARM_DIE_TEMP)  > 0,
      any       : (value & ALARM_OR)        > 0,
      vccbram   : (value & ALARM_VCCBRAM)   > 0,
      vccaux    : (value & ALARM_VCCAUX)    > 0,
      vccint    : (value & ALARM_VCCINT)    > 0,
      user_temp : (value & ALARM_USER_TEMP) > 0,
    }
  }
}

pub fn get_alarms<R : RegisterAccess + ?Sized>(regs : &R) -> Result<MonitorAlarms, DTCError> {
  Ok(MonitorAlarms::from_register(read_reg(regs, FPGA_MONITOR_ALARM)?))
}

/// Set a self clearing bit of the control 
/// register and wait until it is cleared
fn control_pulse<R : RegisterAccess + ?Sized>(regs : &R, bit : u32) -> Result<(), DTCError> {
  let value = read_reg(regs, DTC_CONTROL)?;
  write_reg(regs, DTC_CONTROL, value | bit)?;
  for _ in 0..RESET_SPIN_LIMIT {
    if (read_reg(regs, DTC_CONTROL)? & bit) == 0 {
      return Ok(());
    }
    thread::sleep(Duration::from_micros(RESET_SPIN_USEC));
  }
  error!("Control bit {:#010x} did not clear!", bit);
  Err(DTCError::EngineResetTimeout)
}

pub fn soft_reset<R : RegisterAccess + ?Sized>(regs : &R) -> Result<(), DTCError> {
  info!("Soft reset");
  control_pulse(regs, CONTROL_SOFT_RESET)
}

/// Resets the card, registers get their 
/// power on values
pub fn hard_reset<R : RegisterAccess + ?Sized>(regs : &R) -> Result<(), DTCError> {
  warn!("Hard reset");
  control_pulse(regs, CONTROL_HARD_RESET)
}

pub fn serdes_reset<R : RegisterAccess + ?Sized>(regs : &R) -> Result<(), DTCError> {
  info!("SERDES reset");
  control_pulse(regs, CONTROL_SERDES_RESET)
}

/// Start a cable delay measurement on the 
/// links in loopback
pub fn trigger_cable_delay_loopback<R : RegisterAccess + ?Sized>(regs : &R) -> Result<(), DTCError> {
  control_pulse(regs, CONTROL_CABLE_DELAY)
}

fn check_link(link_id : u8) -> Result<(), DTCError> {
  if link_id >= NLINKS {
    error!("There is no link {}!", link_id);
    return Err(DTCError::InvalidChannel);
  }
  Ok(())
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinkEnable {
  pub transmit : bool,
  pub receive  : bool,
  pub timing   : bool,
}

pub fn get_link_enable<R : RegisterAccess + ?Sized>(regs : &R, link_id : u8) -> Result<LinkEnable, DTCError> {
  check_link(link_id)?;
  let value = read_reg(regs, LINK_ENABLE)?;
  Ok(LinkEnable {
    transmit : (value >> link_id) & 0x1 > 0,
    receive  : (value >> (8 + link_id)) & 0x1 > 0,
    timing   : (value >> (16 + link_id)) & 0x1 > 0,
  })
}

pub fn set_link_enable<R : RegisterAccess + ?Sized>(regs : &R, link_id : u8, enable : LinkEnable) 
  -> Result<(), DTCError> {
  check_link(link_id)?;
  let mut value = read_reg(regs, LINK_ENABLE)?;
  for (bit, on) in [(link_id, enable.transmit), (8 + link_id, enable.receive), (16 + link_id, enable.timing)] {
    if on {
      value |= 1u32 << bit;
    } else {
      value &= !(1u32 << bit);
    }
  }
  regs.write_register_checked(LINK_ENABLE, value)
}

pub fn get_roc_count<R : RegisterAccess + ?Sized>(regs : &R, link_id : u8) -> Result<u8, DTCError> {
  check_link(link_id)?;
  let value = read_reg(regs, ROC_EMULATION_COUNT)?;
  Ok(((value >> (3 * link_id as u32)) & 0x7) as u8)
}

pub fn set_roc_count<R : RegisterAccess + ?Sized>(regs : &R, link_id : u8, n_rocs : u8) -> Result<(), DTCError> {
  check_link(link_id)?;
  if n_rocs > MAX_ROCS_PER_LINK {
    error!("A link can not have {} ROCs!", n_rocs);
    return Err(DTCError::InvalidChannel);
  }
  let shift = 3 * link_id as u32;
  let mut value = read_reg(regs, ROC_EMULATION_COUNT)?;
  value &= !(0x7u32 << shift);
  value |= (n_rocs as u32) << shift;
  regs.write_register_checked(ROC_EMULATION_COUNT, value)
}

pub fn set_detector_emulator<R : RegisterAccess + ?Sized>(regs : &R, enable : bool) -> Result<(), DTCError> {
  let mut value = read_reg(regs, DETECTOR_EMULATOR)?;
  if enable {
    value |= 0x1;
  } else {
    value &= !0x1;
  }
  regs.write_register_checked(DETECTOR_EMULATOR, value)
}

pub fn is_detector_emulator_enabled<R : RegisterAccess + ?Sized>(regs : &R) -> Result<bool, DTCError> {
  Ok((read_reg(regs, DETECTOR_EMULATOR)? & 0x1) > 0)
}

/// Everything the status command shows
#[derive(Debug, Clone, PartialEq)]
pub struct DTCStatus {
  pub version     : u32,
  pub date        : Option<DesignDate>,
  pub temperature : f32,
  pub vccint      : f32,
  pub vccaux      : f32,
  pub vccbram     : f32,
  pub alarms      : MonitorAlarms,
  pub link_enable : u32,
  pub roc_count   : u32,
  pub emulator    : bool,
}

pub fn get_status<R : RegisterAccess + ?Sized>(regs : &R) -> Result<DTCStatus, DTCError> {
  let date = match get_design_date(regs) {
    Ok(date) => Some(date),
    Err(err) => {
      warn!("Unable to decode the design date! {err}");
      None
    }
  };
  Ok(DTCStatus {
    version     : get_design_version(regs)?,
    date,
    temperature : get_fpga_temperature(regs)?,
    vccint      : get_fpga_vccint(regs)?,
    vccaux      : get_fpga_vccaux(regs)?,
    vccbram     : get_fpga_vccbram(regs)?,
    alarms      : get_alarms(regs)?,
    link_enable : read_reg(regs, LINK_ENABLE)?,
    roc_count   : read_reg(regs, ROC_EMULATION_COUNT)?,
    emulator    : is_detector_emulator_enabled(regs)?,
  })
}

impl fmt::Display for DTCStatus {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<DTCStatus:");
    repr += &(format!("\n  design version : {:#010x}", self.version));
    match self.date {
      Some(date) => repr += &(format!("\n  design date    : {}", date)),
      None       => repr += "\n  design date    : N.A.",
    }
    repr += &(format!("\n  FPGA temp      : {:.1} C", self.temperature));
    repr += &(format!("\n  VCCINT         : {:.3} V", self.vccint));
    repr += &(format!("\n  VCCAUX         : {:.3} V", self.vccaux));
    repr += &(format!("\n  VCCBRAM        : {:.3} V", self.vccbram));
    repr += &(format!("\n  alarms         : {:?}", self.alarms));
    repr += &(format!("\n  link enable    : {:#08x}", self.link_enable));
    repr += &(format!("\n  ROC count      : {:#07x}", self.roc_count));
    repr += &(format!("\n  DDR emulator   : {}", self.emulator));
    write!(f, "{}>", repr)
  }
}

#[cfg(test)]
mod test_control {
  use super::*;
  use chrono::{
    Datelike,
    Timelike,
  };
  use crate::simulator::RegisterMap;
  use crate::simulator::register_map::{
    SIM_DESIGN_DATE,
    SIM_DESIGN_VERSION,
  };

  #[test]
  fn design_date() {
    let date = DesignDate::from_register(SIM_DESIGN_DATE).unwrap();
    assert_eq!(date.flavor, 'D');
    assert_eq!(date.built.year(), 2024);
    assert_eq!(date.built.month(), 10);
    assert_eq!(date.built.day(), 19);
    assert_eq!(date.built.hour(), 14);
    assert!(date.link_speed);
    assert!(DesignDate::from_register(0xD2400000).is_err());
  }

  #[test]
  fn monitor_conversions() {
    let regs = RegisterMap::new();
    let temp = get_fpga_temperature(&regs).unwrap();
    assert!((temp - 45.0).abs() < 0.5);
    assert!((get_fpga_vccint(&regs).unwrap() - 1.0).abs() < 0.01);
    assert!((get_fpga_vccaux(&regs).unwrap() - 1.8).abs() < 0.01);
    assert_eq!(get_design_version(&regs).unwrap(), SIM_DESIGN_VERSION);
    assert_eq!(get_alarms(&regs).unwrap(), MonitorAlarms::default());
  }

  #[test]
  fn resets_clear() {
    let regs = RegisterMap::new();
    soft_reset(&regs).unwrap();
    serdes_reset(&regs).unwrap();
    trigger_cable_delay_loopback(&regs).unwrap();
    set_roc_count(&regs, 2, 4).unwrap();
    hard_reset(&regs).unwrap();
    // back to power on
    assert_eq!(get_roc_count(&regs, 2).unwrap(), 1);
  }

  #[test]
  fn link_settings() {
    let regs = RegisterMap::new();
    let off = LinkEnable { transmit : false, receive : true, timing : true };
    set_link_enable(&regs, 3, off).unwrap();
    assert_eq!(get_link_enable(&regs, 3).unwrap(), off);
    assert!(get_link_enable(&regs, 2).unwrap().transmit);
    assert_eq!(get_link_enable(&regs, 6), Err(DTCError::InvalidChannel));
    set_roc_count(&regs, 5, 6).unwrap();
    assert_eq!(get_roc_count(&regs, 5).unwrap(), 6);
    assert_eq!(get_roc_count(&regs, 4).unwrap(), 1);
    assert!(set_roc_count(&regs, 0, 7).is_err());
    set_detector_emulator(&regs, true).unwrap();
    assert!(is_detector_emulator_enabled(&regs).unwrap());
  }
}
