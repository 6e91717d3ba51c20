//! Settings for the DTC software
//!
//! The settings can be written to/read from a 
//! toml file. The environment variables 
//! DTCLIB_SIM_ENABLE, DTCLIB_SIM_FILE and 
//! DTCLIB_DTC take precedence when the settings
//! are created with `from_env`.

use std::env;
use std::fmt;
use std::fs::File;
use std::io::{
    Read,
    Write,
};

use dtc_dataclasses::errors::SerializationError;

use crate::dcs::DCS_DEFAULT_RETRIES;
use crate::simulator::{
    SimMode,
    SIM_BUFF_SIZE,
    SIM_NUM_BUFFS,
};

pub const ENV_SIM_ENABLE : &str = "DTCLIB_SIM_ENABLE";
pub const ENV_SIM_FILE   : &str = "DTCLIB_SIM_FILE";
pub const ENV_DTC        : &str = "DTCLIB_DTC";

/// Settings for the simulated card
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulatorSettings {
  /// What the card does, "Hardware" or 
  /// "Disabled" mean a real card
  pub mode      : SimMode,
  /// DDR image to preload into the 
  /// detector emulator memory
  pub file      : Option<String>,
  /// Let the ROCs ignore DCS requests
  pub silent    : bool,
}

impl SimulatorSettings {
  pub fn new() -> Self {
    Self {
      mode   : SimMode::Tracker,
      file   : None,
      silent : false,
    }
  }
}

impl Default for SimulatorSettings {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DTCSettings {
  /// Index of the card (/dev/mu2e<N>)
  pub device_index     : u8,
  /// Attempts for a DCS transaction
  pub dcs_retries      : usize,
  /// How long a single read waits for data
  /// in millisec (0 - just poll)
  pub read_timeout_ms  : u64,
  /// Number of descriptors per DMA ring
  pub num_buffs        : usize,
  /// Size of each DMA buffer in bytes
  pub buff_size        : usize,
  /// Let the engines raise interrupts
  pub use_interrupts   : bool,
  pub simulator        : SimulatorSettings,
}

impl DTCSettings {
  pub fn new() -> Self {
    Self {
      device_index    : 0,
      dcs_retries     : DCS_DEFAULT_RETRIES,
      read_timeout_ms : 1,
      num_buffs       : SIM_NUM_BUFFS,
      buff_size       : SIM_BUFF_SIZE,
      use_interrupts  : true,
      simulator       : SimulatorSettings::new(),
    }
  }

  /// Defaults, overridden by the environment
  pub fn from_env() -> Self {
    let mut settings = Self::new();
    settings.apply_env(|key| env::var(key).ok());
    settings
  }

  /// Override the settings with whatever the 
  /// lookup knows about the DTCLIB_* variables
  pub fn apply_env<F>(&mut self, lookup : F) 
    where F : Fn(&str) -> Option<String> {
    if let Some(value) = lookup(ENV_SIM_ENABLE) {
      match SimMode::from_env_str(&value) {
        Some(mode) => self.simulator.mode = mode,
        None       => warn!("Ignoring unknown simulation mode {}!", value),
      }
    }
    if let Some(value) = lookup(ENV_SIM_FILE) {
      if !value.is_empty() {
        self.simulator.file = Some(value);
      }
    }
    if let Some(value) = lookup(ENV_DTC) {
      match value.trim().parse::<u8>() {
        Ok(index) => self.device_index = index,
        Err(err)  => warn!("Ignoring device index {}! {err}", value),
      }
    }
  }

  /// Write the settings to a toml file
  pub fn to_toml(&self, mut filename : String) {
    if !filename.ends_with(".toml") {
      filename += ".toml";
    }
    info!("Will write to file {}!", filename);
    match File::create(&filename) {
      Err(err) => {
        error!("Unable to open file {}! {}", filename, err);
      }
      Ok(mut file) => {
        match toml::to_string_pretty(&self) {
          Err(err) => {
            error!("Unable to serialize toml! {err}");
          }
          Ok(toml_string) => {
            match file.write_all(toml_string.as_bytes()) {
              Err(err) => error!("Unable to write to file {}! {}", filename, err),
              Ok(_)    => debug!("Wrote settings to {}!", filename)
            }
          }
        }
      }
    }
  }

  /// Read settings from a toml file
  pub fn from_toml(filename : String) -> Result<DTCSettings, SerializationError> {
    match File::open(&filename) {
      Err(err) => {
        error!("Unable to open {}! {}", filename, err);
        Err(SerializationError::TomlDecodingError)
      }
      Ok(mut file) => {
        let mut toml_string = String::from("");
        match file.read_to_string(&mut toml_string) {
          Err(err) => {
            error!("Unable to read {}! {}", filename, err);
            Err(SerializationError::TomlDecodingError)
          }
          Ok(_) => {
            match toml::from_str(&toml_string) {
              Err(err) => {
                error!("Can't interpret toml! {}", err);
                Err(SerializationError::TomlDecodingError)
              }
              Ok(settings) => Ok(settings)
            }
          }
        }
      }
    }
  }
}

impl Default for DTCSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for DTCSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = toml::to_string(self).unwrap_or(
      String::from("-- DESERIALIZATION ERROR! --"));
    write!(f, "<DTCSettings :\n{}>", disp)
  }
}

#[cfg(test)]
mod test_settings {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn environment_overrides() {
    let mut env = HashMap::<&str, String>::new();
    env.insert(ENV_SIM_ENABLE, String::from("C"));
    env.insert(ENV_SIM_FILE, String::from("/tmp/ddr.bin"));
    env.insert(ENV_DTC, String::from("2"));
    let mut settings = DTCSettings::new();
    settings.apply_env(|key| env.get(key).cloned());
    assert_eq!(settings.simulator.mode, SimMode::Calorimeter);
    assert_eq!(settings.simulator.file, Some(String::from("/tmp/ddr.bin")));
    assert_eq!(settings.device_index, 2);
  }

  #[test]
  fn bad_environment_is_ignored() {
    let mut settings = DTCSettings::new();
    settings.apply_env(|key| {
      match key {
        ENV_SIM_ENABLE => Some(String::from("nonsense")),
        ENV_DTC        => Some(String::from("x")),
        _              => None
      }
    });
    assert_eq!(settings, DTCSettings::new());
  }

  #[test]
  fn toml_roundtrip() {
    let mut settings = DTCSettings::new();
    settings.simulator.mode = SimMode::Performance;
    settings.dcs_retries    = 3;
    let path = env::temp_dir().join("dtc-settings-test.toml");
    let filename = path.to_string_lossy().to_string();
    settings.to_toml(filename.clone());
    let back = DTCSettings::from_toml(filename).unwrap();
    assert_eq!(back, settings);
  }
}
