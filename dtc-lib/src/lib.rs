//! Host side library for the DTC readout card
//!
//! * registers    - the register map of the card
//! * memory       - register and buffer access, the `DeviceTransport` 
//! * dma          - descriptor rings, engine control and channel polling
//! * simulator    - the card in software
//! * daq          - readout/data requests and event assembly
//! * dcs          - register transactions with the ROCs
//! * control      - monitoring, resets and link setup through the registers
//! * range_sender - request a range of timestamps in the background
//! * api          - the `DTC` which puts it all together
//!

pub mod registers;
pub mod memory;
pub mod dma;
pub mod simulator;
pub mod daq;
pub mod dcs;
pub mod control;
pub mod settings;
pub mod range_sender;
pub mod api;

#[macro_use] extern crate log;
extern crate env_logger;

use std::io::Write;

use colored::{
    Colorize,
    ColoredString
};
use log::Level;

pub use api::DTC;
pub use daq::{
    DAQEngine,
    BlockRead,
};
pub use dcs::DCSEngine;
pub use memory::{
    DmaBuffer,
    DmaChannel,
    DeviceTransport,
    RegisterAccess,
};
pub use settings::DTCSettings;
pub use simulator::{
    DTCSimulator,
    SimMode,
};

/// Make sure that the loglevel is in color
pub fn color_log(level : &Level) -> ColoredString {
  match level {
    Level::Error    => String::from(" ERROR!").red(),
    Level::Warn     => String::from(" WARN  ").yellow(),
    Level::Info     => String::from(" Info  ").green(),
    Level::Debug    => String::from(" debug ").blue(),
    Level::Trace    => String::from(" trace ").cyan(),
  }
}

/// Set up the environmental (env) logger
/// with our format
///
/// Ensure that the lines and module paths
/// are printed in the logging output
pub fn init_env_logger() {
  env_logger::builder()
    .format(|buf, record| {
    writeln!( buf, "[{level}][{module_path}:{line}] {args}",
      level = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line = record.line().unwrap_or(0),
      args = record.args()
      )
    }).init();
}
