//! The DTC as the client sees it
//!
//! `DTC` owns the transport (simulator or card) 
//! together with the DAQ and DCS engines and a 
//! background range request sender.

use std::sync::{
    Arc,
    Mutex,
};

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::errors::DTCError;
use dtc_dataclasses::events::Event;

use crate::control::{
    get_status,
    set_detector_emulator,
    DTCStatus,
};
use crate::daq::{
    BlockRead,
    DAQEngine,
};
use crate::dcs::DCSEngine;
use crate::dma::RingDevice;
use crate::memory::*;
use crate::range_sender::RangeRequestSender;
use crate::settings::DTCSettings;
use crate::simulator::DTCSimulator;

pub struct DTC {
  device       : Arc<dyn DeviceTransport>,
  simulator    : Option<Arc<DTCSimulator>>,
  daq          : Arc<DAQEngine>,
  dcs          : DCSEngine,
  settings     : DTCSettings,
  range_sender : Mutex<Option<RangeRequestSender>>,
}

impl DTC {

  /// Set up the DTC as the settings say.
  ///
  /// Only the simulated card can be created here, 
  /// a real card needs a transport from the driver
  /// (see `with_transport`).
  pub fn new(settings : DTCSettings) -> Result<Self, DTCError> {
    if !settings.simulator.mode.is_simulated() {
      error!("No driver interface for card {}, use a simulation mode!", settings.device_index);
      return Err(DTCError::NoHardware);
    }
    let sim = Arc::new(DTCSimulator::new(settings.simulator.mode,
                                         settings.num_buffs,
                                         settings.buff_size));
    sim.set_silent(settings.simulator.silent);
    if let Some(filename) = &settings.simulator.file {
      sim.load_ddr_file(filename)?;
    }
    let device : Arc<dyn DeviceTransport> = sim.clone();
    let mut dtc = Self::with_transport(device, settings);
    dtc.simulator = Some(sim);
    Ok(dtc)
  }

  /// Drive a card through its register window.
  /// The descriptor rings are laid out as the 
  /// settings say.
  pub fn with_registers<R : RegisterAccess + 'static>(regs : Arc<R>, settings : DTCSettings) 
    -> Result<Self, DTCError> {
    info!("Setting up card {} with {} x {} byte buffers (interrupts {})",
          settings.device_index, settings.num_buffs, settings.buff_size, settings.use_interrupts);
    let device = RingDevice::new(regs,
                                 settings.num_buffs,
                                 settings.buff_size,
                                 settings.use_interrupts)?;
    Ok(Self::with_transport(Arc::new(device), settings))
  }

  /// Use an existing transport, e.g. a `RingDevice`
  pub fn with_transport(device : Arc<dyn DeviceTransport>, settings : DTCSettings) -> Self {
    let daq = Arc::new(DAQEngine::new(device.clone(), settings.read_timeout_ms));
    let dcs = DCSEngine::new(device.clone(), settings.read_timeout_ms);
    Self {
      device,
      simulator    : None,
      daq,
      dcs,
      settings,
      range_sender : Mutex::new(None),
    }
  }

  pub fn settings(&self) -> &DTCSettings {
    &self.settings
  }

  pub fn device(&self) -> &dyn DeviceTransport {
    self.device.as_ref()
  }

  /// The simulator, if the card is simulated
  pub fn simulator(&self) -> Option<&DTCSimulator> {
    self.simulator.as_deref()
  }

  pub fn daq(&self) -> &DAQEngine {
    &self.daq
  }

  pub fn dcs(&self) -> &DCSEngine {
    &self.dcs
  }

  pub fn read_register(&self, address : u16) -> Result<u32, DTCError> {
    with_retries(|| self.device.read_register(address))
  }

  pub fn write_register(&self, address : u16, value : u32) -> Result<(), DTCError> {
    with_retries(|| self.device.write_register(address, value))
  }

  pub fn write_register_checked(&self, address : u16, value : u32) -> Result<(), DTCError> {
    self.device.write_register_checked(address, value)
  }

  pub fn status(&self) -> Result<DTCStatus, DTCError> {
    get_status(self.device.as_ref())
  }

  //==================== DAQ ====================

  /// Request and read the event for a timestamp
  pub fn get_data(&self, timestamp : Option<Timestamp>) -> Result<Event, DTCError> {
    self.daq.get_data(timestamp)
  }

  /// Read whatever is next in the DAQ stream
  pub fn read_event(&self) -> Result<Event, DTCError> {
    self.daq.read_event(None)
  }

  pub fn read_next_block(&self) -> Result<BlockRead, DTCError> {
    self.daq.read_next_block()
  }

  pub fn release_buffers(&self) -> Result<usize, DTCError> {
    self.daq.release_buffers()
  }

  pub fn release_all_buffers(&self) -> Result<usize, DTCError> {
    self.daq.release_all_buffers()
  }

  /// Switch the detector emulator on and put 
  /// data into its memory
  pub fn write_detector_emulator_data(&self, data : &[u8]) -> Result<(), DTCError> {
    set_detector_emulator(self.device.as_ref(), true)?;
    self.daq.write_detector_emulator_data(data)
  }

  /// Start sending readout/data requests for count 
  /// timestamps in the background. A running 
  /// sender is stopped first.
  pub fn start_range_requests(&self, start : Timestamp, count : u64) -> Result<(), DTCError> {
    let mut sender = match self.range_sender.lock() {
      Ok(s)    => s,
      Err(err) => {
        error!("Range sender slot poisoned! {err}");
        return Err(DTCError::IoError);
      }
    };
    if let Some(mut running) = sender.take() {
      running.stop()?;
    }
    *sender = Some(RangeRequestSender::start(self.daq.clone(), start, count));
    Ok(())
  }

  /// Stop the range request sender, returns the 
  /// number of timestamps it sent
  pub fn stop_range_requests(&self) -> Result<u64, DTCError> {
    let mut sender = match self.range_sender.lock() {
      Ok(s)    => s,
      Err(err) => {
        error!("Range sender slot poisoned! {err}");
        return Err(DTCError::IoError);
      }
    };
    match sender.take() {
      None              => Ok(0),
      Some(mut running) => running.stop(),
    }
  }

  /// Wait until the range request sender is done
  pub fn wait_range_requests(&self) -> Result<u64, DTCError> {
    let mut sender = match self.range_sender.lock() {
      Ok(s)    => s,
      Err(err) => {
        error!("Range sender slot poisoned! {err}");
        return Err(DTCError::IoError);
      }
    };
    match sender.take() {
      None              => Ok(0),
      Some(mut running) => running.join(),
    }
  }

  //==================== DCS ====================

  pub fn read_roc_register(&self, link_id : u8, roc_id : u8, address : u16) -> Result<u16, DTCError> {
    self.dcs.read_roc_register(link_id, roc_id, address, self.settings.dcs_retries)
  }

  pub fn read_roc_register_double(&self, link_id : u8, roc_id : u8, address : u16, address2 : u16) 
    -> Result<(u16, u16), DTCError> {
    self.dcs.read_roc_register_double(link_id, roc_id, address, address2, self.settings.dcs_retries)
  }

  pub fn write_roc_register(&self, link_id : u8, roc_id : u8, address : u16, data : u16, request_ack : bool)
    -> Result<(), DTCError> {
    self.dcs.write_roc_register(link_id, roc_id, address, data, request_ack)
  }

  pub fn write_roc_register_double(&self, 
                                   link_id  : u8,
                                   roc_id   : u8,
                                   address  : u16,
                                   data     : u16,
                                   address2 : u16,
                                   data2    : u16) -> Result<(), DTCError> {
    self.dcs.write_roc_register_double(link_id, roc_id, address, data, address2, data2)
  }

  pub fn read_roc_block(&self, link_id : u8, roc_id : u8, address : u16, word_count : u16) 
    -> Result<Vec<u16>, DTCError> {
    self.dcs.read_roc_block(link_id, roc_id, address, word_count, self.settings.dcs_retries)
  }

  pub fn write_roc_block(&self, link_id : u8, roc_id : u8, address : u16, words : &[u16], request_ack : bool) 
    -> Result<(), DTCError> {
    self.dcs.write_roc_block(link_id, roc_id, address, words, request_ack)
  }

  pub fn read_ext_roc_register(&self, link_id : u8, roc_id : u8, block : u16, address : u16) 
    -> Result<u16, DTCError> {
    self.dcs.read_ext_roc_register(link_id, roc_id, block, address, self.settings.dcs_retries)
  }
}

impl Drop for DTC {
  fn drop(&mut self) {
    match self.stop_range_requests() {
      Err(err) => error!("Range sender ended with error! {err}"),
      Ok(_)    => ()
    }
  }
}

#[cfg(test)]
mod test_api {
  use super::*;
  use crate::registers::DMA_CTRL_INT_ENABLE;
  use crate::simulator::{
    RegisterMap,
    SimMode,
  };

  #[test]
  fn hardware_needs_transport() {
    let mut settings = DTCSettings::new();
    settings.simulator.mode = SimMode::Hardware;
    assert!(matches!(DTC::new(settings), Err(DTCError::NoHardware)));
  }

  #[test]
  fn dtc_over_register_window() {
    let regs = Arc::new(RegisterMap::new());
    let mut settings = DTCSettings::new();
    settings.num_buffs       = 4;
    settings.buff_size       = 128;
    settings.use_interrupts  = true;
    settings.read_timeout_ms = 0;
    let dtc = DTC::with_registers(regs.clone(), settings).unwrap();
    assert!(dtc.simulator().is_none());
    assert!(dtc.status().is_ok());
    // engines run with interrupts
    assert!((regs.get(0x2004) & DMA_CTRL_INT_ENABLE) > 0);
    assert_eq!(dtc.device().write_data(DmaChannel::DCS, &[0u8;256]), Err(DTCError::PacketTooLarge));
    assert!(dtc.device().write_data(DmaChannel::DCS, &[0u8;64]).is_ok());
    assert_eq!(dtc.read_event().unwrap().n_blocks(), 0);
  }

  #[test]
  fn simulated_dtc() {
    let mut settings = DTCSettings::new();
    settings.simulator.mode = SimMode::Calorimeter;
    let dtc = DTC::new(settings).unwrap();
    assert!(dtc.simulator().is_some());
    let status = dtc.status().unwrap();
    assert_eq!(status.link_enable, 0x3F3F);
    let event = dtc.get_data(Some(Timestamp::new(77))).unwrap();
    assert_eq!(event.n_blocks(), 6);
    assert_eq!(event.sub_events.len(), 6);
    dtc.release_all_buffers().unwrap();
  }
}
