//! Send requests for a range of timestamps in the background
//!
//! The sender thread walks the range and sends the 
//! readout and data requests for every active link. 
//! It looks at the stop flag between timestamps and 
//! between links, so `stop` returns quickly even for
//! long ranges.

use std::fmt;
use std::sync::{
    Arc,
    Mutex,
};
use std::thread;
use std::thread::JoinHandle;

use dtc_dataclasses::Timestamp;
use dtc_dataclasses::errors::DTCError;

use crate::daq::{
    active_links,
    DAQEngine,
};

/// Shared between the sender thread and its owner
#[derive(Default, Debug)]
pub struct ThreadControl {
  /// Stop the sender
  pub stop_flag     : bool,
  /// the thread is still sending
  pub active        : bool,
  /// timestamps for which all requests went out
  pub n_sent        : u64,
  /// the last error the thread ran into
  pub last_error    : Option<DTCError>,
}

impl ThreadControl {
  pub fn new() -> Self {
    Self {
      stop_flag  : false,
      active     : false,
      n_sent     : 0,
      last_error : None,
    }
  }
}

impl fmt::Display for ThreadControl {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ThreadControl:");
    repr += &(format!("\n  stop flag : {}", self.stop_flag));
    repr += &(format!("\n  active    : {}", self.active));
    repr += &(format!("\n  sent      : {}", self.n_sent));
    if let Some(err) = self.last_error {
      repr += &(format!("\n  error     : {}", err));
    }
    write!(f, "{}>", repr)
  }
}

fn stop_requested(tc : &Arc<Mutex<ThreadControl>>) -> bool {
  match tc.lock() {
    Ok(tc)   => tc.stop_flag,
    Err(err) => {
      error!("Can't acquire lock for ThreadControl! {err}");
      true
    }
  }
}

/// Walk the range [start, start + count)
fn send_range(daq    : &DAQEngine,
              start  : Timestamp,
              count  : u64,
              tc     : &Arc<Mutex<ThreadControl>>) -> Result<(), DTCError> {
  let links = active_links(daq.device())?;
  let mut ts = start;
  for _ in 0..count {
    for link in &links {
      if stop_requested(tc) {
        info!("Range sender stopped before {}", ts);
        return Ok(());
      }
      daq.send_link_requests(link, ts)?;
    }
    match tc.lock() {
      Ok(mut tc) => tc.n_sent += 1,
      Err(err)   => error!("Can't acquire lock for ThreadControl! {err}"),
    }
    ts = ts.next();
  }
  Ok(())
}

pub struct RangeRequestSender {
  tc     : Arc<Mutex<ThreadControl>>,
  handle : Option<JoinHandle<()>>,
}

impl RangeRequestSender {

  /// Start sending requests for count timestamps,
  /// beginning at start
  pub fn start(daq : Arc<DAQEngine>, start : Timestamp, count : u64) -> Self {
    let tc = Arc::new(Mutex::new(ThreadControl::new()));
    match tc.lock() {
      Ok(mut tc) => tc.active = true,
      Err(err)   => error!("Can't acquire lock for ThreadControl! {err}"),
    }
    let thread_tc = tc.clone();
    let handle = thread::Builder::new()
      .name(String::from("dtc-range-sender"))
      .spawn(move || {
        debug!("Sending requests for {} timestamps starting at {}", count, start);
        let result = send_range(&daq, start, count, &thread_tc);
        match thread_tc.lock() {
          Ok(mut tc) => {
            tc.active = false;
            if let Err(err) = result {
              error!("Range sender failed! {err}");
              tc.last_error = Some(err);
            }
          }
          Err(err) => error!("Can't acquire lock for ThreadControl! {err}"),
        }
      });
    let handle = match handle {
      Err(err) => {
        error!("Unable to spawn range sender! {err}");
        None
      }
      Ok(h) => Some(h)
    };
    Self {
      tc,
      handle,
    }
  }

  pub fn is_active(&self) -> bool {
    match self.tc.lock() {
      Ok(tc)  => tc.active,
      Err(_)  => false,
    }
  }

  /// Timestamps sent so far
  pub fn n_sent(&self) -> u64 {
    match self.tc.lock() {
      Ok(tc)  => tc.n_sent,
      Err(_)  => 0,
    }
  }

  /// Wait for the thread to finish the range
  pub fn join(&mut self) -> Result<u64, DTCError> {
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("Range sender panicked!");
        return Err(DTCError::IoError);
      }
    }
    match self.tc.lock() {
      Ok(tc) => match tc.last_error {
        Some(err) => Err(err),
        None      => Ok(tc.n_sent),
      },
      Err(_) => Err(DTCError::IoError),
    }
  }

  /// Abort and wait for the thread
  pub fn stop(&mut self) -> Result<u64, DTCError> {
    match self.tc.lock() {
      Ok(mut tc) => tc.stop_flag = true,
      Err(err)   => error!("Can't acquire lock for ThreadControl! {err}"),
    }
    self.join()
  }
}

impl Drop for RangeRequestSender {
  fn drop(&mut self) {
    if self.handle.is_some() {
      match self.stop() {
        Err(err) => error!("Range sender ended with error! {err}"),
        Ok(n)    => debug!("Range sender stopped after {} timestamps", n),
      }
    }
  }
}

#[cfg(test)]
mod test_range_sender {
  use super::*;
  use crate::memory::RegisterAccess;
  use crate::registers::{
    LINK_ENABLE,
    ROC_EMULATION_COUNT,
  };
  use crate::simulator::{
    DTCSimulator,
    SimMode,
  };

  fn make_daq() -> Arc<DAQEngine> {
    let sim = Arc::new(DTCSimulator::new(SimMode::Tracker, 64, 0x1000));
    sim.write_register(LINK_ENABLE, 0x1).unwrap();
    sim.write_register(ROC_EMULATION_COUNT, 0x1).unwrap();
    Arc::new(DAQEngine::new(sim, 0))
  }

  #[test]
  fn sends_whole_range() {
    let daq = make_daq();
    let mut sender = RangeRequestSender::start(daq.clone(), Timestamp::new(100), 10);
    assert_eq!(sender.join().unwrap(), 10);
    assert!(!sender.is_active());
    for k in 0..10 {
      let event = daq.read_event(Some(Timestamp::new(100 + k))).unwrap();
      assert_eq!(event.n_blocks(), 1);
    }
  }

  #[test]
  fn stop_aborts() {
    let daq = make_daq();
    let mut sender = RangeRequestSender::start(daq, Timestamp::new(0), u64::MAX);
    let n = sender.stop().unwrap();
    assert!(n < u64::MAX);
    assert!(!sender.is_active());
  }
}
