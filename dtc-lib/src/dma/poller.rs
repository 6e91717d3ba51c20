//! Servicing of a DMA channel
//!
//! One thread per channel runs the service routine, 
//! woken up either by an interrupt notification or 
//! by its own tick. While the routine reports that 
//! there is more work, it is called again right away,
//! once idle the thread falls back to the slow tick.
//!
//! The `armed` flag makes sure that a burst of 
//! interrupts schedules the routine only once.

use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{
    unbounded,
    Sender,
    Receiver,
    RecvTimeoutError,
};

use dtc_dataclasses::errors::DTCError;

/// Tick of an idle channel in milliseconds
pub const IDLE_POLL_MSEC : u64 = 10;

#[derive(Debug, Copy, Clone, PartialEq)]
enum PollerMessage {
  Interrupt,
  Stop,
}

/// The service routine returns true if there 
/// is more work pending
pub type ServiceRoutine = Arc<dyn Fn() -> Result<bool, DTCError> + Send + Sync>;

/// Handle to signal an interrupt to a poller
#[derive(Clone)]
pub struct PollerWaker {
  sender : Sender<PollerMessage>,
  armed  : Arc<AtomicBool>,
}

impl PollerWaker {

  /// Schedule the service routine, unless 
  /// it is already scheduled
  pub fn wake(&self) {
    if self.armed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
      match self.sender.send(PollerMessage::Interrupt) {
        Err(err) => {
          trace!("Poller gone, can not deliver interrupt! {err}");
          self.armed.store(false, Ordering::Release);
        }
        Ok(_) => ()
      }
    }
  }
}

pub struct ChannelPoller {
  name   : String,
  waker  : PollerWaker,
  handle : Option<JoinHandle<()>>,
}

impl ChannelPoller {

  pub fn spawn(name : &str, routine : ServiceRoutine, idle : Duration) -> Self {
    let (sender, receiver) : (Sender<PollerMessage>, Receiver<PollerMessage>) = unbounded();
    let armed       = Arc::new(AtomicBool::new(false));
    let waker       = PollerWaker {
      sender,
      armed : armed.clone(),
    };
    let thread_name = name.to_string();
    let handle = thread::Builder::new()
      .name(thread_name.clone())
      .spawn(move || {
        poll_loop(&thread_name, &receiver, &armed, &routine, idle);
      });
    let handle = match handle {
      Err(err) => {
        error!("Unable to spawn poller thread {}! {err}", name);
        None
      }
      Ok(h) => Some(h)
    };
    Self {
      name  : name.to_string(),
      waker,
      handle,
    }
  }

  pub fn waker(&self) -> PollerWaker {
    self.waker.clone()
  }

  /// Signal an interrupt
  pub fn wake(&self) {
    self.waker.wake();
  }

  pub fn is_running(&self) -> bool {
    self.handle.is_some()
  }

  /// Stop the thread and wait for it
  pub fn stop(&mut self) {
    if let Some(handle) = self.handle.take() {
      match self.waker.sender.send(PollerMessage::Stop) {
        Err(err) => trace!("Poller {} already gone! {err}", self.name),
        Ok(_)    => ()
      }
      match handle.join() {
        Err(_) => error!("Poller {} panicked!", self.name),
        Ok(_)  => debug!("Poller {} stopped", self.name)
      }
    }
  }
}

impl Drop for ChannelPoller {
  fn drop(&mut self) {
    self.stop();
  }
}

fn poll_loop(name     : &str,
             receiver : &Receiver<PollerMessage>,
             armed    : &AtomicBool,
             routine  : &ServiceRoutine,
             idle     : Duration) {
  let mut delay = idle;
  loop {
    let msg = if delay.is_zero() {
      match receiver.try_recv() {
        Ok(msg) => Ok(msg),
        Err(_)  => Err(RecvTimeoutError::Timeout),
      }
    } else {
      receiver.recv_timeout(delay)
    };
    match msg {
      Ok(PollerMessage::Stop) | Err(RecvTimeoutError::Disconnected) => {
        debug!("Poller {} received stop signal", name);
        break;
      }
      Ok(PollerMessage::Interrupt) | Err(RecvTimeoutError::Timeout) => {
        armed.store(false, Ordering::Release);
        match routine() {
          Ok(true)  => {
            delay = Duration::ZERO;
          }
          Ok(false) => {
            delay = idle;
          }
          Err(err)  => {
            error!("Service of {} failed! {err}", name);
            delay = idle;
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod test_poller {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::time::Instant;

  #[test]
  fn interrupt_triggers_service() {
    let calls   = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let routine : ServiceRoutine = Arc::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(false)
    });
    let mut poller = ChannelPoller::spawn("test-poller", routine, Duration::from_secs(10));
    poller.wake();
    let start = Instant::now();
    while calls.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(5) {
      thread::sleep(Duration::from_millis(1));
    }
    assert!(calls.load(Ordering::SeqCst) >= 1);
    poller.stop();
    assert!(!poller.is_running());
  }

  #[test]
  fn reschedules_while_busy() {
    let calls   = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // pretend there is work for the first 5 calls
    let routine : ServiceRoutine = Arc::new(move || {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      Ok(n < 4)
    });
    let _poller = ChannelPoller::spawn("busy-poller", routine, Duration::from_millis(1));
    let start = Instant::now();
    while calls.load(Ordering::SeqCst) < 5 && start.elapsed() < Duration::from_secs(5) {
      thread::sleep(Duration::from_millis(1));
    }
    assert!(calls.load(Ordering::SeqCst) >= 5);
  }
}
