//! # Dataclasses for the DTC readout card
//!
//! Wire level representation of everything which 
//! travels over the DTC DMA channels:
//!
//! * DAQ - readout requests, data requests and 
//!         the data blocks which come back
//! * DCS - register request/reply packets for 
//!         the ROCs behind the links
//!
//! as well as the assembled events and the common
//! error types shared by the host side software.
//!
//! All packets are multiples of 16 bytes. The first 
//! 4 bytes are a common header, see `packets::DMAPacket`.

pub mod constants;
pub mod errors;
pub mod serialization;
pub mod timestamp;
pub mod packets;
pub mod events;

#[macro_use] extern crate log;

pub use timestamp::Timestamp;

/// Create a random instance of a struct.
///
/// Used for testing only, this will fill 
/// a struct with random (but valid) values
#[cfg(feature = "random")]
pub trait FromRandom {
  fn from_random() -> Self;
}
