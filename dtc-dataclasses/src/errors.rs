//! Error types shared by all DTC crates
//!
//! * `SerializationError` - issues when packing/unpacking
//!                          packets or reading settings
//! * `DTCError`           - everything which can go wrong 
//!                          when talking to the card

use std::error::Error;
use std::fmt;

/// Indicate issues with (de)serialization
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum SerializationError {
  StreamTooShort,
  WrongByteSize,
  IncorrectPacketType,
  UnknownOperation,
  TomlDecodingError,
}

impl SerializationError {
  pub fn to_string(&self) -> String {
    match self {
      SerializationError::StreamTooShort      => {return String::from("StreamTooShort");},
      SerializationError::WrongByteSize       => {return String::from("WrongByteSize");},
      SerializationError::IncorrectPacketType => {return String::from("IncorrectPacketType");},
      SerializationError::UnknownOperation    => {return String::from("UnknownOperation");},
      SerializationError::TomlDecodingError   => {return String::from("TomlDecodingError");},
    }
  }
}

impl fmt::Display for SerializationError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = self.to_string();
    write!(f, "<SerializationError : {}>", repr)
  }
}

impl Error for SerializationError {
}

/////////////////////////////////////////////

/// Failures when operating the card
///
/// Only `IoError` is a hard failure of the 
/// transport, the protocol engines turn 
/// exhausted retry budgets into empty 
/// results/sentinel values instead.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum DTCError {
  /// Register or buffer access failed after 
  /// the local retries
  IoError,
  /// Nothing arrived within the given budget
  Timeout,
  /// A header failed the byte count/packet count check
  DataCorruption,
  /// The hardware reported a completion pointer
  /// outside of the descriptor ring
  RingIndexOutOfRange,
  /// The packet at the read cursor is not what 
  /// we expected
  WrongPacketType,
  /// The card delivered data for a different timestamp
  /// than the one requested
  TimestampMismatch,
  /// The DMA engine did not come out of reset
  EngineResetTimeout,
  InvalidChannel,
  /// Payload does not fit into a single DMA buffer
  PacketTooLarge,
  /// All descriptors of a host -> card ring are 
  /// in flight
  RingFull,
  /// Hardware access was requested, but this build
  /// does not come with a driver transport
  NoHardware,
}

impl DTCError {
  pub fn to_string(&self) -> String {
    match self {
      DTCError::IoError             => {return String::from("IoError");},
      DTCError::Timeout             => {return String::from("Timeout");},
      DTCError::DataCorruption      => {return String::from("DataCorruption");},
      DTCError::RingIndexOutOfRange => {return String::from("RingIndexOutOfRange");},
      DTCError::WrongPacketType     => {return String::from("WrongPacketType");},
      DTCError::TimestampMismatch   => {return String::from("TimestampMismatch");},
      DTCError::EngineResetTimeout  => {return String::from("EngineResetTimeout");},
      DTCError::InvalidChannel      => {return String::from("InvalidChannel");},
      DTCError::PacketTooLarge      => {return String::from("PacketTooLarge");},
      DTCError::RingFull            => {return String::from("RingFull");},
      DTCError::NoHardware          => {return String::from("NoHardware");},
    }
  }

  /// The data or the ring state can not be trusted 
  /// anymore. These are never retried.
  pub fn is_corruption(&self) -> bool {
    match self {
      DTCError::DataCorruption      => true,
      DTCError::RingIndexOutOfRange => true,
      _                             => false
    }
  }
}

impl fmt::Display for DTCError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = self.to_string();
    write!(f, "<DTCError : {}>", repr)
  }
}

impl Error for DTCError {
}

impl From<SerializationError> for DTCError {
  fn from(err : SerializationError) -> Self {
    match err {
      SerializationError::IncorrectPacketType => DTCError::WrongPacketType,
      _                                       => DTCError::DataCorruption,
    }
  }
}

#[cfg(test)]
mod test_errors {
  use super::*;

  #[test]
  fn corruption_kinds() {
    assert!(DTCError::DataCorruption.is_corruption());
    assert!(DTCError::RingIndexOutOfRange.is_corruption());
    assert!(!DTCError::Timeout.is_corruption());
    assert!(!DTCError::IoError.is_corruption());
  }

  #[test]
  fn from_serialization_error() {
    assert_eq!(DTCError::from(SerializationError::IncorrectPacketType), DTCError::WrongPacketType);
    assert_eq!(DTCError::from(SerializationError::WrongByteSize), DTCError::DataCorruption);
    assert_eq!(format!("{}", DTCError::Timeout), "<DTCError : Timeout>");
  }
}
