//! The 48bit event window tag
//!
//! Every packet which belongs to one readout 
//! window carries the same timestamp. Equality
//! is the only thing we care about.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::TIMESTAMP_MASK;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
  pub const SIZE : usize = 6;

  /// Any bits above bit 47 are discarded
  pub fn new(value : u64) -> Self {
    Self(value & TIMESTAMP_MASK)
  }

  pub fn value(&self) -> u64 {
    self.0
  }

  /// Wraps around at 2^48
  pub fn next(&self) -> Self {
    Self::new(self.0.wrapping_add(1))
  }

  pub fn to_le_bytes(&self) -> [u8;6] {
    let bytes = self.0.to_le_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]]
  }

  pub fn from_le_bytes(bytes : [u8;6]) -> Self {
    Self(u64::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3],
                             bytes[4], bytes[5], 0, 0]))
  }
}

impl From<u64> for Timestamp {
  fn from(value : u64) -> Self {
    Self::new(value)
  }
}

impl fmt::Display for Timestamp {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<Timestamp: {:#014x}>", self.0)
  }
}

#[cfg(feature = "random")]
impl crate::FromRandom for Timestamp {
  fn from_random() -> Self {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    Self::new(rng.gen::<u64>())
  }
}

#[cfg(test)]
mod test_timestamp {
  use super::*;

  #[test]
  fn masked_to_48_bits() {
    let ts = Timestamp::new(0xFFFF_1234_5678_9ABC);
    assert_eq!(ts.value(), 0x1234_5678_9ABC);
    assert_eq!(Timestamp::new(TIMESTAMP_MASK).next().value(), 0);
  }

  #[test]
  fn byte_representation() {
    let ts = Timestamp::new(0x0000_0605_0403_0201);
    assert_eq!(ts.to_le_bytes(), [1,2,3,4,5,6]);
    assert_eq!(Timestamp::from_le_bytes([1,2,3,4,5,6]), ts);
  }
}
