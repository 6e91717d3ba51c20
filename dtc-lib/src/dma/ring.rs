//! Circular descriptor ring of one (channel, direction)
//!
//! The ring lives in host memory and is shared with 
//! the card. Its size is fixed when it is created.
//! The index arithmetic is kept in free functions, so 
//! that the tracker and the simulator can use it 
//! without a ring.

use dtc_dataclasses::errors::DTCError;

use crate::dma::descriptor::{
    status,
    C2SDescriptor,
    S2CDescriptor,
    RawDescriptor,
    DESCRIPTOR_SIZE,
    DESCRIPTOR_WORDS,
};
use crate::memory::DmaDirection;

/// Advance idx by k on a ring of n buffers
pub fn idx_add(idx : usize, k : usize, n : usize) -> usize {
  (idx % n + k % n) % n
}

/// Distance from b to a, (a - b) mod n
pub fn idx_delta(a : usize, b : usize, n : usize) -> usize {
  (a % n + n - b % n) % n
}

/// Convert the bus address of a descriptor into 
/// its index in the ring
///
/// An address outside of the ring or not on a 
/// descriptor boundary means the hardware and 
/// our view of the ring disagree.
pub fn dma_addr_to_idx(address : u32, base : u32, n : usize) -> Result<usize, DTCError> {
  if address < base {
    error!("Descriptor address {:#010x} below ring base {:#010x}!", address, base);
    return Err(DTCError::RingIndexOutOfRange);
  }
  let offset = address - base;
  if offset % DESCRIPTOR_SIZE != 0 {
    error!("Descriptor address {:#010x} is not aligned!", address);
    return Err(DTCError::RingIndexOutOfRange);
  }
  let idx = (offset / DESCRIPTOR_SIZE) as usize;
  if idx >= n {
    error!("Descriptor address {:#010x} maps to index {} of a ring with {} entries!", address, idx, n);
    return Err(DTCError::RingIndexOutOfRange);
  }
  Ok(idx)
}

/// Descriptors plus the data buffers they point to
#[derive(Debug, Clone)]
pub struct DescriptorRing {
  pub direction : DmaDirection,
  /// bus address of descriptor 0
  desc_base     : u32,
  /// bus address of buffer 0
  buff_base     : u64,
  buff_size     : usize,
  descriptors   : Vec<RawDescriptor>,
  buffers       : Vec<Vec<u8>>,
}

impl DescriptorRing {

  /// Allocate the ring and chain the descriptors.
  ///
  /// Host -> card descriptors start out as 
  /// complete, i.e. free to be used.
  pub fn new(direction : DmaDirection,
             desc_base : u32,
             buff_base : u64,
             num_buffs : usize,
             buff_size : usize) -> Self {
    let num_buffs = num_buffs.max(2);
    let mut ring = Self {
      direction,
      desc_base,
      buff_base,
      buff_size,
      descriptors : vec![[0u32;DESCRIPTOR_WORDS];num_buffs],
      buffers     : vec![vec![0u8;buff_size];num_buffs],
    };
    for idx in 0..num_buffs {
      ring.reset_descriptor(idx);
    }
    ring
  }

  pub fn num_buffs(&self) -> usize {
    self.descriptors.len()
  }

  pub fn buff_size(&self) -> usize {
    self.buff_size
  }

  pub fn desc_base(&self) -> u32 {
    self.desc_base
  }

  /// Bus address of descriptor idx
  pub fn desc_addr(&self, idx : usize) -> u32 {
    self.desc_base + DESCRIPTOR_SIZE * (idx % self.num_buffs()) as u32
  }

  /// Put descriptor idx back into its initial 
  /// state, keeping the chain intact
  pub fn reset_descriptor(&mut self, idx : usize) {
    let n         = self.num_buffs();
    let next      = self.desc_addr(idx_add(idx, 1, n));
    let sys_addr  = self.buff_base + (idx * self.buff_size) as u64;
    let raw = match self.direction {
      DmaDirection::C2S => {
        let mut desc = C2SDescriptor::default();
        desc.byte_count     = self.buff_size as u32;
        desc.irq_complete   = true;
        desc.irq_error      = true;
        desc.system_address = sys_addr;
        desc.next_desc_ptr  = next;
        desc.pack()
      }
      DmaDirection::S2C => {
        let mut desc = S2CDescriptor::default();
        desc.complete       = true;
        desc.irq_complete   = true;
        desc.irq_error      = true;
        desc.system_address = sys_addr;
        desc.next_desc_ptr  = next;
        desc.pack()
      }
    };
    self.descriptors[idx % n] = raw;
  }

  pub fn raw(&self, idx : usize) -> RawDescriptor {
    self.descriptors[idx % self.num_buffs()]
  }

  pub fn set_raw(&mut self, idx : usize, raw : RawDescriptor) {
    let n = self.num_buffs();
    self.descriptors[idx % n] = raw;
  }

  /// Look at the Complete bit of descriptor idx 
  ///
  /// This is the only reliable sign that the 
  /// engine is done with the buffer.
  pub fn complete_bit(&self, idx : usize) -> bool {
    (self.raw(idx)[0] & status::COMPLETE) > 0
  }

  pub fn buffer(&self, idx : usize) -> &[u8] {
    &self.buffers[idx % self.num_buffs()]
  }

  pub fn buffer_mut(&mut self, idx : usize) -> &mut [u8] {
    let n = self.num_buffs();
    &mut self.buffers[idx % n]
  }

  /// Verify the NextDescPtr chain
  pub fn is_chained(&self) -> bool {
    let n = self.num_buffs();
    (0..n).all(|idx| self.raw(idx)[7] == self.desc_addr(idx_add(idx, 1, n)))
  }
}

#[cfg(test)]
mod test_ring {
  use super::*;

  #[test]
  fn idx_add_wraps() {
    for n in 1..20usize {
      for idx in 0..n {
        for k in 0..3*n {
          let res = idx_add(idx, k, n);
          assert_eq!(res, (idx + k) % n);
          assert!(res < n);
        }
      }
    }
  }

  #[test]
  fn idx_delta_is_inverse_of_add() {
    let n = 7;
    for a in 0..n {
      for k in 0..n {
        assert_eq!(idx_delta(idx_add(a, k, n), a, n), k);
      }
    }
  }

  #[test]
  fn address_conversion() {
    let base = 0x1000;
    assert_eq!(dma_addr_to_idx(0x1000, base, 4), Ok(0));
    assert_eq!(dma_addr_to_idx(0x1060, base, 4), Ok(3));
    assert_eq!(dma_addr_to_idx(0x1080, base, 4), Err(DTCError::RingIndexOutOfRange));
    assert_eq!(dma_addr_to_idx(0x0fe0, base, 4), Err(DTCError::RingIndexOutOfRange));
    assert_eq!(dma_addr_to_idx(0x1004, base, 4), Err(DTCError::RingIndexOutOfRange));
  }

  #[test]
  fn ring_is_chained() {
    let ring = DescriptorRing::new(DmaDirection::S2C, 0x2000, 0x10_0000, 8, 64);
    assert!(ring.is_chained());
    assert_eq!(ring.raw(7)[7], 0x2000);
    // host -> card buffers start out free
    assert!((0..8).all(|k| ring.complete_bit(k)));
    let ring = DescriptorRing::new(DmaDirection::C2S, 0x2000, 0x10_0000, 8, 64);
    assert!((0..8).all(|k| !ring.complete_bit(k)));
    assert_eq!(C2SDescriptor::unpack(&ring.raw(2)).system_address, 0x10_0000 + 128);
  }
}
