//! Buffer descriptors of the DMA engines
//!
//! A descriptor is 32 bytes, eight little endian 
//! u32 words, shared between host and card. The 
//! words are packed/unpacked with masks and shifts
//! only, the layout does not depend on the compiler.
//!
//! ```text
//! word | C2S (card -> host)                  | S2C (host -> card)
//! -----+-------------------------------------+-----------------------------------
//!  0   | [19:0] ByteCount, [28] Error,       | [19:0] ByteCount, [28] Error,
//!      | [30] Short, [31] Complete           | [31] Complete (set = reusable)
//!  1-2 | UserStatus (u64)                    | UserControl (u64)
//!  3   | CardAddress                         | CardAddress
//!  4   | [19:0] RsvdByteCnt, [24] IrqError,  | [19:0] ByteCnt, [24] IrqError,
//!      | [25] IrqComplete                    | [25] IrqComplete, [30] EndOfPkt,
//!      |                                     | [31] StartOfPkt
//!  5-6 | SystemAddress (u64)                 | SystemAddress (u64)
//!  7   | NextDescPtr                         | NextDescPtr
//! ```

/// Size of a descriptor in bytes
pub const DESCRIPTOR_SIZE : u32   = 32;
pub const DESCRIPTOR_WORDS: usize = 8;

pub type RawDescriptor = [u32;DESCRIPTOR_WORDS];

/// Status word (0), same for both directions
pub mod status {
  pub const BYTE_COUNT_MASK : u32 = 0x000F_FFFF;
  pub const ERROR           : u32 = 1 << 28;
  /// C2S only, the engine wrote less than the buffer size
  pub const SHORT           : u32 = 1 << 30;
  pub const COMPLETE        : u32 = 1 << 31;
}

/// Control word (4)
pub mod control {
  pub const BYTE_COUNT_MASK : u32 = 0x000F_FFFF;
  pub const IRQ_ERROR       : u32 = 1 << 24;
  pub const IRQ_COMPLETE    : u32 = 1 << 25;
  /// S2C only
  pub const END_OF_PKT      : u32 = 1 << 30;
  /// S2C only
  pub const START_OF_PKT    : u32 = 1 << 31;
}

fn split_u64(value : u64) -> (u32, u32) {
  ((value & 0xFFFF_FFFF) as u32, (value >> 32) as u32)
}

fn join_u64(lo : u32, hi : u32) -> u64 {
  (lo as u64) | ((hi as u64) << 32)
}

/// Card -> host descriptor
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct C2SDescriptor {
  pub byte_count     : u32,
  pub error          : bool,
  pub short          : bool,
  pub complete       : bool,
  pub user_status    : u64,
  pub card_address   : u32,
  /// bytes the engine wrote into the buffer
  pub rsvd_byte_cnt  : u32,
  pub irq_error      : bool,
  pub irq_complete   : bool,
  pub system_address : u64,
  pub next_desc_ptr  : u32,
}

impl C2SDescriptor {

  pub fn pack(&self) -> RawDescriptor {
    let mut raw : RawDescriptor = [0;DESCRIPTOR_WORDS];
    raw[0] = self.byte_count & status::BYTE_COUNT_MASK;
    if self.error    { raw[0] |= status::ERROR;    }
    if self.short    { raw[0] |= status::SHORT;    }
    if self.complete { raw[0] |= status::COMPLETE; }
    (raw[1], raw[2]) = split_u64(self.user_status);
    raw[3] = self.card_address;
    raw[4] = self.rsvd_byte_cnt & control::BYTE_COUNT_MASK;
    if self.irq_error    { raw[4] |= control::IRQ_ERROR;    }
    if self.irq_complete { raw[4] |= control::IRQ_COMPLETE; }
    (raw[5], raw[6]) = split_u64(self.system_address);
    raw[7] = self.next_desc_ptr;
    raw
  }

  pub fn unpack(raw : &RawDescriptor) -> Self {
    Self {
      byte_count     : raw[0] & status::BYTE_COUNT_MASK,
      error          : (raw[0] & status::ERROR)    > 0,
      short          : (raw[0] & status::SHORT)    > 0,
      complete       : (raw[0] & status::COMPLETE) > 0,
      user_status    : join_u64(raw[1], raw[2]),
      card_address   : raw[3],
      rsvd_byte_cnt  : raw[4] & control::BYTE_COUNT_MASK,
      irq_error      : (raw[4] & control::IRQ_ERROR)    > 0,
      irq_complete   : (raw[4] & control::IRQ_COMPLETE) > 0,
      system_address : join_u64(raw[5], raw[6]),
      next_desc_ptr  : raw[7],
    }
  }
}

/// Host -> card descriptor
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct S2CDescriptor {
  pub byte_count     : u32,
  pub error          : bool,
  /// set   : the buffer can be (re)used by the host
  /// clear : in flight
  pub complete       : bool,
  pub user_control   : u64,
  pub card_address   : u32,
  pub byte_cnt       : u32,
  pub irq_error      : bool,
  pub irq_complete   : bool,
  pub end_of_pkt     : bool,
  pub start_of_pkt   : bool,
  pub system_address : u64,
  pub next_desc_ptr  : u32,
}

impl S2CDescriptor {

  pub fn pack(&self) -> RawDescriptor {
    let mut raw : RawDescriptor = [0;DESCRIPTOR_WORDS];
    raw[0] = self.byte_count & status::BYTE_COUNT_MASK;
    if self.error    { raw[0] |= status::ERROR;    }
    if self.complete { raw[0] |= status::COMPLETE; }
    (raw[1], raw[2]) = split_u64(self.user_control);
    raw[3] = self.card_address;
    raw[4] = self.byte_cnt & control::BYTE_COUNT_MASK;
    if self.irq_error    { raw[4] |= control::IRQ_ERROR;    }
    if self.irq_complete { raw[4] |= control::IRQ_COMPLETE; }
    if self.end_of_pkt   { raw[4] |= control::END_OF_PKT;   }
    if self.start_of_pkt { raw[4] |= control::START_OF_PKT; }
    (raw[5], raw[6]) = split_u64(self.system_address);
    raw[7] = self.next_desc_ptr;
    raw
  }

  pub fn unpack(raw : &RawDescriptor) -> Self {
    Self {
      byte_count     : raw[0] & status::BYTE_COUNT_MASK,
      error          : (raw[0] & status::ERROR)    > 0,
      complete       : (raw[0] & status::COMPLETE) > 0,
      user_control   : join_u64(raw[1], raw[2]),
      card_address   : raw[3],
      byte_cnt       : raw[4] & control::BYTE_COUNT_MASK,
      irq_error      : (raw[4] & control::IRQ_ERROR)    > 0,
      irq_complete   : (raw[4] & control::IRQ_COMPLETE) > 0,
      end_of_pkt     : (raw[4] & control::END_OF_PKT)   > 0,
      start_of_pkt   : (raw[4] & control::START_OF_PKT) > 0,
      system_address : join_u64(raw[5], raw[6]),
      next_desc_ptr  : raw[7],
    }
  }
}

#[cfg(test)]
mod test_descriptor {
  use super::*;

  #[test]
  fn c2s_bit_positions() {
    let mut desc = C2SDescriptor::default();
    desc.byte_count     = 0x1_2345;
    desc.complete       = true;
    desc.short          = true;
    desc.rsvd_byte_cnt  = 0xF_FFFF;
    desc.irq_complete   = true;
    desc.system_address = 0x1_0000_0040;
    let raw = desc.pack();
    assert_eq!(raw[0], 0xC001_2345);
    assert_eq!(raw[4], 0x020F_FFFF);
    assert_eq!(raw[5], 0x40);
    assert_eq!(raw[6], 0x1);
    assert_eq!(C2SDescriptor::unpack(&raw), desc);
  }

  #[test]
  fn s2c_packet_flags() {
    let mut desc = S2CDescriptor::default();
    desc.byte_count   = 64;
    desc.start_of_pkt = true;
    desc.end_of_pkt   = true;
    desc.error        = true;
    let raw = desc.pack();
    assert_eq!(raw[0], 0x1000_0040);
    assert_eq!(raw[4], 0xC000_0000);
    assert_eq!(S2CDescriptor::unpack(&raw), desc);
  }

  #[test]
  fn byte_count_is_20_bits() {
    let mut desc = C2SDescriptor::default();
    desc.byte_count = 0xFFF_FFFF;
    let raw = desc.pack();
    assert_eq!(raw[0], 0xF_FFFF);
  }
}
