//! Registers of the DTC are accessed through the 
//! BAR0 window of the card. Addresses are byte 
//! addresses (u16), each register is 32bit wide, 
//! so consecutive registers are 4 apart.
//! If the register is the same as another, then 
//! the register holds different fields for the 
//! different bits in the register.

//========== DMA engines ================
//
// one register block per engine, 
// S2C (host -> card) engines at 0x0000,
// C2S (card -> host) engines at 0x2000
//=======================================

pub const DMA_S2C_ENGINE_BASE   : u16 = 0x0000;
pub const DMA_C2S_ENGINE_BASE   : u16 = 0x2000;
pub const DMA_ENGINE_STRIDE     : u16 = 0x100;

// offsets within one engine block
pub const DMA_CAPABILITIES      : u16 = 0x00; // [0] engine present, [1] direction (1 = C2S)
pub const DMA_CONTROL_STATUS    : u16 = 0x04; // see DMA_CTRL_* bits
pub const DMA_NEXT_DESC_PTR     : u16 = 0x08; // address of the first descriptor
pub const DMA_SW_DESC_PTR       : u16 = 0x0C; // software (host) descriptor pointer
pub const DMA_COMPLETED_DESC_PTR: u16 = 0x10; // last descriptor the engine finished

// bits of DMA_CONTROL_STATUS
pub const DMA_CTRL_INT_ENABLE   : u32 = 1 << 0;
pub const DMA_CTRL_INT_ACTIVE   : u32 = 1 << 1;
pub const DMA_CTRL_DESC_COMPLETE: u32 = 1 << 2;
pub const DMA_CTRL_ALIGN_ERROR  : u32 = 1 << 3;
pub const DMA_CTRL_FETCH_ERROR  : u32 = 1 << 4;
pub const DMA_CTRL_ABORT_ERROR  : u32 = 1 << 5;
pub const DMA_CTRL_CHAIN_END    : u32 = 1 << 7;
pub const DMA_CTRL_ENABLE       : u32 = 1 << 8;
pub const DMA_CTRL_RUNNING      : u32 = 1 << 10;
pub const DMA_CTRL_WAITING      : u32 = 1 << 11;
pub const DMA_CTRL_USER_RESET   : u32 = 1 << 14; // self clearing
pub const DMA_CTRL_RESET        : u32 = 1 << 15; // self clearing

/// Any of these latch the engine
pub const DMA_CTRL_ERROR_MASK   : u32 = DMA_CTRL_ALIGN_ERROR 
                                      | DMA_CTRL_FETCH_ERROR 
                                      | DMA_CTRL_ABORT_ERROR 
                                      | DMA_CTRL_CHAIN_END;

//========== DTC registers ==============
//
//=======================================

pub const DESIGN_VERSION        : u16 = 0x9000; // [31:0] firmware version
pub const DESIGN_DATE           : u16 = 0x9004; // [31:28] flavor (C/D/E), [27:20] BCD year, [19:16] month,
                                                // [15:8] BCD day, [7:3] hour, [0] link speed/ROC count flag

pub const FPGA_TEMPERATURE      : u16 = 0x9010; // [11:0] raw sysmon value
pub const FPGA_VCCINT           : u16 = 0x9014; // [11:0] raw sysmon value
pub const FPGA_VCCAUX           : u16 = 0x9018; // [11:0] raw sysmon value
pub const FPGA_VCCBRAM          : u16 = 0x901C; // [11:0] raw sysmon value
pub const FPGA_MONITOR_ALARM    : u16 = 0x9020; // see ALARM_* bits

pub const ALARM_USER_TEMP       : u32 = 1 << 0;
pub const ALARM_VCCINT          : u32 = 1 << 1;
pub const ALARM_VCCAUX          : u32 = 1 << 2;
pub const ALARM_VCCBRAM         : u32 = 1 << 3;
pub const ALARM_OR              : u32 = 1 << 7;
pub const ALARM_DIE_TEMP        : u32 = 1 << 8;

pub const DTC_CONTROL           : u16 = 0x9100; // see CONTROL_* bits
pub const CONTROL_HARD_RESET    : u32 = 1 << 0;  // self clearing
pub const CONTROL_CABLE_DELAY   : u32 = 1 << 3;  // self clearing, trigger cable delay loopback
pub const CONTROL_SERDES_RESET  : u32 = 1 << 8;  // self clearing
pub const CONTROL_SOFT_RESET    : u32 = 1 << 31; // self clearing

/// Bits in DTC_CONTROL which read back as 0 after a write
pub const CONTROL_SELF_CLEARING : u32 = CONTROL_HARD_RESET 
                                      | CONTROL_CABLE_DELAY 
                                      | CONTROL_SERDES_RESET 
                                      | CONTROL_SOFT_RESET;

pub const LINK_ENABLE           : u16 = 0x9114; // [7:0] transmit, [15:8] receive, [23:16] timing
pub const ROC_EMULATION_COUNT   : u16 = 0x9118; // [3*link+2:3*link] number of ROCs per link
pub const DETECTOR_EMULATOR     : u16 = 0x9160; // [0] use DDR memory as detector emulator

/// Register block of the given engine
pub fn dma_engine_base(c2s : bool, channel : u8) -> u16 {
  let base = if c2s { DMA_C2S_ENGINE_BASE } else { DMA_S2C_ENGINE_BASE };
  base + DMA_ENGINE_STRIDE * channel as u16
}

/// Bits of a register which can not be compared 
/// after a write, since the firmware changes them
/// on its own
pub fn dont_care_mask(address : u16) -> u32 {
  match address {
    DTC_CONTROL         => CONTROL_SELF_CLEARING,
    FPGA_MONITOR_ALARM  => 0xFFFF_FFFF,
    _ => {
      if address < 0x4000 && (address % DMA_ENGINE_STRIDE) == DMA_CONTROL_STATUS {
        // status bits are owned by the engine
        return !(DMA_CTRL_INT_ENABLE | DMA_CTRL_ENABLE);
      }
      0
    }
  }
}
