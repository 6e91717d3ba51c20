//! Reassembled DAQ data
//!
//! * `DataBlock` - one data header plus its payload packets, 
//!                 as sent by a single ROC
//! * `SubEvent`  - all blocks of one link
//! * `Event`     - all blocks sharing the same timestamp

pub mod data_block;
pub mod event;

pub use data_block::DataBlock;
pub use event::{
    Event,
    SubEvent,
};
