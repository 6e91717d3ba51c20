//! DMA to and from the card
//!
//! Descriptor rings live in host memory, the card 
//! walks them and reports progress through the 
//! engine registers. The `tracker` keeps the 
//! software side of the bookkeeping, which is 
//! shared with the simulator.

pub mod descriptor;
pub mod ring;
pub mod tracker;
pub mod engine;
pub mod poller;
pub mod device;

pub use device::{
    RingDevice,
    CardPort,
};
pub use engine::{
    DmaEngineController,
    EngineState,
    HealAction,
};
pub use tracker::ChannelIndexTracker;
