//! Packets which travel over the DTC DMA channels
//!
//! Every packet is a multiple of 16 bytes and 
//! starts with the same 4 byte header, which 
//! is represented by `DMAPacket`.
//!
//! * DAQ channel : `ReadoutRequestPacket`, `DataRequestPacket`
//!                 (host -> card) and `DataHeaderPacket` 
//!                 (card -> host, followed by the payload packets)
//! * DCS channel : `DCSRequestPacket` (host -> card) and 
//!                 `DCSReplyPacket` (card -> host)

pub mod packet_type;
pub mod dma_packet;
pub mod readout_request;
pub mod data_request;
pub mod data_header;
pub mod dcs_packet;

pub use packet_type::PacketType;
pub use dma_packet::DMAPacket;
pub use readout_request::ReadoutRequestPacket;
pub use data_request::DataRequestPacket;
pub use data_header::DataHeaderPacket;
pub use dcs_packet::{
    DCSOperationType,
    DCSRequestPacket,
    DCSReplyPacket,
};
