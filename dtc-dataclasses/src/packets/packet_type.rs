/// PacketType identifies the packets on the DMA channels
///
/// This needs to be kept in sync with the firmware
use std::fmt;

/// The packet type lives in the upper nibble of 
/// byte 2 of each packet header
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PacketType {
  DCSRequest     ,
  ReadoutRequest ,
  DataRequest    ,
  DCSReply       ,
  DataHeader     ,
  Invalid        ,
}

impl PacketType {
  pub const DCSREQUEST     : u8 = 0;
  pub const READOUTREQUEST : u8 = 1;
  pub const DATAREQUEST    : u8 = 2;
  pub const DCSREPLY       : u8 = 4;
  pub const DATAHEADER     : u8 = 5;
  // does not fit into the nibble, 
  // never on the wire
  pub const INVALID        : u8 = 0x10;

  pub fn as_u8(packet_type : &PacketType) -> u8 {
    match packet_type {
      PacketType::DCSRequest     => Self::DCSREQUEST,
      PacketType::ReadoutRequest => Self::READOUTREQUEST,
      PacketType::DataRequest    => Self::DATAREQUEST,
      PacketType::DCSReply       => Self::DCSREPLY,
      PacketType::DataHeader     => Self::DATAHEADER,
      PacketType::Invalid        => Self::INVALID,
    }
  }

  pub fn from_u8(value : u8) -> Option<PacketType> {
    match value {
      Self::DCSREQUEST     => Some(PacketType::DCSRequest),
      Self::READOUTREQUEST => Some(PacketType::ReadoutRequest),
      Self::DATAREQUEST    => Some(PacketType::DataRequest),
      Self::DCSREPLY       => Some(PacketType::DCSReply),
      Self::DATAHEADER     => Some(PacketType::DataHeader),
      _   => None,
    }
  }
}

impl fmt::Display for PacketType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      PacketType::DCSRequest     => { repr = String::from("DCSRequest")     },
      PacketType::ReadoutRequest => { repr = String::from("ReadoutRequest") },
      PacketType::DataRequest    => { repr = String::from("DataRequest")    },
      PacketType::DCSReply       => { repr = String::from("DCSReply")       },
      PacketType::DataHeader     => { repr = String::from("DataHeader")     },
      PacketType::Invalid        => { repr = String::from("Invalid")        },
    }
    write!(f, "<PacketType {}>", repr)
  }
}

#[test]
fn test_packet_types() {
  let type_codes = vec![PacketType::DCSREQUEST,
                        PacketType::READOUTREQUEST,
                        PacketType::DATAREQUEST,
                        PacketType::DCSREPLY,
                        PacketType::DATAHEADER];
  for tc in type_codes {
    let pt = PacketType::from_u8(tc);
    assert!(pt.is_some());
    assert_eq!(tc, PacketType::as_u8(&pt.unwrap()));
  }
  assert_eq!(PacketType::from_u8(3), None);
  assert_eq!(PacketType::from_u8(PacketType::INVALID), None);
}
