//! Serialization/Deserialization helpers
//!
//! All multi-byte values on the DTC wire are 
//! little endian.

// re-exports
pub use crate::errors::SerializationError;

/// Convert a slice of u16 into a vector of u8
///
/// The resulting vector has twice the number
/// of entries of the original vector.
/// This is useful for the DCS block payloads.
pub fn u16_to_u8(vec_u16: &[u16]) -> Vec<u8> {
    vec_u16.iter()
        .flat_map(|&n| n.to_le_bytes().to_vec())
        .collect()
}

/// Restore a vector of u16 from a vector of u8
///
/// This interpretes two following u8 as an u16
pub fn u8_to_u16(vec_u8: &[u8]) -> Vec<u16> {
    vec_u8.chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn parse_u8(bs : &[u8], pos : &mut usize) -> u8 {
  let value = u8::from_le_bytes([bs[*pos]]);
  *pos += 1;
  value
}

/// Get u16 from a bytestream and move on the position marker
///
/// # Arguments 
///
/// * bs
/// * pos 
pub fn parse_u16(bs : &[u8], pos : &mut usize) -> u16 {
  let value = u16::from_le_bytes([bs[*pos], bs[*pos+1]]);
  *pos += 2;
  value
}

pub fn parse_u32(bs : &[u8], pos : &mut usize) -> u32 {
  let value = u32::from_le_bytes([bs[*pos], bs[*pos+1], bs[*pos+2], bs[*pos+3]]);
  *pos += 4;
  value
}

/// Get a 48bit number (e.g. a timestamp) from 
/// a bytestream
pub fn parse_u48(bs : &[u8], pos : &mut usize) -> u64 {
  let value = u64::from_le_bytes([bs[*pos],   bs[*pos+1], bs[*pos+2], bs[*pos+3],
                                  bs[*pos+4], bs[*pos+5], 0, 0]);
  *pos += 6;
  value
}

pub fn parse_u64(bs : &[u8], pos : &mut usize) -> u64 {
  let value = u64::from_le_bytes([bs[*pos],   bs[*pos+1], bs[*pos+2], bs[*pos+3],
                                  bs[*pos+4], bs[*pos+5], bs[*pos+6], bs[*pos+7]]);
  *pos += 8;
  value
}

/// Make sure there are at least `nbytes` left in 
/// the stream, starting from pos
pub fn check_remaining(bs     : &[u8],
                       pos    : usize,
                       nbytes : usize) -> Result<(), SerializationError> {
  if pos + nbytes > bs.len() {
    trace!("Need {} bytes at {}, but stream has only {}", nbytes, pos, bs.len());
    return Err(SerializationError::StreamTooShort);
  }
  Ok(())
}

/// Encode/decode structs to Vec::<u8> to send 
/// them over a DMA channel or store them in a file
pub trait Serialization {

  /// The size of the serialized bytestream. 
  /// In case the struct does NOT HAVE a fixed 
  /// size, SIZE will be 0
  const SIZE: usize = 0;

  /// Decode a serializable from a bytestream  
  fn from_bytestream(bytestream : &[u8], 
                     pos        : &mut usize)
    -> Result<Self, SerializationError>
    where Self : Sized;
  
  /// Encode a serializable to a bytestream  
  fn to_bytestream(&self) -> Vec<u8>;
}

#[cfg(test)]
mod test_serialization {
  use crate::serialization::*;

  #[test]
  fn test_u16_to_u8_size() {
    let vec_u16 : Vec<u16> = vec![1,2,0xffff,42];
    let vec_u8 = u16_to_u8(&vec_u16);
    assert_eq!(vec_u8.len(), 2*vec_u16.len());
    assert_eq!(u8_to_u16(&vec_u8), vec_u16);
  }

  #[test]
  fn parse_u48_ignores_following_bytes() {
    let bs : Vec<u8> = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xff, 0xff];
    let mut pos = 0usize;
    assert_eq!(parse_u48(&bs, &mut pos), 0x060504030201);
    assert_eq!(pos, 6);
  }

  #[test]
  fn check_remaining_bounds() {
    let bs = vec![0u8;16];
    assert!(check_remaining(&bs, 0, 16).is_ok());
    assert_eq!(check_remaining(&bs, 1, 16), Err(SerializationError::StreamTooShort));
  }
}
