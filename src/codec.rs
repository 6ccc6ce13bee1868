//! Record codec
//!
//! Frames payloads with a trailing CRC-32 and validates them on read. Used
//! identically for bundle records, index entries and the bundle header.
//!
//! ## Frame Format
//! ```text
//! ┌─────────────────────────────┬──────────────┐
//! │          Payload            │  CRC32 (4)   │
//! └─────────────────────────────┴──────────────┘
//! ```
//! The CRC is little-endian and covers the payload bytes only.

/// Size of the checksum trailer in bytes
pub const CRC_SIZE: usize = 4;

/// Compute the CRC-32 of `data`
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Encode a payload into a framed record (payload + CRC trailer)
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + CRC_SIZE);
    framed.extend_from_slice(payload);
    framed.extend_from_slice(&checksum(payload).to_le_bytes());
    framed
}

/// Overwrite the last 4 bytes of `buf` with the CRC of everything before them
///
/// The buffer must already reserve the trailer space.
pub fn frame_in_place(buf: &mut [u8]) {
    assert!(buf.len() >= CRC_SIZE, "buffer has no room for CRC trailer");
    let body_len = buf.len() - CRC_SIZE;
    let crc = checksum(&buf[..body_len]);
    buf[body_len..].copy_from_slice(&crc.to_le_bytes());
}

/// Decode a framed record, returning the payload slice
///
/// Returns `None` if the frame is too short or the CRC does not match.
/// Callers map that to the corruption error for their location.
pub fn decode(framed: &[u8]) -> Option<&[u8]> {
    if framed.len() < CRC_SIZE {
        return None;
    }
    let body_len = framed.len() - CRC_SIZE;
    let (body, trailer) = framed.split_at(body_len);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if checksum(body) == stored {
        Some(body)
    } else {
        None
    }
}
