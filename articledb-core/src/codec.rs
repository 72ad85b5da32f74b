//! Key and value encodings shared by every bucket.
//!
//! Article numbers and timestamps become fixed-width big-endian keys so that
//! the store's byte ordering matches numeric ordering. Values are bincode.

use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode_i64(num: i64) -> [u8; 8] {
    num.to_be_bytes()
}

/// Decodes a big-endian key. Short keys are folded byte by byte so a
/// truncated key still yields a number instead of a panic.
pub fn decode_i64(buf: &[u8]) -> i64 {
    match <[u8; 8]>::try_from(buf) {
        Ok(bytes) => i64::from_be_bytes(bytes),
        Err(_) => buf.iter().fold(0i64, |acc, b| (acc << 8) | i64::from(*b)),
    }
}

pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
