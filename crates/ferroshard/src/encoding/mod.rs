//! Text tokens for Coder values.
//!
//! A value `v` is offset to `v + 1` (wrapping) so that the token for `0` is
//! not all zeroes, laid out as 8 little-endian bytes and rendered with one of
//! three URL-safe alphabets:
//!
//! | function   | alphabet           | length |
//! |------------|--------------------|--------|
//! | [`code`]   | Crockford base32   | 13     |
//! | [`code16`] | lowercase hex      | 16     |
//! | [`code64`] | URL-safe base64    | 11     |
//!
//! The mapping is a bijection on `u64`, so distinct values always yield
//! distinct tokens. The `decode_*` functions reverse it.

mod alphabet;
mod error;

pub use alphabet::*;
pub use error::*;

fn to_bytes(value: u64) -> [u8; 8] {
    value.wrapping_add(1).to_le_bytes()
}

fn from_bytes(bytes: [u8; 8]) -> u64 {
    u64::from_le_bytes(bytes).wrapping_sub(1)
}

/// Encodes `value` as a 13-character Crockford base32 token.
///
/// ```
/// assert_eq!(ferroshard::code(0), "0200000000000");
/// assert_eq!(ferroshard::decode_code("0200000000000").unwrap(), 0);
/// ```
pub fn code(value: u64) -> String {
    CROCKFORD32.encode(&to_bytes(value))
}

/// Encodes `value` as a 16-character lowercase hex token.
///
/// ```
/// assert_eq!(ferroshard::code16(0), "0100000000000000");
/// ```
pub fn code16(value: u64) -> String {
    HEX16.encode(&to_bytes(value))
}

/// Encodes `value` as an 11-character URL-safe base64 token.
pub fn code64(value: u64) -> String {
    URL64.encode(&to_bytes(value))
}

/// Reverses [`code`]. Lowercase input is accepted.
///
/// # Errors
///
/// [`DecodeError`] if `token` is not a well-formed Crockford token.
pub fn decode_code(token: &str) -> Result<u64, DecodeError> {
    CROCKFORD32.decode(token).map(from_bytes)
}

/// Reverses [`code16`]. Uppercase input is accepted.
///
/// # Errors
///
/// [`DecodeError`] if `token` is not a well-formed hex token.
pub fn decode_code16(token: &str) -> Result<u64, DecodeError> {
    HEX16.decode(token).map(from_bytes)
}

/// Reverses [`code64`].
///
/// # Errors
///
/// [`DecodeError`] if `token` is not a well-formed base64 token.
pub fn decode_code64(token: &str) -> Result<u64, DecodeError> {
    URL64.decode(token).map(from_bytes)
}
