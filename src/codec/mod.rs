//! Wire primitives shared by the handshake request and response.

use thiserror::Error;

pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Length value marking an absent string field.
pub const ABSENT_LENGTH: u32 = 0xFFFF_FFFF;

/// A varint never spans more than five bytes for a 32-bit value.
pub const MAX_VARINT_BYTES: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("varint longer than {MAX_VARINT_BYTES} bytes")]
    VarintTooLong,
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Undo the bit rotation applied to the first byte of a varint.
///
/// The continuation bit stays in bit 7, bits 0..=5 move up by one and bit 6
/// wraps around to bit 0.
pub(crate) fn unrotate_first(byte: u8) -> u8 {
    let seventh = (byte & 0x40) >> 6;
    let msb = byte & 0x80;
    ((byte << 1) & 0x7e) | msb | seventh
}

/// Inverse of [`unrotate_first`].
pub(crate) fn rotate_first(byte: u8) -> u8 {
    (byte & 0x80) | ((byte >> 1) & 0x3f) | ((byte & 0x01) << 6)
}

pub(crate) fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

pub(crate) fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}
