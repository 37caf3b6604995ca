use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;

use super::{ABSENT_LENGTH, rotate_first, zigzag_encode};

/// Growable buffer for an outgoing message payload.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u32_be(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write the rotated zigzag varint form of `value`.
    pub fn write_varint(&mut self, value: i32) {
        let mut rest = zigzag_encode(value);
        let mut first = true;
        loop {
            let mut byte = (rest & 0x7f) as u8;
            rest >>= 7;
            if rest != 0 {
                byte |= 0x80;
            }
            if first {
                byte = rotate_first(byte);
                first = false;
            }
            self.buffer.push(byte);
            if rest == 0 {
                break;
            }
        }
    }

    /// Write a length-prefixed string, or the absent sentinel for `None`.
    pub fn write_string(&mut self, value: Option<&str>) {
        match value {
            Some(text) => {
                self.write_u32_be(text.len() as u32);
                self.buffer.extend_from_slice(text.as_bytes());
            }
            None => self.write_u32_be(ABSENT_LENGTH),
        }
    }

    pub fn write_compressed_string(&mut self, value: Option<&str>) {
        let Some(text) = value else {
            self.write_u32_be(ABSENT_LENGTH);
            return;
        };
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        // Writing into a Vec cannot fail.
        let compressed = encoder
            .write_all(text.as_bytes())
            .and_then(|()| encoder.finish())
            .unwrap_or_default();
        self.write_u32_be((compressed.len() + 4) as u32);
        self.buffer
            .extend_from_slice(&(text.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(&compressed);
    }
}
