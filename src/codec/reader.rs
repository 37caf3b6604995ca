use std::io::Read;

use flate2::read::{DeflateDecoder, ZlibDecoder};

use super::{ABSENT_LENGTH, CodecError, CodecResult, MAX_VARINT_BYTES, unrotate_first, zigzag_decode};

/// Cursor over a received message payload.
#[derive(Debug, Clone)]
pub struct Reader {
    data: Vec<u8>,
    pos: usize,
}

impl Reader {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> CodecResult<&[u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::TruncatedInput {
                needed: len,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32_be(&mut self) -> CodecResult<u32> {
        self.take_array().map(u32::from_be_bytes)
    }

    pub fn read_u32_le(&mut self) -> CodecResult<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Read a rotated zigzag varint.
    pub fn read_varint(&mut self) -> CodecResult<i32> {
        let mut result: u32 = 0;
        let mut shift = 0u32;

        for index in 0..MAX_VARINT_BYTES {
            let raw = self.read_u8()?;
            let byte = if index == 0 { unrotate_first(raw) } else { raw };
            result |= u32::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(zigzag_decode(result));
            }
        }

        Err(CodecError::VarintTooLong)
    }

    fn read_length(&mut self) -> CodecResult<Option<usize>> {
        let length = self.read_u32_be()?;
        if length == ABSENT_LENGTH {
            return Ok(None);
        }
        Ok(Some(length as usize))
    }

    /// Read a length-prefixed UTF-8 string; `None` when the field is absent.
    pub fn read_string(&mut self) -> CodecResult<Option<String>> {
        let Some(length) = self.read_length()? else {
            return Ok(None);
        };
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| CodecError::InvalidEncoding(e.to_string()))
    }

    /// Read a string stored as `[len BE][raw size LE][zlib stream]`.
    pub fn read_compressed_string(&mut self) -> CodecResult<Option<String>> {
        let Some(length) = self.read_length()? else {
            return Ok(None);
        };
        if length < 4 {
            return Err(CodecError::InvalidEncoding(format!(
                "compressed string length {length} shorter than its size prefix"
            )));
        }
        let declared = self.read_u32_le()? as usize;
        let compressed = self.take(length - 4)?;
        let inflated = inflate(compressed, declared)?;
        String::from_utf8(inflated)
            .map(Some)
            .map_err(|e| CodecError::InvalidEncoding(e.to_string()))
    }
}

/// Upper bound on what a declared size may reserve up front.
const MAX_PREALLOC: usize = 1024 * 1024;

fn inflate(compressed: &[u8], declared: usize) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(declared.min(MAX_PREALLOC));
    let limit = declared as u64;
    let result = if has_zlib_header(compressed) {
        ZlibDecoder::new(compressed).take(limit).read_to_end(&mut out)
    } else {
        DeflateDecoder::new(compressed).take(limit).read_to_end(&mut out)
    };
    result.map_err(|e| CodecError::InvalidEncoding(format!("inflate failed: {e}")))?;
    Ok(out)
}

fn has_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}
