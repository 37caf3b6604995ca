//! Container sniffing and best-effort decompression of downloaded assets.
//!
//! Asset files come in up to two layers: an optional `SC` envelope carrying a
//! content hash, wrapping either an `SCLZ` dictionary-compressed payload or a
//! legacy LZMA stream whose header lacks the upper half of its size field.
//! [`Decompressor::decompress`] never fails: whenever a layer cannot be
//! decoded the bytes as they were before that layer are returned.

use std::ops::RangeInclusive;

use log::debug;
use lzham::DecompressionOptions;
use xz2::stream::{Action, Status, Stream};

const ENVELOPE_MAGIC: &[u8] = b"SC";
const ENVELOPE_HEADER_LEN: usize = 10;
const SCLZ_MAGIC: &[u8] = b"SCLZ";
const SCLZ_HEADER_LEN: usize = 9;
const LZMA_LEGACY_HEADER_LEN: usize = 9;
const LZMA_MEMLIMIT: u64 = 256 * 1024 * 1024;
const LZMA_CHUNK: usize = 64 * 1024;
const LZHAM_DICT_SIZE_LOG2: RangeInclusive<u8> = 15..=29;
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Extensions whose payloads are worth passing through the decompressor.
pub const COMPRESSIBLE_EXTENSIONS: &[&str] = &[".csv", ".sc"];

#[must_use]
pub fn is_compressible(filename: &str) -> bool {
    COMPRESSIBLE_EXTENSIONS
        .iter()
        .any(|ext| filename.ends_with(ext))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    Sclz { dict_size_log2: u8, decompressed_size: u32 },
    Lzma,
}

/// Result of sniffing a buffer: the container kind and where its payload starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detected {
    pub enveloped: bool,
    pub offset: usize,
    pub container: Container,
}

/// Work out which container `data` carries without decoding it.
#[must_use]
pub fn detect(data: &[u8]) -> Detected {
    let offset = envelope_payload_offset(data).unwrap_or(0);
    let inner = &data[offset..];
    let container = match sclz_header(inner) {
        Some((dict_size_log2, decompressed_size)) => Container::Sclz {
            dict_size_log2,
            decompressed_size,
        },
        None => Container::Lzma,
    };
    Detected {
        enveloped: offset > 0,
        offset,
        container,
    }
}

/// Offset of the payload behind an `SC` envelope, if `data` carries one.
fn envelope_payload_offset(data: &[u8]) -> Option<usize> {
    if !data.starts_with(ENVELOPE_MAGIC) || data.starts_with(SCLZ_MAGIC) {
        return None;
    }
    let hash_len = u32::from_be_bytes(data.get(6..10)?.try_into().ok()?) as usize;
    let offset = ENVELOPE_HEADER_LEN.checked_add(hash_len)?;
    (offset <= data.len()).then_some(offset)
}

fn sclz_header(data: &[u8]) -> Option<(u8, u32)> {
    if !data.starts_with(SCLZ_MAGIC) || data.len() < SCLZ_HEADER_LEN {
        return None;
    }
    let size = u32::from_le_bytes(data[5..9].try_into().ok()?);
    Some((data[4], size))
}

/// Decoder for the `SCLZ` dictionary codec.
pub trait DictionaryDecoder: Send + Sync {
    fn decode(
        &self,
        payload: &[u8],
        dict_size_log2: u8,
        decompressed_size: usize,
    ) -> Result<Vec<u8>, String>;
}

/// LZHAM, the codec `SCLZ` payloads are packed with.
#[derive(Clone, Copy, Debug, Default)]
pub struct LzhamDecoder;

impl DictionaryDecoder for LzhamDecoder {
    fn decode(
        &self,
        payload: &[u8],
        dict_size_log2: u8,
        decompressed_size: usize,
    ) -> Result<Vec<u8>, String> {
        if !LZHAM_DICT_SIZE_LOG2.contains(&dict_size_log2) {
            return Err(format!(
                "LZHAM dictionary size 2^{dict_size_log2} out of range"
            ));
        }
        let options = DecompressionOptions {
            dict_size_log2: u32::from(dict_size_log2),
            ..DecompressionOptions::default()
        };
        let mut input = payload;
        let mut out = Vec::with_capacity(decompressed_size.min(MAX_PREALLOC));
        let status = lzham::decompress_with_options(&mut input, &mut out, decompressed_size, options);
        if !status.is_success() {
            return Err("LZHAM stream is corrupt or truncated".into());
        }
        if out.len() != decompressed_size {
            return Err(format!(
                "LZHAM produced {} bytes, header declared {decompressed_size}",
                out.len()
            ));
        }
        Ok(out)
    }
}

enum Outcome {
    Decoded(Vec<u8>),
    Fallback(String),
}

impl Outcome {
    fn from_result(result: Result<Vec<u8>, String>) -> Self {
        match result {
            Ok(bytes) => Outcome::Decoded(bytes),
            Err(reason) => Outcome::Fallback(reason),
        }
    }
}

pub struct Decompressor {
    dictionary: Box<dyn DictionaryDecoder>,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new(Box::new(LzhamDecoder))
    }
}

impl Decompressor {
    pub fn new(dictionary: Box<dyn DictionaryDecoder>) -> Self {
        Self { dictionary }
    }

    /// Strip the envelope and decode the inner payload, falling back to the
    /// stripped bytes when the payload cannot be decoded.
    #[must_use]
    pub fn decompress(&self, data: &[u8]) -> Vec<u8> {
        let detected = detect(data);
        let inner = &data[detected.offset..];

        let outcome = match detected.container {
            Container::Sclz {
                dict_size_log2,
                decompressed_size,
            } => Outcome::from_result(self.dictionary.decode(
                &inner[SCLZ_HEADER_LEN..],
                dict_size_log2,
                decompressed_size as usize,
            )),
            Container::Lzma => Outcome::from_result(decode_legacy_lzma(inner)),
        };

        match outcome {
            Outcome::Decoded(bytes) => bytes,
            Outcome::Fallback(reason) => {
                debug!(
                    "decompress: keeping {} raw bytes ({:?}): {}",
                    inner.len(),
                    detected.container,
                    reason
                );
                inner.to_vec()
            }
        }
    }
}

/// Decompress with the default decoder set.
#[must_use]
pub fn decompress(data: &[u8]) -> Vec<u8> {
    Decompressor::default().decompress(data)
}

/// Rebuild a 13-byte LZMA-alone header from the 9-byte legacy one and decode.
fn decode_legacy_lzma(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() < LZMA_LEGACY_HEADER_LEN {
        return Err(format!("{} bytes is too short for an LZMA header", data.len()));
    }
    let mut adjusted = Vec::with_capacity(data.len() + 4);
    adjusted.extend_from_slice(&data[..LZMA_LEGACY_HEADER_LEN]);
    adjusted.extend_from_slice(&[0u8; 4]);
    adjusted.extend_from_slice(&data[LZMA_LEGACY_HEADER_LEN..]);

    let mut stream = Stream::new_lzma_decoder(LZMA_MEMLIMIT)
        .map_err(|e| format!("failed to create LZMA decoder: {e}"))?;
    let mut input = adjusted.as_slice();
    let mut out = Vec::new();

    loop {
        out.reserve(LZMA_CHUNK);
        let in_before = stream.total_in();
        let out_before = out.len();
        let action = if input.is_empty() {
            Action::Finish
        } else {
            Action::Run
        };
        let status = stream
            .process_vec(input, &mut out, action)
            .map_err(|e| format!("LZMA decode error: {e}"))?;
        if matches!(status, Status::StreamEnd) {
            return Ok(out);
        }
        let consumed = (stream.total_in() - in_before) as usize;
        input = &input[consumed..];
        if consumed == 0 && out.len() == out_before {
            return Err("LZMA stream ended early".into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lzham::CompressionOptions;
    use xz2::stream::LzmaOptions;

    /// Produce the legacy 9-byte-header form the asset server ships.
    fn legacy_lzma(payload: &[u8]) -> Vec<u8> {
        let options = LzmaOptions::new_preset(6).unwrap();
        let mut stream = Stream::new_lzma_encoder(&options).unwrap();
        let mut encoded = Vec::with_capacity(payload.len() + 1024);
        let mut input = payload;
        loop {
            encoded.reserve(4096);
            let before = stream.total_in();
            let status = stream
                .process_vec(input, &mut encoded, Action::Finish)
                .unwrap();
            input = &input[(stream.total_in() - before) as usize..];
            if matches!(status, Status::StreamEnd) {
                break;
            }
        }

        let mut legacy = Vec::new();
        legacy.extend_from_slice(&encoded[..5]);
        legacy.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        legacy.extend_from_slice(&encoded[13..]);
        legacy
    }

    fn envelope(hash: &[u8], inner: &[u8]) -> Vec<u8> {
        let mut data = b"SC".to_vec();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&(hash.len() as u32).to_be_bytes());
        data.extend_from_slice(hash);
        data.extend_from_slice(inner);
        data
    }

    struct EchoDecoder {
        expected_log2: u8,
    }

    impl DictionaryDecoder for EchoDecoder {
        fn decode(
            &self,
            payload: &[u8],
            dict_size_log2: u8,
            decompressed_size: usize,
        ) -> Result<Vec<u8>, String> {
            if dict_size_log2 != self.expected_log2 {
                return Err("unexpected dictionary size".into());
            }
            // Payload stores the literal bytes in reverse.
            let mut out: Vec<u8> = payload.iter().rev().copied().collect();
            if out.len() != decompressed_size {
                return Err("size mismatch".into());
            }
            out.truncate(decompressed_size);
            Ok(out)
        }
    }

    #[test]
    fn plain_bytes_pass_through_unchanged() {
        let samples: [&[u8]; 4] = [
            b"",
            b"abc",
            b"name,type\nString,int\nhello,1\n",
            b"Some plain asset bytes that were never compressed",
        ];
        for sample in samples {
            let once = decompress(sample);
            assert_eq!(once, sample);
            assert_eq!(decompress(&once), sample);
        }
    }

    #[test]
    fn detects_envelope_and_inner_container() {
        let sclz = b"SCLZ\x12\x05\x00\x00\x00olleh";
        let wrapped = envelope(&[0xaa; 16], sclz);
        let detected = detect(&wrapped);
        assert!(detected.enveloped);
        assert_eq!(detected.offset, 26);
        assert_eq!(
            detected.container,
            Container::Sclz {
                dict_size_log2: 0x12,
                decompressed_size: 5
            }
        );

        let bare = detect(b"SCLZ\x12\x05\x00\x00\x00olleh");
        assert!(!bare.enveloped);
        assert_eq!(bare.offset, 0);
    }

    #[test]
    fn decodes_sclz_payload_with_plugged_decoder() {
        let decompressor = Decompressor::new(Box::new(EchoDecoder { expected_log2: 18 }));
        let sclz = b"SCLZ\x12\x05\x00\x00\x00olleh";
        assert_eq!(decompressor.decompress(sclz), b"hello");
        assert_eq!(
            decompressor.decompress(&envelope(b"0123456789abcdef", sclz)),
            b"hello"
        );
    }

    fn sclz(dict_size_log2: u8, payload: &[u8]) -> Vec<u8> {
        let options = CompressionOptions {
            dict_size_log2: u32::from(dict_size_log2),
            ..CompressionOptions::default()
        };
        let mut compressed = Vec::new();
        let status = lzham::compress_with_options(&mut &payload[..], &mut compressed, options);
        assert!(status.is_success());

        let mut data = SCLZ_MAGIC.to_vec();
        data.push(dict_size_log2);
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&compressed);
        data
    }

    #[test]
    fn default_decoder_unpacks_lzham() {
        let payload = b"Name,Hitpoints,Damage\nString,int,int\nKnight,1400,160\n".repeat(30);
        let packed = sclz(18, &payload);
        assert_ne!(&packed[SCLZ_HEADER_LEN..], payload.as_slice());
        assert_eq!(decompress(&packed), payload);
        assert_eq!(decompress(&envelope(&[3; 16], &packed)), payload);
    }

    #[test]
    fn out_of_range_dictionary_falls_back() {
        let payload = b"abcabcabcabc".repeat(100);
        let mut packed = sclz(20, &payload);
        packed[4] = 40;
        assert_eq!(decompress(&packed), packed);
    }

    #[test]
    fn corrupt_sclz_returns_stripped_input() {
        let sclz = b"SCLZ\x12\x05\x00\x00\x00olleh";
        let wrapped = envelope(&[1, 2, 3, 4], sclz);
        assert_eq!(decompress(&wrapped), sclz);
    }

    #[test]
    fn decodes_legacy_lzma() {
        let payload = b"id,name,count\n1,barbarian,10\n2,archer,20\n".repeat(20);
        let legacy = legacy_lzma(&payload);
        assert_eq!(decompress(&legacy), payload);
        assert_eq!(decompress(&envelope(&[7; 20], &legacy)), payload);
    }

    #[test]
    fn corrupt_lzma_falls_back_to_stripped_bytes() {
        let mut legacy = legacy_lzma(b"some csv payload, some csv payload");
        legacy.truncate(12);
        let wrapped = envelope(&[9; 4], &legacy);
        assert_eq!(decompress(&wrapped), legacy);
    }

    #[test]
    fn truncated_envelope_is_left_alone() {
        let data = b"SC\x00\x00\x00\x01\xff\xff";
        assert_eq!(detect(data).offset, 0);
        assert_eq!(decompress(data), data);
    }

    #[test]
    fn recognises_compressible_extensions() {
        assert!(is_compressible("logic/buildings.csv"));
        assert!(is_compressible("sc/ui.sc"));
        assert!(!is_compressible("music/theme.ogg"));
        assert!(!is_compressible("fingerprint.json"));
    }
}
