//! On-disk page encoding
//!
//! Every page file is a fixed 16 byte header followed by the payload:
//!
//! | bytes | field                                   |
//! |-------|-----------------------------------------|
//! | 0..4  | magic `PGDB`                            |
//! | 4     | format version                          |
//! | 5     | page kind                               |
//! | 6     | compression codec                       |
//! | 7     | reserved, zero                          |
//! | 8..12 | CRC32 of the stored payload (LE)        |
//! | 12..16| stored payload length (LE)              |
//!
//! The payload is the `bincode` encoding of the page, optionally compressed.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use pagedb_common::error::{Error, Result, StorageError};

const MAGIC: &[u8; 4] = b"PGDB";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 16;

/// Compression applied to a page payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
    Zstd,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Zstd => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            2 => Some(Compression::Zstd),
            _ => None,
        }
    }

    /// Compress data using the selected codec
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Compression::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::Serialization(format!("zstd compression failed: {e}"))),
        }
    }

    /// Decompress data
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| StorageError::CorruptData(format!("lz4 payload: {e}")).into()),
            Compression::Zstd => zstd::decode_all(data)
                .map_err(|e| StorageError::CorruptData(format!("zstd payload: {e}")).into()),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::Config(format!(
                "Unknown compression algorithm: {other}"
            ))),
        }
    }
}

/// What a page file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Table,
    Index,
}

impl PageKind {
    /// Metric/log label
    pub fn label(self) -> &'static str {
        match self {
            PageKind::Table => "table",
            PageKind::Index => "index",
        }
    }

    fn tag(self) -> u8 {
        match self {
            PageKind::Table => 1,
            PageKind::Index => 2,
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Serialize a page into its file image
pub fn encode<T: Serialize>(kind: PageKind, compression: Compression, page: &T) -> Result<Vec<u8>> {
    let raw = bincode::serialize(page).map_err(|e| Error::Serialization(e.to_string()))?;
    let payload = compression.compress(&raw)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::WriteFailed(format!("{kind} page exceeds 4 GiB")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.push(kind.tag());
    out.push(compression.tag());
    out.push(0);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Validate a file image and deserialize the page it holds
pub fn decode<T: DeserializeOwned>(kind: PageKind, bytes: &[u8]) -> Result<T> {
    let corrupt = |msg: String| -> Error { StorageError::CorruptData(msg).into() };

    if bytes.len() < HEADER_LEN {
        return Err(corrupt(format!("{kind} page truncated to {} bytes", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt(format!("{kind} page has bad magic")));
    }
    if bytes[4] != FORMAT_VERSION {
        return Err(corrupt(format!("{kind} page has unsupported version {}", bytes[4])));
    }
    if bytes[5] != kind.tag() {
        return Err(corrupt(format!("expected a {kind} page, found kind {}", bytes[5])));
    }
    let compression = Compression::from_tag(bytes[6])
        .ok_or_else(|| corrupt(format!("{kind} page has unknown codec {}", bytes[6])))?;

    let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != len {
        return Err(corrupt(format!(
            "{kind} page payload is {} bytes, header says {len}",
            payload.len()
        )));
    }
    let actual = crc32fast::hash(payload);
    if actual != crc {
        return Err(corrupt(format!(
            "{kind} page checksum mismatch: expected {crc:08x}, got {actual:08x}"
        )));
    }

    let raw = compression.decompress(payload)?;
    bincode::deserialize(&raw).map_err(|e| corrupt(format!("{kind} page body: {e}")))
}
