//! Article payload representations.
//!
//! A payload is either held inline (plain or LZ4 compressed) or is a pointer
//! into the day file of the node that stored it. Pointers never point at
//! other pointers.

use crate::error::{ArticleDbError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a day bucket, one append-only file per node.
pub type DayId = u32;

/// Inputs larger than this are stored uncompressed.
pub const MAX_COMPRESSIBLE_LEN: usize = 0x7E00_0000;

const SECONDS_PER_DAY: i64 = 86_400;

const TAG_PLAIN: u8 = b'b';
const TAG_COMPRESSED: u8 = b'C';

/// Maps a unix timestamp (seconds) to its day bucket, saturating at the last
/// representable day.
pub fn day_for_timestamp(timestamp: i64) -> DayId {
    DayId::try_from(timestamp.max(0).div_euclid(SECONDS_PER_DAY)).unwrap_or(DayId::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocation {
    pub node: Uuid,
    pub day: DayId,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blob {
    Plain(Bytes),
    Compressed { original_len: u32, data: Bytes },
    Location(BlobLocation),
}

impl Blob {
    pub fn plain(content: impl Into<Bytes>) -> Self {
        Blob::Plain(content.into())
    }

    pub fn is_inline(&self) -> bool {
        !matches!(self, Blob::Location(_))
    }

    pub fn location(&self) -> Option<&BlobLocation> {
        match self {
            Blob::Location(location) => Some(location),
            _ => None,
        }
    }

    /// Inverse of [`CompressionHint::compress`]. Plain blobs and pointers pass
    /// through untouched.
    pub fn decompress(self) -> Result<Blob> {
        match self {
            Blob::Compressed { original_len, data } => {
                let expected = original_len as usize;
                let plain = lz4_flex::block::decompress(&data, expected).map_err(|error| {
                    ArticleDbError::Corrupt(format!("lz4 block rejected: {}", error))
                })?;
                if plain.len() != expected {
                    return Err(ArticleDbError::Corrupt(format!(
                        "lz4 block length mismatch: expected={} actual={}",
                        expected,
                        plain.len()
                    )));
                }
                Ok(Blob::Plain(Bytes::from(plain)))
            }
            other => Ok(other),
        }
    }

    /// Returns the uncompressed content of an inline blob.
    pub fn into_content(self) -> Result<Bytes> {
        match self.decompress()? {
            Blob::Plain(content) => Ok(content),
            Blob::Location(location) => Err(ArticleDbError::InvalidRequest(format!(
                "blob is an unresolved pointer to node {} day {}",
                location.node, location.day
            ))),
            Blob::Compressed { .. } => Err(ArticleDbError::Internal(
                "decompression left a compressed blob".to_string(),
            )),
        }
    }

    /// Serializes an inline blob into a day-file record.
    pub fn to_record(&self) -> Result<Vec<u8>> {
        match self {
            Blob::Plain(content) => {
                let mut record = Vec::with_capacity(content.len() + 1);
                record.push(TAG_PLAIN);
                record.extend_from_slice(content);
                Ok(record)
            }
            Blob::Compressed { original_len, data } => {
                let mut record = Vec::with_capacity(data.len() + 5);
                record.push(TAG_COMPRESSED);
                record.extend_from_slice(&original_len.to_be_bytes());
                record.extend_from_slice(data);
                Ok(record)
            }
            Blob::Location(_) => Err(ArticleDbError::InvalidRequest(
                "remote pointers cannot be written to a day file".to_string(),
            )),
        }
    }

    pub fn from_record(record: &[u8]) -> Result<Blob> {
        let (tag, rest) = record
            .split_first()
            .ok_or_else(|| ArticleDbError::Corrupt("empty blob record".to_string()))?;

        match *tag {
            TAG_PLAIN => Ok(Blob::Plain(Bytes::copy_from_slice(rest))),
            TAG_COMPRESSED => {
                if rest.len() < 4 {
                    return Err(ArticleDbError::Corrupt(
                        "truncated compressed blob record".to_string(),
                    ));
                }
                let (len, data) = rest.split_at(4);
                let original_len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]);
                Ok(Blob::Compressed {
                    original_len,
                    data: Bytes::copy_from_slice(data),
                })
            }
            other => Err(ArticleDbError::Corrupt(format!(
                "unknown blob record tag 0x{:02x}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionHint {
    #[default]
    None,
    Lz4,
    Lz4Hc,
}

impl CompressionHint {
    /// Compresses a plain blob. Anything that is not a non-empty plain blob
    /// within [`MAX_COMPRESSIBLE_LEN`] comes back unchanged, as does input
    /// that LZ4 cannot shrink.
    pub fn compress(self, blob: Blob) -> Blob {
        if self == CompressionHint::None {
            return blob;
        }

        let content = match &blob {
            Blob::Plain(content) => content,
            _ => return blob,
        };

        let len = content.len();
        if len == 0 || len > MAX_COMPRESSIBLE_LEN {
            return blob;
        }

        // lz4_flex has a single block compressor; Lz4Hc shares its format.
        let compressed = lz4_flex::block::compress(content);
        if compressed.len() >= len {
            return blob;
        }

        Blob::Compressed {
            original_len: len as u32,
            data: Bytes::from(compressed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> Bytes {
        Bytes::from("Path: news.example!not-for-mail\r\n".repeat(64))
    }

    #[test]
    fn test_compress_roundtrip_both_hints() {
        for hint in [CompressionHint::Lz4, CompressionHint::Lz4Hc] {
            let original = Blob::Plain(sample_body());
            let compressed = hint.compress(original.clone());
            assert!(matches!(compressed, Blob::Compressed { .. }));
            assert_eq!(compressed.decompress().unwrap(), original);
        }
    }

    #[test]
    fn test_compress_passthrough_cases() {
        let body = Blob::Plain(sample_body());
        assert_eq!(CompressionHint::None.compress(body.clone()), body);

        let empty = Blob::Plain(Bytes::new());
        assert_eq!(CompressionHint::Lz4.compress(empty.clone()), empty);

        let pointer = Blob::Location(BlobLocation {
            node: Uuid::new_v4(),
            day: 3,
            offset: 0,
            length: 10,
        });
        assert_eq!(CompressionHint::Lz4Hc.compress(pointer.clone()), pointer);

        let already = CompressionHint::Lz4.compress(body);
        assert_eq!(CompressionHint::Lz4.compress(already.clone()), already);
    }

    #[test]
    fn test_decompress_rejects_truncated_block() {
        let compressed = CompressionHint::Lz4.compress(Blob::Plain(sample_body()));
        let Blob::Compressed { original_len, data } = compressed else {
            panic!("expected compressed blob");
        };
        let truncated = Blob::Compressed {
            original_len,
            data: data.slice(..data.len() / 2),
        };
        assert!(matches!(
            truncated.decompress(),
            Err(ArticleDbError::Corrupt(_))
        ));

        let wrong_len = Blob::Compressed {
            original_len: original_len + 7,
            data,
        };
        assert!(matches!(
            wrong_len.decompress(),
            Err(ArticleDbError::Corrupt(_))
        ));
    }

    #[test]
    fn test_record_roundtrip_and_malformed() {
        let compressed = CompressionHint::Lz4.compress(Blob::Plain(sample_body()));
        let record = compressed.to_record().unwrap();
        assert_eq!(record[0], b'C');
        assert_eq!(Blob::from_record(&record).unwrap(), compressed);

        let plain = Blob::plain("hello");
        assert_eq!(Blob::from_record(&plain.to_record().unwrap()).unwrap(), plain);

        assert!(matches!(Blob::from_record(&[]), Err(ArticleDbError::Corrupt(_))));
        assert!(matches!(
            Blob::from_record(&[b'C', 0, 1]),
            Err(ArticleDbError::Corrupt(_))
        ));
        assert!(matches!(
            Blob::from_record(&[b'Z', 1, 2]),
            Err(ArticleDbError::Corrupt(_))
        ));
    }

    #[test]
    fn test_pointer_has_no_record() {
        let pointer = Blob::Location(BlobLocation {
            node: Uuid::nil(),
            day: 0,
            offset: 0,
            length: 1,
        });
        assert!(pointer.to_record().is_err());
        assert!(pointer.into_content().is_err());
    }

    #[test]
    fn test_day_for_timestamp() {
        assert_eq!(day_for_timestamp(0), 0);
        assert_eq!(day_for_timestamp(86_399), 0);
        assert_eq!(day_for_timestamp(86_400), 1);
        assert_eq!(day_for_timestamp(-5), 0);
        assert_eq!(day_for_timestamp(i64::MAX), DayId::MAX);
    }
}
