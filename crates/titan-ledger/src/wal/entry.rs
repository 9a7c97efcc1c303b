//! WAL entry framing.
//!
//! ```text
//! ┌──────────┬───┬──────────┬───┬───────────────────────────────┬────┐
//! │ LLLLLLLL │ ␠ │ CCCCCCCC │ ␠ │ {"sequence":7,"timestamp":..} │ \n │
//! └──────────┴───┴──────────┴───┴───────────────────────────────┴────┘
//!   JSON byte    CRC32 of the       entry JSON (compact, so it
//!   length, hex  JSON, hex          never contains a raw newline)
//! ```
//!
//! A line is only complete once its newline is on disk. Anything that fails
//! to frame, checksum or parse is a torn write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::op::WalOp;

const HEADER_LEN: usize = 18;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonic, starts at 1, no gaps.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub op: WalOp,
}

/// Why a line could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("entry is missing its trailing newline")]
    MissingNewline,
    #[error("malformed entry header")]
    BadHeader,
    #[error("length mismatch: header says {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("checksum mismatch: header {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("undecodable payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl WalEntry {
    pub fn new(sequence: u64, timestamp: DateTime<Utc>, op: WalOp) -> Self {
        WalEntry {
            sequence,
            timestamp,
            op,
        }
    }

    /// Frames the entry as one newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        let checksum = crc32fast::hash(&json);

        let mut line = Vec::with_capacity(HEADER_LEN + json.len() + 1);
        line.extend_from_slice(format!("{:08x} {:08x} ", json.len(), checksum).as_bytes());
        line.extend_from_slice(&json);
        line.push(b'\n');
        Ok(line)
    }

    /// Decodes one line as read from disk, newline included.
    pub fn decode(line: &[u8]) -> Result<WalEntry, DecodeError> {
        let body = line.strip_suffix(b"\n").ok_or(DecodeError::MissingNewline)?;
        if body.len() < HEADER_LEN || body[8] != b' ' || body[17] != b' ' {
            return Err(DecodeError::BadHeader);
        }

        let expected_len = parse_hex(&body[0..8])? as usize;
        let expected_crc = parse_hex(&body[9..17])?;
        let json = &body[HEADER_LEN..];

        if json.len() != expected_len {
            return Err(DecodeError::LengthMismatch {
                expected: expected_len,
                actual: json.len(),
            });
        }

        let actual_crc = crc32fast::hash(json);
        if actual_crc != expected_crc {
            return Err(DecodeError::ChecksumMismatch {
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        Ok(serde_json::from_slice(json)?)
    }
}

fn parse_hex(digits: &[u8]) -> Result<u32, DecodeError> {
    let text = std::str::from_utf8(digits).map_err(|_| DecodeError::BadHeader)?;
    u32::from_str_radix(text, 16).map_err(|_| DecodeError::BadHeader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use titan_core::TransactionId;

    fn entry() -> WalEntry {
        WalEntry::new(
            3,
            Utc::now(),
            WalOp::Abort {
                transaction_id: TransactionId(9),
                reason: Some("customer left".to_string()),
            },
        )
    }

    #[test]
    fn test_encoded_line_shape() {
        let line = entry().encode().unwrap();
        assert_eq!(*line.last().unwrap(), b'\n');
        assert_eq!(line[8], b' ');
        assert_eq!(line[17], b' ');
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let decoded = WalEntry::decode(&line).unwrap();
        assert_eq!(decoded, entry_with_timestamp(decoded.timestamp));
    }

    fn entry_with_timestamp(ts: DateTime<Utc>) -> WalEntry {
        let mut e = entry();
        e.timestamp = ts;
        e
    }

    #[test]
    fn test_torn_line_is_rejected() {
        let line = entry().encode().unwrap();
        let torn = &line[..line.len() - 1];
        assert!(matches!(
            WalEntry::decode(torn),
            Err(DecodeError::MissingNewline)
        ));

        let mut short = line[..line.len() / 2].to_vec();
        short.push(b'\n');
        assert!(matches!(
            WalEntry::decode(&short),
            Err(DecodeError::LengthMismatch { .. }) | Err(DecodeError::BadHeader)
        ));
    }

    #[test]
    fn test_bit_flip_is_detected() {
        let mut line = entry().encode().unwrap();
        let idx = line.len() - 5;
        line[idx] ^= 0x01;
        assert!(matches!(
            WalEntry::decode(&line),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_garbage_header() {
        assert!(matches!(
            WalEntry::decode(b"not a wal line\n"),
            Err(DecodeError::BadHeader)
        ));
    }
}
