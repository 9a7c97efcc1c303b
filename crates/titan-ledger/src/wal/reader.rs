//! WAL reader: lazy, restartable scan with corruption detection.
//!
//! The first entry that fails to decode ends the scan. Everything from that
//! byte offset on is considered never committed and is reported as the
//! corrupt tail.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use super::entry::WalEntry;

/// Where a scan stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptTail {
    /// Byte offset of the first bad entry (= length of the valid prefix).
    pub offset: u64,
    /// 1-based line number of the first bad entry.
    pub line: u64,
    /// Bytes from `offset` to end of file.
    pub discarded_bytes: u64,
    pub reason: String,
}

/// WAL reader for iterating over entries.
#[derive(Debug, Clone)]
pub struct WalReader {
    path: PathBuf,
}

impl WalReader {
    /// A reader over `path`; a missing file reads as empty.
    pub fn new(path: impl AsRef<Path>) -> Self {
        WalReader {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Starts a fresh scan from the beginning of the log.
    pub fn entries(&self) -> io::Result<WalEntries> {
        let reader = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        Ok(WalEntries {
            reader,
            line_number: 0,
            valid_len: 0,
            tail: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterator over the valid prefix of a WAL.
pub struct WalEntries {
    reader: Option<BufReader<File>>,
    line_number: u64,
    valid_len: u64,
    tail: Option<CorruptTail>,
}

impl WalEntries {
    /// Byte length of the valid prefix read so far.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// The corruption point, once the scan has hit one.
    pub fn tail(&self) -> Option<&CorruptTail> {
        self.tail.as_ref()
    }

    fn stop_at_corruption(&mut self, consumed: u64, reason: String) {
        let mut discarded = consumed;
        if let Some(reader) = self.reader.as_mut() {
            let mut rest = Vec::new();
            if let Ok(n) = reader.read_to_end(&mut rest) {
                discarded += n as u64;
            }
        }
        self.reader = None;
        self.tail = Some(CorruptTail {
            offset: self.valid_len,
            line: self.line_number,
            discarded_bytes: discarded,
            reason,
        });
    }
}

impl Iterator for WalEntries {
    type Item = io::Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;

        let mut line = Vec::new();
        let read = match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                self.reader = None;
                return None;
            }
            Ok(n) => n as u64,
            Err(e) => {
                self.reader = None;
                return Some(Err(e));
            }
        };
        self.line_number += 1;

        match WalEntry::decode(&line) {
            Ok(entry) => {
                self.valid_len += read;
                Some(Ok(entry))
            }
            Err(e) => {
                self.stop_at_corruption(read, e.to_string());
                None
            }
        }
    }
}
