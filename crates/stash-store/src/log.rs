//! Append-only record log with length + CRC framing.
//!
//! On-disk format of one entry:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized LogEntry)]
//! ```
//!
//! A `put` is a single entry, so a crash mid-write leaves at most one torn
//! entry at the tail. Recovery skips it; readers never see half a record.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stash_types::{AssetName, AssetRecord, RecordDigest};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub(crate) const HEADER_SIZE: u64 = 8;

/// Flush/sync strategy for the record log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// One logical mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogEntry {
    Put {
        record: AssetRecord,
        digest: RecordDigest,
    },
    Delete {
        name: AssetName,
    },
}

impl LogEntry {
    pub(crate) fn put(record: AssetRecord) -> Self {
        let digest = record.digest();
        Self::Put { record, digest }
    }
}

/// Writer half of the log.
pub(crate) struct RecordLog {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Current end of the log; the offset the next entry lands at.
    offset: u64,
    sync_mode: SyncMode,
}

impl RecordLog {
    /// Open (or create) the log for appending.
    pub(crate) fn open(path: &Path, sync_mode: SyncMode) -> io::Result<Self> {
        let file = open_append(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset,
            sync_mode,
        })
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Record that the underlying file was renamed to `path`. The open
    /// descriptor follows the file, so only the path used for rollback
    /// changes.
    pub(crate) fn renamed_to(&mut self, path: &Path) {
        self.path = path.to_path_buf();
    }

    /// Append one entry. Returns its offset.
    ///
    /// On failure the file is cut back to the previous end so no partial
    /// entry is left behind for later appends to hide behind.
    pub(crate) fn append(&mut self, entry: &LogEntry) -> StoreResult<u64> {
        let payload =
            bincode::serialize(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len()).map_err(|_| {
            StoreError::Serialization(format!("entry of {} bytes exceeds 4 GiB", payload.len()))
        })?;
        let crc = crc32fast::hash(&payload);
        let entry_offset = self.offset;

        let written = (|| -> io::Result<()> {
            self.writer.write_all(&length.to_le_bytes())?;
            self.writer.write_all(&crc.to_le_bytes())?;
            self.writer.write_all(&payload)?;
            self.writer.flush()?;
            if self.sync_mode == SyncMode::EveryWrite {
                self.writer.get_ref().sync_data()?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            warn!(offset = entry_offset, error = %e, "log append failed; rolling back");
            if let Err(rollback) = self.rollback() {
                warn!(error = %rollback, "log rollback failed");
            }
            return Err(e.into());
        }

        self.offset += HEADER_SIZE + payload.len() as u64;
        debug!(offset = entry_offset, len = payload.len(), "log append");
        Ok(entry_offset)
    }

    /// Flush and fsync.
    pub(crate) fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    fn rollback(&mut self) -> io::Result<()> {
        let fresh = BufWriter::new(open_append(&self.path)?);
        let old = std::mem::replace(&mut self.writer, fresh);
        // into_parts drops buffered bytes instead of flushing them.
        let (file, _unflushed) = old.into_parts();
        file.set_len(self.offset)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
}

/// Read and verify the entry at `offset`.
pub(crate) fn read_at(path: &Path, offset: u64) -> StoreResult<LogEntry> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(offset))?;

    let mut header = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut header)?;
    let (length, expected_crc) = decode_header(&header);
    if offset + HEADER_SIZE + u64::from(length) > file_len {
        return Err(StoreError::Corrupt {
            offset,
            reason: format!("length {length} runs past end of log ({file_len} bytes)"),
        });
    }

    let mut payload = vec![0u8; length as usize];
    file.read_exact(&mut payload).map_err(|e| StoreError::Corrupt {
        offset,
        reason: format!("short payload: {e}"),
    })?;

    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(StoreError::Corrupt {
            offset,
            reason: format!("crc mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
        });
    }

    let entry: LogEntry = bincode::deserialize(&payload).map_err(|e| StoreError::Corrupt {
        offset,
        reason: format!("undecodable entry: {e}"),
    })?;

    if let LogEntry::Put { record, digest } = &entry {
        if record.digest() != *digest {
            return Err(StoreError::Corrupt {
                offset,
                reason: format!("digest mismatch for {}", record.name),
            });
        }
    }
    Ok(entry)
}

/// Walk the log front to back, calling `visit(offset, entry)` for every
/// valid entry.
///
/// Entries that fail the CRC check or cannot be decoded are logged and
/// skipped. A bad length or a truncated tail ends the scan. Returns the
/// offset just past the last well-framed entry; anything beyond it is a
/// torn write.
pub(crate) fn scan(path: &Path, mut visit: impl FnMut(u64, LogEntry)) -> StoreResult<u64> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut offset: u64 = 0;
    let mut recovered = 0usize;

    while offset + HEADER_SIZE <= file_len {
        reader.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; HEADER_SIZE as usize];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let (length, expected_crc) = decode_header(&header);

        if length == 0 || offset + HEADER_SIZE + u64::from(length) > file_len {
            warn!(offset, length, file_len, "invalid log entry length; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated log entry; stopping recovery");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let next = offset + HEADER_SIZE + u64::from(length);
        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping entry"
            );
            offset = next;
            continue;
        }

        match bincode::deserialize::<LogEntry>(&payload) {
            Ok(entry) => {
                visit(offset, entry);
                recovered += 1;
            }
            Err(e) => warn!(offset, error = %e, "failed to decode log entry; skipping"),
        }
        offset = next;
    }

    debug!(recovered, valid_end = offset, "log scan complete");
    Ok(offset)
}

fn decode_header(header: &[u8; HEADER_SIZE as usize]) -> (u32, u32) {
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (length, crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use stash_types::VariantTag;
    use std::collections::BTreeMap;

    fn put(name: &str, payload: &[u8]) -> LogEntry {
        let mut variants = BTreeMap::new();
        variants.insert(VariantTag::mp4(), Bytes::copy_from_slice(payload));
        LogEntry::put(AssetRecord::new(name.parse().unwrap(), variants))
    }

    fn collect(path: &Path) -> (Vec<LogEntry>, u64) {
        let mut entries = Vec::new();
        let end = scan(path, |_, e| entries.push(e)).unwrap();
        (entries, end)
    }

    #[test]
    fn append_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut log = RecordLog::open(&path, SyncMode::default()).unwrap();

        let a = put("a", b"alpha");
        let del = LogEntry::Delete {
            name: "a".parse().unwrap(),
        };
        let off_a = log.append(&a).unwrap();
        let off_del = log.append(&del).unwrap();
        assert_eq!(off_a, 0);
        assert!(off_del > off_a);

        let (entries, end) = collect(&path);
        assert_eq!(entries, vec![a.clone(), del]);
        assert_eq!(end, log.offset());
        assert_eq!(read_at(&path, off_a).unwrap(), a);
    }

    #[test]
    fn scan_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (entries, end) = collect(&dir.path().join("nope.log"));
        assert!(entries.is_empty());
        assert_eq!(end, 0);
    }

    #[test]
    fn crc_mismatch_skips_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut log = RecordLog::open(&path, SyncMode::EveryWrite).unwrap();
        log.append(&put("a", b"first")).unwrap();
        log.append(&put("b", b"second")).unwrap();
        drop(log);

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE)).unwrap();
            file.write_all(&buf).unwrap();
            file.sync_all().unwrap();
        }

        let (entries, _) = collect(&path);
        assert_eq!(entries, vec![put("b", b"second")]);
        assert!(matches!(read_at(&path, 0), Err(StoreError::Corrupt { offset: 0, .. })));
    }

    #[test]
    fn truncated_tail_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut log = RecordLog::open(&path, SyncMode::default()).unwrap();
        log.append(&put("a", b"kept")).unwrap();
        let second = log.append(&put("b", b"torn")).unwrap();
        let total = log.offset();
        drop(log);

        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(total - 3)
            .unwrap();

        let (entries, end) = collect(&path);
        assert_eq!(entries, vec![put("a", b"kept")]);
        assert_eq!(end, second);
    }

    #[test]
    fn reopen_continues_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        let mut log = RecordLog::open(&path, SyncMode::default()).unwrap();
        log.append(&put("a", b"1")).unwrap();
        let end = log.offset();
        drop(log);

        let mut log = RecordLog::open(&path, SyncMode::default()).unwrap();
        assert_eq!(log.offset(), end);
        assert_eq!(log.append(&put("b", b"2")).unwrap(), end);
    }
}
