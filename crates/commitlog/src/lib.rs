//! A single-file, append-only transaction log: every mutation accepted by
//! the store is framed, checksummed and appended here before the caller is
//! acknowledged, so the store's in-memory state can always be rebuilt by
//! replaying this file from the start.
//!
//! This is a deliberately simplified cousin of the segmented, multi-file
//! commitlog the table layer itself uses in production (see
//! `commitlog::commit::Header` for the framing this one's header borrows
//! its shape from) — one growing file instead of rolling segments, since the
//! spec's durability story doesn't call for segment rotation or archival.

mod frame;
mod record;

pub use frame::FrameError;
pub use record::LogRecord;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// An open handle to the on-disk transaction log, ready to accept appends.
pub struct TransactionLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TransactionLog {
    /// Opens (creating if absent) the log file at `path` for appending.
    /// Does not replay it — call [`replay`] separately at startup, before
    /// constructing this, to rebuild in-memory state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record`, flushing and fsyncing before returning so the
    /// caller is never acknowledged ahead of durability: the record is on
    /// stable storage, not just past the `BufWriter`'s userspace buffer.
    #[tracing::instrument(skip(self, record))]
    pub fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        let timestamp_millis = now_millis();
        frame::write_frame(&mut self.writer, record, timestamp_millis)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Truncates the log to empty, used after a successful `InitializeFromDump`
    /// or `Dump`-then-reset, since the dump itself becomes the new baseline.
    pub fn truncate(&mut self) -> Result<(), LogError> {
        self.truncate_to(0)
    }

    /// Truncates the log back to `len` bytes, used to undo the partial
    /// appends of a failed `ImportDump`/`InitializeFromDump` alongside the
    /// in-memory rollback.
    pub fn truncate_to(&mut self, len: u64) -> Result<(), LogError> {
        self.writer.flush()?;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        self.writer = BufWriter::new(file);
        self.writer.seek(io::SeekFrom::End(0))?;
        Ok(())
    }
}

/// Reads every well-formed frame from `path` in append order. A missing file
/// replays as empty; a trailing partial frame (a crash mid-append) is
/// silently dropped rather than treated as corruption.
pub fn replay(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, LogError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    while let Some((record, _timestamp_millis)) = frame::read_frame(&mut reader)? {
        records.push(record);
    }
    Ok(records)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachecore_primitives::TypeName;
    use cachecore_table::Record;
    use tempfile::tempdir;

    #[test]
    fn append_then_replay_round_trips_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txlog");

        let mut log = TransactionLog::open(&path).unwrap();
        log.append(&LogRecord::Put {
            type_name: TypeName::from("Item"),
            record: Record::new(vec![1, 2, 3]),
        })
        .unwrap();
        log.append(&LogRecord::Truncate {
            type_name: TypeName::from("Item"),
        })
        .unwrap();
        drop(log);

        let records = replay(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], LogRecord::Put { .. }));
        assert!(matches!(records[1], LogRecord::Truncate { .. }));
    }

    #[test]
    fn replaying_a_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let records = replay(dir.path().join("nope")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn a_truncated_trailing_frame_is_dropped_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txlog");

        let mut log = TransactionLog::open(&path).unwrap();
        log.append(&LogRecord::Truncate {
            type_name: TypeName::from("Item"),
        })
        .unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 2);
        std::fs::write(&path, &bytes).unwrap();

        let records = replay(&path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn a_corrupted_frame_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txlog");

        let mut log = TransactionLog::open(&path).unwrap();
        log.append(&LogRecord::Truncate {
            type_name: TypeName::from("Item"),
        })
        .unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(replay(&path).is_err());
    }
}
