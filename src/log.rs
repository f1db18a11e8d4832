//! The active-segment façade: routes writes to the current segment and
//! rolls to a new one when a size threshold is crossed.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::record::Record;
use crate::segment::Segment;

/// A write that would push the active segment's size to or past this many
/// bytes instead rolls to a fresh segment first. `4 << 16` = 262,144 bytes.
/// This is a fixed design constant, not tunable through the public API.
pub const ROLL_THRESHOLD: u64 = 4 << 16;

/// Owns exactly one active (appendable) segment and rolls it over as it
/// fills up.
pub struct Log {
    root: PathBuf,
    active: Segment,
    roll_threshold: u64,
}

impl Log {
    /// Opens a log rooted at `root`, creating a brand-new active segment.
    pub fn open(root: impl Into<PathBuf>, roll_threshold: u64) -> Result<Log> {
        let root = root.into();
        let active = Segment::create_new(&root)?;
        Ok(Log {
            root,
            active,
            roll_threshold,
        })
    }

    /// The id of the currently active segment.
    pub fn active_id(&self) -> u64 {
        self.active.id()
    }

    /// Current size in bytes of the active segment.
    pub fn active_size(&self) -> u64 {
        self.active.size()
    }

    /// Appends `key`/`value` to the active segment, rolling to a fresh
    /// segment first if the write would cross the configured roll
    /// threshold. Returns the active segment's id and the byte offset the
    /// record was written at.
    ///
    /// Validates `key`/`value` against the size bounds (via `Record::new`)
    /// before even considering a roll: an oversized value always exceeds
    /// the roll threshold, so checking the bounds second would seal the
    /// active segment and create a fresh one before reporting the error,
    /// mutating on-disk state for a write that must leave none.
    pub fn write(&mut self, tstamp: i64, key: Vec<u8>, value: Vec<u8>) -> Result<(u64, u64, Record)> {
        let record = Record::new(tstamp, key, value)?;
        let total_size = record.encoded_len() as u64;
        if self.active.size() + total_size >= self.roll_threshold {
            self.roll()?;
        }
        let offset = self.active.append(&record)?;
        Ok((self.active.id(), offset, record))
    }

    /// Reads `size` bytes at `offset` from the active segment. Reads
    /// against sealed segments are dispatched elsewhere (through the
    /// segment LRU), not through `Log`.
    pub fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.active.read(offset, size)
    }

    /// Reads and CRC-verifies the value at `offset` in the active segment,
    /// the point-read path `Store::read` uses while holding only the
    /// shared state lock's read guard.
    pub fn read_value_checked(&self, offset: u64, key_len: u32, value_len: u32) -> Result<Vec<u8>> {
        self.active.read_value_checked(offset, key_len, value_len)
    }

    /// Flushes the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.active.sync()
    }

    fn roll(&mut self) -> Result<()> {
        let fresh = Segment::create_new(&self.root)?;
        let sealed = std::mem::replace(&mut self.active, fresh);
        debug!(sealed_id = sealed.id(), new_id = self.active.id(), "rolled log segment");
        sealed.close()?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_from_active_segment() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(dir.path(), ROLL_THRESHOLD).unwrap();
        let (_, offset, record) = log.write(1, b"k".to_vec(), b"v".to_vec()).unwrap();
        let bytes = log.read(offset, record.encoded_len() as u32).unwrap();
        assert_eq!(bytes.len(), record.encoded_len());
    }

    #[test]
    fn rolls_to_new_segment_past_threshold() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(dir.path(), 64).unwrap();
        let first_id = log.active_id();

        log.write(1, b"k".to_vec(), vec![0u8; 128]).unwrap();

        assert_ne!(log.active_id(), first_id);
    }

    #[test]
    fn oversized_value_fails_without_rolling_or_appending() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(dir.path(), 64).unwrap();
        let first_id = log.active_id();

        let huge_value = vec![0u8; crate::record::MAX_VALUE_SIZE + 1];
        let err = log.write(1, b"k".to_vec(), huge_value).unwrap_err();

        assert!(matches!(err, crate::error::Error::InvalidValueSize));
        assert_eq!(log.active_id(), first_id);
        assert_eq!(log.active_size(), 0);
    }
}
