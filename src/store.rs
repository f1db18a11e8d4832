//! The public façade: coordinates the [`Log`], the [`KeyDir`], the segment
//! LRU, and the background [`Merger`] behind one lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::keydir::{Entry, KeyDir};
use crate::log::Log;
use crate::lru::SegmentLru;
use crate::merger::{AtomicActiveId, MergeTarget, Merger};
use crate::options::StoreOptions;
use crate::segment::{segment_path, Segment};

/// The KeyDir and the Log's active-segment reference, behind the single
/// lock spec.md §5 requires: `Store::write`/`Store::delete` take the write
/// guard, `Store::read` the read guard, and the merger takes the write
/// guard for the duration of one compaction pass. All three share this
/// exact lock, not independent ones, so the merger can never observe (or
/// race against) a KeyDir update that hasn't also moved the active segment
/// forward, or vice versa.
pub(crate) struct StoreState {
    pub(crate) key_dir: KeyDir,
    pub(crate) log: Log,
}

/// An open key/value store.
///
/// Cloning is not supported; a `Store` owns the background merger thread
/// and the active segment's file handle. `Open` one per directory and
/// share it behind an `Arc` if multiple threads need it — every operation
/// takes `&self`.
pub struct Store {
    target: Arc<MergeTarget>,
    merger: Merger,
}

impl Store {
    /// Opens (or creates) a store rooted at `path`, using the default
    /// tuning in [`StoreOptions::default`].
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        Store::open_with_options(path, StoreOptions::default())
    }

    /// Opens (or creates) a store rooted at `path` with explicit tuning.
    /// Ensures `db/` and `hint/` exist, reloads the KeyDir from the latest
    /// hint file if one exists, opens a fresh active segment, and starts
    /// the background merger.
    pub fn open_with_options(path: impl AsRef<Path>, options: StoreOptions) -> Result<Store> {
        let root: PathBuf = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let (key_dir, hint_id) = KeyDir::load(&root)?;
        if let Some(id) = hint_id {
            if !segment_path(&root, id).exists() {
                return Err(Error::Corrupted(format!(
                    "hint file {id} has no matching segment under db/"
                )));
            }
        }

        let log = Log::open(&root, options.roll_threshold)?;
        let active_id = log.active_id();

        let state = Arc::new(RwLock::new(StoreState { key_dir, log }));
        let lru = Mutex::new(SegmentLru::new(options.lru_capacity));
        let target = Arc::new(MergeTarget {
            root,
            state,
            lru,
            active_id: AtomicActiveId::new(active_id),
        });

        let merger = Merger::spawn(target.clone(), options.merge_interval);

        Ok(Store { target, merger })
    }

    /// Appends a record for `key`/`value` and updates the KeyDir. Fails
    /// with `InvalidKeySize`/`InvalidValueSize` without writing any bytes
    /// or touching the KeyDir if the sizes exceed the limits of §3.
    pub fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let tstamp = now_micros();
        let mut state = self.target.state.write();
        let (file_id, offset, record) = state.log.write(tstamp, key.to_vec(), value.to_vec())?;
        let entry = Entry {
            tstamp,
            file_id,
            offset,
            value_size: record.value.len() as u32,
        };
        state.key_dir.add_entry(key.to_vec(), entry);
        self.target.active_id.set(state.log.active_id());
        Ok(())
    }

    /// Equivalent to `write(key, &[])`: a subsequent `read` returns
    /// `NotFound` until the key is written again. No existence check is
    /// performed; deleting an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(key, &[])
    }

    /// Returns the current value for `key`, or `NotFound` if the key is
    /// absent or tombstoned. Fails with `Corrupted` if the on-disk record
    /// cannot be decoded or its checksum doesn't match.
    ///
    /// Holds the state read guard for the whole call, including the sealed
    /// segment path: dropping it early would let a concurrent merge rewrite
    /// and unlink the very segment this read is about to open, turning a
    /// live key into a spurious `Io`/`Corrupted` error. The LRU is a
    /// separate lock the merger only takes after releasing the state lock,
    /// so holding both here in that order cannot deadlock against it.
    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        let state = self.target.state.read();
        let entry = state.key_dir.get(key).ok_or(Error::NotFound)?;
        if entry.is_tombstone() {
            return Err(Error::NotFound);
        }

        if entry.file_id == state.log.active_id() {
            return state
                .log
                .read_value_checked(entry.offset, key.len() as u32, entry.value_size);
        }

        self.read_sealed(entry.file_id, entry.offset, key.len() as u32, entry.value_size)
    }

    /// Reads a value from a sealed (non-active) segment, going through the
    /// segment LRU to bound how many file descriptors stay open. Callers
    /// must hold the state read guard across this call (see `read`).
    fn read_sealed(&self, file_id: u64, offset: u64, key_len: u32, value_size: u32) -> Result<Vec<u8>> {
        let mut lru = self.target.lru.lock().unwrap();
        if let Some(segment) = lru.get(file_id) {
            return segment.read_value_checked(offset, key_len, value_size);
        }
        let segment = Segment::open_reader(self.target.root.clone(), file_id)?;
        let value = segment.read_value_checked(offset, key_len, value_size)?;
        lru.add(file_id, segment);
        Ok(value)
    }

    /// Flushes the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.target.state.read().log.sync()
    }

    /// Stops the background merger, runs a final merge pass that folds the
    /// active segment in too, and closes the store. After this call every
    /// live key is captured by exactly one hint file (the final merge's
    /// own), so a later `Store::open` on the same directory recovers the
    /// same state without needing a separate persist step.
    pub fn close(mut self) -> Result<()> {
        self.merger.stop_and_join();
        self.target.state.read().log.sync()?;
        Ok(())
    }
}

impl Drop for Store {
    /// Stops the merger thread if `close` was never called explicitly, so
    /// a dropped `Store` never leaks a background thread. `Merger::stop_and_join`
    /// is idempotent (its `JoinHandle` is taken once), so this is a no-op
    /// when `close` already ran it.
    fn drop(&mut self) {
        self.merger.stop_and_join();
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as i64
}
