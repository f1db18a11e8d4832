//! The background compaction pass.
//!
//! Runs on a fixed cadence (default 500 ms) as long as the store is open,
//! rewriting live records from sealed segments into one fresh segment,
//! updating the key directory in place, and persisting a matching hint
//! file. See `spec.md` §4.6 for the full step-by-step algorithm this
//! module implements verbatim.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::keydir::HintWriter;
use crate::lru::SegmentLru;
use crate::segment::{data_dir, new_segment_id, Segment};
use crate::store::StoreState;

/// Default merge cadence, per spec.
pub const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_millis(500);

/// State shared between `Store` and the background merger thread.
///
/// `state` is the literal same lock `Store` reads and writes through: it
/// guards the key directory and the log's active-segment reference as one
/// unit, and the merger holds it for the entire rewrite loop. `lru` is a
/// separate lock, since the segment handle cache is an optimization, not
/// part of the correctness invariant the single state lock protects.
pub(crate) struct MergeTarget {
    pub(crate) root: PathBuf,
    pub(crate) state: Arc<RwLock<StoreState>>,
    pub(crate) lru: Mutex<SegmentLru>,
    pub(crate) active_id: AtomicActiveId,
}

/// Lock-free snapshot of the active segment's id, read by the merger to
/// know which segment to exclude without taking the write lock.
pub(crate) struct AtomicActiveId(std::sync::atomic::AtomicU64);

impl AtomicActiveId {
    pub(crate) fn new(id: u64) -> AtomicActiveId {
        AtomicActiveId(std::sync::atomic::AtomicU64::new(id))
    }

    pub(crate) fn set(&self, id: u64) {
        self.0.store(id, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to the running background merger thread.
pub struct Merger {
    stop: Arc<AtomicBool>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Merger {
    /// Spawns the background merger thread. `interval` is the tick cadence;
    /// `target` is the shared state it compacts against.
    pub(crate) fn spawn(target: Arc<MergeTarget>, interval: Duration) -> Merger {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new((Mutex::new(false), Condvar::new()));

        let thread_stop = stop.clone();
        let thread_wake = wake.clone();
        let handle = std::thread::spawn(move || {
            loop {
                {
                    let (lock, cvar) = &*thread_wake;
                    let mut woken = lock.lock().unwrap();
                    while !*woken && !thread_stop.load(Ordering::SeqCst) {
                        let (guard, timeout) = cvar.wait_timeout(woken, interval).unwrap();
                        woken = guard;
                        if timeout.timed_out() {
                            break;
                        }
                    }
                    *woken = false;
                }

                if thread_stop.load(Ordering::SeqCst) {
                    if let Err(e) = run_merge(&target, true) {
                        warn!(error = %e, "final merge pass failed");
                    }
                    break;
                }

                if let Err(e) = run_merge(&target, false) {
                    warn!(error = %e, "merge pass failed");
                }
            }
        });

        Merger {
            stop,
            wake,
            handle: Some(handle),
        }
    }

    /// Signals the merger to stop, runs one final merge that includes the
    /// active segment, and blocks until the background thread has exited.
    pub(crate) fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.wake;
        {
            let mut woken = lock.lock().unwrap();
            *woken = true;
        }
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Runs one compaction pass. `final_pass` includes the active segment as a
/// merge candidate (used only from `Store::close`); a routine tick excludes
/// it, per spec.md §4.6 step 2.
fn run_merge(target: &MergeTarget, final_pass: bool) -> Result<()> {
    let mut segment_ids = list_segment_ids(&target.root)?;
    segment_ids.sort_unstable();

    let active_id = target.active_id.get();
    if !final_pass {
        segment_ids.retain(|id| *id != active_id);
    }

    if segment_ids.len() < 2 && !final_pass {
        return Ok(());
    }
    if segment_ids.is_empty() {
        return Ok(());
    }

    let merged_id = new_segment_id();
    debug!(candidates = segment_ids.len(), merged_id, "starting merge pass");

    let mut merged_segment = Segment::create_with_id(target.root.clone(), merged_id)?;
    let mut hint_writer = HintWriter::create(&target.root, merged_id)?;

    // Hold the write lock for the entire pass: spec.md §5 trades write
    // availability for a simple, race-free compaction. This is the same
    // lock `Store::write`/`Store::read` take, so the key directory can
    // never observe a half-rewritten state.
    let mut state = target.state.write();

    let mut rewritten = 0u64;
    for segment_id in &segment_ids {
        let mut source = match Segment::open_reader(target.root.clone(), *segment_id) {
            Ok(segment) => segment,
            Err(e) => {
                warn!(segment_id, error = %e, "skipping unreadable segment during merge");
                continue;
            }
        };

        loop {
            let next = match source.read_record() {
                Ok(Some(pair)) => pair,
                Ok(None) => break,
                Err(e) => {
                    warn!(segment_id, error = %e, "skipping undecodable record during merge");
                    break;
                }
            };
            let (record, _source_offset) = next;

            let Some(entry) = state.key_dir.get(&record.key) else {
                continue; // deleted after this record was written
            };
            if entry.file_id != *segment_id {
                continue; // superseded by a newer version
            }
            if entry.is_tombstone() {
                // This is the newest version of the key and it's dead; once
                // its segment is gone there is nothing left to point at, so
                // the entry itself can be dropped instead of carried forward.
                state.key_dir.remove(&record.key);
                continue;
            }

            let new_offset = merged_segment.append(&record)?;
            let new_entry = crate::keydir::Entry {
                tstamp: record.tstamp,
                file_id: merged_id,
                offset: new_offset,
                value_size: record.value.len() as u32,
            };
            hint_writer.write_entry(&record.key, &new_entry)?;
            state.key_dir.add_entry(record.key.clone(), new_entry);
            rewritten += 1;
        }
    }

    hint_writer.flush()?;
    merged_segment.sync()?;
    drop(merged_segment);
    drop(state);

    let mut removed = 0u64;
    for segment_id in &segment_ids {
        if Segment::remove_by_id(&target.root, *segment_id).is_ok() {
            removed += 1;
        }
    }

    target.lru.lock().unwrap().reset();

    debug!(rewritten, removed, merged_id, "merge pass complete");
    Ok(())
}

fn list_segment_ids(root: &Path) -> Result<Vec<u64>> {
    let dir = data_dir(root);
    fs::create_dir_all(&dir)?;
    let mut ids = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    Ok(ids)
}
