//! The in-memory index from key to the location of its newest record.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::record::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::segment::{data_dir, hint_dir, hint_path};

/// Fixed header size of one hint record: tstamp(8) + key_size(4) +
/// value_size(4) + offset(8).
const HINT_HEADER_SIZE: usize = 24;

/// The location and size of a key's newest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub tstamp: i64,
    pub file_id: u64,
    pub offset: u64,
    pub value_size: u32,
}

impl Entry {
    /// A tombstoned entry has `value_size == 0`; `Read` treats this as
    /// "not found".
    pub fn is_tombstone(&self) -> bool {
        self.value_size == 0
    }
}

/// The in-memory key-to-location mapping. Exactly one entry per key;
/// inserts overwrite. The entire mapping is process-resident.
#[derive(Default)]
pub struct KeyDir {
    entries: HashMap<Vec<u8>, Entry>,
}

impl KeyDir {
    /// An empty key directory.
    pub fn new() -> KeyDir {
        KeyDir {
            entries: HashMap::new(),
        }
    }

    /// Inserts or overwrites the entry for `key`, stamping it with the
    /// current wall-clock time, and returns the stored entry.
    pub fn add(&mut self, key: Vec<u8>, file_id: u64, offset: u64, value_size: u32) -> Entry {
        let tstamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_micros() as i64;
        let entry = Entry {
            tstamp,
            file_id,
            offset,
            value_size,
        };
        self.entries.insert(key, entry);
        entry
    }

    /// Inserts an entry with an explicit timestamp, used when replaying a
    /// hint file or rewriting entries during merge (the original record's
    /// timestamp is preserved, not the insertion time).
    pub(crate) fn add_entry(&mut self, key: Vec<u8>, entry: Entry) {
        self.entries.insert(key, entry);
    }

    /// Looks up the current entry for `key`.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.entries.get(key).copied()
    }

    /// Removes a key's entry entirely (used by merge once a tombstone's
    /// older versions have all been compacted away). Not part of the
    /// public `Store` surface.
    pub(crate) fn remove(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }

    /// Number of keys currently tracked, live or tombstoned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over every `(key, entry)` pair. Iteration order is
    /// unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Entry)> {
        self.entries.iter()
    }

    /// Writes one hint record per live key to `writer`.
    ///
    /// ```text
    /// tstamp(8) | key_size(4) | value_size(4) | offset(8) | key
    /// ```
    pub fn persist<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (key, entry) in self.entries.iter() {
            let mut header = [0u8; HINT_HEADER_SIZE];
            LittleEndian::write_i64(&mut header[0..8], entry.tstamp);
            LittleEndian::write_u32(&mut header[8..12], key.len() as u32);
            LittleEndian::write_u32(&mut header[12..16], entry.value_size);
            LittleEndian::write_u64(&mut header[16..24], entry.offset);
            writer.write_all(&header)?;
            writer.write_all(key)?;
        }
        Ok(())
    }

    /// Locates the newest hint file under `hint/` (the lexicographically,
    /// i.e. numerically, greatest id whose name parses as a `u64`) and
    /// replays it into a fresh `KeyDir`. If no hint file exists, returns an
    /// empty `KeyDir` and `None`. The returned id, if any, is the merged
    /// segment id every replayed entry's `file_id` is set to.
    ///
    /// Per the fix to the source's drifting-id ambiguity: the caller is
    /// expected to verify that a segment with this id still exists under
    /// `db/`, failing `Open` with `Corrupted` otherwise.
    pub fn load(root: &Path) -> Result<(KeyDir, Option<u64>)> {
        let hints = hint_dir(root);
        fs::create_dir_all(&hints)?;
        fs::create_dir_all(data_dir(root))?;

        let mut newest: Option<u64> = None;
        for entry in fs::read_dir(&hints)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                if newest.map_or(true, |current| id > current) {
                    newest = Some(id);
                }
            }
        }

        let mut key_dir = KeyDir::new();
        let Some(hint_id) = newest else {
            return Ok((key_dir, None));
        };

        let file = File::open(hint_path(root, hint_id))?;
        let mut reader = BufReader::new(file);
        loop {
            let mut header = [0u8; HINT_HEADER_SIZE];
            match read_exact_or_eof(&mut reader, &mut header)? {
                false => break,
                true => {}
            }
            let tstamp = LittleEndian::read_i64(&header[0..8]);
            let key_size = LittleEndian::read_u32(&header[8..12]);
            let value_size = LittleEndian::read_u32(&header[12..16]);
            let offset = LittleEndian::read_u64(&header[16..24]);

            if key_size as usize > MAX_KEY_SIZE {
                return Err(Error::Corrupted(format!(
                    "hint file {hint_id}: key size {key_size} exceeds limit"
                )));
            }
            if value_size as usize > MAX_VALUE_SIZE {
                return Err(Error::Corrupted(format!(
                    "hint file {hint_id}: value size {value_size} exceeds limit"
                )));
            }

            let mut key = vec![0u8; key_size as usize];
            reader
                .read_exact(&mut key)
                .map_err(|_| Error::Corrupted(format!("hint file {hint_id}: truncated record")))?;

            key_dir.add_entry(
                key,
                Entry {
                    tstamp,
                    file_id: hint_id,
                    offset,
                    value_size,
                },
            );
        }

        Ok((key_dir, Some(hint_id)))
    }
}

/// A buffered hint-file writer used by the merger.
pub(crate) struct HintWriter {
    writer: BufWriter<File>,
}

impl HintWriter {
    pub(crate) fn create(root: &Path, id: u64) -> Result<HintWriter> {
        fs::create_dir_all(hint_dir(root))?;
        let file = File::create(hint_path(root, id))?;
        Ok(HintWriter {
            writer: BufWriter::new(file),
        })
    }

    pub(crate) fn write_entry(&mut self, key: &[u8], entry: &Entry) -> Result<()> {
        let mut header = [0u8; HINT_HEADER_SIZE];
        LittleEndian::write_i64(&mut header[0..8], entry.tstamp);
        LittleEndian::write_u32(&mut header[8..12], key.len() as u32);
        LittleEndian::write_u32(&mut header[12..16], entry.value_size);
        LittleEndian::write_u64(&mut header[16..24], entry.offset);
        self.writer.write_all(&header)?;
        self.writer.write_all(key)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(Error::Corrupted("truncated hint record".to_string()));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
