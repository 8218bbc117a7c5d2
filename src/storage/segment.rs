//! Segment
//!
//! Append-only record file of one unit with an in-memory index.
//!
//! ## Entry Format
//! ```text
//! ┌─────────┬─────────────┬─────────────┬─────┬───────┐
//! │ CRC (4) │ KeyLen (4)  │ ValLen (4)  │ Key │ Value │
//! └─────────┴─────────────┴─────────────┴─────┴───────┘
//! ValLen = u32::MAX marks a tombstone (no value bytes)
//! CRC covers KeyLen, ValLen, Key and Value
//! ```
//!
//! A later entry for the same key supersedes earlier ones; superseded entries
//! are dead bytes until the segment is compacted.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::SyncPolicy;
use crate::error::{Result, StoreError};

/// Sentinel value length indicating a tombstone
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// CRC (4) + KeyLen (4) + ValLen (4)
const ENTRY_HEADER_SIZE: u64 = 12;

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    /// Start of the entry header
    offset: u64,
    key_len: u32,
    /// `TOMBSTONE_MARKER` for tombstones
    val_len: u32,
}

impl IndexEntry {
    fn is_tombstone(&self) -> bool {
        self.val_len == TOMBSTONE_MARKER
    }

    fn size(&self) -> u64 {
        let value = if self.is_tombstone() { 0 } else { self.val_len as u64 };
        ENTRY_HEADER_SIZE + self.key_len as u64 + value
    }

    fn value_offset(&self) -> u64 {
        self.offset + ENTRY_HEADER_SIZE + self.key_len as u64
    }
}

/// Outcome of a segment lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRead {
    /// Key never written here
    Missing,
    /// Key removed here; lower layers must not be consulted
    Deleted,
    Value(Bytes),
}

/// One unit's record file
pub struct Segment {
    path: PathBuf,
    file: File,
    index: HashMap<Vec<u8>, IndexEntry>,
    /// Tombstones are kept (and count as live) when lower layers exist
    keep_tombstones: bool,
    writable: bool,
    sync_policy: SyncPolicy,
    total_bytes: u64,
    live_bytes: u64,
    unsynced: bool,
}

impl Segment {
    /// Open or create a segment, rebuilding its index
    ///
    /// A torn or corrupted tail is cut off (writable segments) or ignored
    /// (read-only segments).
    pub fn open(
        path: &Path,
        writable: bool,
        keep_tombstones: bool,
        sync_policy: SyncPolicy,
    ) -> Result<Self> {
        let file = if writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?
        } else {
            File::open(path)?
        };
        let file_len = file.metadata()?.len();

        let mut segment = Self {
            path: path.to_path_buf(),
            file,
            index: HashMap::new(),
            keep_tombstones,
            writable,
            sync_policy,
            total_bytes: 0,
            live_bytes: 0,
            unsynced: false,
        };

        let (entries, valid_end) = scan(&segment.file, file_len)?;
        for (key, entry) in entries {
            segment.apply(key, entry);
        }
        if valid_end < file_len {
            tracing::warn!(
                path = %path.display(),
                valid_end,
                file_len,
                "segment has a damaged tail"
            );
            if writable {
                segment.file.set_len(valid_end)?;
                segment.file.sync_all()?;
            }
        }
        segment.total_bytes = valid_end;

        Ok(segment)
    }

    /// Install `entry` as the newest version of `key`, keeping byte counts
    fn apply(&mut self, key: Vec<u8>, entry: IndexEntry) {
        if let Some(old) = self.index.remove(&key) {
            self.live_bytes -= old.size();
        }
        if entry.is_tombstone() && !self.keep_tombstones {
            return;
        }
        self.live_bytes += entry.size();
        self.index.insert(key, entry);
    }

    /// Look up the newest version of `key`
    pub fn get(&mut self, key: &[u8]) -> Result<SegmentRead> {
        let entry = match self.index.get(key) {
            Some(entry) => *entry,
            None => return Ok(SegmentRead::Missing),
        };
        if entry.is_tombstone() {
            return Ok(SegmentRead::Deleted);
        }

        let mut value = vec![0u8; entry.val_len as usize];
        self.file.seek(SeekFrom::Start(entry.value_offset()))?;
        self.file.read_exact(&mut value)?;
        Ok(SegmentRead::Value(Bytes::from(value)))
    }

    /// Append a new version of `key`
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.len() >= TOMBSTONE_MARKER as usize {
            return Err(StoreError::Storage(format!(
                "record of {} bytes is too large",
                value.len()
            )));
        }
        self.append(key, Some(value))
    }

    /// Append a tombstone for `key`
    ///
    /// Skipped when nothing here or below could still answer for the key.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        match self.index.get(key) {
            Some(entry) if entry.is_tombstone() => Ok(()),
            None if !self.keep_tombstones => Ok(()),
            _ => self.append(key, None),
        }
    }

    fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if !self.writable {
            return Err(StoreError::Storage(format!(
                "segment {} is read-only",
                self.path.display()
            )));
        }
        let key_len = u32::try_from(key.len())
            .map_err(|_| StoreError::Storage("record key too long".to_string()))?;
        let val_len = match value {
            Some(v) => v.len() as u32,
            None => TOMBSTONE_MARKER,
        };

        let mut lens = [0u8; 8];
        lens[..4].copy_from_slice(&key_len.to_le_bytes());
        lens[4..].copy_from_slice(&val_len.to_le_bytes());
        let value = value.unwrap_or(&[]);
        let crc = entry_crc(&lens, key, value);

        let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE as usize + key.len() + value.len());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&lens);
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);

        self.file.seek(SeekFrom::Start(self.total_bytes))?;
        self.file.write_all(&buf)?;

        let entry = IndexEntry {
            offset: self.total_bytes,
            key_len,
            val_len,
        };
        self.total_bytes += entry.size();
        self.apply(key.to_vec(), entry);

        self.unsynced = true;
        if self.sync_policy == SyncPolicy::EveryWrite {
            self.sync()?;
        }
        Ok(())
    }

    /// Rewrite the segment with live entries only
    pub fn compact(&mut self) -> Result<()> {
        if !self.writable || self.dead_bytes() == 0 {
            return Ok(());
        }

        let mut entries: Vec<(Vec<u8>, IndexEntry)> =
            self.index.iter().map(|(k, e)| (k.clone(), *e)).collect();
        entries.sort_by_key(|(_, e)| e.offset);

        let tmp_path = self.path.with_extension("seg.tmp");
        let tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(tmp);

        let mut index = HashMap::with_capacity(entries.len());
        let mut offset = 0u64;
        let mut raw = Vec::new();
        for (key, entry) in entries {
            raw.resize(entry.size() as usize, 0);
            self.file.seek(SeekFrom::Start(entry.offset))?;
            self.file.read_exact(&mut raw)?;
            writer.write_all(&raw)?;

            index.insert(key, IndexEntry { offset, ..entry });
            offset += entry.size();
        }

        let tmp = writer
            .into_inner()
            .map_err(|e| StoreError::Storage(format!("Failed to flush compacted segment: {}", e)))?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.index = index;
        self.total_bytes = offset;
        self.live_bytes = offset;
        self.unsynced = false;
        Ok(())
    }

    /// fsync pending appends
    pub fn sync(&mut self) -> Result<()> {
        if self.unsynced {
            self.file.sync_data()?;
            self.unsynced = false;
        }
        Ok(())
    }

    /// Number of live keys (tombstones included when kept)
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn dead_bytes(&self) -> u64 {
        self.total_bytes - self.live_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read entries from the start, stopping at the first invalid one.
/// Returns the entries in file order and the offset just past the last valid one.
fn scan(file: &File, file_len: u64) -> Result<(Vec<(Vec<u8>, IndexEntry)>, u64)> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;
    let mut entries = Vec::new();
    let mut offset = 0u64;

    loop {
        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        if !read_full(&mut reader, &mut header)? {
            break;
        }
        let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let key_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let val_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let entry = IndexEntry {
            offset,
            key_len,
            val_len,
        };
        // lengths from a torn header can point past the end of the file
        if offset + entry.size() > file_len {
            break;
        }

        let mut key = vec![0u8; key_len as usize];
        if !read_full(&mut reader, &mut key)? {
            break;
        }
        let mut value = Vec::new();
        if !entry.is_tombstone() {
            value.resize(val_len as usize, 0);
            if !read_full(&mut reader, &mut value)? {
                break;
            }
        }

        if entry_crc(&header[4..], &key, &value) != crc {
            break;
        }

        offset += entry.size();
        entries.push((key, entry));
    }

    Ok((entries, offset))
}

fn entry_crc(lens: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(lens);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// `read_exact` that reports a short read as `false` instead of an error
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
