//! File paths dictionary
//!
//! Interns file paths of one unit to small integers so that records can refer
//! to a file by index instead of repeating its full path.

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::stream::{
    read_value_list, write_value_list, PersistentFactory, RecordInput, RecordOutput,
    SelfPersistent,
};

/// Format version of the persisted dictionary
pub const DICTIONARY_VERSION: u32 = 1;

/// Bidirectional path ↔ index table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePathsDictionary {
    paths: Vec<String>,
    ids: HashMap<String, u32>,
}

impl FilePathsDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from paths listed in index order
    pub fn from_paths(paths: Vec<String>) -> Result<Self> {
        let mut ids = HashMap::with_capacity(paths.len());
        for (idx, path) in paths.iter().enumerate() {
            if ids.insert(path.clone(), idx as u32).is_some() {
                return Err(StoreError::Corruption(format!(
                    "duplicate path in dictionary: {}",
                    path
                )));
            }
        }
        Ok(Self { paths, ids })
    }

    /// Index of `path`, interning it if unseen
    pub fn file_id(&mut self, path: &str) -> u32 {
        if let Some(&id) = self.ids.get(path) {
            return id;
        }
        let id = self.paths.len() as u32;
        self.paths.push(path.to_string());
        self.ids.insert(path.to_string(), id);
        id
    }

    /// Index of `path` without interning
    pub fn lookup(&self, path: &str) -> Option<u32> {
        self.ids.get(path).copied()
    }

    pub fn file_name(&self, idx: u32) -> Option<&str> {
        self.paths.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl SelfPersistent for FilePathsDictionary {
    fn write(&self, out: &mut RecordOutput) -> Result<()> {
        out.write_u32(DICTIONARY_VERSION);
        write_value_list(out, self.paths.iter().map(String::as_str))
    }
}

/// Reads and writes [`FilePathsDictionary`] records
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePathsDictionaryFactory;

impl PersistentFactory for FilePathsDictionaryFactory {
    type Item = FilePathsDictionary;

    fn write(&self, item: &FilePathsDictionary, out: &mut RecordOutput) -> Result<()> {
        item.write(out)
    }

    fn read(&self, input: &mut RecordInput) -> Result<FilePathsDictionary> {
        let version = input.read_u32()?;
        if version != DICTIONARY_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported dictionary version {}",
                version
            )));
        }
        FilePathsDictionary::from_paths(read_value_list(input)?)
    }
}
