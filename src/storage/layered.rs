//! Layered Storage
//!
//! Default [`Storage`]: one directory per layer. The first layer receives all
//! writes; further layers are read-only fallbacks consulted by unit name when
//! the first layer has no entry for a record.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{Config, SyncPolicy};
use crate::dictionary::{FilePathsDictionary, FilePathsDictionaryFactory};
use crate::error::{Result, StoreError};
use crate::key::{Key, UnitDescriptor};
use crate::layer::LayerDescriptor;
use crate::stream::{PersistentFactory, RecordInput, RecordOutput, SelfPersistent};
use crate::units::{UnitsConverter, DENOM};

use super::segment::{Segment, SegmentRead};
use super::{Storage, StorageFactory};

const INDEX_FILENAME: &str = "layer.idx";
const FILE_URI_PREFIX: &str = "file://";

// =============================================================================
// Persisted Unit Table
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct LayerIndex {
    persist_version: u32,
    next_local_id: i32,
    units: Vec<UnitEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitEntry {
    local_id: i32,
    name: String,
}

struct DictionaryState {
    dictionary: FilePathsDictionary,
    dirty: bool,
}

// =============================================================================
// Layer
// =============================================================================

/// One backing directory
struct Layer {
    dir: PathBuf,
    writable: bool,
    keep_tombstones: bool,
    sync_policy: SyncPolicy,
    persist_version: u32,
    units_by_name: HashMap<String, i32>,
    names: BTreeMap<i32, String>,
    next_local_id: i32,
    /// Segments loaded this session, by local unit ID
    segments: HashMap<i32, Segment>,
    dictionaries: HashMap<i32, DictionaryState>,
}

impl Layer {
    fn open(dir: PathBuf, writable: bool, keep_tombstones: bool, config: &Config) -> Result<Self> {
        let mut layer = Self {
            dir,
            writable,
            keep_tombstones,
            sync_policy: config.sync_policy,
            persist_version: config.persist_mechanism_version,
            units_by_name: HashMap::new(),
            names: BTreeMap::new(),
            next_local_id: 0,
            segments: HashMap::new(),
            dictionaries: HashMap::new(),
        };

        if writable {
            fs::create_dir_all(&layer.dir)?;
        }

        let index_path = layer.dir.join(INDEX_FILENAME);
        if !index_path.exists() {
            return Ok(layer);
        }

        let loaded = fs::read(&index_path)
            .map_err(StoreError::from)
            .and_then(|raw| bincode::deserialize::<LayerIndex>(&raw).map_err(StoreError::from));
        match loaded {
            Ok(index) if index.persist_version == layer.persist_version => {
                layer.next_local_id = index.next_local_id;
                for unit in index.units {
                    layer.units_by_name.insert(unit.name.clone(), unit.local_id);
                    layer.names.insert(unit.local_id, unit.name);
                }
            }
            Ok(index) => {
                tracing::warn!(
                    dir = %layer.dir.display(),
                    found = index.persist_version,
                    expected = layer.persist_version,
                    "discarding layer written by another persist mechanism version"
                );
                layer.discard_files()?;
            }
            Err(e) => {
                tracing::warn!(dir = %layer.dir.display(), error = %e, "discarding unreadable layer index");
                layer.discard_files()?;
            }
        }

        Ok(layer)
    }

    /// Remove every file this layer owns (writable layers only)
    fn discard_files(&self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_layer_file(&path) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn local_id(&self, name: &str) -> Option<i32> {
        self.units_by_name.get(name).copied()
    }

    fn assign(&mut self, name: &str, storage_id: i32) -> Result<i32> {
        if let Some(id) = self.local_id(name) {
            return Ok(id);
        }
        if self.next_local_id >= DENOM {
            return Err(StoreError::UnitCapacityExceeded { storage_id });
        }
        let id = self.next_local_id;
        self.next_local_id += 1;
        self.units_by_name.insert(name.to_string(), id);
        self.names.insert(id, name.to_string());

        if self.writable {
            // leftovers of a unit that never made it into the index
            remove_if_exists(&self.segment_path(id))?;
            remove_if_exists(&self.dictionary_path(id))?;
            self.write_index()?;
        }
        Ok(id)
    }

    /// Atomically replace the unit table on disk
    fn write_index(&self) -> Result<()> {
        let index = LayerIndex {
            persist_version: self.persist_version,
            next_local_id: self.next_local_id,
            units: self
                .names
                .iter()
                .map(|(&local_id, name)| UnitEntry {
                    local_id,
                    name: name.clone(),
                })
                .collect(),
        };
        let raw = bincode::serialize(&index)?;
        write_atomically(&self.dir.join(INDEX_FILENAME), &raw)
    }

    fn segment_path(&self, local_id: i32) -> PathBuf {
        unit_path(&self.dir, local_id, "seg")
    }

    fn dictionary_path(&self, local_id: i32) -> PathBuf {
        unit_path(&self.dir, local_id, "dict")
    }

    /// Loaded segment of a unit; `None` when there is no segment file and
    /// `create` is off or the layer is read-only
    fn segment(&mut self, local_id: i32, create: bool) -> Result<Option<&mut Segment>> {
        if !self.segments.contains_key(&local_id) {
            let path = self.segment_path(local_id);
            if !(create && self.writable) && !path.exists() {
                return Ok(None);
            }
            let segment = Segment::open(&path, self.writable, self.keep_tombstones, self.sync_policy)?;
            self.segments.insert(local_id, segment);
        }
        Ok(self.segments.get_mut(&local_id))
    }

    fn dictionary(&mut self, local_id: i32) -> Result<&mut DictionaryState> {
        if !self.dictionaries.contains_key(&local_id) {
            let path = self.dictionary_path(local_id);
            let dictionary = if path.exists() {
                read_dictionary(&path)?
            } else {
                FilePathsDictionary::new()
            };
            self.dictionaries.insert(
                local_id,
                DictionaryState {
                    dictionary,
                    dirty: false,
                },
            );
        }
        self.dictionaries
            .get_mut(&local_id)
            .ok_or_else(|| StoreError::Storage(format!("dictionary {} not loaded", local_id)))
    }

    /// Persist state of one unit and release its handles
    fn release_unit(&mut self, local_id: i32) -> Result<()> {
        if let Some(mut segment) = self.segments.remove(&local_id) {
            segment.sync()?;
        }
        if let Some(state) = self.dictionaries.remove(&local_id) {
            if state.dirty && self.writable {
                write_dictionary(&self.dictionary_path(local_id), &state.dictionary)?;
            }
        }
        Ok(())
    }

    /// Drop a unit's records and dictionary; the ID stays assigned
    fn clear_unit(&mut self, local_id: i32) -> Result<()> {
        self.segments.remove(&local_id);
        self.dictionaries.remove(&local_id);
        if self.writable {
            remove_if_exists(&self.segment_path(local_id))?;
            remove_if_exists(&self.dictionary_path(local_id))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        for segment in self.segments.values_mut() {
            segment.sync()?;
        }
        for (&local_id, state) in self.dictionaries.iter_mut() {
            if state.dirty {
                write_dictionary(&unit_path(&self.dir, local_id, "dict"), &state.dictionary)?;
                state.dirty = false;
            }
        }
        self.write_index()
    }
}

// =============================================================================
// LayeredStorage
// =============================================================================

struct Inner {
    /// `layers[0]` takes the writes
    layers: Vec<Layer>,
    open_units: HashSet<i32>,
    shut_down: bool,
}

impl Inner {
    fn check_open(&self) -> Result<()> {
        if self.shut_down {
            return Err(StoreError::ShutDown);
        }
        Ok(())
    }

    fn primary(&mut self) -> &mut Layer {
        &mut self.layers[0]
    }
}

/// Directory-backed storage with ordered fallback layers
pub struct LayeredStorage {
    storage_id: i32,
    descriptors: Vec<LayerDescriptor>,
    converter: UnitsConverter,
    inner: Mutex<Inner>,
}

impl LayeredStorage {
    /// Open (or create) the directories of `layers`
    pub fn open(storage_id: i32, descriptors: Vec<LayerDescriptor>, config: &Config) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(StoreError::Storage(format!(
                "storage {} needs at least one layer",
                storage_id
            )));
        }

        let keep_tombstones = descriptors.len() > 1;
        let mut layers = Vec::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors.iter().enumerate() {
            let writable = position == 0 && descriptor.is_writable();
            let dir = layer_dir(&config.data_dir, descriptor.uri());
            layers.push(Layer::open(dir, writable, keep_tombstones, config)?);
        }

        tracing::debug!(
            storage_id,
            layers = descriptors.len(),
            units = layers[0].names.len(),
            "opened layered storage"
        );

        Ok(Self {
            storage_id,
            descriptors,
            converter: UnitsConverter::new(storage_id),
            inner: Mutex::new(Inner {
                layers,
                open_units: HashSet::new(),
                shut_down: false,
            }),
        })
    }

    /// Units opened through `open_unit` and not closed yet
    pub fn open_unit_count(&self) -> usize {
        self.inner.lock().open_units.len()
    }

    fn local(&self, unit_id: i32) -> i32 {
        self.converter.client_to_layer(unit_id)
    }
}

impl Storage for LayeredStorage {
    fn storage_id(&self) -> i32 {
        self.storage_id
    }

    fn layer_descriptors(&self) -> &[LayerDescriptor] {
        &self.descriptors
    }

    fn converter(&self) -> UnitsConverter {
        self.converter
    }

    fn get_unit_id(&self, unit: &UnitDescriptor) -> Result<i32> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let storage_id = self.storage_id;
        let local = inner.primary().assign(unit.name(), storage_id)?;
        Ok(self.converter.layer_to_client(local))
    }

    fn read(&self, key: &Key) -> Result<Option<Bytes>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(key.unit_id());
        let name = match inner.layers[0].names.get(&local) {
            Some(name) => name.clone(),
            None => return Ok(None),
        };

        for (position, layer) in inner.layers.iter_mut().enumerate() {
            let layer_local = if position == 0 {
                local
            } else {
                match layer.local_id(&name) {
                    Some(id) => id,
                    None => continue,
                }
            };
            let found = match layer.segment(layer_local, false)? {
                Some(segment) => segment.get(key.record())?,
                None => SegmentRead::Missing,
            };
            match found {
                SegmentRead::Value(value) => return Ok(Some(value)),
                SegmentRead::Deleted => return Ok(None),
                SegmentRead::Missing => continue,
            }
        }
        Ok(None)
    }

    fn write(&self, key: &Key, data: Bytes) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(key.unit_id());
        let primary = inner.primary();
        if !primary.names.contains_key(&local) {
            return Err(StoreError::UnknownUnit(key.unit_id()));
        }
        match primary.segment(local, true)? {
            Some(segment) => segment.put(key.record(), &data),
            None => Err(StoreError::Storage(format!(
                "storage {} has no writable layer",
                self.storage_id
            ))),
        }
    }

    fn remove(&self, key: &Key) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(key.unit_id());
        let primary = inner.primary();
        if !primary.writable || !primary.names.contains_key(&local) {
            return Ok(());
        }
        match primary.segment(local, true)? {
            Some(segment) => segment.delete(key.record()),
            None => Ok(()),
        }
    }

    fn remove_unit(&self, unit_id: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(unit_id);
        inner.open_units.remove(&unit_id);
        let primary = inner.primary();
        if primary.names.contains_key(&local) {
            tracing::debug!(storage_id = self.storage_id, unit_id, "removing unit data");
            primary.clear_unit(local)?;
        }
        Ok(())
    }

    fn open_unit(&self, unit_id: i32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(unit_id);
        let primary = inner.primary();
        if !primary.names.contains_key(&local) {
            return Ok(());
        }
        primary.segment(local, false)?;
        primary.dictionary(local)?;
        inner.open_units.insert(unit_id);
        Ok(())
    }

    fn close_unit(
        &self,
        unit_id: i32,
        clean_repository: bool,
        required_units: &HashSet<i32>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(unit_id);
        inner.open_units.remove(&unit_id);
        let primary = inner.primary();
        if !primary.names.contains_key(&local) {
            return Ok(());
        }
        if clean_repository && !required_units.contains(&unit_id) {
            tracing::debug!(storage_id = self.storage_id, unit_id, "discarding closed unit");
            return primary.clear_unit(local);
        }
        primary.release_unit(local)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Ok(());
        }
        inner.primary().flush()
    }

    fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return Ok(());
        }
        let flushed = inner.primary().flush();
        for layer in inner.layers.iter_mut() {
            layer.segments.clear();
            layer.dictionaries.clear();
        }
        inner.open_units.clear();
        inner.shut_down = true;
        flushed
    }

    fn maintenance_weight(&self) -> u32 {
        let inner = self.inner.lock();
        if inner.shut_down {
            return 0;
        }
        let (dead, total) = inner.layers[0]
            .segments
            .values()
            .fold((0u64, 0u64), |(dead, total), s| {
                (dead + s.dead_bytes(), total + s.total_bytes())
            });
        if total == 0 {
            return 0;
        }
        (dead * 100 / total) as u32
    }

    fn maintain(&self, budget: Duration) -> Result<bool> {
        let started = Instant::now();

        // most fragmented first
        let mut candidates: Vec<(i32, u64)> = {
            let inner = self.inner.lock();
            inner.check_open()?;
            inner.layers[0]
                .segments
                .iter()
                .filter(|(_, s)| s.dead_bytes() > 0)
                .map(|(&id, s)| (id, s.dead_bytes()))
                .collect()
        };
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        // the first candidate is always compacted so a pass makes progress
        for (position, (local, dead)) in candidates.iter().enumerate() {
            if position > 0 && started.elapsed() >= budget {
                tracing::debug!(
                    storage_id = self.storage_id,
                    remaining = candidates.len() - position,
                    "maintenance budget spent"
                );
                return Ok(true);
            }
            let mut inner = self.inner.lock();
            inner.check_open()?;
            // the unit may have been closed since the candidates were taken
            if let Some(segment) = inner.primary().segments.get_mut(local) {
                segment.compact()?;
                tracing::debug!(storage_id = self.storage_id, local_id = *local, reclaimed = *dead, "compacted unit");
            }
        }
        Ok(false)
    }

    fn file_name(&self, unit_id: i32, file_idx: u32) -> Result<Option<String>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(unit_id);
        let primary = inner.primary();
        if !primary.names.contains_key(&local) {
            return Ok(None);
        }
        let state = primary.dictionary(local)?;
        Ok(state.dictionary.file_name(file_idx).map(str::to_string))
    }

    fn file_id(&self, unit_id: i32, file_name: &str) -> Result<Option<u32>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let local = self.local(unit_id);
        let primary = inner.primary();
        if !primary.names.contains_key(&local) {
            return Ok(None);
        }
        let writable = primary.writable;
        let state = primary.dictionary(local)?;
        if !writable {
            return Ok(state.dictionary.lookup(file_name));
        }
        let before = state.dictionary.len();
        let id = state.dictionary.file_id(file_name);
        if state.dictionary.len() != before {
            state.dirty = true;
        }
        Ok(Some(id))
    }

    fn unit_name(&self, unit_id: i32) -> Result<Option<String>> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.layers[0].names.get(&self.local(unit_id)).cloned())
    }
}

/// Creates a [`LayeredStorage`] per new layer list
#[derive(Debug, Default, Clone, Copy)]
pub struct LayeredStorageFactory;

impl StorageFactory for LayeredStorageFactory {
    fn create(
        &self,
        storage_id: i32,
        layers: Vec<LayerDescriptor>,
        config: &Config,
    ) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(LayeredStorage::open(storage_id, layers, config)?))
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// `file:///abs/path` → that path; anything else → a directory under `data_dir`
fn layer_dir(data_dir: &Path, uri: &str) -> PathBuf {
    if let Some(path) = uri.strip_prefix(FILE_URI_PREFIX) {
        return PathBuf::from(path);
    }
    let name: String = uri
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    data_dir.join(name)
}

fn unit_path(dir: &Path, local_id: i32, extension: &str) -> PathBuf {
    dir.join(format!("unit_{:05}.{}", local_id, extension))
}

/// "unit_00001.seg", "unit_00001.dict", "layer.idx" and their temp files
fn is_layer_file(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return false,
    };
    name.starts_with("layer.") || name.starts_with("unit_")
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write through "<name>.tmp" and rename over `path`
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, data)?;
    fs::File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Dictionary payload followed by its CRC32
fn write_dictionary(path: &Path, dictionary: &FilePathsDictionary) -> Result<()> {
    let mut out = RecordOutput::detached(Key::new(0, "files"));
    dictionary.write(&mut out)?;
    let mut raw = out.to_bytes().to_vec();
    let crc = crc32fast::hash(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    write_atomically(path, &raw)
}

fn read_dictionary(path: &Path) -> Result<FilePathsDictionary> {
    let raw = fs::read(path)?;
    if raw.len() < 4 {
        return Err(StoreError::Corruption(format!(
            "dictionary {} is truncated",
            path.display()
        )));
    }
    let (payload, footer) = raw.split_at(raw.len() - 4);
    let expected = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    if crc32fast::hash(payload) != expected {
        return Err(StoreError::Corruption(format!(
            "dictionary {} failed its checksum",
            path.display()
        )));
    }
    let mut input = RecordInput::new(Bytes::copy_from_slice(payload));
    FilePathsDictionaryFactory.read(&mut input)
}
