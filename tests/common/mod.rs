//! Shared test doubles: a scripted in-memory storage and its factory

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use layerstore::layer::LayerDescriptorProvider;
use layerstore::{
    Config, Key, LayerDescriptor, Result, Storage, StorageFactory, StoreError, UnitDescriptor,
};

// =============================================================================
// Provider
// =============================================================================

/// Layers come from the descriptor's context: "layer://A,layer://B"
pub fn context_provider() -> impl LayerDescriptorProvider {
    |unit: &UnitDescriptor| -> Option<Vec<LayerDescriptor>> {
        unit.context()
            .map(|ctx| ctx.split(',').map(LayerDescriptor::new).collect())
    }
}

pub fn unit(name: &str, layers: &str) -> UnitDescriptor {
    UnitDescriptor::new(name).with_context(layers)
}

// =============================================================================
// MockStorage
// =============================================================================

/// Behavior of storages created for a given first-layer URI
#[derive(Debug, Clone, Default)]
pub struct MockSettings {
    pub weight: u32,
    pub fail_flush: bool,
    pub maintain_sleep: Duration,
    pub maintain_result: bool,
}

pub struct MockStorage {
    id: i32,
    layers: Vec<LayerDescriptor>,
    settings: MockSettings,
    weight: AtomicU32,
    units: Mutex<HashMap<String, i32>>,
    records: Mutex<HashMap<Key, Bytes>>,
    shut_down: AtomicBool,
    pub unit_id_calls: AtomicUsize,
    pub flush_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub maintain_calls: AtomicUsize,
    pub opened: Mutex<Vec<i32>>,
    pub closed: Mutex<Vec<(i32, bool)>>,
}

impl MockStorage {
    fn new(id: i32, layers: Vec<LayerDescriptor>, settings: MockSettings) -> Self {
        Self {
            id,
            layers,
            weight: AtomicU32::new(settings.weight),
            settings,
            units: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
            unit_id_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            maintain_calls: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn first_uri(&self) -> &str {
        self.layers[0].uri()
    }

    pub fn flushes(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub fn maintains(&self) -> usize {
        self.maintain_calls.load(Ordering::SeqCst)
    }

    pub fn unit_id_lookups(&self) -> usize {
        self.unit_id_calls.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

impl Storage for MockStorage {
    fn storage_id(&self) -> i32 {
        self.id
    }

    fn layer_descriptors(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    fn get_unit_id(&self, unit: &UnitDescriptor) -> Result<i32> {
        self.unit_id_calls.fetch_add(1, Ordering::SeqCst);
        let mut units = self.units.lock();
        let next = units.len() as i32;
        let local = *units.entry(unit.name().to_string()).or_insert(next);
        Ok(self.converter().layer_to_client(local))
    }

    fn read(&self, key: &Key) -> Result<Option<Bytes>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StoreError::ShutDown);
        }
        Ok(self.records.lock().get(key).cloned())
    }

    fn write(&self, key: &Key, data: Bytes) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StoreError::ShutDown);
        }
        self.records.lock().insert(key.clone(), data);
        Ok(())
    }

    fn remove(&self, key: &Key) -> Result<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    fn remove_unit(&self, unit_id: i32) -> Result<()> {
        self.records.lock().retain(|k, _| k.unit_id() != unit_id);
        Ok(())
    }

    fn open_unit(&self, unit_id: i32) -> Result<()> {
        self.opened.lock().push(unit_id);
        Ok(())
    }

    fn close_unit(
        &self,
        unit_id: i32,
        clean_repository: bool,
        _required_units: &HashSet<i32>,
    ) -> Result<()> {
        self.closed.lock().push((unit_id, clean_repository));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        if self.settings.fail_flush {
            return Err(StoreError::Storage(format!("flush of {} failed", self.id)));
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn maintenance_weight(&self) -> u32 {
        self.weight.load(Ordering::SeqCst)
    }

    fn maintain(&self, _budget: Duration) -> Result<bool> {
        self.maintain_calls.fetch_add(1, Ordering::SeqCst);
        if !self.settings.maintain_sleep.is_zero() {
            thread::sleep(self.settings.maintain_sleep);
        }
        Ok(self.settings.maintain_result)
    }

    fn file_name(&self, unit_id: i32, file_idx: u32) -> Result<Option<String>> {
        Ok(Some(format!("{}/{}", unit_id, file_idx)))
    }

    fn file_id(&self, _unit_id: i32, file_name: &str) -> Result<Option<u32>> {
        Ok(Some(file_name.len() as u32))
    }

    fn unit_name(&self, unit_id: i32) -> Result<Option<String>> {
        let local = self.converter().client_to_layer(unit_id);
        Ok(self
            .units
            .lock()
            .iter()
            .find(|(_, id)| **id == local)
            .map(|(name, _)| name.clone()))
    }
}

// =============================================================================
// MockFactory
// =============================================================================

#[derive(Default)]
struct FactoryInner {
    settings: Mutex<HashMap<String, MockSettings>>,
    created: Mutex<Vec<Arc<MockStorage>>>,
}

/// Creates mock storages; clones share the same registry
#[derive(Clone, Default)]
pub struct MockFactory {
    inner: Arc<FactoryInner>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for storages whose first layer is `uri`
    pub fn configure(&self, uri: &str, settings: MockSettings) -> &Self {
        self.inner.settings.lock().insert(uri.to_string(), settings);
        self
    }

    pub fn created(&self) -> Vec<Arc<MockStorage>> {
        self.inner.created.lock().clone()
    }

    /// Storage created for first-layer `uri`
    pub fn storage(&self, uri: &str) -> Arc<MockStorage> {
        self.created()
            .into_iter()
            .find(|s| s.first_uri() == uri)
            .unwrap_or_else(|| panic!("no storage created for {}", uri))
    }
}

impl StorageFactory for MockFactory {
    fn create(
        &self,
        storage_id: i32,
        layers: Vec<LayerDescriptor>,
        _config: &Config,
    ) -> Result<Arc<dyn Storage>> {
        let settings = self
            .inner
            .settings
            .lock()
            .get(layers[0].uri())
            .cloned()
            .unwrap_or_default();
        let storage = Arc::new(MockStorage::new(storage_id, layers, settings));
        self.inner.created.lock().push(Arc::clone(&storage));
        Ok(storage)
    }
}
