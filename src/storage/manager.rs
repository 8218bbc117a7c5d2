//! Storage Manager
//!
//! Routes every repository operation to the storage that owns the unit.
//!
//! ## Responsibilities
//! - Resolve a unit's layers and create one storage per distinct layer list
//! - Hand out global unit IDs (storage ID and local ID packed together)
//! - Route record and metadata operations by `unit_id / DENOM`
//! - Flush and shut down all storages, reporting failures without stopping
//! - Run bounded maintenance passes, most fragmented storage first

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache::UnitIdCache;
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::key::{Key, UnitDescriptor};
use crate::layer::{resolve_layers, same_layers, LayerDescriptorProvider, LayeringSupport};
use crate::report::{ErrorSink, TracingErrorSink};
use crate::stream::{RecordInput, RecordOutput};
use crate::units::{storage_id_of, DENOM, NULL_UNIT_ID};

use super::{LayeredStorageFactory, Storage, StorageFactory, StorageRef};

/// Largest storage ID whose units still fit in an `i32`
const MAX_STORAGE_ID: i32 = i32::MAX / DENOM - 1;

/// Mutable state guarded by the manager lock
struct ManagerState {
    storages: BTreeMap<i32, Arc<dyn Storage>>,
    /// Last allocated storage ID (IDs start at 1)
    storage_counter: i32,
    cache: UnitIdCache,
}

/// Top-level repository façade
///
/// ## Concurrency:
/// - `state`: one lock for storage membership, ID allocation and the unit
///   cache; scan-then-create happens entirely under it
/// - `shut_down`: written once under the lock, read lock-free on every call
/// - Record-level access is serialized inside each storage, not here
pub struct StorageManager {
    config: Config,
    providers: Vec<Box<dyn LayerDescriptorProvider>>,
    factory: Box<dyn StorageFactory>,
    errors: Arc<dyn ErrorSink>,
    state: Mutex<ManagerState>,
    shut_down: AtomicBool,
}

impl StorageManager {
    /// Create a new manager builder
    pub fn builder(config: Config) -> StorageManagerBuilder {
        StorageManagerBuilder::new(config)
    }

    // =========================================================================
    // Unit IDs
    // =========================================================================

    /// Global unit ID of `unit`, creating its storage on first use
    ///
    /// Layers come from the first provider that answers. A storage whose layer
    /// list matches position by position is reused; otherwise a new one is
    /// created under the next storage ID.
    ///
    /// After shutdown the answer is [`NULL_UNIT_ID`], which routes to the
    /// closed storage.
    pub fn get_unit_id(&self, unit: &UnitDescriptor) -> Result<i32> {
        if self.is_shut_down() {
            return Ok(NULL_UNIT_ID);
        }
        if let Some(unit_id) = self.state.lock().cache.get(unit) {
            return Ok(unit_id);
        }

        let layers = resolve_layers(&self.providers, unit)
            .ok_or_else(|| StoreError::NoLayers(unit.name().to_string()))?;

        let storage = {
            let mut state = self.state.lock();
            if self.is_shut_down() {
                return Ok(NULL_UNIT_ID);
            }
            let existing = state
                .storages
                .values()
                .find(|s| same_layers(s.layer_descriptors(), &layers))
                .cloned();
            match existing {
                Some(storage) => storage,
                None => {
                    if state.storage_counter >= MAX_STORAGE_ID {
                        return Err(StoreError::Storage(
                            "storage ID space exhausted".to_string(),
                        ));
                    }
                    state.storage_counter += 1;
                    let storage_id = state.storage_counter;
                    let storage = self.factory.create(storage_id, layers, &self.config)?;
                    tracing::info!(
                        storage_id,
                        unit = unit.name(),
                        layers = ?storage
                            .layer_descriptors()
                            .iter()
                            .map(|l| l.uri())
                            .collect::<Vec<_>>(),
                        "created storage"
                    );
                    state.storages.insert(storage_id, Arc::clone(&storage));
                    storage
                }
            }
        };

        let unit_id = settle(storage.get_unit_id(unit), NULL_UNIT_ID)?;
        if unit_id != NULL_UNIT_ID {
            self.state.lock().cache.insert(unit.clone(), unit_id);
        }
        Ok(unit_id)
    }

    /// Global unit ID of `unit` inside an existing storage
    pub fn get_unit_id_in(&self, unit: &UnitDescriptor, storage_id: i32) -> Result<i32> {
        if self.is_shut_down() {
            return Ok(NULL_UNIT_ID);
        }
        let storage = self
            .state
            .lock()
            .storages
            .get(&storage_id)
            .cloned()
            .ok_or(StoreError::UnknownStorage(storage_id))?;
        settle(storage.get_unit_id(unit), NULL_UNIT_ID)
    }

    /// Storage ID encoded in a global unit ID
    pub fn get_storage_id(&self, unit_id: i32) -> i32 {
        storage_id_of(unit_id)
    }

    /// Evict a descriptor the client no longer uses from the unit cache
    pub fn forget_unit(&self, unit: &UnitDescriptor) {
        self.state.lock().cache.forget(unit);
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Reader over the committed payload of `key`
    pub fn get_input_stream(&self, key: &Key) -> Result<Option<RecordInput>> {
        settle(self.lookup_storage(key.unit_id()).input_stream(key), None)
    }

    /// Writer whose `commit` publishes a new payload for `key`
    pub fn get_output_stream(&self, key: &Key) -> RecordOutput {
        self.lookup_storage(key.unit_id()).output_stream(key)
    }

    pub fn remove(&self, key: &Key) -> Result<()> {
        settle(self.lookup_storage(key.unit_id()).remove(key), ())
    }

    pub fn remove_unit(&self, unit_id: i32) -> Result<()> {
        let storage = self.lookup_storage(unit_id);
        if !storage.is_closed() {
            self.state.lock().cache.forget_unit_id(unit_id);
        }
        settle(storage.remove_unit(unit_id), ())
    }

    // =========================================================================
    // Unit Lifecycle
    // =========================================================================

    pub fn open(&self, unit_id: i32) -> Result<()> {
        settle(self.lookup_storage(unit_id).open_unit(unit_id), ())
    }

    pub fn close(
        &self,
        unit_id: i32,
        clean_repository: bool,
        required_units: &HashSet<i32>,
    ) -> Result<()> {
        settle(
            self.lookup_storage(unit_id)
                .close_unit(unit_id, clean_repository, required_units),
            (),
        )
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn get_file_name_by_idx(&self, unit_id: i32, file_idx: u32) -> Result<Option<String>> {
        settle(self.lookup_storage(unit_id).file_name(unit_id, file_idx), None)
    }

    pub fn get_file_id_by_name(&self, unit_id: i32, file_name: &str) -> Result<Option<u32>> {
        settle(self.lookup_storage(unit_id).file_id(unit_id, file_name), None)
    }

    pub fn get_unit_name(&self, unit_id: i32) -> Result<Option<String>> {
        settle(self.lookup_storage(unit_id).unit_name(unit_id), None)
    }

    pub fn get_layering_support(&self, unit_id: i32) -> Option<LayeringSupport> {
        self.lookup_storage(unit_id).layering_support()
    }

    // =========================================================================
    // Flush / Shutdown
    // =========================================================================

    /// Flush every storage; failures are reported, not returned
    pub fn flush(&self) {
        let state = self.state.lock();
        for (storage_id, storage) in state.storages.iter() {
            if let Err(e) = storage.flush() {
                self.errors
                    .report(&format!("flush of storage {}", storage_id), &e);
            }
        }
    }

    /// Flush and shut down every storage, then drop them
    ///
    /// Every later operation is served by the closed storage.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        for (storage_id, storage) in state.storages.iter() {
            if let Err(e) = storage.flush() {
                self.errors
                    .report(&format!("flush of storage {}", storage_id), &e);
            }
            if let Err(e) = storage.shutdown() {
                self.errors
                    .report(&format!("shutdown of storage {}", storage_id), &e);
            }
        }

        tracing::info!(storages = state.storages.len(), "repository shut down");
        state.storages.clear();
        state.cache.clear();
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Run one maintenance pass within roughly `budget`
    ///
    /// Storages are visited by descending weight, sampled once at the start of
    /// the pass. The pass ends at the first storage below the defragmentation
    /// threshold. Elapsed time is checked only between storages.
    ///
    /// Returns `true` if more work may remain. Not meant to be called
    /// concurrently.
    pub fn maintenance(&self, budget: Duration) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let snapshot: Vec<Arc<dyn Storage>> = self.state.lock().storages.values().cloned().collect();
        let mut weighted: Vec<(u32, Arc<dyn Storage>)> = snapshot
            .into_iter()
            .map(|s| (s.maintenance_weight(), s))
            .collect();
        weighted.sort_by(|a, b| b.0.cmp(&a.0));

        let threshold = self.config.defrag_threshold;
        let last = weighted.len().saturating_sub(1);
        let mut need_maintenance = false;
        let mut spent = Duration::ZERO;

        for (position, (weight, storage)) in weighted.iter().enumerate() {
            if *weight < threshold {
                return need_maintenance;
            }

            let started = Instant::now();
            match storage.maintain(budget.saturating_sub(spent)) {
                Ok(more) => need_maintenance |= more,
                Err(e) => self.errors.report(
                    &format!("maintenance of storage {}", storage.storage_id()),
                    &e,
                ),
            }
            spent += started.elapsed();
            tracing::debug!(
                storage_id = storage.storage_id(),
                weight = *weight,
                spent_ms = spent.as_millis() as u64,
                "maintained storage"
            );

            if position < last && spent > budget {
                return true;
            }
        }

        need_maintenance
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Storage owning `unit_id`, or the closed storage
    pub fn lookup_storage(&self, unit_id: i32) -> StorageRef {
        if self.is_shut_down() {
            return StorageRef::Closed;
        }
        match self.state.lock().storages.get(&storage_id_of(unit_id)) {
            Some(storage) => StorageRef::Active(Arc::clone(storage)),
            None => StorageRef::Closed,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Number of registered storages
    pub fn storage_count(&self) -> usize {
        self.state.lock().storages.len()
    }

    /// Number of cached descriptor → unit ID mappings
    pub fn cached_unit_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A storage shut down under a caller that already routed to it answers like
/// the closed storage
fn settle<T>(result: Result<T>, inert: T) -> Result<T> {
    match result {
        Err(StoreError::ShutDown) => Ok(inert),
        other => other,
    }
}

/// Builder for StorageManager
pub struct StorageManagerBuilder {
    config: Config,
    providers: Vec<Box<dyn LayerDescriptorProvider>>,
    factory: Option<Box<dyn StorageFactory>>,
    errors: Option<Arc<dyn ErrorSink>>,
}

impl StorageManagerBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            providers: Vec::new(),
            factory: None,
            errors: None,
        }
    }

    /// Append a layer provider; earlier providers take precedence
    pub fn provider(mut self, provider: impl LayerDescriptorProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Replace the default `LayeredStorageFactory`
    pub fn factory(mut self, factory: impl StorageFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Replace the default `TracingErrorSink`
    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.errors = Some(sink);
        self
    }

    pub fn build(self) -> Result<StorageManager> {
        self.config.validate()?;
        let cache = UnitIdCache::new(self.config.unit_cache_capacity);
        Ok(StorageManager {
            providers: self.providers,
            factory: self
                .factory
                .unwrap_or_else(|| Box::new(LayeredStorageFactory)),
            errors: self.errors.unwrap_or_else(|| Arc::new(TracingErrorSink)),
            state: Mutex::new(ManagerState {
                storages: BTreeMap::new(),
                storage_counter: 0,
                cache,
            }),
            shut_down: AtomicBool::new(false),
            config: self.config,
        })
    }
}
