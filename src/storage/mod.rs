//! Storage Module
//!
//! A storage owns one unit-ID namespace (at most `DENOM` units) backed by an
//! ordered list of layers, and serves the records of those units.
//!
//! The [`StorageManager`] sits on top and routes every operation to the
//! storage owning the unit.
//!
//! ## Responsibilities
//! - Assign or reuse local unit IDs for unit descriptors
//! - Read, write and remove records addressed by [`Key`]
//! - Intern file paths per unit
//! - Report fragmentation and defragment within a time budget
//!
//! ## On-disk Layout (LayeredStorage)
//! ```text
//! {layer dir}/
//!   ├── layer.idx          unit table (bincode)
//!   ├── unit_00000.seg     append-only records of local unit 0
//!   └── unit_00000.dict    file paths dictionary of local unit 0
//! ```

mod layered;
mod manager;
mod segment;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::Config;
use crate::error::Result;
use crate::key::{Key, UnitDescriptor};
use crate::layer::{LayerDescriptor, LayeringSupport};
use crate::stream::{RecordInput, RecordOutput};
use crate::units::{UnitsConverter, NULL_STORAGE_ID};

pub use layered::{LayeredStorage, LayeredStorageFactory};
pub use manager::{StorageManager, StorageManagerBuilder};
pub use segment::{Segment, SegmentRead, TOMBSTONE_MARKER};

/// Contract the manager relies on
///
/// Every method takes `&self`; implementations serialize their own readers
/// and writers.
pub trait Storage: Send + Sync {
    fn storage_id(&self) -> i32;

    /// Ordered layers this storage was created for
    fn layer_descriptors(&self) -> &[LayerDescriptor];

    fn converter(&self) -> UnitsConverter {
        UnitsConverter::new(self.storage_id())
    }

    /// Global unit ID of `unit`, assigning a new local ID on first use
    fn get_unit_id(&self, unit: &UnitDescriptor) -> Result<i32>;

    /// Committed payload of `key`
    fn read(&self, key: &Key) -> Result<Option<Bytes>>;

    /// Commit `data` as the payload of `key`
    fn write(&self, key: &Key, data: Bytes) -> Result<()>;

    /// Remove one record (absent is fine)
    fn remove(&self, key: &Key) -> Result<()>;

    /// Remove every record of a unit (absent is fine)
    fn remove_unit(&self, unit_id: i32) -> Result<()>;

    fn open_unit(&self, unit_id: i32) -> Result<()>;

    /// With `clean_repository`, data of the unit may be discarded unless it is
    /// listed in `required_units`
    fn close_unit(
        &self,
        unit_id: i32,
        clean_repository: bool,
        required_units: &HashSet<i32>,
    ) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn shutdown(&self) -> Result<()>;

    /// Fragmentation urgency; higher means more in need of maintenance
    fn maintenance_weight(&self) -> u32;

    /// Defragment for at most roughly `budget`; `true` if work remains
    fn maintain(&self, budget: Duration) -> Result<bool>;

    fn file_name(&self, unit_id: i32, file_idx: u32) -> Result<Option<String>>;

    /// Index of `file_name` in the unit's dictionary, interning it if needed
    fn file_id(&self, unit_id: i32, file_name: &str) -> Result<Option<u32>>;

    fn unit_name(&self, unit_id: i32) -> Result<Option<String>>;

    fn layering_support(&self) -> LayeringSupport {
        LayeringSupport::new(self.storage_id(), self.layer_descriptors().to_vec())
    }
}

/// Creates storages for newly seen layer lists
pub trait StorageFactory: Send + Sync {
    fn create(
        &self,
        storage_id: i32,
        layers: Vec<LayerDescriptor>,
        config: &Config,
    ) -> Result<Arc<dyn Storage>>;
}

/// Result of routing a unit ID to its storage
///
/// `Closed` stands for "the manager is shut down" as well as "no storage is
/// registered under that ID". Every operation on it is inert.
#[derive(Clone)]
pub enum StorageRef {
    Active(Arc<dyn Storage>),
    Closed,
}

impl StorageRef {
    pub fn is_closed(&self) -> bool {
        matches!(self, StorageRef::Closed)
    }

    pub fn storage_id(&self) -> i32 {
        match self {
            StorageRef::Active(s) => s.storage_id(),
            StorageRef::Closed => NULL_STORAGE_ID,
        }
    }

    pub fn layer_descriptors(&self) -> &[LayerDescriptor] {
        match self {
            StorageRef::Active(s) => s.layer_descriptors(),
            StorageRef::Closed => &[],
        }
    }

    pub fn input_stream(&self, key: &Key) -> Result<Option<RecordInput>> {
        match self {
            StorageRef::Active(s) => Ok(s.read(key)?.map(RecordInput::new)),
            StorageRef::Closed => Ok(None),
        }
    }

    pub fn output_stream(&self, key: &Key) -> RecordOutput {
        match self {
            StorageRef::Active(s) => RecordOutput::new(key.clone(), Some(Arc::clone(s))),
            StorageRef::Closed => RecordOutput::detached(key.clone()),
        }
    }

    pub fn remove(&self, key: &Key) -> Result<()> {
        match self {
            StorageRef::Active(s) => s.remove(key),
            StorageRef::Closed => Ok(()),
        }
    }

    pub fn remove_unit(&self, unit_id: i32) -> Result<()> {
        match self {
            StorageRef::Active(s) => s.remove_unit(unit_id),
            StorageRef::Closed => Ok(()),
        }
    }

    pub fn open_unit(&self, unit_id: i32) -> Result<()> {
        match self {
            StorageRef::Active(s) => s.open_unit(unit_id),
            StorageRef::Closed => Ok(()),
        }
    }

    pub fn close_unit(
        &self,
        unit_id: i32,
        clean_repository: bool,
        required_units: &HashSet<i32>,
    ) -> Result<()> {
        match self {
            StorageRef::Active(s) => s.close_unit(unit_id, clean_repository, required_units),
            StorageRef::Closed => Ok(()),
        }
    }

    pub fn file_name(&self, unit_id: i32, file_idx: u32) -> Result<Option<String>> {
        match self {
            StorageRef::Active(s) => s.file_name(unit_id, file_idx),
            StorageRef::Closed => Ok(None),
        }
    }

    pub fn file_id(&self, unit_id: i32, file_name: &str) -> Result<Option<u32>> {
        match self {
            StorageRef::Active(s) => s.file_id(unit_id, file_name),
            StorageRef::Closed => Ok(None),
        }
    }

    pub fn unit_name(&self, unit_id: i32) -> Result<Option<String>> {
        match self {
            StorageRef::Active(s) => s.unit_name(unit_id),
            StorageRef::Closed => Ok(None),
        }
    }

    pub fn layering_support(&self) -> Option<LayeringSupport> {
        match self {
            StorageRef::Active(s) => Some(s.layering_support()),
            StorageRef::Closed => None,
        }
    }
}
