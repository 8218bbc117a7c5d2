//! # layerstore
//!
//! A persistent key/value repository partitioned into storages:
//! - Units get global IDs that encode their owning storage
//! - One storage per distinct ordered list of layers, created on first use
//! - Fallback layers for reads, one writable layer for writes
//! - File path interning per unit
//! - Incremental, time-bounded defragmentation
//! - Inert behavior after shutdown instead of errors
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StorageManager                          │
//! │   get_unit_id · streams · lifecycle · flush · maintenance    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  storage_id = unit_id / DENOM
//!          ┌────────────┼─────────────────┐
//!          ▼            ▼                 ▼
//!   ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!   │  Storage 1  │ │  Storage 2  │ │   Closed    │
//!   │ (layers A)  │ │ (layers B,C)│ │ (shut down) │
//!   └──────┬──────┘ └──────┬──────┘ └─────────────┘
//!          │               │
//!          ▼               ▼
//!   ┌─────────────┐ ┌─────────────┐
//!   │  Segments   │ │  Segments   │
//!   │ + dicts     │ │ + dicts     │
//!   └─────────────┘ └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod units;
pub mod key;
pub mod layer;
pub mod stream;
pub mod dictionary;
pub mod cache;
pub mod report;
pub mod storage;
pub mod maintenance;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StoreError, Result};
pub use config::{Config, SyncPolicy};
pub use key::{Key, UnitDescriptor};
pub use layer::{FixedLayerProvider, LayerDescriptor, LayerDescriptorProvider, LayeringSupport};
pub use stream::{RecordInput, RecordOutput};
pub use storage::{Storage, StorageFactory, StorageManager, StorageRef};
pub use units::{UnitsConverter, DENOM, NULL_STORAGE_ID, NULL_UNIT_ID};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of layerstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
