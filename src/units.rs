//! Unit ID encoding
//!
//! A global (client-visible) unit ID packs the owning storage ID and the
//! storage-local unit ID into one integer:
//!
//! ```text
//! global = storage_id * DENOM + local        (0 <= local < DENOM)
//! ```

/// Per-storage unit capacity and the divisor of the global ID space
pub const DENOM: i32 = 100_000;

/// Storage ID reported by the closed (post-shutdown) storage
pub const NULL_STORAGE_ID: i32 = -1;

/// Unit ID handed out once the repository is shut down
pub const NULL_UNIT_ID: i32 = -1;

/// Storage ID encoded in a global unit ID
pub fn storage_id_of(unit_id: i32) -> i32 {
    unit_id / DENOM
}

/// Translates between storage-local and global unit IDs for one storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitsConverter {
    storage_id: i32,
}

impl UnitsConverter {
    pub fn new(storage_id: i32) -> Self {
        Self { storage_id }
    }

    pub fn storage_id(&self) -> i32 {
        self.storage_id
    }

    /// Global ID → local ID
    pub fn client_to_layer(&self, unit_id: i32) -> i32 {
        unit_id % DENOM
    }

    /// Local ID → global ID
    pub fn layer_to_client(&self, local_id: i32) -> i32 {
        self.storage_id * DENOM + local_id
    }
}
