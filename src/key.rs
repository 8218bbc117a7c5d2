//! Identity types
//!
//! A [`Key`] addresses one record inside a unit; a [`UnitDescriptor`] is the
//! logical identity of a unit before it has a numeric ID.

use std::fmt;

use crate::units::storage_id_of;

/// Address of one persisted record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Global unit ID (storage ID and local ID packed together)
    unit_id: i32,
    /// Record identifier inside the unit
    record: Vec<u8>,
}

impl Key {
    pub fn new(unit_id: i32, record: impl Into<Vec<u8>>) -> Self {
        Self {
            unit_id,
            record: record.into(),
        }
    }

    pub fn unit_id(&self) -> i32 {
        self.unit_id
    }

    pub fn record(&self) -> &[u8] {
        &self.record
    }

    /// Storage that owns this key
    pub fn storage_id(&self) -> i32 {
        storage_id_of(self.unit_id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit_id, String::from_utf8_lossy(&self.record))
    }
}

/// Logical identity of a translation unit
///
/// `name` identifies the unit inside a storage; `context` carries whatever a
/// [`LayerDescriptorProvider`](crate::layer::LayerDescriptorProvider) needs to
/// pick the layers (a project root, for instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitDescriptor {
    name: String,
    context: Option<String>,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}
