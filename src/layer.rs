//! Layers
//!
//! A storage is identified by the ordered list of layers backing it. Layers
//! are supplied by [`LayerDescriptorProvider`]s, which the manager receives
//! explicitly and queries in order.

use std::hash::{Hash, Hasher};

use crate::key::UnitDescriptor;
use crate::units::UnitsConverter;

/// Identity of one physical backing layer
///
/// Equality, ordering and hashing use the URI only; `writable` is a hint for
/// the storage implementation.
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
    uri: String,
    writable: bool,
}

impl LayerDescriptor {
    /// A writable layer
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            writable: true,
        }
    }

    /// A layer that is only ever read
    pub fn read_only(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            writable: false,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl PartialEq for LayerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for LayerDescriptor {}

impl Hash for LayerDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl PartialOrd for LayerDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LayerDescriptor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uri.cmp(&other.uri)
    }
}

/// True when both lists have the same length and equal URIs at every position
pub fn same_layers(a: &[LayerDescriptor], b: &[LayerDescriptor]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.uri == y.uri)
}

/// Supplies the layers backing a unit
pub trait LayerDescriptorProvider: Send + Sync {
    /// Ordered layers for `unit`, or `None` to let the next provider answer
    fn layer_descriptors(&self, unit: &UnitDescriptor) -> Option<Vec<LayerDescriptor>>;
}

impl<F> LayerDescriptorProvider for F
where
    F: Fn(&UnitDescriptor) -> Option<Vec<LayerDescriptor>> + Send + Sync,
{
    fn layer_descriptors(&self, unit: &UnitDescriptor) -> Option<Vec<LayerDescriptor>> {
        self(unit)
    }
}

/// Answers every unit with the same layer list
#[derive(Debug, Clone)]
pub struct FixedLayerProvider {
    layers: Vec<LayerDescriptor>,
}

impl FixedLayerProvider {
    pub fn new(layers: Vec<LayerDescriptor>) -> Self {
        Self { layers }
    }

    /// Single writable layer
    pub fn single(uri: impl Into<String>) -> Self {
        Self::new(vec![LayerDescriptor::new(uri)])
    }
}

impl LayerDescriptorProvider for FixedLayerProvider {
    fn layer_descriptors(&self, _unit: &UnitDescriptor) -> Option<Vec<LayerDescriptor>> {
        Some(self.layers.clone())
    }
}

/// First non-empty answer wins, in provider order
///
/// An empty list cannot back a storage, so it is passed over like `None`.
pub fn resolve_layers(
    providers: &[Box<dyn LayerDescriptorProvider>],
    unit: &UnitDescriptor,
) -> Option<Vec<LayerDescriptor>> {
    for (position, provider) in providers.iter().enumerate() {
        match provider.layer_descriptors(unit) {
            Some(layers) if !layers.is_empty() => return Some(layers),
            Some(_) => tracing::debug!(
                unit = unit.name(),
                provider = position,
                "provider answered with no layers, trying the next one"
            ),
            None => {}
        }
    }
    None
}

/// Layer list and unit ID translation of the storage owning a client unit
#[derive(Debug, Clone)]
pub struct LayeringSupport {
    storage_id: i32,
    layers: Vec<LayerDescriptor>,
    converter: UnitsConverter,
}

impl LayeringSupport {
    pub fn new(storage_id: i32, layers: Vec<LayerDescriptor>) -> Self {
        Self {
            storage_id,
            layers,
            converter: UnitsConverter::new(storage_id),
        }
    }

    pub fn storage_id(&self) -> i32 {
        self.storage_id
    }

    pub fn layer_descriptors(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    pub fn converter(&self) -> UnitsConverter {
        self.converter
    }
}
