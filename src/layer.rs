//! Configuration layers and the layer table
//!
//! A layer is a named, priority-keyed source of option values. Layers are
//! totally ordered by `(priority, name)`; the smaller key is the stronger
//! layer and comes first during resolution.

use anyhow::Result;
use log::warn;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::changes::ChangeTracker;
use crate::confio::ConfDoc;
use crate::registry::Registry;

/// Total-order identity for a layer: smaller key = stronger layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerKey {
    pub priority: u32,
    pub name: String,
}

impl LayerKey {
    pub fn new(priority: u32, name: &str) -> Self {
        Self {
            priority,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.priority)
    }
}

/// Volatile runtime/code overrides; never persisted.
pub static DERIVED_LAYER: Lazy<LayerKey> = Lazy::new(|| LayerKey::new(0, "derived"));
/// Environment-variable overlay, captured once at startup.
pub static ENVIRONMENT_LAYER: Lazy<LayerKey> = Lazy::new(|| LayerKey::new(10, "environment"));
/// Persisted user settings.
pub static USER_LAYER: Lazy<LayerKey> = Lazy::new(|| LayerKey::new(20, "user"));
/// Persisted main config file.
pub static CONFIG_LAYER: Lazy<LayerKey> = Lazy::new(|| LayerKey::new(30, "config"));
/// Quality/preset contributions.
pub static QUALITY_LAYER: Lazy<LayerKey> = Lazy::new(|| LayerKey::new(40, "quality"));
/// Built-in defaults; the weakest layer, always fully opaque.
pub static DEFAULT_LAYER: Lazy<LayerKey> = Lazy::new(|| LayerKey::new(100, "default"));

/// One configuration source: blend parameters, bookkeeping flags, the
/// backing text document, and a non-owning set of option hashes that hold
/// an entry for this layer (so blend-parameter changes fan out without
/// scanning the whole registry).
#[derive(Debug)]
pub struct Layer {
    key: LayerKey,
    pub blend_strength: f32,
    pub blend_threshold: f32,
    /// Set once the layer has contributed at least one option value.
    pub has_values: bool,
    /// Set when the layer's store diverges from its serialized text.
    pub dirty: bool,
    pub doc: ConfDoc,
    referencing: HashSet<u64>,
}

impl Layer {
    pub fn new(key: LayerKey) -> Self {
        Self {
            key,
            blend_strength: 1.0,
            blend_threshold: 0.0,
            has_values: false,
            dirty: false,
            doc: ConfDoc::default(),
            referencing: HashSet::new(),
        }
    }

    pub fn key(&self) -> &LayerKey {
        &self.key
    }

    /// Record that an option now holds an entry for this layer.
    pub fn note_reference(&mut self, option_hash: u64) {
        self.referencing.insert(option_hash);
        self.has_values = true;
    }

    /// Record that an option no longer holds an entry for this layer.
    pub fn drop_reference(&mut self, option_hash: u64) {
        self.referencing.remove(&option_hash);
    }

    pub fn referencing(&self) -> impl Iterator<Item = u64> + '_ {
        self.referencing.iter().copied()
    }
}

/// Manager for the layer singletons, ordered strongest-first.
#[derive(Debug)]
pub struct LayerSet {
    layers: BTreeMap<LayerKey, Layer>,
}

impl LayerSet {
    /// An empty set, for tests that build their own layer table.
    pub fn empty() -> Self {
        Self {
            layers: BTreeMap::new(),
        }
    }

    /// The standard layer table (see the crate docs for precedence).
    pub fn standard() -> Self {
        let mut set = Self::empty();
        for key in [
            &*DERIVED_LAYER,
            &*ENVIRONMENT_LAYER,
            &*USER_LAYER,
            &*CONFIG_LAYER,
            &*QUALITY_LAYER,
            &*DEFAULT_LAYER,
        ] {
            // The table has no duplicates, insert cannot fail here.
            let _ = set.insert(Layer::new(key.clone()));
        }
        set
    }

    /// Insert a layer. Duplicate keys are an error.
    pub fn insert(&mut self, layer: Layer) -> Result<()> {
        let key = layer.key().clone();
        if self.layers.contains_key(&key) {
            anyhow::bail!("Layer {} is already registered", key);
        }
        self.layers.insert(key, layer);
        Ok(())
    }

    pub fn get(&self, key: &LayerKey) -> Option<&Layer> {
        self.layers.get(key)
    }

    pub fn get_mut(&mut self, key: &LayerKey) -> Option<&mut Layer> {
        self.layers.get_mut(key)
    }

    pub fn contains(&self, key: &LayerKey) -> bool {
        self.layers.contains_key(key)
    }

    /// Iterate layers strongest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    /// The blend parameters a write into `key` should capture right now.
    pub fn capture_params(&self, key: &LayerKey) -> Option<(f32, f32)> {
        self.layers
            .get(key)
            .map(|l| (l.blend_strength, l.blend_threshold))
    }

    /// Change a layer's blend parameters and fan the update out to every
    /// option holding a captured entry for it, marking them dirty.
    ///
    /// This walks only the layer's back-reference set, never the whole
    /// registry. Unknown layer keys warn and no-op.
    pub fn set_blend_params(
        &mut self,
        key: &LayerKey,
        strength: f32,
        threshold: f32,
        registry: &Registry,
        tracker: &ChangeTracker,
    ) {
        let layer = match self.layers.get_mut(key) {
            Some(layer) => layer,
            None => {
                warn!("set_blend_params: unknown layer {}, ignoring", key);
                return;
            }
        };
        layer.blend_strength = strength;
        layer.blend_threshold = threshold;
        layer.dirty = true;
        let touched: Vec<u64> = layer.referencing.iter().copied().collect();
        for hash in touched {
            if let Some(option) = registry.get_by_hash(hash) {
                if option.refresh_blend_params(key, strength, threshold) {
                    tracker.mark_dirty(hash);
                }
            }
        }
    }
}
