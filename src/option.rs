//! Option definitions and their runtime state
//!
//! An [`OptionDef`] is the static identity declared once at startup; a
//! [`RuntimeOption`] pairs it with the mutable layer store, the lock-free
//! cached resolved value, and a dirty flag. Reads load the cache without
//! locking; everything that iterates or mutates the store goes through the
//! one store mutex.

use anyhow::Result;
use arc_swap::ArcSwap;
use log::warn;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::layer::{LayerKey, DEFAULT_LAYER};
use crate::resolve;
use crate::store::{LayerEntry, LayerStore};
use crate::value::{Value, ValueKind};

/// Stable 64-bit FNV-1a hash of a dotted option name.
///
/// Const so declaration sites can hash at compile time; stable across runs
/// and platforms, unlike the std hasher.
pub const fn name_hash(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// Behavior flags for an option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionFlags {
    /// Never persisted; writes are always routed to the volatile layer.
    pub no_save: bool,
    /// Excluded from bulk reset.
    pub no_reset: bool,
    /// Eligible for the user-settings layer in user edit contexts.
    pub user_setting: bool,
}

/// Callback invoked after an option's resolved value changes. The second
/// argument is caller-supplied context (e.g. a device handle) passed down
/// from the synchronization step.
pub type ChangeCallback = Arc<dyn Fn(&Value, &mut dyn Any) + Send + Sync>;

/// Static identity of an option, fixed at declaration time.
#[derive(Clone)]
pub struct OptionDef {
    /// Dotted name, e.g. `render.upscaler.scale`.
    pub name: String,
    /// FNV-1a hash of `name`; the registry key.
    pub hash: u64,
    pub kind: ValueKind,
    pub default: Value,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub flags: OptionFlags,
    /// Environment variable consulted once at startup, if any.
    pub env_var: Option<String>,
    /// Help text for tooling.
    pub description: String,
    pub on_change: Option<ChangeCallback>,
}

impl fmt::Debug for OptionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionDef")
            .field("name", &self.name)
            .field("hash", &self.hash)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("flags", &self.flags)
            .field("env_var", &self.env_var)
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

impl OptionDef {
    /// Bare definition with just a name and default, for unit tests.
    #[doc(hidden)]
    pub fn for_tests(name: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            hash: name_hash(name),
            kind: default.kind(),
            default,
            min: None,
            max: None,
            flags: OptionFlags::default(),
            env_var: None,
            description: String::new(),
            on_change: None,
        }
    }
}

/// An option's live state: definition, layer store, cached resolved value.
pub struct RuntimeOption {
    def: OptionDef,
    store: Mutex<LayerStore>,
    resolved: ArcSwap<Value>,
    dirty: AtomicBool,
}

impl fmt::Debug for RuntimeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOption")
            .field("def", &self.def)
            .field("resolved", &self.resolved.load())
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

impl RuntimeOption {
    /// Create the runtime state, seeding the default layer with the
    /// declared default at full opacity.
    pub fn new(def: OptionDef) -> Self {
        let mut store = LayerStore::default();
        store.set(&DEFAULT_LAYER, def.default.clone(), 1.0, 0.0);
        let mut initial = def.default.clone();
        initial.clamp_to(def.min.as_ref(), def.max.as_ref());
        Self {
            resolved: ArcSwap::from_pointee(initial),
            store: Mutex::new(store),
            dirty: AtomicBool::new(false),
            def,
        }
    }

    pub fn def(&self) -> &OptionDef {
        &self.def
    }

    pub fn hash(&self) -> u64 {
        self.def.hash
    }

    /// The effective value. Lock-free unless the option is dirty, in which
    /// case the resolution is recomputed inline first.
    pub fn get(&self) -> Arc<Value> {
        if self.dirty.load(Ordering::Acquire) {
            self.resolve_now();
        }
        self.resolved.load_full()
    }

    /// Mark for lazy re-resolution on the next read.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Recompute the resolved value from the current store. Returns true
    /// when the cache changed, which is the on-change callback signal.
    pub fn resolve_now(&self) -> bool {
        // Clear before taking the store lock: a write that lands during or
        // after the resolution re-marks the flag instead of being erased.
        self.dirty.store(false, Ordering::Release);
        let store = self.store.lock().unwrap();
        let fresh = resolve::resolve(&self.def, &store, None);
        drop(store);
        let changed = **self.resolved.load() != fresh;
        if changed {
            self.resolved.store(Arc::new(fresh));
        }
        changed
    }

    /// Insert or update this option's value for one layer, capturing the
    /// supplied blend parameters. Returns true when the entry is new.
    pub fn set_in_layer(
        &self,
        layer: &LayerKey,
        value: Value,
        blend_strength: f32,
        blend_threshold: f32,
    ) -> Result<bool> {
        if value.kind() != self.def.kind {
            anyhow::bail!(
                "Option '{}' is {}, got {}",
                self.def.name,
                self.def.kind,
                value.kind()
            );
        }
        let mut store = self.store.lock().unwrap();
        let fresh = store.set(layer, value, blend_strength, blend_threshold);
        drop(store);
        log::debug!("Set option: {} in layer {}", self.def.name, layer);
        self.mark_dirty();
        Ok(fresh)
    }

    /// Remove one layer's contribution. Returns true when an entry existed.
    pub fn remove_from_layer(&self, layer: &LayerKey) -> bool {
        let removed = self.store.lock().unwrap().remove(layer).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// This layer's stored value, or `None` when the layer never wrote one.
    /// Never fabricates a default.
    pub fn value_in_layer(&self, layer: &LayerKey) -> Option<Value> {
        self.store
            .lock()
            .unwrap()
            .get(layer)
            .map(|entry| entry.value.clone())
    }

    /// This layer's stored value, falling back to the declared default.
    pub fn value_in_layer_or_default(&self, layer: &LayerKey) -> Value {
        self.value_in_layer(layer)
            .unwrap_or_else(|| self.def.default.clone())
    }

    /// Run `f` over every layer entry, strongest-first, under the store
    /// lock. Mutating this option's store from inside `f` deadlocks; keep
    /// the callback read-only.
    pub fn for_each_layer_value(&self, mut f: impl FnMut(&LayerKey, &LayerEntry)) {
        let store = self.store.lock().unwrap();
        for (key, entry) in store.iter() {
            f(key, entry);
        }
    }

    /// Move this option's value from one layer to another (union for sets,
    /// overwrite otherwise; moving into the default layer is a no-op).
    /// Returns true when anything changed.
    pub fn move_layer_value(&self, src: &LayerKey, dst: &LayerKey) -> bool {
        let moved = self.store.lock().unwrap().move_value(src, dst);
        if moved {
            self.mark_dirty();
        }
        moved
    }

    /// Remove contributions from every layer stronger than `target`,
    /// optionally scoped to a single set hash. Returns whether anything
    /// changed and the layers whose entry disappeared, for back-reference
    /// cleanup.
    pub fn clear_stronger_than(
        &self,
        target: &LayerKey,
        set_hash: Option<u64>,
    ) -> (bool, Vec<LayerKey>) {
        let (changed, removed) = self
            .store
            .lock()
            .unwrap()
            .clear_stronger_than(target, set_hash);
        if changed {
            self.mark_dirty();
        }
        (changed, removed)
    }

    /// Refresh the captured blend parameters for one layer's entry after
    /// the live layer changed. Returns true when an entry was updated (the
    /// caller then marks this option dirty in its tracker).
    pub fn refresh_blend_params(&self, layer: &LayerKey, strength: f32, threshold: f32) -> bool {
        let updated = self
            .store
            .lock()
            .unwrap()
            .refresh_blend(layer, strength, threshold);
        if updated {
            self.mark_dirty();
        }
        updated
    }

    /// Whether this layer's stored value is redundant: resolution without
    /// the layer (and everything stronger) already yields the same value.
    /// Redundant values are skipped by changed-only serialization.
    pub fn is_redundant_in(&self, layer: &LayerKey) -> bool {
        let store = self.store.lock().unwrap();
        let stored = match store.get(layer) {
            Some(entry) => &entry.value,
            None => return false,
        };
        resolve::resolve(&self.def, &store, Some(layer)) == *stored
    }

    /// The layer at which resolution stops for this option, if any.
    pub fn blocking_layer(&self) -> Option<LayerKey> {
        let store = self.store.lock().unwrap();
        resolve::blocking_layer(&self.def, &store)
    }

    /// The resolved set membership for hash-set options.
    pub fn resolved_members(&self) -> Result<BTreeSet<u64>> {
        Ok(self.get().as_hash_set()?.members())
    }

    /// Drain every non-default layer entry out of this option, returning
    /// the removed `(layer, entry)` pairs. Used by migration and reset.
    pub(crate) fn take_non_default_entries(&self) -> Vec<(LayerKey, LayerEntry)> {
        let mut store = self.store.lock().unwrap();
        let keys: Vec<LayerKey> = store
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| *k != *DEFAULT_LAYER)
            .collect();
        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = store.remove(&key) {
                drained.push((key, entry));
            }
        }
        drop(store);
        if !drained.is_empty() {
            self.mark_dirty();
        }
        drained
    }

    /// Absorb a migrated entry from a predecessor option: sets union into
    /// any existing entry, other types copy only if this layer has no
    /// entry yet.
    pub(crate) fn absorb_migrated(&self, layer: &LayerKey, entry: LayerEntry) {
        if entry.value.kind() != self.def.kind {
            debug_assert!(false, "absorb_migrated tag mismatch on '{}'", self.def.name);
            warn!(
                "Migration into '{}' dropped a {} entry (option is {})",
                self.def.name,
                entry.value.kind(),
                self.def.kind
            );
            return;
        }
        let mut store = self.store.lock().unwrap();
        match store.get(layer).map(|existing| existing.value.clone()) {
            None => {
                store.set(layer, entry.value, entry.blend_strength, entry.blend_threshold);
            }
            Some(mut merged) if matches!(entry.value, Value::HashSet(_)) => {
                merged.accumulate(&entry.value, 1.0);
                store.set(layer, merged, entry.blend_strength, entry.blend_threshold);
            }
            // Destination already has a non-set value for this layer, keep it.
            Some(_) => {}
        }
        drop(store);
        self.mark_dirty();
    }
}
