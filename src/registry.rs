//! Process-wide option registry
//!
//! An explicit value constructed once at startup and passed by reference;
//! there is no ambient global state. The registry owns every
//! [`RuntimeOption`] and hosts the operations that span options or need
//! layer bookkeeping: policy-routed writes, migration, bulk reset.

use anyhow::Result;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::changes::ChangeTracker;
use crate::layer::{LayerKey, LayerSet};
use crate::option::{name_hash, OptionDef, RuntimeOption};
use crate::policy::{self, EditContext};
use crate::value::Value;

/// The option consulted for the "preset is custom" policy redirect.
pub const PRESET_OPTION: &str = "rendering.preset";
/// The [`PRESET_OPTION`] value that marks user-managed custom tuning.
pub const PRESET_CUSTOM: &str = "custom";

/// Thread-safe registry of all declared options, keyed by name hash.
pub struct Registry {
    options: RwLock<HashMap<u64, Arc<RuntimeOption>>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            options: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new option definition.
    ///
    /// Returns an error if an option with the same name is already
    /// registered.
    pub fn register(&self, def: OptionDef) -> Result<Arc<RuntimeOption>> {
        let mut options = self.options.write().unwrap();
        if options.contains_key(&def.hash) {
            anyhow::bail!("Option '{}' is already registered", def.name);
        }
        debug!("Registered option: {} ({})", def.name, def.kind);
        let hash = def.hash;
        let option = Arc::new(RuntimeOption::new(def));
        options.insert(hash, option.clone());
        Ok(option)
    }

    /// Look up an option by dotted name.
    pub fn get(&self, name: &str) -> Option<Arc<RuntimeOption>> {
        self.get_by_hash(name_hash(name))
    }

    /// Look up an option by name hash.
    pub fn get_by_hash(&self, hash: u64) -> Option<Arc<RuntimeOption>> {
        self.options.read().unwrap().get(&hash).cloned()
    }

    /// Check if an option is registered
    pub fn contains(&self, name: &str) -> bool {
        self.options.read().unwrap().contains_key(&name_hash(name))
    }

    /// Get total number of registered options
    pub fn count(&self) -> usize {
        self.options.read().unwrap().len()
    }

    /// All options, sorted by name for consistent ordering.
    pub fn list_all(&self) -> Vec<Arc<RuntimeOption>> {
        let options = self.options.read().unwrap();
        let mut all: Vec<_> = options.values().cloned().collect();
        all.sort_by(|a, b| a.def().name.cmp(&b.def().name));
        all
    }

    /// Resolved value by name; error when unregistered.
    pub fn value(&self, name: &str) -> Result<Arc<Value>> {
        let option = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Option '{}' is not registered", name))?;
        Ok(option.get())
    }

    /// Get resolved bool value
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.value(name)?.as_bool()
    }

    /// Get resolved int value
    pub fn get_int(&self, name: &str) -> Result<i64> {
        self.value(name)?.as_int()
    }

    /// Get resolved float value
    pub fn get_float(&self, name: &str) -> Result<f32> {
        self.value(name)?.as_float()
    }

    /// Get resolved string value
    pub fn get_string(&self, name: &str) -> Result<String> {
        self.value(name)?.as_string()
    }

    /// Whether the active graphics preset is the custom one. Falls back to
    /// false when no preset option is registered.
    pub fn preset_is_custom(&self) -> bool {
        match self.get(PRESET_OPTION) {
            Some(option) => option
                .get()
                .as_string()
                .map(|p| p == PRESET_CUSTOM)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Write a value immediately, routing it through the target-layer
    /// policy. Use [`ChangeTracker::stage`] instead when the write happens
    /// off the synchronization thread.
    pub fn set_value(
        &self,
        layers: &mut LayerSet,
        tracker: &ChangeTracker,
        name: &str,
        value: Value,
        context: EditContext,
        explicit: Option<&LayerKey>,
    ) -> Result<()> {
        let option = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Option '{}' is not registered", name))?;
        let target = policy::target_layer(
            option.def().flags,
            context,
            explicit,
            self.preset_is_custom(),
        );
        self.write_to_layer(layers, &option, &target, value, tracker)
    }

    /// Write a value straight into one layer, bypassing the policy. The
    /// blend parameters are captured from the live layer at this moment.
    pub(crate) fn write_to_layer(
        &self,
        layers: &mut LayerSet,
        option: &Arc<RuntimeOption>,
        layer: &LayerKey,
        value: Value,
        tracker: &ChangeTracker,
    ) -> Result<()> {
        let (strength, threshold) = match layers.capture_params(layer) {
            Some(params) => params,
            None => {
                warn!(
                    "Write of '{}' targeted unknown layer {}, ignoring",
                    option.def().name,
                    layer
                );
                return Ok(());
            }
        };
        option.set_in_layer(layer, value, strength, threshold)?;
        if let Some(layer) = layers.get_mut(layer) {
            layer.note_reference(option.hash());
            layer.dirty = true;
        }
        tracker.mark_dirty(option.hash());
        Ok(())
    }

    /// Remove one layer's contribution to an option (disable it there).
    pub fn disable_layer_value(
        &self,
        layers: &mut LayerSet,
        tracker: &ChangeTracker,
        name: &str,
        layer: &LayerKey,
    ) {
        let option = match self.get(name) {
            Some(option) => option,
            None => {
                warn!("disable_layer_value: unknown option '{}', ignoring", name);
                return;
            }
        };
        if option.remove_from_layer(layer) {
            if let Some(layer) = layers.get_mut(layer) {
                layer.drop_reference(option.hash());
                layer.dirty = true;
            }
            tracker.mark_dirty(option.hash());
        }
    }

    /// Move an option's value between layers, updating back-references.
    pub fn move_layer_value(
        &self,
        layers: &mut LayerSet,
        tracker: &ChangeTracker,
        name: &str,
        src: &LayerKey,
        dst: &LayerKey,
    ) {
        let option = match self.get(name) {
            Some(option) => option,
            None => {
                warn!("move_layer_value: unknown option '{}', ignoring", name);
                return;
            }
        };
        if option.move_layer_value(src, dst) {
            if let Some(src) = layers.get_mut(src) {
                src.drop_reference(option.hash());
                src.dirty = true;
            }
            if let Some(dst) = layers.get_mut(dst) {
                dst.note_reference(option.hash());
                dst.dirty = true;
            }
            tracker.mark_dirty(option.hash());
        }
    }

    /// Clear an option's contributions from every layer stronger than
    /// `target`, optionally scoped to a single set hash.
    pub fn clear_stronger_than(
        &self,
        layers: &mut LayerSet,
        tracker: &ChangeTracker,
        name: &str,
        target: &LayerKey,
        set_hash: Option<u64>,
    ) {
        let option = match self.get(name) {
            Some(option) => option,
            None => {
                warn!("clear_stronger_than: unknown option '{}', ignoring", name);
                return;
            }
        };
        let (changed, removed) = option.clear_stronger_than(target, set_hash);
        for key in &removed {
            if let Some(layer) = layers.get_mut(key) {
                layer.drop_reference(option.hash());
                layer.dirty = true;
            }
        }
        if changed {
            tracker.mark_dirty(option.hash());
        }
    }

    /// Migrate an option's per-layer history into a successor option.
    ///
    /// Every non-default entry of `src` is unioned (sets) or copied if the
    /// destination layer slot is empty (other types) into `dst`; `src` is
    /// left with only its default. A type mismatch is a programming error:
    /// debug builds assert, release builds warn and no-op.
    pub fn migrate(
        &self,
        layers: &mut LayerSet,
        tracker: &ChangeTracker,
        src_name: &str,
        dst_name: &str,
    ) -> Result<()> {
        let src = self
            .get(src_name)
            .ok_or_else(|| anyhow::anyhow!("Option '{}' is not registered", src_name))?;
        let dst = self
            .get(dst_name)
            .ok_or_else(|| anyhow::anyhow!("Option '{}' is not registered", dst_name))?;
        if src.def().kind != dst.def().kind {
            debug_assert!(
                false,
                "migrate type mismatch: '{}' is {}, '{}' is {}",
                src_name,
                src.def().kind,
                dst_name,
                dst.def().kind
            );
            warn!(
                "Migration '{}' -> '{}' skipped: {} vs {}",
                src_name,
                dst_name,
                src.def().kind,
                dst.def().kind
            );
            return Ok(());
        }
        for (key, entry) in src.take_non_default_entries() {
            dst.absorb_migrated(&key, entry);
            if let Some(layer) = layers.get_mut(&key) {
                layer.drop_reference(src.hash());
                layer.note_reference(dst.hash());
                layer.dirty = true;
            }
        }
        debug!("Migrated option history: {} -> {}", src_name, dst_name);
        tracker.mark_dirty(src.hash());
        tracker.mark_dirty(dst.hash());
        Ok(())
    }

    /// Strip every non-default layer entry from all options not flagged
    /// NoReset, returning them to their declared defaults.
    pub fn reset(&self, layers: &mut LayerSet, tracker: &ChangeTracker) {
        for option in self.list_all() {
            if option.def().flags.no_reset {
                continue;
            }
            let drained = option.take_non_default_entries();
            if drained.is_empty() {
                continue;
            }
            for (key, _) in &drained {
                if let Some(layer) = layers.get_mut(key) {
                    layer.drop_reference(option.hash());
                    layer.dirty = true;
                }
            }
            tracker.mark_dirty(option.hash());
        }
        debug!("Bulk reset complete");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{QUALITY_LAYER, USER_LAYER};
    use crate::option::OptionDef;

    fn engine() -> (Registry, LayerSet, ChangeTracker) {
        (Registry::new(), LayerSet::standard(), ChangeTracker::new())
    }

    #[test]
    fn test_register_and_get() {
        let registry = Registry::new();
        registry
            .register(OptionDef::for_tests("test.option", Value::Bool(true)))
            .unwrap();
        let option = registry.get("test.option").unwrap();
        assert_eq!(option.def().name, "test.option");
        assert!(registry.contains("test.option"));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = Registry::new();
        let def = OptionDef::for_tests("test.option", Value::Bool(true));
        registry.register(def.clone()).unwrap();
        assert!(registry.register(def).is_err());
    }

    #[test]
    fn test_list_all_sorted_by_name() {
        let registry = Registry::new();
        registry
            .register(OptionDef::for_tests("b.option", Value::Int(1)))
            .unwrap();
        registry
            .register(OptionDef::for_tests("a.option", Value::Int(2)))
            .unwrap();
        let names: Vec<String> = registry
            .list_all()
            .iter()
            .map(|o| o.def().name.clone())
            .collect();
        assert_eq!(names, vec!["a.option", "b.option"]);
    }

    #[test]
    fn test_set_value_routes_through_policy() {
        let (registry, mut layers, tracker) = engine();
        registry
            .register(OptionDef::for_tests("render.scale", Value::Float(1.0)))
            .unwrap();
        registry
            .set_value(
                &mut layers,
                &tracker,
                "render.scale",
                Value::Float(0.5),
                EditContext::User,
                None,
            )
            .unwrap();
        let option = registry.get("render.scale").unwrap();
        // Plain option + user context lands in the config layer.
        assert_eq!(
            option.value_in_layer(&crate::layer::CONFIG_LAYER),
            Some(Value::Float(0.5))
        );
        assert_eq!(registry.get_float("render.scale").unwrap(), 0.5);
    }

    #[test]
    fn test_unknown_layer_write_is_noop() {
        let (registry, mut layers, tracker) = engine();
        registry
            .register(OptionDef::for_tests("render.scale", Value::Float(1.0)))
            .unwrap();
        let bogus = LayerKey::new(7, "bogus");
        registry
            .set_value(
                &mut layers,
                &tracker,
                "render.scale",
                Value::Float(0.5),
                EditContext::User,
                Some(&bogus),
            )
            .unwrap();
        assert_eq!(registry.get_float("render.scale").unwrap(), 1.0);
    }

    #[test]
    fn test_migrate_preserves_history() {
        let (registry, mut layers, tracker) = engine();
        registry
            .register(OptionDef::for_tests("old.name", Value::Int(0)))
            .unwrap();
        registry
            .register(OptionDef::for_tests("new.name", Value::Int(0)))
            .unwrap();
        let old = registry.get("old.name").unwrap();
        registry
            .write_to_layer(&mut layers, &old, &USER_LAYER, Value::Int(3), &tracker)
            .unwrap();
        registry
            .write_to_layer(&mut layers, &old, &QUALITY_LAYER, Value::Int(7), &tracker)
            .unwrap();

        registry
            .migrate(&mut layers, &tracker, "old.name", "new.name")
            .unwrap();

        let new = registry.get("new.name").unwrap();
        assert_eq!(new.value_in_layer(&USER_LAYER), Some(Value::Int(3)));
        assert_eq!(new.value_in_layer(&QUALITY_LAYER), Some(Value::Int(7)));
        // Source keeps only its default.
        assert_eq!(old.value_in_layer(&USER_LAYER), None);
        assert_eq!(old.value_in_layer(&QUALITY_LAYER), None);
        assert_eq!(*old.get(), Value::Int(0));
        assert_eq!(*new.get(), Value::Int(3));
    }

    #[test]
    fn test_migrate_keeps_existing_destination_entries() {
        let (registry, mut layers, tracker) = engine();
        registry
            .register(OptionDef::for_tests("old.name", Value::Int(0)))
            .unwrap();
        registry
            .register(OptionDef::for_tests("new.name", Value::Int(0)))
            .unwrap();
        let old = registry.get("old.name").unwrap();
        let new = registry.get("new.name").unwrap();
        registry
            .write_to_layer(&mut layers, &old, &USER_LAYER, Value::Int(3), &tracker)
            .unwrap();
        registry
            .write_to_layer(&mut layers, &new, &USER_LAYER, Value::Int(9), &tracker)
            .unwrap();
        registry
            .migrate(&mut layers, &tracker, "old.name", "new.name")
            .unwrap();
        // Non-set types copy only into empty slots.
        assert_eq!(new.value_in_layer(&USER_LAYER), Some(Value::Int(9)));
    }

    #[test]
    fn test_reset_respects_no_reset() {
        let (registry, mut layers, tracker) = engine();
        let mut keep = OptionDef::for_tests("keep.me", Value::Int(0));
        keep.flags.no_reset = true;
        registry.register(keep).unwrap();
        registry
            .register(OptionDef::for_tests("wipe.me", Value::Int(0)))
            .unwrap();
        for name in ["keep.me", "wipe.me"] {
            registry
                .set_value(
                    &mut layers,
                    &tracker,
                    name,
                    Value::Int(5),
                    EditContext::User,
                    None,
                )
                .unwrap();
        }
        registry.reset(&mut layers, &tracker);
        assert_eq!(registry.get_int("keep.me").unwrap(), 5);
        assert_eq!(registry.get_int("wipe.me").unwrap(), 0);
    }

    #[test]
    fn test_preset_redirects_derived_user_setting() {
        let (registry, mut layers, tracker) = engine();
        registry
            .register(OptionDef::for_tests(
                PRESET_OPTION,
                Value::String("medium".to_string()),
            ))
            .unwrap();
        let mut def = OptionDef::for_tests("render.sharpness", Value::Float(0.5));
        def.flags.user_setting = true;
        registry.register(def).unwrap();

        registry
            .set_value(
                &mut layers,
                &tracker,
                "render.sharpness",
                Value::Float(0.7),
                EditContext::Derived,
                None,
            )
            .unwrap();
        let option = registry.get("render.sharpness").unwrap();
        assert_eq!(option.value_in_layer(&QUALITY_LAYER), Some(Value::Float(0.7)));

        // Switch to the custom preset; derived edits now land on the user
        // layer instead of clobbering quality.
        registry
            .set_value(
                &mut layers,
                &tracker,
                PRESET_OPTION,
                Value::String(PRESET_CUSTOM.to_string()),
                EditContext::User,
                None,
            )
            .unwrap();
        registry
            .set_value(
                &mut layers,
                &tracker,
                "render.sharpness",
                Value::Float(0.9),
                EditContext::Derived,
                None,
            )
            .unwrap();
        assert_eq!(option.value_in_layer(&USER_LAYER), Some(Value::Float(0.9)));
    }
}
