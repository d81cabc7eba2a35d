//! Per-option layer store
//!
//! Each option owns one [`LayerStore`]: an ordered map from [`LayerKey`] to
//! the value that layer contributed, together with the blend parameters
//! captured at write time. Capturing at write time means iteration always
//! reflects the layer state the contribution was registered under, so a
//! concurrent blend change cannot tear a resolution in progress.

use log::warn;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::layer::{LayerKey, DEFAULT_LAYER};
use crate::value::{Value, ValueKind};

/// A layer's captured contribution to one option.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEntry {
    pub value: Value,
    pub blend_strength: f32,
    pub blend_threshold: f32,
}

impl LayerEntry {
    /// Whether this entry participates in resolution at all.
    ///
    /// Blendable tags interpolate by strength and ignore the threshold;
    /// everything else requires the captured strength to meet it.
    pub fn eligible(&self, kind: ValueKind) -> bool {
        if kind.blendable() {
            self.blend_strength > 0.0
        } else {
            self.blend_strength >= self.blend_threshold
        }
    }
}

/// Ordered map of layer contributions, strongest layer first.
#[derive(Debug, Default)]
pub struct LayerStore {
    entries: BTreeMap<LayerKey, LayerEntry>,
}

impl LayerStore {
    pub fn get(&self, layer: &LayerKey) -> Option<&LayerEntry> {
        self.entries.get(layer)
    }

    pub fn contains(&self, layer: &LayerKey) -> bool {
        self.entries.contains_key(layer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or update a layer's value, capturing the given blend
    /// parameters. Returns true when the entry is newly created.
    pub fn set(
        &mut self,
        layer: &LayerKey,
        value: Value,
        blend_strength: f32,
        blend_threshold: f32,
    ) -> bool {
        let entry = LayerEntry {
            value,
            blend_strength,
            blend_threshold,
        };
        self.entries.insert(layer.clone(), entry).is_none()
    }

    /// Remove a layer's contribution outright.
    pub fn remove(&mut self, layer: &LayerKey) -> Option<LayerEntry> {
        self.entries.remove(layer)
    }

    /// Iterate contributions strongest-first.
    pub fn iter(&self) -> impl Iterator<Item = (&LayerKey, &LayerEntry)> {
        self.entries.iter()
    }

    /// Iterate only the layers strictly weaker than `excluded`, i.e. skip
    /// that layer and everything stronger. Used for redundancy probing.
    pub fn iter_weaker_than<'a>(
        &'a self,
        excluded: &LayerKey,
    ) -> impl Iterator<Item = (&'a LayerKey, &'a LayerEntry)> {
        self.entries
            .range((Bound::Excluded(excluded.clone()), Bound::Unbounded))
    }

    /// Refresh the captured blend parameters for one layer's entry.
    /// Returns true when an entry existed and was updated.
    pub fn refresh_blend(&mut self, layer: &LayerKey, strength: f32, threshold: f32) -> bool {
        match self.entries.get_mut(layer) {
            Some(entry) => {
                entry.blend_strength = strength;
                entry.blend_threshold = threshold;
                true
            }
            None => false,
        }
    }

    /// Move one layer's value onto another layer.
    ///
    /// Set-typed values merge into the destination (union) and the source
    /// entry is cleared; every other type overwrites the destination and
    /// removes the source. Moving into the protected default layer is a
    /// warn-and-no-op. Returns true when anything changed.
    pub fn move_value(&mut self, src: &LayerKey, dst: &LayerKey) -> bool {
        if *dst == *DEFAULT_LAYER {
            warn!("move_value: refusing to move {} into the default layer", src);
            return false;
        }
        if src == dst {
            return false;
        }
        let entry = match self.entries.remove(src) {
            Some(entry) => entry,
            None => return false,
        };
        if let Some(dst_entry) = self.entries.get_mut(dst) {
            if let (Value::HashSet(src_set), Value::HashSet(dst_set)) =
                (&entry.value, &mut dst_entry.value)
            {
                dst_set.union_from(src_set);
                return true;
            }
        }
        // Non-set types overwrite the destination outright; a set with no
        // destination entry just moves over.
        self.entries.insert(dst.clone(), entry);
        true
    }

    /// Remove contributions from every layer stronger than `target`,
    /// leaving `target` itself and everything weaker untouched.
    ///
    /// With `set_hash` given, only that single hash is cleared from
    /// set-typed entries, pruning entries that end up empty. Returns
    /// whether anything changed and the keys of layers whose entry was
    /// removed entirely (for back-reference cleanup).
    pub fn clear_stronger_than(
        &mut self,
        target: &LayerKey,
        set_hash: Option<u64>,
    ) -> (bool, Vec<LayerKey>) {
        let stronger: Vec<LayerKey> = self
            .entries
            .range((Bound::Unbounded, Bound::Excluded(target.clone())))
            .map(|(k, _)| k.clone())
            .collect();
        let mut changed = false;
        let mut removed = Vec::new();
        for key in stronger {
            match set_hash {
                Some(hash) => {
                    let prune = match self.entries.get_mut(&key) {
                        Some(LayerEntry {
                            value: Value::HashSet(set),
                            ..
                        }) => {
                            let had = set.included.contains(&hash) || set.excluded.contains(&hash);
                            set.remove_hash(hash);
                            changed |= had;
                            set.is_empty()
                        }
                        _ => false,
                    };
                    if prune {
                        self.entries.remove(&key);
                        removed.push(key);
                    }
                }
                None => {
                    self.entries.remove(&key);
                    changed = true;
                    removed.push(key);
                }
            }
        }
        (changed, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CONFIG_LAYER, DERIVED_LAYER, USER_LAYER};
    use crate::value::HashSetValue;

    fn float_store() -> LayerStore {
        let mut store = LayerStore::default();
        store.set(&DERIVED_LAYER, Value::Float(1.0), 1.0, 0.0);
        store.set(&USER_LAYER, Value::Float(2.0), 1.0, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(3.0), 1.0, 0.0);
        store
    }

    #[test]
    fn test_iteration_is_strongest_first() {
        let store = float_store();
        let order: Vec<&str> = store.iter().map(|(k, _)| k.name.as_str()).collect();
        assert_eq!(order, vec!["derived", "user", "default"]);
    }

    #[test]
    fn test_iter_weaker_than_skips_excluded_and_stronger() {
        let store = float_store();
        let order: Vec<&str> = store
            .iter_weaker_than(&USER_LAYER)
            .map(|(k, _)| k.name.as_str())
            .collect();
        assert_eq!(order, vec!["default"]);
    }

    #[test]
    fn test_set_reports_fresh_entries() {
        let mut store = LayerStore::default();
        assert!(store.set(&USER_LAYER, Value::Int(1), 1.0, 0.0));
        assert!(!store.set(&USER_LAYER, Value::Int(2), 1.0, 0.0));
        assert_eq!(store.get(&USER_LAYER).unwrap().value, Value::Int(2));
    }

    #[test]
    fn test_move_value_overwrites_destination() {
        let mut store = float_store();
        assert!(store.move_value(&DERIVED_LAYER, &USER_LAYER));
        assert!(store.get(&DERIVED_LAYER).is_none());
        assert_eq!(store.get(&USER_LAYER).unwrap().value, Value::Float(1.0));
    }

    #[test]
    fn test_move_value_to_default_is_noop() {
        let mut store = float_store();
        assert!(!store.move_value(&USER_LAYER, &DEFAULT_LAYER));
        assert_eq!(store.get(&USER_LAYER).unwrap().value, Value::Float(2.0));
        assert_eq!(store.get(&DEFAULT_LAYER).unwrap().value, Value::Float(3.0));
    }

    #[test]
    fn test_move_value_unions_sets() {
        let mut store = LayerStore::default();
        store.set(
            &DERIVED_LAYER,
            Value::HashSet(HashSetValue::including(&[1])),
            1.0,
            0.0,
        );
        store.set(
            &USER_LAYER,
            Value::HashSet(HashSetValue::excluding(&[2])),
            1.0,
            0.0,
        );
        assert!(store.move_value(&DERIVED_LAYER, &USER_LAYER));
        assert!(store.get(&DERIVED_LAYER).is_none());
        let entry = store.get(&USER_LAYER).unwrap();
        match &entry.value {
            Value::HashSet(set) => {
                assert!(set.included.contains(&1));
                assert!(set.excluded.contains(&2));
            }
            other => panic!("Expected HashSet, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_stronger_than_stops_at_target() {
        let mut store = float_store();
        let (changed, removed) = store.clear_stronger_than(&CONFIG_LAYER, None);
        assert!(changed);
        assert_eq!(removed.len(), 2);
        assert!(store.get(&DERIVED_LAYER).is_none());
        assert!(store.get(&USER_LAYER).is_none());
        assert!(store.get(&DEFAULT_LAYER).is_some());
    }

    #[test]
    fn test_clear_stronger_than_scoped_to_one_hash() {
        let mut store = LayerStore::default();
        store.set(
            &DERIVED_LAYER,
            Value::HashSet(HashSetValue::including(&[1, 2])),
            1.0,
            0.0,
        );
        store.set(
            &USER_LAYER,
            Value::HashSet(HashSetValue::including(&[1])),
            1.0,
            0.0,
        );
        let (changed, removed) = store.clear_stronger_than(&CONFIG_LAYER, Some(1));
        // derived keeps hash 2; user's entry emptied out and was pruned.
        assert!(changed);
        assert_eq!(removed, vec![USER_LAYER.clone()]);
        match &store.get(&DERIVED_LAYER).unwrap().value {
            Value::HashSet(set) => assert_eq!(set.members(), [2].into_iter().collect()),
            other => panic!("Expected HashSet, got {:?}", other),
        }
    }
}
