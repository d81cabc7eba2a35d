//! Resolution: collapsing a layer store into one effective value
//!
//! Layers are walked strongest-to-weakest. Float and vector options blend:
//! each layer's contribution is weighted by its captured blend strength
//! against whatever remains of the running "throughput", which is exactly a
//! nested linear interpolation evaluated front-to-back. Everything else is
//! either first-eligible-wins (scalars, strings, key combos) or a full
//! union scan (hash sets, where the strongest layer to assert a hash
//! decides it).

use std::collections::BTreeMap;

use crate::layer::LayerKey;
use crate::option::OptionDef;
use crate::store::{LayerEntry, LayerStore};
use crate::value::{HashSetValue, Value, ValueKind};

/// Contributions weaker than this leftover weight are negligible.
const THROUGHPUT_EPSILON: f32 = 1e-4;

/// Resolve a store into one effective value for `def`.
///
/// With `exclude` set, that layer and every stronger layer are skipped,
/// which answers "what would the value be without this layer's (and its
/// overriders') say" — the redundancy probe. The caller holds the store
/// lock; this function never mutates anything.
pub fn resolve(def: &OptionDef, store: &LayerStore, exclude: Option<&LayerKey>) -> Value {
    let entries: Vec<(&LayerKey, &LayerEntry)> = match exclude {
        Some(excluded) => store.iter_weaker_than(excluded).collect(),
        None => store.iter().collect(),
    };

    let kind = def.kind;
    let mut result = if kind.blendable() {
        resolve_blend(kind, &entries)
    } else if kind == ValueKind::HashSet {
        Some(Value::HashSet(resolve_set(&entries)))
    } else {
        resolve_override(&entries)
    }
    .unwrap_or_else(|| def.default.clone());

    result.clamp_to(def.min.as_ref(), def.max.as_ref());
    result
}

/// Weighted blend for float/vector tags.
fn resolve_blend(
    kind: ValueKind,
    entries: &[(&LayerKey, &LayerEntry)],
) -> Option<Value> {
    let mut result = Value::zero_of(kind);
    let mut throughput = 1.0f32;
    let mut contributed = false;
    for (_, entry) in entries {
        if !entry.eligible(kind) {
            continue;
        }
        contributed = true;
        if entry.blend_strength >= 1.0 {
            // A fully-opaque layer masks everything weaker:
            // lerp(weaker, layer, 1.0) == layer.
            result.accumulate(&entry.value, throughput);
            return Some(result);
        }
        result.accumulate(&entry.value, throughput * entry.blend_strength);
        throughput *= 1.0 - entry.blend_strength;
        if throughput < THROUGHPUT_EPSILON {
            break;
        }
    }
    contributed.then_some(result)
}

/// First eligible layer wins outright.
fn resolve_override(entries: &[(&LayerKey, &LayerEntry)]) -> Option<Value> {
    entries
        .iter()
        .find(|(_, entry)| entry.eligible(entry.value.kind()))
        .map(|(_, entry)| entry.value.clone())
}

/// Merge every eligible layer's set assertions; the strongest layer to
/// assert a given hash decides whether it is in or out.
fn resolve_set(entries: &[(&LayerKey, &LayerEntry)]) -> HashSetValue {
    let mut decided: BTreeMap<u64, bool> = BTreeMap::new();
    for (_, entry) in entries {
        if !entry.eligible(ValueKind::HashSet) {
            continue;
        }
        if let Value::HashSet(set) = &entry.value {
            for hash in &set.included {
                decided.entry(*hash).or_insert(true);
            }
            for hash in &set.excluded {
                decided.entry(*hash).or_insert(false);
            }
        }
    }
    let mut result = HashSetValue::default();
    for (hash, included) in decided {
        if included {
            result.included.insert(hash);
        } else {
            result.excluded.insert(hash);
        }
    }
    result
}

/// The layer at which resolution stops, masking everything weaker.
///
/// For blendable tags that is the first fully-opaque layer (or the layer
/// that drove throughput below the epsilon); for override tags the first
/// eligible layer. Set tags never block, every layer can contribute.
pub fn blocking_layer(def: &OptionDef, store: &LayerStore) -> Option<LayerKey> {
    let kind = def.kind;
    if kind == ValueKind::HashSet {
        return None;
    }
    if !kind.blendable() {
        return store
            .iter()
            .find(|(_, entry)| entry.eligible(kind))
            .map(|(key, _)| key.clone());
    }
    let mut throughput = 1.0f32;
    for (key, entry) in store.iter() {
        if !entry.eligible(kind) {
            continue;
        }
        if entry.blend_strength >= 1.0 {
            return Some(key.clone());
        }
        throughput *= 1.0 - entry.blend_strength;
        if throughput < THROUGHPUT_EPSILON {
            return Some(key.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CONFIG_LAYER, DEFAULT_LAYER, DERIVED_LAYER, USER_LAYER};
    use crate::option::OptionDef;
    use crate::value::HashSetValue;
    use approx::assert_relative_eq;

    fn float_def(default: f32) -> OptionDef {
        OptionDef::for_tests("render.scale", Value::Float(default))
    }

    #[test]
    fn test_blend_nested_lerp() {
        // Strengths 0.2 (strongest), 0.5, 1.0 (weakest) over 30/20/10:
        // lerp(lerp(10, 20, 0.5), 30, 0.2) = 18.
        let def = float_def(10.0);
        let mut store = LayerStore::default();
        store.set(&DERIVED_LAYER, Value::Float(30.0), 0.2, 0.0);
        store.set(&USER_LAYER, Value::Float(20.0), 0.5, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(10.0), 1.0, 0.0);
        let resolved = resolve(&def, &store, None);
        assert_relative_eq!(resolved.as_float().unwrap(), 18.0);
    }

    #[test]
    fn test_opaque_layer_masks_weaker() {
        let def = float_def(10.0);
        let mut store = LayerStore::default();
        store.set(&USER_LAYER, Value::Float(7.0), 1.0, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(10.0), 1.0, 0.0);
        let resolved = resolve(&def, &store, None);
        assert_relative_eq!(resolved.as_float().unwrap(), 7.0);
    }

    #[test]
    fn test_override_first_eligible_wins() {
        let def = OptionDef::for_tests("render.mode", Value::String("auto".to_string()));
        let mut store = LayerStore::default();
        // Strongest layer fails its own activation threshold.
        store.set(&DERIVED_LAYER, Value::String("forced".to_string()), 0.3, 0.5);
        store.set(&USER_LAYER, Value::String("quality".to_string()), 1.0, 0.0);
        store.set(&DEFAULT_LAYER, Value::String("auto".to_string()), 1.0, 0.0);
        let resolved = resolve(&def, &store, None);
        assert_eq!(resolved.as_string().unwrap(), "quality");
    }

    #[test]
    fn test_set_strongest_assertion_wins() {
        let def = OptionDef::for_tests("render.hide", Value::HashSet(HashSetValue::default()));
        let mut store = LayerStore::default();
        // A (stronger) includes H1; B excludes H1 and includes H2.
        store.set(
            &USER_LAYER,
            Value::HashSet(HashSetValue::including(&[0x1])),
            1.0,
            0.0,
        );
        let mut b = HashSetValue::excluding(&[0x1]);
        b.included.insert(0x2);
        store.set(&CONFIG_LAYER, Value::HashSet(b), 1.0, 0.0);

        let resolved = resolve(&def, &store, None);
        let members = resolved.as_hash_set().unwrap().members();
        assert_eq!(members, [0x1, 0x2].into_iter().collect());
    }

    #[test]
    fn test_set_stronger_exclusion_removes() {
        let def = OptionDef::for_tests("render.hide", Value::HashSet(HashSetValue::default()));
        let mut store = LayerStore::default();
        // B stronger than A this time: H1 stays excluded.
        let mut b = HashSetValue::excluding(&[0x1]);
        b.included.insert(0x2);
        store.set(&USER_LAYER, Value::HashSet(b), 1.0, 0.0);
        store.set(
            &CONFIG_LAYER,
            Value::HashSet(HashSetValue::including(&[0x1])),
            1.0,
            0.0,
        );
        let resolved = resolve(&def, &store, None);
        let members = resolved.as_hash_set().unwrap().members();
        assert_eq!(members, [0x2].into_iter().collect());
    }

    #[test]
    fn test_exclusion_mode_skips_layer_and_stronger() {
        let def = float_def(10.0);
        let mut store = LayerStore::default();
        store.set(&DERIVED_LAYER, Value::Float(30.0), 1.0, 0.0);
        store.set(&USER_LAYER, Value::Float(20.0), 1.0, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(10.0), 1.0, 0.0);
        let resolved = resolve(&def, &store, Some(&USER_LAYER));
        assert_relative_eq!(resolved.as_float().unwrap(), 10.0);
    }

    #[test]
    fn test_empty_store_falls_back_to_default() {
        let def = OptionDef::for_tests("render.flag", Value::Bool(true));
        let store = LayerStore::default();
        assert_eq!(resolve(&def, &store, None), Value::Bool(true));
    }

    #[test]
    fn test_clamp_applies_after_blend() {
        let mut def = float_def(0.0);
        def.min = Some(Value::Float(0.0));
        def.max = Some(Value::Float(12.0));
        let mut store = LayerStore::default();
        store.set(&USER_LAYER, Value::Float(50.0), 1.0, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(0.0), 1.0, 0.0);
        let resolved = resolve(&def, &store, None);
        assert_relative_eq!(resolved.as_float().unwrap(), 12.0);
    }

    #[test]
    fn test_blocking_layer_for_override_and_blend() {
        let def = OptionDef::for_tests("render.flag", Value::Bool(false));
        let mut store = LayerStore::default();
        store.set(&USER_LAYER, Value::Bool(true), 1.0, 0.0);
        store.set(&DEFAULT_LAYER, Value::Bool(false), 1.0, 0.0);
        assert_eq!(blocking_layer(&def, &store), Some(USER_LAYER.clone()));

        let def = float_def(0.0);
        let mut store = LayerStore::default();
        store.set(&USER_LAYER, Value::Float(1.0), 0.5, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(0.0), 1.0, 0.0);
        assert_eq!(blocking_layer(&def, &store), Some(DEFAULT_LAYER.clone()));
    }

    #[test]
    fn test_throughput_epsilon_stops_early() {
        let def = float_def(0.0);
        let mut store = LayerStore::default();
        // 0.99995 strength leaves 5e-5 throughput, under the epsilon, so
        // the huge default value never contributes.
        store.set(&USER_LAYER, Value::Float(10.0), 0.99995, 0.0);
        store.set(&DEFAULT_LAYER, Value::Float(1000.0), 1.0, 0.0);
        let resolved = resolve(&def, &store, None);
        assert_relative_eq!(resolved.as_float().unwrap(), 9.9995, max_relative = 1e-3);
    }
}
