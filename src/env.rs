//! Environment variable boundary
//!
//! Options can bind an environment variable at declaration time. The
//! variable is consulted exactly once, at startup, and a non-empty value
//! lands in the dedicated environment layer, where the standard priority
//! table decides what it overrides.

use anyhow::Result;
use log::{debug, warn};

use crate::changes::ChangeTracker;
use crate::layer::{LayerSet, ENVIRONMENT_LAYER};
use crate::registry::Registry;
use crate::value::Value;

/// Capture bound environment variables through a caller-supplied lookup.
/// Returns how many options picked up a value.
///
/// Empty values are treated as unset; unparseable values warn and leave
/// the option untouched.
pub fn capture_environment(
    registry: &Registry,
    layers: &mut LayerSet,
    tracker: &ChangeTracker,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<usize> {
    let mut captured = 0usize;
    for option in registry.list_all() {
        let def = option.def();
        let var = match &def.env_var {
            Some(var) => var,
            None => continue,
        };
        let raw = match lookup(var) {
            Some(raw) if !raw.is_empty() => raw,
            _ => continue,
        };
        let value = match Value::parse_as(def.kind, &raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("Environment variable {}: {:#}, ignoring", var, err);
                continue;
            }
        };
        registry.write_to_layer(layers, &option, &ENVIRONMENT_LAYER, value, tracker)?;
        debug!("Captured {} from environment into '{}'", var, def.name);
        captured += 1;
    }
    Ok(captured)
}

/// Capture from the real process environment.
pub fn capture_process_environment(
    registry: &Registry,
    layers: &mut LayerSet,
    tracker: &ChangeTracker,
) -> Result<usize> {
    capture_environment(registry, layers, tracker, |var| std::env::var(var).ok())
}
