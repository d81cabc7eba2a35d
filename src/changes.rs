//! Change tracking and deferred apply
//!
//! Writes that originate off the primary thread are staged here and only
//! committed when [`ChangeTracker::apply_pending`] runs at the frame's
//! synchronization point. That keeps every consumer seeing one consistent
//! value for a whole frame and batches multi-field edits so they cannot be
//! observed half-applied. Reads never wait on this machinery.

use log::{debug, warn};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::layer::{LayerKey, LayerSet};
use crate::option::name_hash;
use crate::policy::EditContext;
use crate::registry::Registry;
use crate::value::Value;

/// One staged write, recorded exactly as the caller issued it.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub option_hash: u64,
    pub value: Value,
    pub context: EditContext,
    /// Explicit target layer, bypassing the policy (tests, migration).
    pub explicit: Option<LayerKey>,
}

/// Dirty set plus the pending-write queue.
pub struct ChangeTracker {
    pending: Mutex<Vec<PendingWrite>>,
    dirty: Mutex<HashSet<u64>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Stage a write by option name; it commits at the next
    /// [`apply_pending`].
    ///
    /// [`apply_pending`]: ChangeTracker::apply_pending
    pub fn stage(
        &self,
        name: &str,
        value: Value,
        context: EditContext,
        explicit: Option<LayerKey>,
    ) {
        self.pending.lock().unwrap().push(PendingWrite {
            option_hash: name_hash(name),
            value,
            context,
            explicit,
        });
    }

    /// Record an option as touched since the last synchronization point.
    pub fn mark_dirty(&self, option_hash: u64) {
        self.dirty.lock().unwrap().insert(option_hash);
    }

    /// Number of writes waiting for the next synchronization point.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// The synchronization point: commit every staged write, re-resolve
    /// every dirty option, and fire on-change callbacks for those whose
    /// resolved value actually changed. `ctx` is handed to each callback
    /// (a device handle, usually). Returns how many options changed.
    pub fn apply_pending(
        &self,
        registry: &Registry,
        layers: &mut LayerSet,
        ctx: &mut dyn Any,
    ) -> usize {
        let staged: Vec<PendingWrite> = std::mem::take(&mut *self.pending.lock().unwrap());
        for write in staged {
            let option = match registry.get_by_hash(write.option_hash) {
                Some(option) => option,
                None => {
                    warn!("Staged write for unregistered option hash {:#x}", write.option_hash);
                    continue;
                }
            };
            let result = registry.set_value(
                layers,
                self,
                &option.def().name,
                write.value,
                write.context,
                write.explicit.as_ref(),
            );
            if let Err(err) = result {
                warn!("Staged write for '{}' failed: {:#}", option.def().name, err);
            }
        }

        let dirty: Vec<u64> = {
            let mut set = self.dirty.lock().unwrap();
            set.drain().collect()
        };
        let mut changed = 0usize;
        for hash in dirty {
            let option = match registry.get_by_hash(hash) {
                Some(option) => option,
                None => continue,
            };
            if option.resolve_now() {
                changed += 1;
                if let Some(callback) = &option.def().on_change {
                    callback(option.get().as_ref(), ctx);
                }
            }
        }
        if changed > 0 {
            debug!("apply_pending: {} options changed", changed);
        }
        changed
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}
