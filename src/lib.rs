//! Layered option resolution engine
//!
//! A process-wide registry of strongly-typed runtime options whose
//! effective values are computed by merging ordered configuration layers:
//! built-in defaults, config files, quality presets, user settings, an
//! environment overlay, and volatile runtime overrides. Float and vector
//! options blend across layers by weight; hash-set options merge with
//! union/subtraction semantics; everything else is strongest-layer-wins.
//!
//! Layer precedence, strongest first: `derived`, `environment`, `user`,
//! `config`, `quality`, `default`.
//!
//! ```
//! use optstack::{
//!     ChangeTracker, EditContext, LayerSet, OptionBuilder, Registry, Value,
//! };
//!
//! let registry = Registry::new();
//! let mut layers = LayerSet::standard();
//! let tracker = ChangeTracker::new();
//!
//! OptionBuilder::new("render.scale")
//!     .description("Internal render resolution scale")
//!     .float_type(1.0, Some(0.25), Some(2.0))
//!     .user_setting()
//!     .register(&registry)
//!     .unwrap();
//!
//! // Stage a write off-thread; it commits at the synchronization point.
//! tracker.stage("render.scale", Value::Float(0.5), EditContext::User, None);
//! assert_eq!(registry.get_float("render.scale").unwrap(), 1.0);
//! tracker.apply_pending(&registry, &mut layers, &mut ());
//! assert_eq!(registry.get_float("render.scale").unwrap(), 0.5);
//! ```

pub mod builder;
pub mod changes;
pub mod confio;
pub mod env;
pub mod layer;
pub mod option;
pub mod policy;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod value;

pub use builder::OptionBuilder;
pub use changes::{ChangeTracker, PendingWrite};
pub use confio::{ConfDoc, WriteMode};
pub use layer::{
    Layer, LayerKey, LayerSet, CONFIG_LAYER, DEFAULT_LAYER, DERIVED_LAYER, ENVIRONMENT_LAYER,
    QUALITY_LAYER, USER_LAYER,
};
pub use option::{name_hash, ChangeCallback, OptionDef, OptionFlags, RuntimeOption};
pub use policy::EditContext;
pub use registry::Registry;
pub use store::{LayerEntry, LayerStore};
pub use value::{HashSetValue, IVec2, KeyCombo, Value, ValueKind, Vec2, Vec3, Vec4};
