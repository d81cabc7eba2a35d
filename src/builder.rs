//! Fluent builder API for declaring options

use anyhow::Result;
use std::sync::Arc;

use crate::option::{name_hash, ChangeCallback, OptionDef, OptionFlags, RuntimeOption};
use crate::registry::Registry;
use crate::value::{HashSetValue, IVec2, KeyCombo, Value, Vec2, Vec3, Vec4};

/// Builder for declaring options with a fluent API.
///
/// Declaration happens once at process start; `register` hands the
/// finished definition to the registry.
pub struct OptionBuilder {
    name: String,
    description: Option<String>,
    default: Option<Value>,
    min: Option<Value>,
    max: Option<Value>,
    flags: OptionFlags,
    env_var: Option<String>,
    on_change: Option<ChangeCallback>,
}

impl OptionBuilder {
    /// Start declaring an option with a dotted name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            default: None,
            min: None,
            max: None,
            flags: OptionFlags::default(),
            env_var: None,
            on_change: None,
        }
    }

    /// Set the description (help text)
    pub fn description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    /// Define as a boolean with default value
    pub fn bool_type(mut self, default: bool) -> Self {
        self.default = Some(Value::Bool(default));
        self
    }

    /// Define as an integer with default and optional clamp bounds
    pub fn int_type(mut self, default: i64, min: Option<i64>, max: Option<i64>) -> Self {
        self.default = Some(Value::Int(default));
        self.min = min.map(Value::Int);
        self.max = max.map(Value::Int);
        self
    }

    /// Define as a float with default and optional clamp bounds
    pub fn float_type(mut self, default: f32, min: Option<f32>, max: Option<f32>) -> Self {
        self.default = Some(Value::Float(default));
        self.min = min.map(Value::Float);
        self.max = max.map(Value::Float);
        self
    }

    /// Define as a 2-component float vector
    pub fn vec2_type(mut self, default: Vec2) -> Self {
        self.default = Some(Value::Vec2(default));
        self
    }

    /// Define as a 3-component float vector
    pub fn vec3_type(mut self, default: Vec3) -> Self {
        self.default = Some(Value::Vec3(default));
        self
    }

    /// Define as a 4-component float vector
    pub fn vec4_type(mut self, default: Vec4) -> Self {
        self.default = Some(Value::Vec4(default));
        self
    }

    /// Define as an integer pair (resolutions, offsets)
    pub fn ivec2_type(mut self, default: IVec2) -> Self {
        self.default = Some(Value::IVec2(default));
        self
    }

    /// Define as a string with default value
    pub fn string_type(mut self, default: &str) -> Self {
        self.default = Some(Value::String(default.to_string()));
        self
    }

    /// Define as a key-combo list
    pub fn key_combos_type(mut self, default: Vec<KeyCombo>) -> Self {
        self.default = Some(Value::KeyCombos(default));
        self
    }

    /// Define as a hash set (positive/negative assertions)
    pub fn hash_set_type(mut self, default: HashSetValue) -> Self {
        self.default = Some(Value::HashSet(default));
        self
    }

    /// Clamp bounds for vector types, applied post-resolution.
    pub fn bounds(mut self, min: Value, max: Value) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Never persist; writes always land on the volatile derived layer.
    pub fn no_save(mut self) -> Self {
        self.flags.no_save = true;
        self
    }

    /// Exclude from bulk reset.
    pub fn no_reset(mut self) -> Self {
        self.flags.no_reset = true;
        self
    }

    /// Route user-context edits to the user-settings layer.
    pub fn user_setting(mut self) -> Self {
        self.flags.user_setting = true;
        self
    }

    /// Bind an environment variable, consulted once at startup.
    pub fn env_var(mut self, name: &str) -> Self {
        self.env_var = Some(name.to_string());
        self
    }

    /// Invoke a callback after the resolved value changes.
    pub fn on_change(
        mut self,
        callback: impl Fn(&Value, &mut dyn std::any::Any) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    /// Build the option definition
    ///
    /// Returns an error if no type/default was chosen
    pub fn build(self) -> Result<OptionDef> {
        let default = self.default.ok_or_else(|| {
            anyhow::anyhow!(
                "Option '{}' needs a type (use bool_type, float_type, ...)",
                self.name
            )
        })?;
        let kind = default.kind();
        if let Some(min) = &self.min {
            if min.kind() != kind {
                anyhow::bail!("Option '{}': min bound is {}, option is {}", self.name, min.kind(), kind);
            }
        }
        if let Some(max) = &self.max {
            if max.kind() != kind {
                anyhow::bail!("Option '{}': max bound is {}, option is {}", self.name, max.kind(), kind);
            }
        }
        let hash = name_hash(&self.name);
        Ok(OptionDef {
            name: self.name,
            hash,
            kind,
            default,
            min: self.min,
            max: self.max,
            flags: self.flags,
            env_var: self.env_var,
            description: self.description.unwrap_or_default(),
            on_change: self.on_change,
        })
    }

    /// Build and register in one step.
    pub fn register(self, registry: &Registry) -> Result<Arc<RuntimeOption>> {
        registry.register(self.build()?)
    }
}
