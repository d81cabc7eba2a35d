//! Core value types for the option system
//!
//! Every option holds exactly one [`Value`] variant for its whole lifetime.
//! All per-type behavior (copy, compare, weighted accumulation, clamping,
//! text parsing/serialization) lives here behind exhaustive matches so the
//! rest of the engine never needs to know which variant it is working with.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Type tag for an option, fixed at declaration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    String,
    KeyCombos,
    HashSet,
}

impl ValueKind {
    /// Whether layers of this type interpolate by blend strength.
    ///
    /// Everything else treats blend strength purely as an activation gate.
    pub fn blendable(self) -> bool {
        matches!(
            self,
            ValueKind::Float | ValueKind::Vec2 | ValueKind::Vec3 | ValueKind::Vec4
        )
    }

    /// Whether min/max clamp bounds are meaningful for this type.
    pub fn clampable(self) -> bool {
        matches!(
            self,
            ValueKind::Int
                | ValueKind::Float
                | ValueKind::Vec2
                | ValueKind::Vec3
                | ValueKind::Vec4
                | ValueKind::IVec2
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Vec2 => "vec2",
            ValueKind::Vec3 => "vec3",
            ValueKind::Vec4 => "vec4",
            ValueKind::IVec2 => "ivec2",
            ValueKind::String => "string",
            ValueKind::KeyCombos => "keycombos",
            ValueKind::HashSet => "hashset",
        };
        write!(f, "{}", name)
    }
}

/// Two-component float vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

/// Three-component float vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Four-component float vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Two-component integer vector (resolutions, offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IVec2 {
    pub x: i32,
    pub y: i32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Vec4 {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl IVec2 {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A chord of simultaneously-held keys, e.g. `ctrl+shift+r`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyCombo {
    pub keys: Vec<String>,
}

impl KeyCombo {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keys.join("+"))
    }
}

/// Positive and negative hash assertions contributed by a layer.
///
/// `included` and `excluded` are kept separately so that resolution can
/// honor "a stronger layer decided this hash first" semantics; the
/// effective membership is [`HashSetValue::members`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HashSetValue {
    pub included: BTreeSet<u64>,
    pub excluded: BTreeSet<u64>,
}

impl HashSetValue {
    pub fn including(hashes: &[u64]) -> Self {
        Self {
            included: hashes.iter().copied().collect(),
            excluded: BTreeSet::new(),
        }
    }

    pub fn excluding(hashes: &[u64]) -> Self {
        Self {
            included: BTreeSet::new(),
            excluded: hashes.iter().copied().collect(),
        }
    }

    /// Effective membership: inclusions minus exclusions.
    pub fn members(&self) -> BTreeSet<u64> {
        self.included.difference(&self.excluded).copied().collect()
    }

    /// Union the other set's assertions into this one.
    pub fn union_from(&mut self, other: &HashSetValue) {
        self.included.extend(other.included.iter().copied());
        self.excluded.extend(other.excluded.iter().copied());
    }

    /// Drop every assertion about a single hash.
    pub fn remove_hash(&mut self, hash: u64) {
        self.included.remove(&hash);
        self.excluded.remove(&hash);
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }
}

/// A strongly-typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    IVec2(IVec2),
    String(String),
    KeyCombos(Vec<KeyCombo>),
    HashSet(HashSetValue),
}

impl Value {
    /// The type tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Vec2(_) => ValueKind::Vec2,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Vec4(_) => ValueKind::Vec4,
            Value::IVec2(_) => ValueKind::IVec2,
            Value::String(_) => ValueKind::String,
            Value::KeyCombos(_) => ValueKind::KeyCombos,
            Value::HashSet(_) => ValueKind::HashSet,
        }
    }

    /// The accumulation identity for a tag: numeric zero or empty container.
    pub fn zero_of(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Vec2 => Value::Vec2(Vec2::default()),
            ValueKind::Vec3 => Value::Vec3(Vec3::default()),
            ValueKind::Vec4 => Value::Vec4(Vec4::default()),
            ValueKind::IVec2 => Value::IVec2(IVec2::default()),
            ValueKind::String => Value::String(String::new()),
            ValueKind::KeyCombos => Value::KeyCombos(Vec::new()),
            ValueKind::HashSet => Value::HashSet(HashSetValue::default()),
        }
    }

    /// Accumulate `weight * src` into `self`.
    ///
    /// Numeric and vector tags add component-wise; hash sets union their
    /// assertions; every other tag is plain assignment with the weight
    /// ignored, which is how "no blending, just override" is expressed
    /// uniformly. A tag mismatch is a programming error: debug builds
    /// assert, release builds warn and leave `self` untouched.
    pub fn accumulate(&mut self, src: &Value, weight: f32) {
        match (self, src) {
            (Value::Int(t), Value::Int(s)) => *t += (weight as f64 * *s as f64).round() as i64,
            (Value::Float(t), Value::Float(s)) => *t += weight * s,
            (Value::Vec2(t), Value::Vec2(s)) => {
                t.x += weight * s.x;
                t.y += weight * s.y;
            }
            (Value::Vec3(t), Value::Vec3(s)) => {
                t.x += weight * s.x;
                t.y += weight * s.y;
                t.z += weight * s.z;
            }
            (Value::Vec4(t), Value::Vec4(s)) => {
                t.x += weight * s.x;
                t.y += weight * s.y;
                t.z += weight * s.z;
                t.w += weight * s.w;
            }
            (Value::HashSet(t), Value::HashSet(s)) => t.union_from(s),
            (Value::Bool(t), Value::Bool(s)) => *t = *s,
            (Value::IVec2(t), Value::IVec2(s)) => *t = *s,
            (Value::String(t), Value::String(s)) => *t = s.clone(),
            (Value::KeyCombos(t), Value::KeyCombos(s)) => *t = s.clone(),
            (t, s) => {
                debug_assert!(false, "accumulate tag mismatch: {} vs {}", t.kind(), s.kind());
                log::warn!(
                    "accumulate tag mismatch: {} vs {}, value left untouched",
                    t.kind(),
                    s.kind()
                );
            }
        }
    }

    /// Clamp to optional bounds. Meaningless tags pass through unchanged.
    pub fn clamp_to(&mut self, min: Option<&Value>, max: Option<&Value>) {
        if let Some(min) = min {
            self.clamp_one(min, false);
        }
        if let Some(max) = max {
            self.clamp_one(max, true);
        }
    }

    fn clamp_one(&mut self, bound: &Value, upper: bool) {
        fn clip_f(v: &mut f32, b: f32, upper: bool) {
            if upper { *v = v.min(b) } else { *v = v.max(b) }
        }
        fn clip_i64(v: &mut i64, b: i64, upper: bool) {
            if upper { *v = (*v).min(b) } else { *v = (*v).max(b) }
        }
        fn clip_i32(v: &mut i32, b: i32, upper: bool) {
            if upper { *v = (*v).min(b) } else { *v = (*v).max(b) }
        }
        match (self, bound) {
            (Value::Int(v), Value::Int(b)) => clip_i64(v, *b, upper),
            (Value::Float(v), Value::Float(b)) => clip_f(v, *b, upper),
            (Value::Vec2(v), Value::Vec2(b)) => {
                clip_f(&mut v.x, b.x, upper);
                clip_f(&mut v.y, b.y, upper);
            }
            (Value::Vec3(v), Value::Vec3(b)) => {
                clip_f(&mut v.x, b.x, upper);
                clip_f(&mut v.y, b.y, upper);
                clip_f(&mut v.z, b.z, upper);
            }
            (Value::Vec4(v), Value::Vec4(b)) => {
                clip_f(&mut v.x, b.x, upper);
                clip_f(&mut v.y, b.y, upper);
                clip_f(&mut v.z, b.z, upper);
                clip_f(&mut v.w, b.w, upper);
            }
            (Value::IVec2(v), Value::IVec2(b)) => {
                clip_i32(&mut v.x, b.x, upper);
                clip_i32(&mut v.y, b.y, upper);
            }
            (v, b) => {
                debug_assert!(
                    v.kind() == b.kind() && !v.kind().clampable(),
                    "clamp tag mismatch: {} vs {}",
                    v.kind(),
                    b.kind()
                );
            }
        }
    }

    /// Get as bool, returning error if wrong type
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            _ => anyhow::bail!("Expected bool, got {}", self.kind()),
        }
    }

    /// Get as int, returning error if wrong type
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => anyhow::bail!("Expected int, got {}", self.kind()),
        }
    }

    /// Get as float, returning error if wrong type
    pub fn as_float(&self) -> Result<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            _ => anyhow::bail!("Expected float, got {}", self.kind()),
        }
    }

    /// Get as string, returning error if wrong type
    pub fn as_string(&self) -> Result<String> {
        match self {
            Value::String(v) => Ok(v.clone()),
            _ => anyhow::bail!("Expected string, got {}", self.kind()),
        }
    }

    /// Get as vec3, returning error if wrong type
    pub fn as_vec3(&self) -> Result<Vec3> {
        match self {
            Value::Vec3(v) => Ok(*v),
            _ => anyhow::bail!("Expected vec3, got {}", self.kind()),
        }
    }

    /// Get as hash set, returning error if wrong type
    pub fn as_hash_set(&self) -> Result<&HashSetValue> {
        match self {
            Value::HashSet(v) => Ok(v),
            _ => anyhow::bail!("Expected hashset, got {}", self.kind()),
        }
    }

    /// Parse the config-file text form of a value for the given tag.
    pub fn parse_as(kind: ValueKind, raw: &str) -> Result<Value> {
        let raw = raw.trim();
        match kind {
            ValueKind::Bool => {
                let value = match raw {
                    "1" => true,
                    "0" => false,
                    other => other
                        .parse::<bool>()
                        .with_context(|| format!("Failed to parse '{}' as bool", other))?,
                };
                Ok(Value::Bool(value))
            }
            ValueKind::Int => {
                let value = raw
                    .parse::<i64>()
                    .with_context(|| format!("Failed to parse '{}' as int", raw))?;
                Ok(Value::Int(value))
            }
            ValueKind::Float => {
                let value = raw
                    .parse::<f32>()
                    .with_context(|| format!("Failed to parse '{}' as float", raw))?;
                Ok(Value::Float(value))
            }
            ValueKind::Vec2 => {
                let c = parse_components::<f32>(raw, 2)?;
                Ok(Value::Vec2(Vec2::new(c[0], c[1])))
            }
            ValueKind::Vec3 => {
                let c = parse_components::<f32>(raw, 3)?;
                Ok(Value::Vec3(Vec3::new(c[0], c[1], c[2])))
            }
            ValueKind::Vec4 => {
                let c = parse_components::<f32>(raw, 4)?;
                Ok(Value::Vec4(Vec4::new(c[0], c[1], c[2], c[3])))
            }
            ValueKind::IVec2 => {
                let c = parse_components::<i32>(raw, 2)?;
                Ok(Value::IVec2(IVec2::new(c[0], c[1])))
            }
            ValueKind::String => Ok(Value::String(raw.to_string())),
            ValueKind::KeyCombos => {
                let combos = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|combo| KeyCombo {
                        keys: combo
                            .split('+')
                            .map(|k| k.trim().to_ascii_lowercase())
                            .filter(|k| !k.is_empty())
                            .collect(),
                    })
                    .collect();
                Ok(Value::KeyCombos(combos))
            }
            ValueKind::HashSet => {
                let mut set = HashSetValue::default();
                for token in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let (negated, body) = match token.strip_prefix('-') {
                        Some(rest) => (true, rest.trim()),
                        None => (false, token),
                    };
                    let hash = parse_hash(body)
                        .with_context(|| format!("Failed to parse '{}' as hash", body))?;
                    if negated {
                        set.excluded.insert(hash);
                    } else {
                        set.included.insert(hash);
                    }
                }
                Ok(Value::HashSet(set))
            }
        }
    }

    /// Serialize to the config-file text form, the inverse of [`parse_as`].
    ///
    /// [`parse_as`]: Value::parse_as
    pub fn to_conf_string(&self) -> String {
        match self {
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Vec2(v) => format!("{}, {}", v.x, v.y),
            Value::Vec3(v) => format!("{}, {}, {}", v.x, v.y, v.z),
            Value::Vec4(v) => format!("{}, {}, {}, {}", v.x, v.y, v.z, v.w),
            Value::IVec2(v) => format!("{}, {}", v.x, v.y),
            Value::String(v) => v.clone(),
            Value::KeyCombos(combos) => combos
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            Value::HashSet(set) => {
                let mut parts: Vec<String> =
                    set.included.iter().map(|h| format!("0x{:X}", h)).collect();
                parts.extend(set.excluded.iter().map(|h| format!("-0x{:X}", h)));
                parts.join(", ")
            }
        }
    }
}

fn parse_components<T: std::str::FromStr>(raw: &str, count: usize) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parts: Vec<T> = raw
        .split(',')
        .map(str::trim)
        .map(|p| {
            p.parse::<T>()
                .with_context(|| format!("Failed to parse component '{}'", p))
        })
        .collect::<Result<_>>()?;
    if parts.len() != count {
        anyhow::bail!("Expected {} components, got {}", count, parts.len());
    }
    Ok(parts)
}

fn parse_hash(body: &str) -> Result<u64> {
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)?
    } else {
        body.parse::<u64>()?
    };
    Ok(value)
}
