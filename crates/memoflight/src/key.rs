// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Derivation of cache keys from argument lists.
//!
//! [`validate`] is a pure pass that walks the argument graph and rejects anything without a
//! stable serialized form. [`derive_key`] runs the same walk and renders the arguments as compact
//! JSON with object members in sorted order, so structurally equal argument lists always produce
//! the same [`Key`]. Integral floats render as integers, as they do in JSON.

use std::collections::HashSet;
use std::fmt;
use std::num::FpCategory;
use std::sync::Arc;
use std::time::SystemTime;

use crate::telemetry::{Activity, DEFAULT_NAME, emit};
use crate::value::NodeId;
use crate::{Args, Unserializable, UnserializableArgumentError, Value};

/// An opaque string identifying one argument list.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Arc<str>);

impl Key {
    /// Creates a key from an arbitrary string.
    ///
    /// This is what custom key functions return; the string is trusted as-is.
    #[must_use]
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

/// A caller-supplied key function. Its output is trusted without validation.
pub type KeyFn = Arc<dyn Fn(&Args) -> Key + Send + Sync>;

/// How keys are computed from argument lists.
#[derive(Clone, Default)]
pub enum KeyDeriver {
    /// Validate the arguments and use their canonical serialization.
    #[default]
    Canonical,
    /// Use a caller-supplied function and skip validation.
    Custom(KeyFn),
}

impl KeyDeriver {
    /// Creates a deriver from a custom key function.
    pub fn custom(key_fn: impl Fn(&Args) -> Key + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(key_fn))
    }

    /// Computes the key for `args`.
    ///
    /// # Errors
    ///
    /// With [`KeyDeriver::Canonical`], returns an error when the arguments cannot be serialized
    /// deterministically. A custom key function never fails.
    pub fn derive(&self, args: &Args) -> Result<Key, UnserializableArgumentError> {
        match self {
            Self::Canonical => derive_key(args),
            Self::Custom(key_fn) => Ok(key_fn(args)),
        }
    }
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canonical => f.write_str("Canonical"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// A non-fatal finding reported by [`validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyWarning {
    path: String,
    kind: KeyWarningKind,
}

impl KeyWarning {
    /// Returns the location of the flagged value.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns what was flagged.
    #[must_use]
    pub fn kind(&self) -> KeyWarningKind {
        self.kind
    }
}

/// The kind of a [`KeyWarning`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KeyWarningKind {
    /// A timestamp serializes as a string, so its type does not survive a round trip.
    LossyTimestamp,
}

/// The outcome of a successful [`validate`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    warnings: Vec<KeyWarning>,
}

impl Validation {
    /// Returns the non-fatal findings, in traversal order.
    #[must_use]
    pub fn warnings(&self) -> &[KeyWarning] {
        &self.warnings
    }
}

/// Checks that `args` can be turned into a key and collects the warnings derivation would log.
///
/// The traversal is depth-first and tracks the containers currently on the path from the root.
/// Re-entering one of them is a cycle; visiting the same container twice through different
/// paths (a diamond) is allowed.
///
/// # Errors
///
/// Returns an error naming the first offending value and its location.
///
/// # Examples
///
/// ```
/// use memoflight::{Object, Unserializable, Value, args, validate};
///
/// let node = Object::new();
/// node.insert("parent", node.clone());
///
/// let error = validate(&args![node]).unwrap_err();
/// assert_eq!(error.kind(), Unserializable::Cycle);
/// assert_eq!(error.path(), "args[0].parent");
/// ```
pub fn validate(args: &Args) -> Result<Validation, UnserializableArgumentError> {
    let mut walker = Walker::default();
    walker.walk(args)?;
    Ok(Validation {
        warnings: walker.warnings,
    })
}

/// Derives the canonical key for `args`.
///
/// Warnings found by [`validate`] are logged and do not fail the derivation.
///
/// # Errors
///
/// Returns an error when an argument, or any value nested inside one, is a function, a symbol,
/// the undefined sentinel, a map or set container, part of a cycle, or a timestamp outside the
/// supported range.
///
/// # Examples
///
/// ```
/// use memoflight::{Object, args, derive_key};
///
/// let a = Object::new().with("x", 1).with("y", 2);
/// let b = Object::new().with("y", 2).with("x", 1);
///
/// assert_eq!(derive_key(&args![a])?, derive_key(&args![b])?);
/// # Ok::<(), memoflight::UnserializableArgumentError>(())
/// ```
pub fn derive_key(args: &Args) -> Result<Key, UnserializableArgumentError> {
    let mut walker = Walker::default();
    let json = walker.walk(args)?;
    for warning in &walker.warnings {
        match warning.kind() {
            KeyWarningKind::LossyTimestamp => emit(DEFAULT_NAME, Activity::LossyTimestamp, warning.path()),
        }
    }
    Ok(Key::from(json.to_string()))
}

/// Renders numbers the way JSON does: an integral float is the same number as the integer.
#[expect(clippy::cast_possible_truncation, reason = "the value is integral and within i64 range")]
fn canonical_number(number: &serde_json::Number) -> serde_json::Number {
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

    match number.as_f64() {
        Some(f) if number.is_f64() && f.fract().classify() == FpCategory::Zero && f.abs() < I64_BOUND => {
            serde_json::Number::from(f as i64)
        }
        _ => number.clone(),
    }
}

fn format_timestamp(time: SystemTime) -> Result<String, jiff::Error> {
    jiff::Timestamp::try_from(time).map(|ts| ts.to_string())
}

#[derive(Debug)]
enum Segment {
    Index(usize),
    Field(String),
}

/// Depth-first walk over an argument graph.
///
/// Each container is snapshotted once, and the JSON rendering is built from those same
/// snapshots, so the rendered graph is exactly the graph that was checked.
#[derive(Debug, Default)]
struct Walker {
    visiting: HashSet<NodeId>,
    path: Vec<Segment>,
    warnings: Vec<KeyWarning>,
}

impl Walker {
    fn walk(&mut self, args: &Args) -> Result<serde_json::Value, UnserializableArgumentError> {
        let mut rendered = Vec::with_capacity(args.len());
        for (index, value) in args.iter().enumerate() {
            self.path.push(Segment::Index(index));
            rendered.push(self.visit(value)?);
            self.path.pop();
        }
        Ok(serde_json::Value::Array(rendered))
    }

    fn visit(&mut self, value: &Value) -> Result<serde_json::Value, UnserializableArgumentError> {
        match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Number(n) => Ok(serde_json::Value::Number(canonical_number(n))),
            Value::String(s) => Ok(serde_json::Value::String(s.clone())),
            Value::Timestamp(t) => {
                let rendered = format_timestamp(*t)
                    .map_err(|e| UnserializableArgumentError::caused_by(Unserializable::TimestampOutOfRange, self.render_path(), e))?;
                self.warnings.push(KeyWarning {
                    path: self.render_path(),
                    kind: KeyWarningKind::LossyTimestamp,
                });
                Ok(serde_json::Value::String(rendered))
            }
            Value::Array(array) => {
                self.enter(array.id())?;
                let items = array.snapshot();
                let mut rendered = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    self.path.push(Segment::Index(index));
                    rendered.push(self.visit(item)?);
                    self.path.pop();
                }
                self.leave(array.id());
                Ok(serde_json::Value::Array(rendered))
            }
            Value::Object(object) => {
                self.enter(object.id())?;
                let mut members = object.snapshot();
                members.sort_by(|(a, _), (b, _)| a.cmp(b));
                let mut rendered = serde_json::Map::new();
                for (name, member) in &members {
                    self.path.push(Segment::Field(name.clone()));
                    let member = self.visit(member)?;
                    self.path.pop();
                    let _ = rendered.insert(name.clone(), member);
                }
                self.leave(object.id());
                Ok(serde_json::Value::Object(rendered))
            }
            Value::Undefined => Err(self.reject(Unserializable::Undefined)),
            Value::Map(_) | Value::Set(_) => Err(self.reject(Unserializable::Container)),
            Value::Symbol(_) => Err(self.reject(Unserializable::Symbol)),
            Value::Function(_) => Err(self.reject(Unserializable::Function)),
        }
    }

    fn enter(&mut self, id: NodeId) -> Result<(), UnserializableArgumentError> {
        if self.visiting.insert(id) {
            Ok(())
        } else {
            Err(self.reject(Unserializable::Cycle))
        }
    }

    fn leave(&mut self, id: NodeId) {
        self.visiting.remove(&id);
    }

    fn reject(&self, kind: Unserializable) -> UnserializableArgumentError {
        UnserializableArgumentError::from_parts(kind, self.render_path())
    }

    fn render_path(&self) -> String {
        let mut rendered = String::from("args");
        for segment in &self.path {
            match segment {
                Segment::Index(index) => rendered.push_str(&format!("[{index}]")),
                Segment::Field(name) => {
                    rendered.push('.');
                    rendered.push_str(name);
                }
            }
        }
        rendered
    }
}
