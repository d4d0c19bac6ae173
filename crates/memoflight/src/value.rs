// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dynamic argument values accepted by producers and key derivation.
//!
//! [`Value`] models everything a caller might pass as an argument, including shapes that have no
//! stable key representation (functions, symbols, map- and set-like containers, the undefined
//! sentinel). Arrays and objects are shared handles: cloning one aliases the same node, which
//! makes shared sub-graphs and cycles expressible.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;

use crate::{Unserializable, UnserializableArgumentError};

/// A single argument value.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent-value sentinel. Rejected by key derivation.
    #[default]
    Undefined,
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A finite number.
    Number(serde_json::Number),
    /// A string.
    String(String),
    /// A point in time. Accepted by key derivation with a warning.
    Timestamp(SystemTime),
    /// A shared, ordered list of values.
    Array(Array),
    /// A shared record of named values.
    Object(Object),
    /// A map-like container. Rejected by key derivation.
    Map(Vec<(Value, Value)>),
    /// A set-like container. Rejected by key derivation.
    Set(Vec<Value>),
    /// An opaque symbol. Rejected by key derivation.
    Symbol(Symbol),
    /// A callable value. Rejected by key derivation.
    Function(Callable),
}

impl Value {
    /// Converts any serializable value into a [`Value`].
    ///
    /// # Errors
    ///
    /// Returns [`Unserializable::Container`] when the value cannot be represented as JSON data,
    /// for example a map with non-string keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoflight::Value;
    ///
    /// #[derive(serde::Serialize)]
    /// struct Query {
    ///     page: u32,
    /// }
    ///
    /// let value = Value::from_serialize(&Query { page: 2 })?;
    /// assert!(matches!(value, Value::Object(_)));
    /// # Ok::<(), memoflight::UnserializableArgumentError>(())
    /// ```
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, UnserializableArgumentError> {
        serde_json::to_value(value)
            .map(Self::from)
            .map_err(|e| UnserializableArgumentError::caused_by(Unserializable::Container, "args", e))
    }

    /// Returns the name of this value's type, as used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Symbol(_) => "symbol",
            Self::Function(_) => "function",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Containers print their identity only, so cyclic graphs remain printable.
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Timestamp(t) => f.debug_tuple("Timestamp").field(t).finish(),
            Self::Array(a) => a.fmt(f),
            Self::Object(o) => o.fmt(f),
            Self::Map(entries) => f.debug_struct("Map").field("len", &entries.len()).finish(),
            Self::Set(items) => f.debug_struct("Set").field("len", &items.len()).finish(),
            Self::Symbol(s) => s.fmt(f),
            Self::Function(c) => c.fmt(f),
        }
    }
}

/// Identity of a shared container node, used for cycle detection.
pub(crate) type NodeId = usize;

/// A shared, interior-mutable list of values.
///
/// Cloning an `Array` produces another handle to the same list.
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Value>>>);

impl Array {
    /// Creates an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value.
    pub fn push(&self, value: impl Into<Value>) {
        self.0.write().push(value.into());
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Returns `true` if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Returns `true` if both handles refer to the same list.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> NodeId {
        Arc::as_ptr(&self.0).addr()
    }

    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.0.read_recursive().clone()
    }
}

impl From<Vec<Value>> for Array {
    fn from(values: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(values)))
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array").field("id", &self.id()).field("len", &self.len()).finish()
    }
}

/// A shared, interior-mutable record of named values.
///
/// Members are kept sorted by name. Cloning an `Object` produces another handle to the same
/// record.
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<BTreeMap<String, Value>>>);

impl Object {
    /// Creates an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a member, returning the previous value if there was one.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.write().insert(name.into(), value.into())
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Returns `true` if the object has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Returns `true` if both handles refer to the same record.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> NodeId {
        Arc::as_ptr(&self.0).addr()
    }

    pub(crate) fn snapshot(&self) -> Vec<(String, Value)> {
        self.0.read_recursive().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object").field("id", &self.id()).field("len", &self.len()).finish()
    }
}

/// An opaque, non-serializable token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Creates a symbol with a description used only for diagnostics.
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self(Arc::from(description))
    }

    /// Returns the symbol's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.0
    }
}

/// A callable argument value.
#[derive(Clone)]
pub struct Callable(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>);

impl Callable {
    /// Wraps a function.
    pub fn new(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invokes the function.
    #[must_use]
    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").finish_non_exhaustive()
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Number(serde_json::Number::from(value))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    /// Non-finite numbers become [`Value::Null`], as they have no JSON representation.
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<SystemTime> for Value {
    fn from(value: SystemTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Array> for Value {
    fn from(value: Array) -> Self {
        Self::Array(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

impl From<Callable> for Value {
    fn from(value: Callable) -> Self {
        Self::Function(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Array(Array::from(values))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(Array::from(items.into_iter().map(Self::from).collect::<Vec<_>>())),
            serde_json::Value::Object(members) => {
                let object = Object::new();
                for (name, member) in members {
                    object.insert(name, Self::from(member));
                }
                Self::Object(object)
            }
        }
    }
}

/// The ordered argument list of one producer call.
///
/// Use the [`args!`](crate::args) macro for literal argument lists.
#[derive(Clone, Debug, Default)]
pub struct Args(Vec<Value>);

impl Args {
    /// Creates an empty argument list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument.
    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }

    /// Builder-style variant of [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.push(value);
        self
    }

    /// Returns the argument at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Returns the number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the arguments as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Returns an iterator over the arguments.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl FromIterator<Value> for Args {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Args {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds an [`Args`] list from expressions convertible into [`Value`].
///
/// # Examples
///
/// ```
/// use memoflight::args;
///
/// let args = args!["users", 42, true];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Args::from(vec![$($crate::Value::from($value)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_array_aliases_the_same_node() {
        let array = Array::new();
        let alias = array.clone();
        alias.push(1);

        assert_eq!(array.len(), 1);
        assert!(array.ptr_eq(&alias));
        assert_eq!(array.id(), alias.id());
    }

    #[test]
    fn debug_of_cyclic_object_terminates() {
        let object = Object::new();
        object.insert("self", object.clone());

        let debug = format!("{:?}", Value::from(object));
        assert!(debug.starts_with("Object"), "unexpected debug output: {debug}");
    }

    #[test]
    fn non_finite_float_becomes_null() {
        assert!(matches!(Value::from(f64::NAN), Value::Null));
        assert!(matches!(Value::from(f64::INFINITY), Value::Null));
        assert!(matches!(Value::from(1.5), Value::Number(_)));
    }

    #[test]
    fn json_value_converts_recursively() {
        let value = Value::from(serde_json::json!({ "a": [1, "two", null], "b": { "c": true } }));

        let Value::Object(object) = value else {
            panic!("expected an object");
        };
        let members = object.snapshot();
        assert_eq!(members.len(), 2);
        assert!(matches!(&members[0], (name, Value::Array(a)) if name == "a" && a.len() == 3));
        assert!(matches!(&members[1], (name, Value::Object(o)) if name == "b" && o.len() == 1));
    }

    #[test]
    fn from_serialize_rejects_non_string_map_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1_u8], "value");

        let error = Value::from_serialize(&map).expect_err("non-string keys are not representable");
        assert_eq!(error.kind(), Unserializable::Container);
    }

    #[test]
    fn args_macro_converts_each_expression() {
        let args = crate::args!["a", 1, false];

        assert_eq!(args.len(), 3);
        assert!(matches!(args.get(0), Some(Value::String(s)) if s == "a"));
        assert!(matches!(args.get(2), Some(Value::Bool(false))));
        assert!(crate::args![].is_empty());
    }

    #[test]
    fn callable_invokes_wrapped_function() {
        let callable = Callable::new(|args| Value::from(args.len()));

        assert!(matches!(callable.call(&[Value::Null, Value::Null]), Value::Number(n) if n.as_u64() == Some(2)));
    }
}
