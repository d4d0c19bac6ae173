// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for key derivation, producer invocation and listener fan-out.

use std::any::Any;
use std::fmt;

use crate::Key;

/// An error returned by memoized producers and state controllers.
///
/// The error is cheap to clone, which lets a single settlement be delivered to every
/// coalesced caller. When the error originates from a producer, the producer's own error
/// is available unchanged through [`std::error::Error::source()`].
///
/// # Examples
///
/// ```
/// use memoflight::{ErrorKind, UnserializableArgumentError, Unserializable};
/// use memoflight::Error;
///
/// let error: Error = UnserializableArgumentError::from_parts(Unserializable::Cycle, "args[0]").into();
/// assert_eq!(error.kind(), ErrorKind::InvalidArguments);
/// ```
#[ohno::error]
#[derive(Clone)]
#[display("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Wraps an error returned by a producer.
    pub fn producer(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Producer, cause)
    }

    /// Creates an error describing a producer that panicked instead of settling.
    pub(crate) fn panicked(payload: &(dyn Any + Send)) -> Self {
        Self::caused_by(ErrorKind::ProducerPanicked, panic_message(payload))
    }

    pub(crate) fn disposed() -> Self {
        Self::new(ErrorKind::Disposed)
    }

    pub(crate) fn not_subscribed() -> Self {
        Self::new(ErrorKind::NotSubscribed)
    }

    /// Returns what went wrong.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<UnserializableArgumentError> for Error {
    fn from(error: UnserializableArgumentError) -> Self {
        Self::caused_by(ErrorKind::InvalidArguments, error)
    }
}

/// The category of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The arguments could not be turned into a key.
    InvalidArguments,
    /// The producer returned an error.
    Producer,
    /// The producer panicked, either while being called or while being polled.
    ProducerPanicked,
    /// The controller has been disposed and accepts no further requests.
    Disposed,
    /// `retry` was called before anything was subscribed.
    NotSubscribed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidArguments => "arguments cannot be turned into a key",
            Self::Producer => "producer failed",
            Self::ProducerPanicked => "producer panicked",
            Self::Disposed => "controller is disposed",
            Self::NotSubscribed => "controller has no subscription to retry",
        })
    }
}

/// The argument list contains a value that has no stable key representation.
///
/// Either change the shape of the arguments or supply a custom key function, which bypasses
/// derivation entirely.
#[ohno::error]
#[derive(Clone)]
#[display("cannot derive a key: {kind} at {path}")]
pub struct UnserializableArgumentError {
    kind: Unserializable,
    path: String,
}

impl UnserializableArgumentError {
    /// Creates an error for the given kind of offending value at `path`.
    #[must_use]
    pub fn from_parts(kind: Unserializable, path: impl Into<String>) -> Self {
        Self::new(kind, path)
    }

    /// Returns what kind of value was rejected.
    #[must_use]
    pub fn kind(&self) -> Unserializable {
        self.kind
    }

    /// Returns the location of the rejected value, for example `args[1].filters[0]`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// The kind of value rejected by key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Unserializable {
    /// A function or other callable value.
    Function,
    /// An opaque symbol.
    Symbol,
    /// The absent-value sentinel.
    Undefined,
    /// A map- or set-like container.
    Container,
    /// A value reachable from itself.
    Cycle,
    /// A timestamp outside the range of the canonical timestamp format.
    TimestampOutOfRange,
}

impl fmt::Display for Unserializable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Function => "function value",
            Self::Symbol => "symbol value",
            Self::Undefined => "undefined value",
            Self::Container => "map or set container",
            Self::Cycle => "cyclic reference",
            Self::TimestampOutOfRange => "timestamp out of range",
        })
    }
}

/// A result listener panicked while a settled value was fanned out.
///
/// This error is never returned to callers. It is logged and the remaining listeners still run.
#[ohno::error]
#[display("result listener for key {key} panicked")]
pub struct ListenerFanoutError {
    key: Key,
}

impl ListenerFanoutError {
    pub(crate) fn from_panic(key: &Key, payload: &(dyn Any + Send)) -> Self {
        Self::caused_by(key.clone(), panic_message(payload))
    }
}

/// A specialized [`Result`] type for memoflight operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload is not a string".to_string()
    }
}
