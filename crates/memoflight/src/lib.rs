// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Coalescing TTL memoization and race-safe async state for arbitrary async producers.
//!
//! This crate wraps an async producer function with two independent guarantees:
//!
//! - [`CoalescingCache`] memoizes results per argument list with time-based expiry, and runs at
//!   most one producer invocation per key at a time. Concurrent callers share that invocation.
//! - [`AsyncStateController`] drives one subscriber's requests and exposes a pending / value /
//!   error state that only the most recent request may change, however late older requests settle.
//!
//! Argument lists are turned into keys by [`derive_key`], which rejects shapes without a stable
//! serialization (functions, symbols, cycles and the like) instead of silently colliding.
//!
//! # Examples
//!
//! ## Memoizing a producer
//!
//! ```
//! use std::time::Duration;
//!
//! use memoflight::{CoalescingCache, args, producer_fn};
//! use tick::ClockControl;
//! # futures::executor::block_on(async {
//!
//! let control = ClockControl::new();
//! let profile = CoalescingCache::builder(control.to_clock())
//!     .ttl(Duration::from_secs(60))
//!     .wrap(producer_fn(|args: memoflight::Args| async move {
//!         Ok::<_, std::io::Error>(format!("profile #{}", args.len()))
//!     }));
//!
//! let first = profile.call(args!["alice"]).await?;
//! let second = profile.call(args!["alice"]).await?;
//! assert_eq!(first, second);
//! # Ok::<(), memoflight::Error>(())
//! # });
//! ```
//!
//! ## Observing state
//!
//! ```
//! use memoflight::{AsyncResource, Phase, args, producer_fn};
//! # futures::executor::block_on(async {
//!
//! let resource = AsyncResource::new(producer_fn(|_| async { Ok::<_, std::io::Error>(42) }));
//! let controller = resource.controller();
//!
//! controller.subscribe(args!["answer"])?.await;
//! assert_eq!(controller.snapshot().phase(), Phase::SettledValue);
//! assert_eq!(controller.snapshot().result(), Some(&42));
//! # Ok::<(), memoflight::Error>(())
//! # });
//! ```

mod builder;
mod cache;
mod controller;
mod entry;
mod error;
mod key;
mod listeners;
mod producer;
mod resource;
mod state;
mod telemetry;
#[cfg(test)]
mod testing;
mod value;

#[doc(inline)]
pub use builder::{AsyncResourceBuilder, CacheBuilder};
#[doc(inline)]
pub use cache::{CoalescingCache, Memoized, wrap};
#[doc(inline)]
pub use controller::{AsyncStateController, Invocation, InvocationOutcome};
#[doc(inline)]
pub use error::{Error, ErrorKind, ListenerFanoutError, Result, Unserializable, UnserializableArgumentError};
#[doc(inline)]
pub use key::{Key, KeyDeriver, KeyFn, KeyWarning, KeyWarningKind, Validation, derive_key, validate};
#[doc(inline)]
pub use listeners::{ListenerId, ListenerRegistry};
#[doc(inline)]
pub use producer::{FnProducer, Producer, ProducerFuture, producer_fn};
#[doc(inline)]
pub use resource::AsyncResource;
#[doc(inline)]
pub use state::{Phase, StateSnapshot};
#[doc(inline)]
pub use value::{Args, Array, Callable, Object, Symbol, Value};
