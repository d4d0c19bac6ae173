// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builders for caches and resources.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tick::Clock;

use crate::telemetry::DEFAULT_NAME;
use crate::{Args, AsyncResource, CoalescingCache, Key, KeyDeriver, ListenerRegistry, Memoized, Producer};

/// Builder for a [`CoalescingCache`].
///
/// Created by [`CoalescingCache::builder`]. Without a TTL, entries never expire.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoflight::{CoalescingCache, Key};
/// use tick::Clock;
///
/// let cache = CoalescingCache::<String>::builder(Clock::new_frozen())
///     .name("profiles")
///     .ttl(Duration::from_secs(60))
///     .key_fn(|args| Key::new(format!("profile:{}", args.len())))
///     .build();
///
/// assert_eq!(cache.name(), "profiles");
/// ```
pub struct CacheBuilder<V> {
    name: Option<&'static str>,
    ttl: Option<Duration>,
    key_deriver: KeyDeriver,
    clock: Clock,
    _phantom: PhantomData<fn() -> V>,
}

impl<V> CacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            name: None,
            ttl: None,
            key_deriver: KeyDeriver::Canonical,
            clock,
            _phantom: PhantomData,
        }
    }

    /// Sets the name reported in log events.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Sets how long a settled value stays fresh.
    ///
    /// A zero TTL makes every value stale as soon as it settles.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the TTL in fractional seconds.
    ///
    /// Zero, negative and NaN values all mean a zero TTL. Values too large for a [`Duration`]
    /// mean entries never expire.
    #[must_use]
    pub fn ttl_secs(self, secs: f64) -> Self {
        self.ttl(ttl_from_secs(secs))
    }

    /// Replaces key derivation with `key_fn`, whose output is trusted as-is.
    #[must_use]
    pub fn key_fn(mut self, key_fn: impl Fn(&Args) -> Key + Send + Sync + 'static) -> Self {
        self.key_deriver = KeyDeriver::custom(key_fn);
        self
    }

    /// Builds the cache without a producer. Attach producers with [`CoalescingCache::memoize`].
    #[must_use]
    pub fn build(self) -> CoalescingCache<V> {
        CoalescingCache::new(
            self.name.unwrap_or(DEFAULT_NAME),
            self.clock,
            self.ttl.unwrap_or(Duration::MAX),
            self.key_deriver,
        )
    }

    /// Builds the cache and wraps `producer` with it.
    #[must_use]
    pub fn wrap(self, producer: impl Producer<V> + 'static) -> Memoized<V> {
        self.build().memoize(producer)
    }
}

impl<V> fmt::Debug for CacheBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("key_deriver", &self.key_deriver)
            .field("clock", &self.clock)
            .finish()
    }
}

fn ttl_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Builder for an [`AsyncResource`].
///
/// Created by [`AsyncResource::builder`].
pub struct AsyncResourceBuilder<V> {
    name: Option<&'static str>,
    key_deriver: KeyDeriver,
    producer: Arc<dyn Producer<V>>,
}

impl<V> AsyncResourceBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(producer: Arc<dyn Producer<V>>) -> Self {
        Self {
            name: None,
            key_deriver: KeyDeriver::Canonical,
            producer,
        }
    }

    /// Sets the name reported in log events.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Replaces key derivation with `key_fn`, whose output is trusted as-is.
    ///
    /// The key decides which controllers share listener fan-out and when a parameter change
    /// starts a new invocation.
    #[must_use]
    pub fn key_fn(mut self, key_fn: impl Fn(&Args) -> Key + Send + Sync + 'static) -> Self {
        self.key_deriver = KeyDeriver::custom(key_fn);
        self
    }

    /// Builds the resource with a fresh listener registry.
    #[must_use]
    pub fn build(self) -> AsyncResource<V> {
        AsyncResource::from_parts(
            self.name.unwrap_or(DEFAULT_NAME),
            self.producer,
            self.key_deriver,
            ListenerRegistry::named(self.name.unwrap_or(DEFAULT_NAME)),
        )
    }
}

impl<V> fmt::Debug for AsyncResourceBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResourceBuilder")
            .field("name", &self.name)
            .field("key_deriver", &self.key_deriver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_secs_clamps_invalid_values() {
        assert_eq!(ttl_from_secs(0.0), Duration::ZERO);
        assert_eq!(ttl_from_secs(-1.0), Duration::ZERO);
        assert_eq!(ttl_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(ttl_from_secs(f64::INFINITY), Duration::MAX);
        assert_eq!(ttl_from_secs(1.5), Duration::from_millis(1500));
    }

    #[test]
    fn defaults() {
        let cache = CoalescingCache::<u32>::builder(Clock::new_frozen()).build();

        assert_eq!(cache.name(), DEFAULT_NAME);
        assert_eq!(cache.ttl(), Duration::MAX);
    }
}
