// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The coalescing TTL cache.
//!
//! A [`CoalescingCache`] keeps two maps keyed by [`Key`]: settled entries with their expiry, and
//! the computations currently in flight. A [`Memoized`] producer consults both before calling the
//! producer it wraps, so callers either get a live value, join the running computation for their
//! key, or start the one computation everybody else will join.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use tick::Clock;

use crate::builder::CacheBuilder;
use crate::entry::CacheEntry;
use crate::producer::ProducerFuture;
use crate::telemetry::{Activity, emit};
use crate::{Args, Error, Key, KeyDeriver, Producer, UnserializableArgumentError};

type Computation<V> = BoxFuture<'static, Result<V, Error>>;

/// A TTL cache that runs at most one producer invocation per key at a time.
///
/// The cache is a cheap handle: clones share the same entries. Attach a producer with
/// [`memoize`](Self::memoize) or build one directly with [`CacheBuilder::wrap`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoflight::{CoalescingCache, args, producer_fn};
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let lookup = CoalescingCache::builder(control.to_clock())
///     .ttl(Duration::from_secs(30))
///     .wrap(producer_fn(|_| async { Ok::<_, std::io::Error>("profile") }));
///
/// let value = futures::executor::block_on(lookup.call(args!["alice"]))?;
/// assert_eq!(value, "profile");
/// assert_eq!(lookup.cache().len(), 1);
/// # Ok::<(), memoflight::Error>(())
/// ```
pub struct CoalescingCache<V> {
    inner: Arc<CacheInner<V>>,
}

struct CacheInner<V> {
    name: &'static str,
    clock: Clock,
    ttl: Duration,
    key_deriver: KeyDeriver,
    maps: Mutex<Maps<V>>,
}

struct Maps<V> {
    entries: HashMap<Key, CacheEntry<V>>,
    in_flight: HashMap<Key, InFlight<V>>,
    next_flight: u64,
}

struct InFlight<V> {
    id: u64,
    computation: WeakShared<Computation<V>>,
}

impl<V> CoalescingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a builder for a cache reading time from `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> CacheBuilder<V> {
        CacheBuilder::new(clock)
    }

    pub(crate) fn new(name: &'static str, clock: Clock, ttl: Duration, key_deriver: KeyDeriver) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name,
                clock,
                ttl,
                key_deriver,
                maps: Mutex::new(Maps {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_flight: 0,
                }),
            }),
        }
    }

    /// Wraps `producer` so that its calls go through this cache.
    #[must_use]
    pub fn memoize(&self, producer: impl Producer<V> + 'static) -> Memoized<V> {
        Memoized {
            cache: self.clone(),
            producer: Arc::new(producer),
        }
    }

    /// Returns the name used in log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub(crate) fn key_deriver(&self) -> &KeyDeriver {
        &self.inner.key_deriver
    }

    /// Returns how long a settled value stays fresh.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Removes the entry for `args`, and forgets any computation in flight for it.
    ///
    /// A forgotten computation still settles for the callers already waiting on it, but its
    /// value is not stored. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error when no key can be derived from `args`.
    pub fn invalidate(&self, args: &Args) -> Result<bool, UnserializableArgumentError> {
        let key = self.inner.key_deriver.derive(args)?;
        Ok(self.invalidate_key(&key))
    }

    /// Removes the entry for `key`, and forgets any computation in flight for it.
    pub fn invalidate_key(&self, key: &Key) -> bool {
        let mut maps = self.inner.maps.lock();
        let entry = maps.entries.remove(key).is_some();
        let flight = maps.in_flight.remove(key).is_some();
        entry || flight
    }

    /// Removes every entry and forgets every computation in flight.
    pub fn clear(&self) {
        let mut maps = self.inner.maps.lock();
        maps.entries.clear();
        maps.in_flight.clear();
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.inner.clock.instant();
        self.inner.maps.lock().entries.values().filter(|entry| entry.is_live(now)).count()
    }

    /// Returns `true` when the cache holds no live entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when a live entry exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &Key) -> bool {
        let now = self.inner.clock.instant();
        self.inner.maps.lock().entries.get(key).is_some_and(|entry| entry.is_live(now))
    }

    /// Returns the number of computations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.maps.lock().in_flight.len()
    }
}

impl<V> Clone for CoalescingCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for CoalescingCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingCache")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .field("key_deriver", &self.inner.key_deriver)
            .finish_non_exhaustive()
    }
}

impl<V> CacheInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn settle(&self, key: &Key, id: u64, result: &Result<V, Error>) {
        let now = self.clock.instant();
        let mut maps = self.maps.lock();

        if let Err(e) = result {
            emit(self.name, Activity::Error, &e.to_string());
        }

        // Invalidated or cleared while running.
        if !maps.forget(key, id) {
            return;
        }

        if let Ok(value) = result
            && !self.ttl.is_zero()
        {
            maps.entries.insert(key.clone(), CacheEntry::new(value.clone(), now, self.ttl));
            emit(self.name, Activity::Inserted, key.as_str());
        }
    }
}

impl<V> Maps<V> {
    /// Removes the in-flight registration for `key` if it still belongs to flight `id`.
    fn forget(&mut self, key: &Key, id: u64) -> bool {
        let owned = self.in_flight.get(key).is_some_and(|flight| flight.id == id);
        if owned {
            self.in_flight.remove(key);
        }
        owned
    }
}

/// Owned by a running computation; unregisters it if it is dropped before settling.
///
/// A computation is dropped unsettled when every caller abandoned it. Dropping happens outside
/// the maps lock: the cache never holds a strong handle to a computation while locked.
struct Flight<V> {
    inner: Arc<CacheInner<V>>,
    key: Key,
    id: u64,
    settled: bool,
}

impl<V> Flight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn settle(&mut self, result: &Result<V, Error>) {
        self.settled = true;
        self.inner.settle(&self.key, self.id, result);
    }
}

impl<V> Drop for Flight<V> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.maps.lock().forget(&self.key, self.id);
        }
    }
}

/// A producer whose calls are memoized and coalesced by a [`CoalescingCache`].
pub struct Memoized<V> {
    cache: CoalescingCache<V>,
    producer: Arc<dyn Producer<V>>,
}

impl<V> Memoized<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value for `args`, calling the wrapped producer only when needed.
    ///
    /// A live entry is returned without calling the producer. When a computation for the same
    /// key is already running, the returned future joins it. Otherwise a new computation starts
    /// when the returned future is first polled. Failures are handed to every joined caller and
    /// are never stored.
    pub fn call(&self, args: Args) -> impl Future<Output = Result<V, Error>> + Send + 'static {
        self.lookup(args)
    }

    /// Returns the cache backing this producer.
    #[must_use]
    pub fn cache(&self) -> &CoalescingCache<V> {
        &self.cache
    }

    fn lookup(&self, args: Args) -> ProducerFuture<V> {
        let inner = &self.cache.inner;
        let key = match inner.key_deriver.derive(&args) {
            Ok(key) => key,
            Err(e) => return future::ready(Err(e.into())).boxed(),
        };

        let now = inner.clock.instant();
        let mut guard = inner.maps.lock();
        let maps = &mut *guard;

        match maps.entries.get(&key).map(|entry| entry.is_live(now).then(|| entry.value().clone())) {
            Some(Some(value)) => {
                emit(inner.name, Activity::Hit, key.as_str());
                return future::ready(Ok(value)).boxed();
            }
            Some(None) => {
                maps.entries.remove(&key);
                emit(inner.name, Activity::Expired, key.as_str());
            }
            None => {}
        }

        if let Some(flight) = maps.in_flight.get(&key) {
            if let Some(running) = flight.computation.upgrade() {
                emit(inner.name, Activity::Coalesced, key.as_str());
                return running.boxed();
            }
            maps.in_flight.remove(&key);
        }

        emit(inner.name, Activity::Miss, key.as_str());
        let id = maps.next_flight;
        maps.next_flight += 1;

        let computation = self.start(key.clone(), id, args);
        if let Some(weak) = computation.downgrade() {
            maps.in_flight.insert(key, InFlight { id, computation: weak });
        }
        computation.boxed()
    }

    fn start(&self, key: Key, id: u64, args: Args) -> Shared<Computation<V>> {
        let mut flight = Flight {
            inner: Arc::clone(&self.cache.inner),
            key,
            id,
            settled: false,
        };
        let producer = Arc::clone(&self.producer);

        async move {
            let result = AssertUnwindSafe(async { producer.produce(args).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(Error::panicked(payload.as_ref())));
            flight.settle(&result);
            result
        }
        .boxed()
        .shared()
    }
}

impl<V> Producer<V> for Memoized<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn produce(&self, args: Args) -> ProducerFuture<V> {
        self.lookup(args)
    }
}

impl<V> Clone for Memoized<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<V> fmt::Debug for Memoized<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized").field("cache", &self.cache).finish_non_exhaustive()
    }
}

/// Wraps `producer` in a new cache whose entries stay fresh for `ttl_secs` seconds.
///
/// A TTL that is zero, negative or NaN makes every entry stale as soon as it settles; concurrent
/// calls are still coalesced.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// use memoflight::{args, producer_fn, wrap};
/// use tick::Clock;
///
/// let calls = Arc::new(AtomicU32::new(0));
/// let counter = Arc::clone(&calls);
/// let next = wrap(
///     Clock::new_frozen(),
///     producer_fn(move |_| {
///         let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
///         async move { Ok::<_, std::io::Error>(n) }
///     }),
///     1.0,
/// );
///
/// futures::executor::block_on(async {
///     assert_eq!(next.call(args![]).await?, 1);
///     assert_eq!(next.call(args![]).await?, 1);
///     Ok::<(), memoflight::Error>(())
/// })?;
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// # Ok::<(), memoflight::Error>(())
/// ```
#[must_use]
pub fn wrap<V>(clock: Clock, producer: impl Producer<V> + 'static, ttl_secs: f64) -> Memoized<V>
where
    V: Clone + Send + Sync + 'static,
{
    CoalescingCache::builder(clock).ttl_secs(ttl_secs).wrap(producer)
}
