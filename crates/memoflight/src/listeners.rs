// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::telemetry::{Activity, DEFAULT_NAME, emit};
use crate::{Key, ListenerFanoutError};

type Listener<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Identifies one registration in a [`ListenerRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Result callbacks grouped by key.
///
/// When a value settles for a key, every callback registered under that key is called with it,
/// in registration order. Controllers created by the same [`AsyncResource`](crate::AsyncResource)
/// share one registry, which is how a value fetched by one controller reaches the others.
///
/// A panicking callback is caught and logged; the remaining callbacks still run.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// use memoflight::{Key, ListenerRegistry};
///
/// let registry = ListenerRegistry::<u32>::new();
/// let seen = Arc::new(AtomicU32::new(0));
/// let sink = Arc::clone(&seen);
/// let id = registry.register(Key::new("k"), move |v| sink.store(*v, Ordering::SeqCst));
///
/// registry.notify(&Key::new("k"), &7);
/// assert_eq!(seen.load(Ordering::SeqCst), 7);
///
/// assert!(registry.unregister(&Key::new("k"), id));
/// assert_eq!(registry.listener_count(&Key::new("k")), 0);
/// ```
pub struct ListenerRegistry<V> {
    inner: Arc<RegistryInner<V>>,
}

struct RegistryInner<V> {
    name: &'static str,
    listeners: Mutex<Listeners<V>>,
}

struct Listeners<V> {
    by_key: HashMap<Key, Vec<(ListenerId, Listener<V>)>>,
    next_id: u64,
}

impl<V> ListenerRegistry<V> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::named(DEFAULT_NAME)
    }

    pub(crate) fn named(name: &'static str) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name,
                listeners: Mutex::new(Listeners {
                    by_key: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Adds `listener` under `key`, after every listener already registered there.
    pub fn register(&self, key: Key, listener: impl Fn(&V) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.inner.listeners.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.by_key.entry(key).or_default().push((id, Arc::new(listener)));
        id
    }

    /// Removes the listener registered as `id` under `key`. Returns whether it was found.
    pub fn unregister(&self, key: &Key, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(registered) = listeners.by_key.get_mut(key) else {
            return false;
        };

        let before = registered.len();
        registered.retain(|(registered_id, _)| *registered_id != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            listeners.by_key.remove(key);
        }
        removed
    }

    /// Returns how many listeners are registered under `key`.
    #[must_use]
    pub fn listener_count(&self, key: &Key) -> usize {
        self.inner.listeners.lock().by_key.get(key).map_or(0, Vec::len)
    }

    /// Calls every listener registered under `key` with `value`.
    ///
    /// Listeners run outside the registry lock, so they may register or unregister listeners
    /// themselves. Changes made while a notification is running apply to the next one.
    pub fn notify(&self, key: &Key, value: &V) {
        let snapshot: Vec<Listener<V>> = self
            .inner
            .listeners
            .lock()
            .by_key
            .get(key)
            .map(|registered| registered.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
                let error = ListenerFanoutError::from_panic(key, payload.as_ref());
                emit(self.inner.name, Activity::ListenerFailed, &error.to_string());
            }
        }
    }
}

impl<V> Default for ListenerRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for ListenerRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for ListenerRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.listeners.lock();
        f.debug_struct("ListenerRegistry")
            .field("name", &self.inner.name)
            .field("keys", &listeners.by_key.len())
            .finish()
    }
}
