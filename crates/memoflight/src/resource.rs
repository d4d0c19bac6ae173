// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crate::builder::AsyncResourceBuilder;
use crate::{AsyncStateController, KeyDeriver, ListenerRegistry, Memoized, Producer};

/// Binds one producer to one listener registry and hands out controllers sharing both.
///
/// A value settled by any controller of a resource is fanned out to every other controller of
/// the same resource currently subscribed to the same key.
///
/// # Examples
///
/// ```
/// use memoflight::{AsyncResource, args, producer_fn};
///
/// let resource = AsyncResource::new(producer_fn(|_| async { Ok::<_, std::io::Error>(5) }));
/// let first = resource.controller();
/// let second = resource.controller();
///
/// futures::executor::block_on(async {
///     second.subscribe(args!["k"])?.await;
///     first.subscribe(args!["k"])?.await;
///     Ok::<(), memoflight::Error>(())
/// })?;
///
/// assert_eq!(first.snapshot().result(), Some(&5));
/// assert_eq!(second.snapshot().result(), Some(&5));
/// # Ok::<(), memoflight::Error>(())
/// ```
pub struct AsyncResource<V> {
    name: &'static str,
    producer: Arc<dyn Producer<V>>,
    key_deriver: KeyDeriver,
    registry: ListenerRegistry<V>,
}

impl<V> AsyncResource<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a resource around `producer` with canonical key derivation.
    #[must_use]
    pub fn new(producer: impl Producer<V> + 'static) -> Self {
        Self::builder(producer).build()
    }

    /// Creates a builder for a resource around `producer`.
    #[must_use]
    pub fn builder(producer: impl Producer<V> + 'static) -> AsyncResourceBuilder<V> {
        AsyncResourceBuilder::new(Arc::new(producer))
    }

    /// Creates a resource around a memoized producer.
    ///
    /// The resource takes its name and key derivation from the cache, so controllers and the
    /// cache agree on which arguments are the same request.
    #[must_use]
    pub fn cached(memoized: Memoized<V>) -> Self {
        let name = memoized.cache().name();
        let key_deriver = memoized.cache().key_deriver().clone();
        Self::from_parts(name, Arc::new(memoized), key_deriver, ListenerRegistry::named(name))
    }

    pub(crate) fn from_parts(
        name: &'static str,
        producer: Arc<dyn Producer<V>>,
        key_deriver: KeyDeriver,
        registry: ListenerRegistry<V>,
    ) -> Self {
        Self {
            name,
            producer,
            key_deriver,
            registry,
        }
    }

    /// Creates a new idle controller.
    #[must_use]
    pub fn controller(&self) -> AsyncStateController<V> {
        AsyncStateController::new(
            self.name,
            Arc::clone(&self.producer),
            self.key_deriver.clone(),
            self.registry.clone(),
        )
    }

    /// Returns the registry shared by this resource's controllers.
    #[must_use]
    pub fn registry(&self) -> &ListenerRegistry<V> {
        &self.registry
    }

    /// Returns the name reported in log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<V> Clone for AsyncResource<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            producer: Arc::clone(&self.producer),
            key_deriver: self.key_deriver.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<V> fmt::Debug for AsyncResource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResource")
            .field("name", &self.name)
            .field("key_deriver", &self.key_deriver)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use tick::Clock;

    use super::*;
    use crate::{CoalescingCache, Key, args, producer_fn};

    #[test]
    fn builder_key_fn_controls_keys() {
        let resource = AsyncResource::builder(producer_fn(|_| async { Ok::<_, std::io::Error>(1) }))
            .name("users")
            .key_fn(|_| Key::new("everything"))
            .build();
        let controller = resource.controller();

        block_on(controller.subscribe(args!["a"]).unwrap());

        assert_eq!(resource.name(), "users");
        assert_eq!(controller.key(), Some(Key::new("everything")));
        assert!(controller.set_params(args!["b"]).unwrap().is_none());
    }

    #[test]
    fn cached_resource_uses_cache_key_function() {
        let memoized = CoalescingCache::builder(Clock::new_frozen())
            .name("cached")
            .key_fn(|args| Key::new(format!("n={}", args.len())))
            .wrap(producer_fn(|_| async { Ok::<_, std::io::Error>(2) }));
        let resource = AsyncResource::cached(memoized.clone());
        let controller = resource.controller();

        block_on(controller.subscribe(args![1, 2]).unwrap());

        assert_eq!(resource.name(), "cached");
        assert_eq!(controller.key(), Some(Key::new("n=2")));
        assert!(memoized.cache().contains_key(&Key::new("n=2")));
    }
}
