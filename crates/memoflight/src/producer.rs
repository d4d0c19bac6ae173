// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::{Args, Error};

/// The future returned by a [`Producer`].
pub type ProducerFuture<V> = BoxFuture<'static, Result<V, Error>>;

/// An asynchronous function from an argument list to a value.
///
/// Producers are what caches and controllers call. Closures become producers through
/// [`producer_fn`]; a [`Memoized`](crate::Memoized) producer is itself a producer, so a cache can
/// sit between a controller and the real data source.
pub trait Producer<V>: Send + Sync {
    /// Starts producing a value for `args`.
    fn produce(&self, args: Args) -> ProducerFuture<V>;
}

impl<V, P> Producer<V> for Arc<P>
where
    P: Producer<V> + ?Sized,
{
    fn produce(&self, args: Args) -> ProducerFuture<V> {
        (**self).produce(args)
    }
}

/// A [`Producer`] backed by a closure. Created by [`producer_fn`].
pub struct FnProducer<F> {
    f: F,
}

impl<F> fmt::Debug for FnProducer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProducer").finish_non_exhaustive()
    }
}

/// Turns an async closure into a [`Producer`].
///
/// Errors returned by the closure are wrapped with [`ErrorKind::Producer`](crate::ErrorKind::Producer)
/// and stay reachable through `source()`. A panic, either while calling the closure or while
/// polling the future it returned, becomes an [`ErrorKind::ProducerPanicked`](crate::ErrorKind::ProducerPanicked)
/// error instead of unwinding into the caller.
///
/// # Examples
///
/// ```
/// use memoflight::{Producer, args, producer_fn};
///
/// let echo = producer_fn(|args: memoflight::Args| async move {
///     Ok::<_, std::io::Error>(args.len())
/// });
///
/// let len = futures::executor::block_on(echo.produce(args![1, 2, 3]))?;
/// assert_eq!(len, 3);
/// # Ok::<(), memoflight::Error>(())
/// ```
pub fn producer_fn<F, Fut, V, E>(f: F) -> FnProducer<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    FnProducer { f }
}

impl<F, Fut, V, E> Producer<V> for FnProducer<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn produce(&self, args: Args) -> ProducerFuture<V> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.f)(args))) {
            Ok(fut) => AssertUnwindSafe(fut)
                .catch_unwind()
                .map(|outcome| match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(Error::producer(e)),
                    Err(payload) => Err(Error::panicked(payload.as_ref())),
                })
                .boxed(),
            Err(payload) => future::ready(Err(Error::panicked(payload.as_ref()))).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use futures::executor::block_on;

    use super::*;
    use crate::{ErrorKind, args};

    #[test]
    fn value_passes_through() {
        let producer = producer_fn(|_| async { Ok::<_, std::io::Error>(42) });

        assert_eq!(block_on(producer.produce(args![])).unwrap(), 42);
    }

    #[test]
    fn error_is_wrapped_with_source() {
        let producer = producer_fn(|_| async { Err::<u32, _>(std::io::Error::other("offline")) });

        let error = block_on(producer.produce(args![])).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Producer);
        let source = error.source().unwrap();
        assert_eq!(source.downcast_ref::<std::io::Error>().unwrap().to_string(), "offline");
    }

    #[test]
    fn synchronous_panic_becomes_error() {
        let producer = producer_fn(|_| -> futures::future::Ready<Result<u32, std::io::Error>> { panic!("sync boom") });

        let error = block_on(producer.produce(args![])).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ProducerPanicked);
        assert!(error.to_string().contains("sync boom"));
    }

    #[test]
    fn asynchronous_panic_becomes_error() {
        let producer = producer_fn(|_| async {
            if true {
                panic!("async boom");
            }
            Ok::<u32, std::io::Error>(1)
        });

        let error = block_on(producer.produce(args![])).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ProducerPanicked);
        assert!(error.to_string().contains("async boom"));
    }

    #[test]
    fn shared_producer_delegates() {
        let producer: Arc<dyn Producer<usize>> = Arc::new(producer_fn(|args: Args| async move { Ok::<_, std::io::Error>(args.len()) }));

        assert_eq!(block_on(producer.produce(args!["a", "b"])).unwrap(), 2);
    }
}
