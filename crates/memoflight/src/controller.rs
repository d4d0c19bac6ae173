// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generation-guarded consumption of producer results.
//!
//! Every invocation a controller starts is tagged with the controller's generation at that
//! moment. Starting another invocation, or disposing the controller, bumps the generation, and an
//! invocation whose tag no longer matches when it settles is dropped without touching the state.
//! This makes the state immune to out-of-order completion of superseded requests.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::listeners::ListenerId;
use crate::producer::ProducerFuture;
use crate::telemetry::{Activity, emit};
use crate::{Args, Error, Key, KeyDeriver, ListenerRegistry, Phase, Producer, Result, StateSnapshot};

/// Drives one subscriber's requests against a producer.
///
/// Created by [`AsyncResource::controller`](crate::AsyncResource::controller). Requests return an
/// [`Invocation`] future: the producer is called right away, and the outcome is applied to the
/// controller's state when the invocation is polled to completion, provided no newer request or
/// disposal happened in between. Await the invocation or spawn it on a runtime.
///
/// Dropping the controller disposes it.
///
/// # Examples
///
/// ```
/// use memoflight::{AsyncResource, InvocationOutcome, Phase, args, producer_fn};
///
/// let resource = AsyncResource::new(producer_fn(|args: memoflight::Args| async move {
///     Ok::<_, std::io::Error>(format!("hello {}", args.len()))
/// }));
/// let controller = resource.controller();
///
/// let outcome = futures::executor::block_on(controller.subscribe(args!["world"])?);
/// assert_eq!(outcome, InvocationOutcome::Applied);
///
/// let state = controller.snapshot();
/// assert_eq!(state.phase(), Phase::SettledValue);
/// assert_eq!(state.result().map(String::as_str), Some("hello 1"));
/// # Ok::<(), memoflight::Error>(())
/// ```
pub struct AsyncStateController<V: Clone> {
    shared: Arc<ControllerShared<V>>,
}

struct ControllerShared<V> {
    name: &'static str,
    producer: Arc<dyn Producer<V>>,
    key_deriver: KeyDeriver,
    registry: ListenerRegistry<V>,
    state: Mutex<ControllerState<V>>,
    sender: watch::Sender<StateSnapshot<V>>,
}

struct ControllerState<V> {
    generation: u64,
    phase: Phase,
    result: Option<V>,
    error: Option<Error>,
    subscription: Option<Subscription>,
}

struct Subscription {
    key: Key,
    params: Args,
    listener: ListenerId,
}

/// How an [`Invocation`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvocationOutcome {
    /// The outcome was applied to the controller's state.
    Applied,
    /// A newer request or disposal happened first; the outcome was discarded.
    Superseded,
}

/// A request started by an [`AsyncStateController`].
///
/// The producer is already running. Polling the invocation to completion applies its outcome.
#[must_use = "the outcome is only applied when the invocation is polled to completion"]
pub struct Invocation {
    generation: u64,
    future: BoxFuture<'static, InvocationOutcome>,
}

impl Invocation {
    /// Returns the generation this invocation was tagged with.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Future for Invocation {
    type Output = InvocationOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation").field("generation", &self.generation).finish_non_exhaustive()
    }
}

impl<V> AsyncStateController<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str, producer: Arc<dyn Producer<V>>, key_deriver: KeyDeriver, registry: ListenerRegistry<V>) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                name,
                producer,
                key_deriver,
                registry,
                state: Mutex::new(ControllerState {
                    generation: 0,
                    phase: Phase::Idle,
                    result: None,
                    error: None,
                    subscription: None,
                }),
                sender: watch::Sender::new(StateSnapshot::idle()),
            }),
        }
    }

    /// Starts an invocation for `params`, whether or not they changed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Disposed`](crate::ErrorKind::Disposed) after disposal, and
    /// [`ErrorKind::InvalidArguments`](crate::ErrorKind::InvalidArguments) when no key can be
    /// derived from `params`. The state is left untouched in both cases.
    pub fn subscribe(&self, params: Args) -> Result<Invocation> {
        self.ensure_live()?;
        let key = self.shared.key_deriver.derive(&params)?;
        self.start(key, params)
    }

    /// Replaces the parameters, starting an invocation only if their key changed.
    ///
    /// Returns `None` when the key is the one already subscribed.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn set_params(&self, params: Args) -> Result<Option<Invocation>> {
        self.ensure_live()?;
        let key = self.shared.key_deriver.derive(&params)?;
        let unchanged = self
            .shared
            .state
            .lock()
            .subscription
            .as_ref()
            .is_some_and(|subscription| subscription.key == key);
        if unchanged {
            return Ok(None);
        }
        self.start(key, params).map(Some)
    }

    /// Starts a new invocation with the current parameters, whatever the current phase.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Disposed`](crate::ErrorKind::Disposed) after disposal, and
    /// [`ErrorKind::NotSubscribed`](crate::ErrorKind::NotSubscribed) before the first
    /// subscription.
    pub fn retry(&self) -> Result<Invocation> {
        self.ensure_live()?;
        let (key, params) = self
            .shared
            .state
            .lock()
            .subscription
            .as_ref()
            .map(|subscription| (subscription.key.clone(), subscription.params.clone()))
            .ok_or_else(Error::not_subscribed)?;
        self.start(key, params)
    }

    /// Stops the controller. Pending invocations are superseded and no further requests are
    /// accepted. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    /// Returns `true` once the controller has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().phase == Phase::Disposed
    }

    /// Returns the key of the current subscription.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.shared
            .state
            .lock()
            .subscription
            .as_ref()
            .map(|subscription| subscription.key.clone())
    }

    /// Returns the current state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot<V> {
        ControllerShared::snapshot_of(&self.shared.state.lock())
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StateSnapshot<V>> {
        self.shared.sender.subscribe()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::disposed())
        } else {
            Ok(())
        }
    }

    fn start(&self, key: Key, params: Args) -> Result<Invocation> {
        let generation = {
            let mut state = self.shared.state.lock();
            if state.phase == Phase::Disposed {
                return Err(Error::disposed());
            }
            state.generation += 1;
            state.phase = Phase::Pending;
            state.result = None;
            state.error = None;

            if let Some(previous) = state.subscription.take() {
                self.shared.registry.unregister(&previous.key, previous.listener);
            }
            let listener = self.shared.registry.register(key.clone(), receiver(Arc::downgrade(&self.shared), key.clone()));
            state.subscription = Some(Subscription {
                key: key.clone(),
                params: params.clone(),
                listener,
            });

            self.shared.publish(&state);
            state.generation
        };
        emit(self.shared.name, Activity::Started, key.as_str());

        let produced = invoke(self.shared.producer.as_ref(), params);
        let shared = Arc::clone(&self.shared);
        let future = async move {
            let result = AssertUnwindSafe(produced)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(Error::panicked(payload.as_ref())));
            shared.settle(generation, &key, result)
        }
        .boxed();

        Ok(Invocation { generation, future })
    }
}

impl<V: Clone> Drop for AsyncStateController<V> {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl<V: Clone> fmt::Debug for AsyncStateController<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("AsyncStateController")
            .field("name", &self.shared.name)
            .field("generation", &state.generation)
            .field("phase", &state.phase)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> ControllerShared<V> {
    fn snapshot_of(state: &ControllerState<V>) -> StateSnapshot<V> {
        StateSnapshot {
            phase: state.phase,
            result: state.result.clone(),
            error: state.error.clone(),
            generation: state.generation,
        }
    }

    fn publish(&self, state: &ControllerState<V>) {
        self.sender.send_replace(Self::snapshot_of(state));
    }

    fn dispose(&self) {
        let mut state = self.state.lock();
        if state.phase == Phase::Disposed {
            return;
        }

        state.generation += 1;
        state.phase = Phase::Disposed;
        let key = state.subscription.take().map(|subscription| {
            self.registry.unregister(&subscription.key, subscription.listener);
            subscription.key
        });
        self.publish(&state);
        drop(state);

        emit(self.name, Activity::Disposed, key.as_ref().map_or("", Key::as_str));
    }
}

impl<V> ControllerShared<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn settle(&self, generation: u64, key: &Key, result: Result<V>) -> InvocationOutcome {
        let mut state = self.state.lock();
        if state.generation != generation {
            drop(state);
            emit(self.name, Activity::Superseded, key.as_str());
            return InvocationOutcome::Superseded;
        }

        match result {
            Ok(value) => {
                state.phase = Phase::SettledValue;
                state.result = Some(value.clone());
                state.error = None;
                self.publish(&state);
                drop(state);

                emit(self.name, Activity::Settled, key.as_str());
                self.registry.notify(key, &value);
            }
            Err(e) => {
                state.phase = Phase::SettledError;
                state.result = None;
                state.error = Some(e);
                self.publish(&state);
                drop(state);

                emit(self.name, Activity::Settled, key.as_str());
            }
        }
        InvocationOutcome::Applied
    }

    /// Applies a value fanned out by another invocation for the same key.
    ///
    /// Ignored unless the controller is still subscribed to `key`: a notification may already be
    /// running when the controller moves to other parameters.
    fn receive(&self, key: &Key, value: &V) {
        let mut state = self.state.lock();
        if !state.subscription.as_ref().is_some_and(|subscription| subscription.key == *key) {
            return;
        }
        match state.phase {
            Phase::Disposed => return,
            Phase::Pending => {}
            Phase::Idle | Phase::SettledValue | Phase::SettledError => state.phase = Phase::SettledValue,
        }
        state.result = Some(value.clone());
        state.error = None;
        self.publish(&state);
    }
}

fn receiver<V>(shared: Weak<ControllerShared<V>>, key: Key) -> impl Fn(&V) + Send + Sync + 'static
where
    V: Clone + Send + Sync + 'static,
{
    move |value| {
        if let Some(shared) = shared.upgrade() {
            shared.receive(&key, value);
        }
    }
}

/// Calls the producer, turning a panic during the call into a settled error.
fn invoke<V>(producer: &dyn Producer<V>, params: Args) -> ProducerFuture<V>
where
    V: Send + 'static,
{
    panic::catch_unwind(AssertUnwindSafe(|| producer.produce(params)))
        .unwrap_or_else(|payload| future::ready(Err(Error::panicked(payload.as_ref()))).boxed())
}
