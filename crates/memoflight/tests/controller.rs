// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the generation-guarded state controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use memoflight::{Args, AsyncResource, Error, ErrorKind, InvocationOutcome, Phase, Producer, ProducerFuture, Value, args, producer_fn};

type TestResult = Result<(), Error>;

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    futures::executor::block_on(f)
}

/// Returns 1, 2, 3, ... on successive calls.
fn sequence() -> impl Producer<u32> + 'static {
    let calls = AtomicU32::new(0);
    producer_fn(move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok::<_, std::io::Error>(n) }
    })
}

/// A producer whose calls complete when the test sends through the matching channel.
///
/// Calls are matched by their first argument.
#[derive(Default)]
struct Manual {
    pending: Mutex<HashMap<String, oneshot::Receiver<Result<u32, String>>>>,
}

impl Manual {
    fn prepare(&self, label: &str) -> oneshot::Sender<Result<u32, String>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(label.to_string(), rx);
        tx
    }
}

impl Producer<u32> for Manual {
    fn produce(&self, args: Args) -> ProducerFuture<u32> {
        let label = match args.get(0) {
            Some(Value::String(label)) => label.clone(),
            _ => String::new(),
        };
        let rx = self.pending.lock().unwrap().remove(&label);
        Box::pin(async move {
            match rx {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_canceled| Err("sender dropped".to_string()))
                    .map_err(Error::producer),
                None => Err(Error::producer(format!("unexpected call for {label}"))),
            }
        })
    }
}

#[test]
fn subscribe_then_retry_yields_next_value() -> TestResult {
    let resource = AsyncResource::new(sequence());
    let controller = resource.controller();

    block_on(async {
        assert_eq!(controller.subscribe(args!["k"])?.await, InvocationOutcome::Applied);
        assert_eq!(controller.snapshot().result(), Some(&1));

        assert_eq!(controller.retry()?.await, InvocationOutcome::Applied);
        let state = controller.snapshot();
        assert_eq!(state.result(), Some(&2));
        assert_eq!(state.phase(), Phase::SettledValue);
        assert!(!state.is_loading());
        Ok(())
    })
}

#[test]
fn later_request_wins_even_when_earlier_settles_last() -> TestResult {
    let manual = Arc::new(Manual::default());
    let first_tx = manual.prepare("firstValue");
    let second_tx = manual.prepare("newValue");
    let resource = AsyncResource::new(Arc::clone(&manual));
    let controller = resource.controller();

    let first = controller.subscribe(args!["firstValue"])?;
    let second = controller.set_params(args!["newValue"])?.unwrap();
    assert!(first.generation() < second.generation());

    second_tx.send(Ok(2)).unwrap();
    assert_eq!(block_on(second), InvocationOutcome::Applied);
    assert_eq!(controller.snapshot().result(), Some(&2));

    first_tx.send(Ok(1)).unwrap();
    assert_eq!(block_on(first), InvocationOutcome::Superseded);

    let state = controller.snapshot();
    assert_eq!(state.result(), Some(&2));
    assert_eq!(state.phase(), Phase::SettledValue);
    Ok(())
}

#[test]
fn superseded_error_is_discarded() -> TestResult {
    let manual = Arc::new(Manual::default());
    let first_tx = manual.prepare("a");
    let second_tx = manual.prepare("b");
    let controller = AsyncResource::new(Arc::clone(&manual)).controller();

    let first = controller.subscribe(args!["a"])?;
    let second = controller.subscribe(args!["b"])?;

    first_tx.send(Err("late failure".to_string())).unwrap();
    assert_eq!(block_on(first), InvocationOutcome::Superseded);
    assert!(controller.snapshot().is_loading());
    assert!(controller.snapshot().error().is_none());

    second_tx.send(Ok(5)).unwrap();
    assert_eq!(block_on(second), InvocationOutcome::Applied);
    assert_eq!(controller.snapshot().result(), Some(&5));
    Ok(())
}

#[test]
fn synchronous_failure_settles_as_error() -> TestResult {
    let resource = AsyncResource::new(producer_fn(|_| -> futures::future::Ready<Result<u32, std::io::Error>> {
        panic!("cannot even start")
    }));
    let controller = resource.controller();

    let outcome = block_on(controller.subscribe(args![])?);

    assert_eq!(outcome, InvocationOutcome::Applied);
    let state = controller.snapshot();
    assert!(state.error().is_some());
    assert!(state.result().is_none());
    assert!(!state.is_loading());
    assert_eq!(state.phase(), Phase::SettledError);
    Ok(())
}

#[test]
fn error_clears_previous_result() -> TestResult {
    let manual = Arc::new(Manual::default());
    let ok_tx = manual.prepare("k");
    let controller = AsyncResource::new(Arc::clone(&manual)).controller();

    let first = controller.subscribe(args!["k"])?;
    ok_tx.send(Ok(1)).unwrap();
    block_on(first);
    assert_eq!(controller.snapshot().result(), Some(&1));

    let err_tx = manual.prepare("k");
    let retry = controller.retry()?;
    assert!(controller.snapshot().result().is_none());
    err_tx.send(Err("boom".to_string())).unwrap();
    block_on(retry);

    let state = controller.snapshot();
    assert_eq!(state.phase(), Phase::SettledError);
    assert_eq!(state.error().map(Error::kind), Some(ErrorKind::Producer));
    assert!(state.result().is_none());
    Ok(())
}

#[test]
fn settlement_after_dispose_changes_nothing() -> TestResult {
    let manual = Arc::new(Manual::default());
    let tx = manual.prepare("k");
    let resource = AsyncResource::new(Arc::clone(&manual));
    let controller = resource.controller();

    let invocation = controller.subscribe(args!["k"])?;
    controller.dispose();
    let disposed = controller.snapshot();

    tx.send(Ok(9)).unwrap();
    assert_eq!(block_on(invocation), InvocationOutcome::Superseded);

    let state = controller.snapshot();
    assert_eq!(state.phase(), Phase::Disposed);
    assert_eq!(state.generation(), disposed.generation());
    assert!(state.result().is_none());
    Ok(())
}

#[test]
fn invalid_params_leave_state_untouched() -> TestResult {
    let resource = AsyncResource::new(sequence());
    let controller = resource.controller();
    block_on(controller.subscribe(args!["ok"])?);

    let error = controller.set_params(args![Value::Undefined]).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidArguments);
    assert_eq!(controller.snapshot().result(), Some(&1));
    assert_eq!(controller.snapshot().phase(), Phase::SettledValue);
    Ok(())
}

#[test]
fn watch_observes_transitions() -> TestResult {
    let manual = Arc::new(Manual::default());
    let tx = manual.prepare("k");
    let controller = AsyncResource::new(Arc::clone(&manual)).controller();
    let mut updates = controller.watch();
    assert_eq!(updates.borrow_and_update().phase(), Phase::Idle);

    let invocation = controller.subscribe(args!["k"])?;
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().is_loading());

    tx.send(Ok(4)).unwrap();
    block_on(invocation);
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().result(), Some(&4));

    controller.dispose();
    assert_eq!(updates.borrow_and_update().phase(), Phase::Disposed);
    Ok(())
}

#[tokio::test]
async fn spawned_invocations_apply_in_generation_order() -> TestResult {
    let manual = Arc::new(Manual::default());
    let slow_tx = manual.prepare("slow");
    let fast_tx = manual.prepare("fast");
    let controller = AsyncResource::new(Arc::clone(&manual)).controller();

    let slow = tokio::spawn(controller.subscribe(args!["slow"])?);
    let fast = tokio::spawn(controller.subscribe(args!["fast"])?);

    fast_tx.send(Ok(2)).unwrap();
    assert_eq!(fast.await.unwrap(), InvocationOutcome::Applied);
    slow_tx.send(Ok(1)).unwrap();
    assert_eq!(slow.await.unwrap(), InvocationOutcome::Superseded);

    assert_eq!(controller.snapshot().result(), Some(&2));
    Ok(())
}
