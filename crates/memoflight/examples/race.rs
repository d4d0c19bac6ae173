// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shows that a slow, outdated request never overwrites the state of a newer one.
//!
//! The subscriber first asks for a slow query, then switches to a fast one. The fast result
//! lands first; when the slow result arrives later it is discarded.

use std::time::Duration;

use memoflight::{Args, AsyncResource, Error, InvocationOutcome, Value, args, producer_fn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let search = AsyncResource::builder(producer_fn(|args: Args| async move {
        let (query, delay_ms) = match (args.get(0), args.get(1)) {
            (Some(Value::String(query)), Some(Value::Number(delay))) => (query.clone(), delay.as_u64().unwrap_or(0)),
            _ => return Err("expected a query and a delay".to_string()),
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(format!("results for {query}"))
    }))
    .name("search")
    .build();

    let controller = search.controller();
    let mut updates = controller.watch();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            println!(
                "state: phase={:?} loading={} result={:?}",
                state.phase(),
                state.is_loading(),
                state.result()
            );
        }
    });

    let slow = tokio::spawn(controller.subscribe(args!["rust", 300])?);
    let fast = tokio::spawn(controller.subscribe(args!["rust async", 50])?);

    let fast_outcome = fast.await.map_err(Error::producer)?;
    let slow_outcome = slow.await.map_err(Error::producer)?;
    assert_eq!(fast_outcome, InvocationOutcome::Applied);
    assert_eq!(slow_outcome, InvocationOutcome::Superseded);

    println!("final result: {:?}", controller.snapshot().result());

    controller.dispose();
    drop(controller);
    watcher.await.map_err(Error::producer)?;
    Ok(())
}
