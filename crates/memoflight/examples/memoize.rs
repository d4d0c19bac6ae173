// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memoizes a slow lookup with a short time-to-live.
//!
//! Five concurrent requests for the same profile share one backend call. Once the entry
//! expires, the next request calls the backend again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use memoflight::{Args, CoalescingCache, Error, Value, args, producer_fn};
use tick::Clock;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let backend_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&backend_calls);

    let profiles = CoalescingCache::builder(Clock::new_tokio())
        .name("profiles")
        .ttl(Duration::from_millis(300))
        .wrap(producer_fn(move |args: Args| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                // Simulate a slow database query
                tokio::time::sleep(Duration::from_millis(100)).await;
                let user = match args.get(0) {
                    Some(Value::String(user)) => user.clone(),
                    _ => return Err("expected a user name".to_string()),
                };
                Ok(format!("profile of {user} (backend call #{call})"))
            }
        }));

    let requests: Vec<_> = (0..5).map(|_| tokio::spawn(profiles.call(args!["alice"]))).collect();
    for (i, request) in requests.into_iter().enumerate() {
        let profile = request.await.map_err(Error::producer)??;
        println!("request {i}: {profile}");
    }

    println!("cached: {}", profiles.call(args!["alice"]).await?);

    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("after expiry: {}", profiles.call(args!["alice"]).await?);

    println!("backend was called {} time(s)", backend_calls.load(Ordering::SeqCst));
    Ok(())
}
