use crate::args::ListenArgs;
use anyhow::{Context, Result};
use evbus::domain::SubscriptionOptions;
use evbus::event_bus::{EventBus, codec, handler};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Prints every delivered event as one JSON line until Ctrl-C or the deadline.
/// Returns how many events were printed.
pub async fn run(bus: &dyn EventBus, args: &ListenArgs) -> Result<usize> {
    let mut options = SubscriptionOptions::new();
    if let Some(group) = &args.group {
        options = options.with_group(group);
    }
    if let Some(name) = &args.name {
        options = options.with_name(name);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = bus
        .subscribe(
            &args.topic,
            handler(move |_ctx, event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                }
            }),
            options,
        )
        .await
        .with_context(|| format!("subscribe to '{}' failed", args.topic))?;
    info!(topic = %args.topic, group = subscription.group(), "listening");

    let deadline = tokio::time::sleep(args.duration.map_or(Duration::MAX, Duration::from_secs));
    tokio::pin!(deadline);

    let mut printed = 0;
    loop {
        tokio::select! {
            () = &mut deadline => break,
            res = tokio::signal::ctrl_c() => {
                if let Err(error) = res {
                    warn!(%error, "failed to listen for Ctrl-C");
                }
                break;
            },
            next = rx.recv() => {
                let Some(event) = next else { break };
                let line = codec::encode(&event)?;
                println!("{}", String::from_utf8_lossy(&line));
                printed += 1;
            },
        }
    }

    subscription.unsubscribe();
    Ok(printed)
}
