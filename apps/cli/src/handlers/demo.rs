use crate::args::DemoArgs;
use anyhow::{Context, Result, bail};
use evbus::domain::{Event, SubscriptionOptions};
use evbus::event_bus::{CancellationToken, EventBus, handler};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const TOPIC: &str = "evbus.demo";
const GROUP: &str = "demo-workers";
const SETTLE: Duration = Duration::from_secs(10);

/// Per-member delivery counts of one demo run.
#[derive(Debug)]
pub struct Distribution {
    pub per_member: Vec<usize>,
}

impl Distribution {
    #[must_use]
    pub fn total(&self) -> usize {
        self.per_member.iter().sum()
    }
}

/// Subscribes `members` group members, publishes `events` events and waits
/// until every event has been handled once.
pub async fn run(bus: &dyn EventBus, args: &DemoArgs) -> Result<Distribution> {
    let members = usize::from(args.members);
    let counters: Vec<Arc<AtomicUsize>> = (0..members).map(|_| Arc::default()).collect();
    let handled = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(Notify::new());

    let mut subscriptions = Vec::with_capacity(members);
    for (member, counter) in counters.iter().enumerate() {
        let (counter, handled, done) = (Arc::clone(counter), Arc::clone(&handled), Arc::clone(&done));
        let expected = args.events;
        let options =
            SubscriptionOptions::new().with_group(GROUP).with_name(format!("member-{member}"));
        let sub = bus
            .subscribe(
                TOPIC,
                handler(move |_ctx, _event| {
                    let (counter, handled, done) =
                        (Arc::clone(&counter), Arc::clone(&handled), Arc::clone(&done));
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if handled.fetch_add(1, Ordering::SeqCst) + 1 >= expected {
                            done.notify_one();
                        }
                    }
                }),
                options,
            )
            .await
            .context("demo subscribe failed")?;
        subscriptions.push(sub);
    }

    let ctx = CancellationToken::new();
    for seq in 0..args.events {
        bus.publish(&ctx, Event::new(TOPIC, json!({ "seq": seq }))).await?;
    }

    if args.events > 0 && tokio::time::timeout(SETTLE, done.notified()).await.is_err() {
        bail!(
            "only {} of {} events were handled within {SETTLE:?}",
            handled.load(Ordering::SeqCst),
            args.events
        );
    }

    for sub in &subscriptions {
        sub.unsubscribe();
    }
    Ok(Distribution { per_member: counters.iter().map(|c| c.load(Ordering::SeqCst)).collect() })
}
