use crate::args::PublishArgs;
use anyhow::{Context, Result};
use evbus::domain::Event;
use evbus::event_bus::{CancellationToken, EventBus};
use serde_json::Value;

/// Publishes `args.count` events and returns their ids.
pub async fn run(bus: &dyn EventBus, args: &PublishArgs) -> Result<Vec<String>> {
    let data: Value = serde_json::from_str(&args.data).context("--data is not valid JSON")?;
    let ctx = CancellationToken::new();

    let mut ids = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        let mut event = Event::new(&args.topic, data.clone());
        if let Some(source) = &args.source {
            event = event.with_source(source);
        }
        ids.push(event.id.clone());
        bus.publish_to(&ctx, &args.topic, event)
            .await
            .with_context(|| format!("publish to '{}' failed", args.topic))?;
    }
    Ok(ids)
}
