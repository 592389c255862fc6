#![allow(dead_code)]

use evbus_domain::Event;
use evbus_domain::config::{AckPolicy, DispatchConfig, RedisStreamConfig};
use evbus_event_bus::{
    BrokerBus, CancellationToken, EventBus, Handler, InMemoryBus, MemoryBroker,
    MemoryBrokerConnection, MemoryLog, StreamBus, handler,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(3);
pub const QUIET: Duration = Duration::from_millis(150);

pub fn event(id: &str, topic: &str) -> Event {
    Event::new(topic, json!({ "key": "value" })).with_id(id)
}

pub fn ctx() -> CancellationToken {
    CancellationToken::new()
}

pub fn cancelled_ctx() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

/// Stream settings with short blocks so tests never wait on the defaults.
pub fn stream_config(ack_policy: AckPolicy) -> RedisStreamConfig {
    RedisStreamConfig { block_ms: 50, error_backoff_ms: 20, ack_policy, ..RedisStreamConfig::default() }
}

pub fn stream_bus(log: &MemoryLog) -> StreamBus<MemoryLog> {
    StreamBus::new(log.clone(), &stream_config(AckPolicy::OnDispatch), &DispatchConfig::default())
}

pub fn broker_bus(broker: &MemoryBroker) -> BrokerBus<MemoryBrokerConnection> {
    BrokerBus::new(broker.connect(), &DispatchConfig::default())
}

/// One bus per backend, each on its own in-process substrate.
pub fn all_buses() -> Vec<(&'static str, Arc<dyn EventBus>)> {
    vec![
        ("memory", Arc::new(InMemoryBus::new())),
        ("broker", Arc::new(broker_bus(&MemoryBroker::new()))),
        ("stream", Arc::new(stream_bus(&MemoryLog::new()))),
    ]
}

/// Collects every delivered event, tagged with the recorder slot that received it.
#[derive(Debug)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<(usize, Arc<Event>)>,
    rx: mpsc::UnboundedReceiver<(usize, Arc<Event>)>,
}

impl Default for Recorder {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> Handler {
        self.tagged(0)
    }

    pub fn tagged(&self, slot: usize) -> Handler {
        let tx = self.tx.clone();
        handler(move |_ctx, event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((slot, event));
            }
        })
    }

    pub async fn next(&mut self) -> Arc<Event> {
        self.next_tagged().await.1
    }

    pub async fn next_tagged(&mut self) -> (usize, Arc<Event>) {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("recorder channel closed")
    }

    pub async fn take(&mut self, n: usize) -> Vec<(usize, Arc<Event>)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.next_tagged().await);
        }
        out
    }

    pub async fn assert_quiet(&mut self) {
        if let Ok(Some((_, event))) = tokio::time::timeout(QUIET, self.rx.recv()).await {
            panic!("unexpected delivery: {event:?}");
        }
    }
}

/// Polls `check` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
