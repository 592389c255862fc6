use super::{BrokerConnection, MessageStream};
use crate::error::{EventBusErrorExt, Result};
use crate::session::Session;
use async_trait::async_trait;
use futures_util::StreamExt;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug)]
struct Sink {
    conn: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Debug, Default)]
struct QueueGroup {
    members: Vec<Sink>,
    next: usize,
}

#[derive(Debug, Default)]
struct Subject {
    plain: Vec<Sink>,
    queues: FxHashMap<String, QueueGroup>,
}

#[derive(Debug, Default)]
struct BrokerState {
    subjects: FxHashMap<String, Subject>,
}

/// In-process broker with plain and queue-group subscriptions.
///
/// Connections obtained from one `MemoryBroker` see each other's traffic, which lets
/// several [`BrokerBus`](super::BrokerBus) instances act like separate processes.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_conn: Arc<AtomicU64>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session on this broker.
    #[must_use]
    pub fn connect(&self) -> MemoryBrokerConnection {
        MemoryBrokerConnection {
            broker: Session::new(self.clone()),
            id: self.next_conn.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Delivers raw bytes on `subject`, bypassing any encoding. Returns the number of
    /// subscriptions reached.
    pub fn publish_raw(&self, subject: &str, payload: &[u8]) -> usize {
        let mut state = self.state.lock();
        let Some(subject) = state.subjects.get_mut(subject) else {
            return 0;
        };

        let mut reached = 0;
        subject.plain.retain(|sink| sink.tx.send(payload.to_vec()).is_ok());
        reached += subject.plain.len();

        for group in subject.queues.values_mut() {
            // Skip members whose receiver is gone until one accepts the message.
            while !group.members.is_empty() {
                let idx = group.next % group.members.len();
                if group.members[idx].tx.send(payload.to_vec()).is_ok() {
                    group.next = idx + 1;
                    reached += 1;
                    break;
                }
                group.members.remove(idx);
            }
        }
        reached
    }

    fn add_sink(&self, subject: &str, queue_group: Option<&str>, sink: Sink) {
        let mut state = self.state.lock();
        let subject = state.subjects.entry(subject.to_owned()).or_default();
        match queue_group {
            Some(group) => subject.queues.entry(group.to_owned()).or_default().members.push(sink),
            None => subject.plain.push(sink),
        }
    }

    fn remove_connection(&self, conn: u64) {
        let mut state = self.state.lock();
        for subject in state.subjects.values_mut() {
            subject.plain.retain(|s| s.conn != conn);
            for group in subject.queues.values_mut() {
                group.members.retain(|s| s.conn != conn);
            }
        }
    }
}

/// One session on a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryBrokerConnection {
    broker: Session<MemoryBroker>,
    id: u64,
}

impl MemoryBrokerConnection {
    fn broker(&self) -> Result<MemoryBroker> {
        self.broker.get().context("memory broker")
    }

    /// `false` once [`close`](BrokerConnection::close) has released the session.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.broker.is_open()
    }
}

#[async_trait]
impl BrokerConnection for MemoryBrokerConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.broker()?.publish_raw(subject, &payload);
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<MessageStream> {
        let broker = self.broker()?;
        let (tx, rx) = mpsc::unbounded_channel();
        broker.add_sink(subject, queue_group, Sink { conn: self.id, tx });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<()> {
        if let Some(broker) = self.broker.take() {
            broker.remove_connection(self.id);
        }
        Ok(())
    }
}
