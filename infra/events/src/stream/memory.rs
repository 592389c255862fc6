use super::{GroupCursor, GroupStatus, StreamEntry, StreamLog};
use crate::error::{EventBusError, Result};
use async_trait::async_trait;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct StoredEntry {
    seq: u64,
    payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: u64,
    // seq -> consumer that holds it
    pending: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct LogStream {
    entries: Vec<StoredEntry>,
    groups: FxHashMap<String, GroupState>,
}

impl LogStream {
    fn last_seq(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.seq)
    }

    fn after(&self, seq: u64) -> impl Iterator<Item = &StoredEntry> {
        let start = self.entries.partition_point(|e| e.seq <= seq);
        self.entries[start..].iter()
    }

    fn entry(&self, seq: u64) -> Option<&StoredEntry> {
        self.entries.binary_search_by_key(&seq, |e| e.seq).ok().map(|i| &self.entries[i])
    }
}

#[derive(Debug, Default)]
struct LogState {
    streams: FxHashMap<String, LogStream>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LogState>,
    appended: Notify,
}

/// In-process [`StreamLog`] with consumer groups, pending lists and blocking reads.
///
/// Clones share the same log, so several [`StreamBus`](super::StreamBus) instances can
/// consume one log the way separate processes would.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

fn entry_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_seq(id: &str) -> u64 {
    id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn to_entry(stored: &StoredEntry) -> StreamEntry {
    StreamEntry { id: entry_id(stored.seq), payload: stored.payload.clone() }
}

fn no_group(stream: &str, group: &str) -> EventBusError {
    EventBusError::transport(format!("NOGROUP no such group '{group}' for stream '{stream}'"))
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry with arbitrary contents; `None` stores an entry without an event field.
    pub fn append_raw(&self, stream: &str, payload: Option<Vec<u8>>) -> String {
        let id = {
            let mut state = self.shared.state.lock();
            let log = state.streams.entry(stream.to_owned()).or_default();
            let seq = log.last_seq() + 1;
            log.entries.push(StoredEntry { seq, payload });
            entry_id(seq)
        };
        self.shared.appended.notify_waiters();
        id
    }

    /// Number of entries in `stream`.
    #[must_use]
    pub fn len(&self, stream: &str) -> usize {
        self.shared.state.lock().streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Entries delivered to `group` and not yet acknowledged.
    #[must_use]
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.shared
            .state
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    #[must_use]
    pub fn group_exists(&self, stream: &str, group: &str) -> bool {
        self.shared.state.lock().streams.get(stream).is_some_and(|s| s.groups.contains_key(group))
    }

    fn ensure_open(state: &LogState) -> Result<()> {
        if state.closed {
            return Err(EventBusError::transport("stream log closed"));
        }
        Ok(())
    }

    /// Polls `take` until it yields entries or `block` elapses.
    async fn wait_for<F>(&self, block: Duration, mut take: F) -> Result<Vec<StreamEntry>>
    where
        F: FnMut(&mut LogState) -> Result<Vec<StreamEntry>> + Send,
    {
        let deadline = Instant::now() + block;
        loop {
            let mut notified = pin!(self.shared.appended.notified());
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                Self::ensure_open(&state)?;
                let entries = take(&mut *state)?;
                if !entries.is_empty() {
                    return Ok(entries);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[async_trait]
impl StreamLog for MemoryLog {
    async fn append(&self, stream: &str, payload: Vec<u8>) -> Result<String> {
        Self::ensure_open(&self.shared.state.lock())?;
        Ok(self.append_raw(stream, Some(payload)))
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus> {
        let mut state = self.shared.state.lock();
        Self::ensure_open(&state)?;
        let log = state.streams.entry(stream.to_owned()).or_default();
        if log.groups.contains_key(group) {
            return Ok(GroupStatus::Exists);
        }
        let last_delivered = log.last_seq();
        log.groups.insert(group.to_owned(), GroupState { last_delivered, ..GroupState::default() });
        Ok(GroupStatus::Created)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        cursor: GroupCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        match cursor {
            GroupCursor::PendingAfter(after) => {
                let after = parse_seq(&after);
                let state = self.shared.state.lock();
                Self::ensure_open(&state)?;
                let log = state.streams.get(stream).ok_or_else(|| no_group(stream, group))?;
                let owned = log.groups.get(group).ok_or_else(|| no_group(stream, group))?;
                Ok(owned
                    .pending
                    .range(after + 1..)
                    .filter(|(_, holder)| holder.as_str() == consumer)
                    .take(count)
                    .map(|(seq, _)| {
                        log.entry(*seq).map_or_else(
                            || StreamEntry { id: entry_id(*seq), payload: None },
                            to_entry,
                        )
                    })
                    .collect())
            },
            GroupCursor::New => {
                self.wait_for(block, |state| {
                    let log =
                        state.streams.get_mut(stream).ok_or_else(|| no_group(stream, group))?;
                    let LogStream { entries, groups } = log;
                    let owned = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

                    let start = entries.partition_point(|e| e.seq <= owned.last_delivered);
                    let batch: Vec<StreamEntry> =
                        entries[start..].iter().take(count).map(to_entry).collect();
                    for entry in &entries[start..start + batch.len()] {
                        owned.pending.insert(entry.seq, consumer.to_owned());
                        owned.last_delivered = entry.seq;
                    }
                    Ok(batch)
                })
                .await
            },
        }
    }

    async fn tail_id(&self, stream: &str) -> Result<String> {
        let state = self.shared.state.lock();
        Self::ensure_open(&state)?;
        Ok(entry_id(state.streams.get(stream).map_or(0, LogStream::last_seq)))
    }

    async fn read(
        &self,
        stream: &str,
        after: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let after = parse_seq(after);
        self.wait_for(block, |state| {
            Ok(state
                .streams
                .get(stream)
                .map(|log| log.after(after).take(count).map(to_entry).collect())
                .unwrap_or_default())
        })
        .await
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        Self::ensure_open(&state)?;
        if let Some(owned) = state.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) {
            owned.pending.remove(&parse_seq(id));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.state.lock().closed = true;
        self.shared.appended.notify_waiters();
        Ok(())
    }
}
