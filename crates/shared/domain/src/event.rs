use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope format version stamped on events built with [`Event::new`].
pub const SPEC_VERSION: &str = "1.0";

const EVENT_ID_LEN: usize = 21;

/// The unit of data exchanged over every bus.
///
/// Field names on the wire follow the `CloudEvents` JSON attribute names
/// (`id`, `source`, `specversion`, `type`, `data`, `time`). The `type` attribute
/// doubles as the topic an event is routed on.
///
/// An event is immutable once published: buses hand handlers an `Arc<Event>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique per publish. Must be non-empty.
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "specversion", default)]
    pub spec_version: String,
    /// Event type, equal to the topic. Must be non-empty.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    pub time: DateTime<Utc>,
}

impl Event {
    /// Creates an event of the given type with a fresh id and the current time.
    ///
    /// # Examples
    /// ```rust
    /// use evbus_domain::Event;
    /// use serde_json::json;
    ///
    /// let event = Event::new("orders.created", json!({ "order": 7 })).with_source("billing");
    /// assert_eq!(event.topic(), "orders.created");
    /// assert!(!event.id.is_empty());
    /// ```
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: crate::safe_nanoid!(EVENT_ID_LEN),
            source: String::new(),
            spec_version: SPEC_VERSION.to_owned(),
            kind: kind.into(),
            data,
            time: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub const fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// The topic this event is routed on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.kind
    }

    /// Deserializes the payload into a concrete type.
    ///
    /// # Errors
    /// Returns the `serde_json` error when `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_event_is_stamped() {
        let event = Event::new("test.event", json!({ "key": "value" }));
        assert_eq!(event.id.len(), EVENT_ID_LEN);
        assert_eq!(event.kind, "test.event");
        assert_eq!(event.spec_version, SPEC_VERSION);
        assert!(event.source.is_empty());
    }

    #[test]
    fn ids_are_unique_per_event() {
        let a = Event::new("a", Value::Null);
        let b = Event::new("a", Value::Null);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn data_as_reads_typed_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Order {
            order: u32,
        }

        let event = Event::new("orders", json!({ "order": 9 }));
        assert_eq!(event.data_as::<Order>().unwrap(), Order { order: 9 });
        assert!(event.data_as::<Vec<u8>>().is_err());
    }
}
