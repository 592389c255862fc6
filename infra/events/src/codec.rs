//! JSON wire encoding shared by the broker and stream backends.

use crate::error::{EventBusError, Result};
use evbus_domain::Event;

/// Serializes an event into its wire form.
///
/// # Errors
/// [`EventBusError::Encode`] if the payload cannot be represented as JSON.
pub fn encode(event: &Event) -> Result<Vec<u8>> {
    serde_json::to_vec(event).map_err(|source| EventBusError::Encode { source, context: None })
}

/// Parses a wire payload. Either every field decodes or the whole payload is rejected.
///
/// # Errors
/// [`EventBusError::Decode`] on malformed JSON or a missing required field.
pub fn decode(payload: &[u8]) -> Result<Event> {
    serde_json::from_slice(payload).map_err(|source| EventBusError::Decode { source, context: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_uses_cloudevents_attribute_names() {
        let event = Event::new("orders.created", json!({ "n": 1 })).with_source("billing");
        let value: serde_json::Value = serde_json::from_slice(&encode(&event).unwrap()).unwrap();

        assert_eq!(value["type"], "orders.created");
        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["source"], "billing");
        assert!(value["time"].is_string());
    }

    #[test]
    fn missing_type_is_rejected() {
        let err = decode(br#"{"id":"1","time":"2024-01-01T00:00:00Z"}"#).unwrap_err();
        assert!(matches!(err, EventBusError::Decode { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode(b"not json").is_err());
        assert!(decode(b"").is_err());
    }
}
