//! Derivation of the target instance id from inbound events.

use bus::Envelope;
use saga_store::InstanceId;

/// Header carrying the saga instance id.
pub const SAGA_ID_HEADER: &str = "saga-id";

/// Derives the saga instance an event is addressed to.
pub trait IdExtractor: Send + Sync {
    /// Returns the instance id, or None if the message carries none.
    fn extract(&self, message: &Envelope) -> Option<InstanceId>;
}

/// Reads the instance id from a message header (`saga-id` by default).
#[derive(Debug, Clone)]
pub struct HeaderIdExtractor {
    header: String,
}

impl HeaderIdExtractor {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for HeaderIdExtractor {
    fn default() -> Self {
        Self::new(SAGA_ID_HEADER)
    }
}

impl IdExtractor for HeaderIdExtractor {
    fn extract(&self, message: &Envelope) -> Option<InstanceId> {
        message
            .header(&self.header)
            .filter(|id| !id.is_empty())
            .map(InstanceId::from)
    }
}

/// Reads the instance id from a top-level payload field.
///
/// String and integer fields are accepted.
#[derive(Debug, Clone)]
pub struct PayloadFieldExtractor {
    field: String,
}

impl PayloadFieldExtractor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl IdExtractor for PayloadFieldExtractor {
    fn extract(&self, message: &Envelope) -> Option<InstanceId> {
        match message.payload.get(&self.field)? {
            serde_json::Value::String(id) if !id.is_empty() => Some(InstanceId::from(id.as_str())),
            serde_json::Value::Number(n) => Some(InstanceId::from(n.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: serde_json::Value) -> Envelope {
        Envelope::builder()
            .kind("orders.OrderPaid")
            .payload_raw(payload)
            .build()
    }

    #[test]
    fn header_extractor_reads_saga_id() {
        let message = event(serde_json::Value::Null).with_header(SAGA_ID_HEADER, "42");
        assert_eq!(
            HeaderIdExtractor::default().extract(&message),
            Some(InstanceId::from("42"))
        );
    }

    #[test]
    fn header_extractor_ignores_missing_or_empty() {
        let extractor = HeaderIdExtractor::default();
        assert!(extractor.extract(&event(serde_json::Value::Null)).is_none());

        let message = event(serde_json::Value::Null).with_header(SAGA_ID_HEADER, "");
        assert!(extractor.extract(&message).is_none());
    }

    #[test]
    fn custom_header() {
        let message = event(serde_json::Value::Null).with_header("x-order", "7");
        assert_eq!(
            HeaderIdExtractor::new("x-order").extract(&message),
            Some(InstanceId::from("7"))
        );
    }

    #[test]
    fn payload_extractor_accepts_strings_and_numbers() {
        let extractor = PayloadFieldExtractor::new("order_id");
        assert_eq!(
            extractor.extract(&event(serde_json::json!({"order_id": "abc"}))),
            Some(InstanceId::from("abc"))
        );
        assert_eq!(
            extractor.extract(&event(serde_json::json!({"order_id": 1}))),
            Some(InstanceId::from("1"))
        );
        assert!(
            extractor
                .extract(&event(serde_json::json!({"order_id": true})))
                .is_none()
        );
        assert!(extractor.extract(&event(serde_json::json!({}))).is_none());
    }
}
