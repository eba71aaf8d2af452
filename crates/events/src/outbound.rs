//! Outbound (broker-facing) envelope in CloudEvents shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::Metadata;

/// A relayed event, ready for an external topic.
///
/// Immutable once constructed: fields are only readable. The logical shape
/// (`id`, `source`, `subject`, `datacontenttype`, headers, `data`) is the
/// compatibility surface for downstream consumers; the wire encoding belongs
/// to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "id")]
    message_id: Uuid,
    source: String,
    subject: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "datacontenttype")]
    content_type: String,
    headers: Metadata,
    #[serde(rename = "data")]
    payload: JsonValue,
}

impl OutboundEnvelope {
    pub fn new(
        message_id: Uuid,
        source: impl Into<String>,
        subject: impl Into<String>,
        event_type: impl Into<String>,
        content_type: impl Into<String>,
        headers: Metadata,
        payload: JsonValue,
    ) -> Self {
        Self {
            message_id,
            source: source.into(),
            subject: subject.into(),
            event_type: event_type.into(),
            content_type: content_type.into(),
            headers,
            payload,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Decode the payload into a typed value.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }
}
