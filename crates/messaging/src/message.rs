use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One broker message: an opaque body plus transport metadata.
///
/// - `message_id` is assigned by the transport (stream entry id) or generated locally.
/// - `correlation_id` is passed through untouched from a job's inbound message to the
///   status report published for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    message_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,

    body: String,
}

impl BrokerMessage {
    pub fn new(
        message_id: impl Into<String>,
        correlation_id: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id,
            body: body.into(),
        }
    }

    /// A locally-originated message with a fresh time-ordered id.
    pub fn outgoing(body: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self::new(Uuid::now_v7().to_string(), correlation_id, body)
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}
