//! Status report publishing.

use tracing::debug;

use audsync_core::JobResult;
use audsync_messaging::{BrokerMessage, MessageBus};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize job result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to publish job result: {0}")]
    Transport(String),
}

/// Serializes [`JobResult`]s onto the status stream.
#[derive(Debug)]
pub struct ResultPublisher<B> {
    bus: B,
}

impl<B> ResultPublisher<B>
where
    B: MessageBus<BrokerMessage>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Publish `result`, echoing the inbound correlation id when there was one.
    pub fn publish(
        &self,
        result: &JobResult,
        correlation_id: Option<&str>,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_string(result)?;
        let message = BrokerMessage::outgoing(body, correlation_id.map(str::to_owned));

        self.bus
            .publish(message)
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        debug!(
            audience_id = ?result.audience_id.as_ref().map(ToString::to_string),
            correlation_id = ?correlation_id,
            "job result published"
        );
        Ok(())
    }
}
