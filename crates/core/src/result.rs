//! Status report published for every completed job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cabinet::Cabinet;
use crate::id::{AudienceId, ExternalId};

/// Top-level error text when a job named no integration this deployment handles.
pub const NO_INTEGRATIONS: &str = "No integrations specified";

/// Outcome of one platform's phase-one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Done; nothing further to do on the platform side.
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_id: Option<ExternalId>,
        status: String,
    },
    /// Data uploaded; the platform requires an explicit confirmation at `confirm_at`.
    #[serde(rename = "pending_confirmation")]
    SuccessPendingConfirmation {
        external_id: ExternalId,
        status: String,
        confirm_at: DateTime<Utc>,
    },
    /// The platform call failed.
    #[serde(rename = "error")]
    Failure { message: String },
}

impl SyncOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failure { .. })
    }
}

/// One entry in a job result's per-platform list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformStatus {
    pub cabinet: Cabinet,
    pub status: SyncOutcome,
    pub timestamp: DateTime<Utc>,
}

impl PlatformStatus {
    pub fn now(cabinet: Cabinet, status: SyncOutcome) -> Self {
        Self {
            cabinet,
            status,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Integrations { integrations: Vec<PlatformStatus> },
    Error { error: String, timestamp: DateTime<Utc> },
}

/// The single report produced for a job: either per-platform statuses or one error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_id: Option<AudienceId>,

    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn integrations(audience_id: AudienceId, integrations: Vec<PlatformStatus>) -> Self {
        Self {
            audience_id: Some(audience_id),
            outcome: JobOutcome::Integrations { integrations },
        }
    }

    pub fn error(audience_id: Option<AudienceId>, error: impl Into<String>) -> Self {
        Self {
            audience_id,
            outcome: JobOutcome::Error {
                error: error.into(),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn no_integrations(audience_id: AudienceId) -> Self {
        Self::error(Some(audience_id), NO_INTEGRATIONS)
    }

    /// Top-level error text, if this is an error result.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            JobOutcome::Error { error, .. } => Some(error),
            JobOutcome::Integrations { .. } => None,
        }
    }

    /// Per-platform entries; empty for error results.
    pub fn statuses(&self) -> &[PlatformStatus] {
        match &self.outcome {
            JobOutcome::Integrations { integrations } => integrations,
            JobOutcome::Error { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_result_serializes_flat() {
        let result = JobResult::no_integrations(AudienceId::number(61));
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["audience_id"], json!(61));
        assert_eq!(value["error"], json!(NO_INTEGRATIONS));
        assert!(value.get("timestamp").is_some());
        assert!(value.get("integrations").is_none());
    }

    #[test]
    fn platform_statuses_serialize_with_result_tag() {
        let result = JobResult::integrations(
            AudienceId::text("a-1"),
            vec![
                PlatformStatus::now(
                    Cabinet::Yandex,
                    SyncOutcome::Success {
                        external_id: Some(ExternalId::number(5)),
                        status: "processed".into(),
                    },
                ),
                PlatformStatus::now(Cabinet::Google, SyncOutcome::failure("quota exceeded")),
            ],
        );
        let value = serde_json::to_value(&result).unwrap();

        let entries = value["integrations"].as_array().unwrap();
        assert_eq!(entries[0]["cabinet"], json!("yandex"));
        assert_eq!(entries[0]["status"]["result"], json!("success"));
        assert_eq!(entries[0]["status"]["external_id"], json!(5));
        assert_eq!(entries[1]["status"]["result"], json!("error"));
        assert_eq!(entries[1]["status"]["message"], json!("quota exceeded"));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn results_decode_back_into_the_right_outcome() {
        let result = JobResult::error(None, "boom");
        let text = serde_json::to_string(&result).unwrap();
        let decoded: JobResult = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.error_message(), Some("boom"));
        assert!(decoded.statuses().is_empty());
    }
}
