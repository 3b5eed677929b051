//! Upload-then-confirm adapter.
//!
//! Phase one pushes contact data and leaves the remote audience in a pending state; the
//! platform only starts matching once the audience is confirmed, which has to happen some
//! seconds later. The adapter reports that second step as
//! [`SyncOutcome::SuccessPendingConfirmation`] and the orchestrator schedules it.
//!
//! With a known audience id the add and subtract uploads are separate calls. If the add
//! went through and the subtract fails, the outcome is a failure naming the applied add
//! ([`PlatformError::PartiallyApplied`]); no confirmation is scheduled for it.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use audsync_core::{Cabinet, ContactRecord, ExternalId, PlatformError, SyncOutcome};

use crate::adapter::{PlatformAdapter, SendAudience};

/// Default pause between upload and confirmation.
pub const DEFAULT_CONFIRM_DELAY: Duration = Duration::from_secs(5);

/// An audience as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSegment {
    pub id: ExternalId,
    pub name: String,
}

/// What the platform answered to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub external_id: ExternalId,
    pub status: String,
}

/// How uploaded data is applied to an existing audience.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModificationType {
    Add,
    Subtract,
    Replace,
}

impl ModificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationType::Add => "add",
            ModificationType::Subtract => "subtract",
            ModificationType::Replace => "replace",
        }
    }
}

/// Raw platform operations behind a two-phase adapter.
pub trait AudienceApi: Send + Sync {
    fn list_segments(&self) -> Result<Vec<RemoteSegment>, PlatformError>;

    /// Create a new audience from `records`.
    fn upload_new(
        &self,
        audience_name: &str,
        records: &[ContactRecord],
    ) -> Result<UploadReceipt, PlatformError>;

    /// Apply `records` to an existing audience; returns the platform status.
    fn modify(
        &self,
        external_id: &ExternalId,
        audience_name: &str,
        records: &[ContactRecord],
        modification: ModificationType,
    ) -> Result<String, PlatformError>;

    fn confirm(&self, external_id: &ExternalId, audience_name: &str) -> Result<(), PlatformError>;
}

enum PhaseOne {
    Sent(UploadReceipt),
    Unchanged(Option<ExternalId>),
}

/// [`PlatformAdapter`] driving an [`AudienceApi`] through upload and confirmation.
#[derive(Debug)]
pub struct TwoPhaseAdapter<A> {
    cabinet: Cabinet,
    api: A,
    confirm_delay: Duration,
}

impl<A: AudienceApi> TwoPhaseAdapter<A> {
    pub fn new(cabinet: Cabinet, api: A) -> Self {
        Self {
            cabinet,
            api,
            confirm_delay: DEFAULT_CONFIRM_DELAY,
        }
    }

    pub fn with_confirm_delay(mut self, delay: Duration) -> Self {
        self.confirm_delay = delay;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn upload(&self, request: &SendAudience<'_>) -> Result<PhaseOne, PlatformError> {
        let name = request.audience_name;
        let to_add = request.records_to_add;
        let to_delete = request.records_to_delete;

        if let Some(id) = request.external_id {
            let mut status = None;
            if !to_add.is_empty() {
                status = Some(self.api.modify(id, name, to_add, ModificationType::Add)?);
            }
            if !to_delete.is_empty() {
                let added = status.is_some();
                let subtracted = self
                    .api
                    .modify(id, name, to_delete, ModificationType::Subtract)
                    .map_err(|err| {
                        if added {
                            PlatformError::PartiallyApplied {
                                applied: ModificationType::Add.as_str().to_string(),
                                external_id: id.to_string(),
                                failed: Box::new(err),
                            }
                        } else {
                            err
                        }
                    })?;
                status = Some(subtracted);
            }
            return Ok(match status {
                Some(status) => PhaseOne::Sent(UploadReceipt {
                    external_id: id.clone(),
                    status,
                }),
                None => PhaseOne::Unchanged(Some(id.clone())),
            });
        }

        match self.resolve_audience(name)? {
            Some(id) => {
                let modification = if !to_add.is_empty() {
                    (to_add, ModificationType::Replace)
                } else if !to_delete.is_empty() {
                    (to_delete, ModificationType::Subtract)
                } else {
                    return Ok(PhaseOne::Unchanged(Some(id)));
                };
                debug!(
                    cabinet = %self.cabinet,
                    external_id = %id,
                    mode = modification.1.as_str(),
                    "updating audience matched by name"
                );
                let status = self.api.modify(&id, name, modification.0, modification.1)?;
                Ok(PhaseOne::Sent(UploadReceipt {
                    external_id: id,
                    status,
                }))
            }
            None if !to_add.is_empty() => {
                debug!(cabinet = %self.cabinet, audience_name = name, "creating audience");
                Ok(PhaseOne::Sent(self.api.upload_new(name, to_add)?))
            }
            None => Ok(PhaseOne::Unchanged(None)),
        }
    }
}

impl<A: AudienceApi> PlatformAdapter for TwoPhaseAdapter<A> {
    fn cabinet(&self) -> Cabinet {
        self.cabinet
    }

    fn resolve_audience(&self, audience_name: &str) -> Result<Option<ExternalId>, PlatformError> {
        let segments = self.api.list_segments()?;
        Ok(segments
            .into_iter()
            .find(|segment| segment.name == audience_name)
            .map(|segment| segment.id))
    }

    fn send_audience(&self, request: &SendAudience<'_>) -> SyncOutcome {
        match self.upload(request) {
            Ok(PhaseOne::Sent(receipt)) => {
                let delay = chrono::Duration::from_std(self.confirm_delay)
                    .unwrap_or(chrono::Duration::zero());
                SyncOutcome::SuccessPendingConfirmation {
                    external_id: receipt.external_id,
                    status: receipt.status,
                    confirm_at: Utc::now() + delay,
                }
            }
            Ok(PhaseOne::Unchanged(external_id)) => SyncOutcome::Success {
                external_id,
                status: "unchanged".to_string(),
            },
            Err(err) => {
                warn!(cabinet = %self.cabinet, error = %err, "audience upload failed");
                SyncOutcome::failure(err.to_string())
            }
        }
    }

    fn confirm_audience(
        &self,
        external_id: &ExternalId,
        audience_name: &str,
    ) -> Result<(), PlatformError> {
        self.api.confirm(external_id, audience_name)
    }
}
