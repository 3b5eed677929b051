//! Turns a merged job into platform calls and one status report.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use audsync_core::{
    ApplicationId, ContactRecord, ExternalId, JobResult, MergedJob, PlatformStatus,
    RecordResolver, ResolveError, SyncOutcome,
};

use crate::adapter::{AdapterRegistry, PlatformAdapter, SendAudience};
use crate::scheduler::{ConfirmationScheduler, PendingConfirmation};

/// Drives phase one for every requested cabinet and hands phase two to the scheduler.
///
/// - Record lookup failure aborts the job with a single error result.
/// - Each recognised integration yields exactly one status entry; a failing platform is
///   recorded, never propagated.
/// - Unknown or unregistered cabinet names are skipped.
#[derive(Debug)]
pub struct SyncOrchestrator<R> {
    resolver: R,
    adapters: AdapterRegistry,
    scheduler: ConfirmationScheduler,
}

impl<R: RecordResolver> SyncOrchestrator<R> {
    pub fn new(resolver: R, adapters: AdapterRegistry, scheduler: ConfirmationScheduler) -> Self {
        Self {
            resolver,
            adapters,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &ConfirmationScheduler {
        &self.scheduler
    }

    pub fn process(&self, job: MergedJob) -> JobResult {
        let (to_add, to_delete) = match self.resolve_records(&job) {
            Ok(records) => records,
            Err(err) => {
                error!(audience_id = %job.audience_id, error = %err, "record lookup failed; job aborted");
                return JobResult::error(Some(job.audience_id), err.to_string());
            }
        };

        let mut statuses = Vec::new();
        for integration in &job.integrations {
            let Some(name) = integration.cabinet_name.as_deref() else {
                continue;
            };
            let Some(adapter) = self.adapters.get(name) else {
                debug!(audience_id = %job.audience_id, cabinet = name, "no adapter for cabinet; skipped");
                continue;
            };

            let outcome = adapter.send_audience(&SendAudience {
                audience_name: &job.audience_name,
                records_to_add: &to_add,
                records_to_delete: &to_delete,
                external_id: job.external_id.as_ref(),
            });

            match &outcome {
                SyncOutcome::SuccessPendingConfirmation {
                    external_id,
                    confirm_at,
                    ..
                } => self.schedule_confirmation(&job, &adapter, external_id, *confirm_at),
                SyncOutcome::Failure { message } => {
                    warn!(audience_id = %job.audience_id, cabinet = name, error = %message, "platform sync failed");
                }
                SyncOutcome::Success { .. } => {}
            }

            statuses.push(PlatformStatus::now(adapter.cabinet(), outcome));
        }

        if statuses.is_empty() {
            info!(audience_id = %job.audience_id, "job named no known integration");
            return JobResult::no_integrations(job.audience_id);
        }

        info!(
            audience_id = %job.audience_id,
            platforms = statuses.len(),
            failed = statuses.iter().filter(|s| s.status.is_failure()).count(),
            "job processed"
        );
        JobResult::integrations(job.audience_id, statuses)
    }

    fn resolve_records(
        &self,
        job: &MergedJob,
    ) -> Result<(Vec<ContactRecord>, Vec<ContactRecord>), ResolveError> {
        let to_add = self.resolve(&job.application_ids_to_add)?;
        let to_delete = self.resolve(&job.application_ids_to_delete)?;
        debug!(
            audience_id = %job.audience_id,
            to_add = to_add.len(),
            to_delete = to_delete.len(),
            "records resolved"
        );
        Ok((to_add, to_delete))
    }

    fn resolve(&self, ids: &[ApplicationId]) -> Result<Vec<ContactRecord>, ResolveError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.resolver.resolve(ids)
    }

    fn schedule_confirmation(
        &self,
        job: &MergedJob,
        adapter: &Arc<dyn PlatformAdapter>,
        external_id: &ExternalId,
        confirm_at: DateTime<Utc>,
    ) {
        let pending = PendingConfirmation {
            audience_id: job.audience_id.clone(),
            audience_name: job.audience_name.clone(),
            external_id: external_id.clone(),
            cabinet: adapter.cabinet(),
            scheduled_time: confirm_at,
        };
        let adapter = Arc::clone(adapter);
        self.scheduler.schedule(pending, move |p| {
            adapter.confirm_audience(&p.external_id, &p.audience_name)
        });
    }
}
