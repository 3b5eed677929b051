//! Integration tests for the full consumer pipeline.
//!
//! Tests: Bus → ChunkAggregator → SyncOrchestrator → Adapter → Scheduler → Status bus
//!
//! Verifies:
//! - Chunked jobs produce exactly one status report, carrying the correlation id
//! - Phase two fires after the report, against the platform id from phase one
//! - Malformed input is answered instead of silently dropped

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use serde_json::json;

    use audsync_core::{
        ApplicationId, AudienceId, Cabinet, ContactRecord, ExternalId, InMemoryRecordResolver,
        JobResult, PlatformError, SyncOutcome,
    };
    use audsync_messaging::{BrokerMessage, InMemoryMessageBus, MessageBus, Subscription};

    use crate::adapter::{AdapterRegistry, NotImplementedAdapter};
    use crate::aggregator::ChunkAggregator;
    use crate::orchestrator::SyncOrchestrator;
    use crate::publisher::ResultPublisher;
    use crate::scheduler::{ConfirmationScheduler, SchedulerHandle};
    use crate::two_phase::{AudienceApi, ModificationType, RemoteSegment, TwoPhaseAdapter, UploadReceipt};
    use crate::worker::{SyncWorker, WorkerHandle};

    #[derive(Default)]
    struct RecordingApi {
        uploads: Mutex<Vec<(String, Vec<ApplicationId>)>>,
        confirms: Mutex<Vec<(ExternalId, String)>>,
    }

    impl AudienceApi for Arc<RecordingApi> {
        fn list_segments(&self) -> Result<Vec<RemoteSegment>, PlatformError> {
            Ok(Vec::new())
        }

        fn upload_new(
            &self,
            audience_name: &str,
            records: &[ContactRecord],
        ) -> Result<UploadReceipt, PlatformError> {
            self.uploads.lock().unwrap().push((
                audience_name.to_string(),
                records.iter().map(|r| r.application_id).collect(),
            ));
            Ok(UploadReceipt {
                external_id: ExternalId::number(4242),
                status: "uploaded".into(),
            })
        }

        fn modify(
            &self,
            _external_id: &ExternalId,
            _audience_name: &str,
            _records: &[ContactRecord],
            _modification: ModificationType,
        ) -> Result<String, PlatformError> {
            Ok("is_processed".into())
        }

        fn confirm(&self, external_id: &ExternalId, audience_name: &str) -> Result<(), PlatformError> {
            self.confirms
                .lock()
                .unwrap()
                .push((external_id.clone(), audience_name.to_string()));
            Ok(())
        }
    }

    struct Pipeline {
        inbound: Arc<InMemoryMessageBus<BrokerMessage>>,
        results: Subscription<BrokerMessage>,
        api: Arc<RecordingApi>,
        scheduler: ConfirmationScheduler,
        worker: WorkerHandle,
        timer: SchedulerHandle,
    }

    impl Pipeline {
        fn start() -> Self {
            let inbound = Arc::new(InMemoryMessageBus::<BrokerMessage>::new());
            let status = Arc::new(InMemoryMessageBus::<BrokerMessage>::new());
            let results = status.subscribe();

            let api = Arc::new(RecordingApi::default());
            let mut adapters = AdapterRegistry::new();
            adapters
                .register(
                    TwoPhaseAdapter::new(Cabinet::Yandex, api.clone())
                        .with_confirm_delay(Duration::from_millis(30)),
                )
                .register(NotImplementedAdapter::new(Cabinet::Facebook));

            let scheduler = ConfirmationScheduler::new();
            let timer = scheduler.spawn("confirm-timer").unwrap();

            let resolver = InMemoryRecordResolver::new((1..=10).map(|id| {
                ContactRecord::new(id).with_phone(format!("+99890000000{id}"))
            }));
            let orchestrator = SyncOrchestrator::new(resolver, adapters, scheduler.clone());
            let worker = SyncWorker::new(
                Arc::new(ChunkAggregator::new()),
                orchestrator,
                ResultPublisher::new(status),
            )
            .spawn("sync-worker", &inbound)
            .unwrap();

            Self {
                inbound,
                results,
                api,
                scheduler,
                worker,
                timer,
            }
        }

        fn send(&self, body: serde_json::Value, correlation_id: Option<&str>) {
            self.inbound
                .publish(BrokerMessage::outgoing(
                    body.to_string(),
                    correlation_id.map(str::to_owned),
                ))
                .unwrap();
        }

        fn next_result(&self) -> (JobResult, Option<String>) {
            let message = self.results.recv_timeout(Duration::from_secs(2)).unwrap();
            let result = serde_json::from_str(message.body()).unwrap();
            (result, message.correlation_id().map(str::to_owned))
        }

        fn stop(self) {
            self.worker.shutdown();
            self.timer.shutdown();
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn chunked_job_is_synced_reported_and_confirmed() {
        let pipeline = Pipeline::start();

        pipeline.send(
            json!({"audience_id": 61, "current_chunk": 2, "total_chunks": 2,
                   "application_ids_to_add": [3, 2]}),
            Some("corr-2"),
        );
        pipeline.send(
            json!({"audience_id": 61, "current_chunk": 1, "total_chunks": 2,
                   "application_ids_to_add": [1, 2],
                   "integrations": [{"cabinet_name": "yandex"}, {"cabinet_name": "facebook"}]}),
            Some("corr-1"),
        );

        let (result, correlation_id) = pipeline.next_result();
        assert_eq!(correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(result.audience_id, Some(AudienceId::number(61)));

        let statuses = result.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].cabinet, Cabinet::Yandex);
        assert!(matches!(
            statuses[0].status,
            SyncOutcome::SuccessPendingConfirmation { ref external_id, .. }
                if *external_id == ExternalId::number(4242)
        ));
        assert_eq!(statuses[1].cabinet, Cabinet::Facebook);

        assert_eq!(
            *pipeline.api.uploads.lock().unwrap(),
            vec![("Audience_61".to_string(), vec![1, 2, 3])]
        );

        assert!(wait_until(|| pipeline.scheduler.stats().confirmed == 1));
        assert_eq!(
            *pipeline.api.confirms.lock().unwrap(),
            vec![(ExternalId::number(4242), "Audience_61".to_string())]
        );

        pipeline.stop();
    }

    #[test]
    fn job_without_known_integrations_reports_error() {
        let pipeline = Pipeline::start();

        pipeline.send(
            json!({"audience_id": "crm-7", "current_chunk": 1, "total_chunks": 1,
                   "application_ids_to_add": [1], "integrations": [{"cabinet_name": "vk"}]}),
            None,
        );

        let (result, correlation_id) = pipeline.next_result();
        assert_eq!(correlation_id, None);
        assert_eq!(result.audience_id, Some(AudienceId::text("crm-7")));
        assert_eq!(result.error_message(), Some("No integrations specified"));
        assert_eq!(pipeline.scheduler.stats().scheduled, 0);

        pipeline.stop();
    }

    #[test]
    fn malformed_message_is_answered_and_pipeline_keeps_running() {
        let pipeline = Pipeline::start();

        pipeline.send(json!({"current_chunk": 1, "total_chunks": 1}), Some("bad"));
        let (result, correlation_id) = pipeline.next_result();
        assert_eq!(correlation_id.as_deref(), Some("bad"));
        assert_eq!(result.error_message(), Some("audience_id is missing"));

        pipeline.send(
            json!({"audience_id": 1, "current_chunk": 1, "total_chunks": 1,
                   "integrations": [{"cabinet_name": "facebook"}]}),
            Some("good"),
        );
        let (result, correlation_id) = pipeline.next_result();
        assert_eq!(correlation_id.as_deref(), Some("good"));
        assert_eq!(result.statuses().len(), 1);

        pipeline.stop();
    }
}
