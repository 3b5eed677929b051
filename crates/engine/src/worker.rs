use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use audsync_core::{AudienceId, JobEnvelope, JobResult, MalformedJob, MergedJob, RecordResolver};
use audsync_messaging::{BrokerMessage, MessageBus, Subscription};

use crate::aggregator::ChunkAggregator;
use crate::orchestrator::SyncOrchestrator;
use crate::publisher::ResultPublisher;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A message already being processed is finished first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// The consumer loop: broker message in, at most one job result out.
///
/// - Every message is consumed on receipt; failures are answered on the status stream
/// - Malformed envelopes are answered with an error result and dropped
/// - Chunks are buffered until their job is complete, then processed synchronously
/// - Optional expiry of chunk buffers that stopped receiving chunks
pub struct SyncWorker<R, B> {
    aggregator: Arc<ChunkAggregator>,
    orchestrator: SyncOrchestrator<R>,
    publisher: ResultPublisher<B>,
    buffer_ttl: Option<Duration>,
}

impl<R, B> SyncWorker<R, B>
where
    R: RecordResolver,
    B: MessageBus<BrokerMessage>,
{
    pub fn new(
        aggregator: Arc<ChunkAggregator>,
        orchestrator: SyncOrchestrator<R>,
        publisher: ResultPublisher<B>,
    ) -> Self {
        Self {
            aggregator,
            orchestrator,
            publisher,
            buffer_ttl: None,
        }
    }

    /// Drop chunk buffers idle for longer than `ttl`. `None` keeps them forever.
    pub fn with_buffer_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.buffer_ttl = ttl;
        self
    }

    pub fn aggregator(&self) -> &Arc<ChunkAggregator> {
        &self.aggregator
    }

    /// Handle one inbound message. Returns the result that was published, if any.
    pub fn handle_message(&self, message: BrokerMessage) -> Option<JobResult> {
        let result = match self.ingest(&message) {
            Ok(Some(job)) => self.orchestrator.process(job),
            Ok(None) => return None,
            Err(result) => result,
        };

        if let Err(err) = self.publisher.publish(&result, message.correlation_id()) {
            error!(
                message_id = message.message_id(),
                error = %err,
                "failed to publish job result"
            );
        }
        Some(result)
    }

    fn ingest(&self, message: &BrokerMessage) -> Result<Option<MergedJob>, JobResult> {
        let envelope: JobEnvelope = serde_json::from_str(message.body()).map_err(|e| {
            let err = MalformedJob::undecodable(e.to_string());
            warn!(message_id = message.message_id(), error = %err, "dropping undecodable message");
            JobResult::error(audience_id_hint(message.body()), err.to_string())
        })?;

        let audience_id = envelope.audience_id.clone();
        self.aggregator.submit(envelope).map_err(|err| {
            warn!(
                message_id = message.message_id(),
                audience_id = ?audience_id.as_ref().map(ToString::to_string),
                error = %err,
                "dropping malformed job envelope"
            );
            JobResult::error(audience_id, err.to_string())
        })
    }

    /// Run buffer expiry if a TTL is configured.
    pub fn evict_stale(&self) -> Vec<AudienceId> {
        match self.buffer_ttl {
            Some(ttl) => self.aggregator.evict_stale(ttl),
            None => Vec::new(),
        }
    }
}

impl<R, B> SyncWorker<R, B>
where
    R: RecordResolver + 'static,
    B: MessageBus<BrokerMessage> + 'static,
{
    /// Spawn the consumer loop on its own thread, reading from `inbound`.
    pub fn spawn<I>(self, name: &'static str, inbound: &I) -> std::io::Result<WorkerHandle>
    where
        I: MessageBus<BrokerMessage>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = inbound.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, &self, sub, shutdown_rx))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<R, B>(
    name: &'static str,
    worker: &SyncWorker<R, B>,
    sub: Subscription<BrokerMessage>,
    shutdown_rx: mpsc::Receiver<()>,
) where
    R: RecordResolver,
    B: MessageBus<BrokerMessage>,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(message) => {
                debug!(worker = name, message_id = message.message_id(), "message received");
                worker.handle_message(message);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        worker.evict_stale();
    }
}

/// Best-effort `audience_id` from a payload that is not a valid envelope.
fn audience_id_hint(body: &str) -> Option<AudienceId> {
    let value: JsonValue = serde_json::from_str(body).ok()?;
    serde_json::from_value(value.get("audience_id")?.clone()).ok()
}
