//! Redis Streams-backed message bus.
//!
//! - **Inbound**: jobs are read from one stream through a consumer group (XREADGROUP)
//! - **Acknowledge on receipt**: every entry is XACKed as soon as it is read, before it is
//!   processed; failures are reported on the status stream, never by redelivery
//! - **Outbound**: results are XADDed to the status stream
//! - **Reconnects**: the reader re-enters the connection guardian whenever Redis drops
//!
//! ## Entry layout
//!
//! | field | content |
//! |---|---|
//! | `payload` | JSON body (job envelope inbound, job result outbound) |
//! | `correlation_id` | optional, copied from the job to its result |

use std::sync::{Arc, mpsc};
use std::thread;

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{Commands, Connection, RedisError};
use tracing::{debug, error, instrument, warn};

use audsync_engine::{ConnectionGuardian, Connector};
use audsync_messaging::{BrokerMessage, MessageBus, Subscription};

/// Default stream carrying job envelopes.
pub const DEFAULT_JOBS_STREAM: &str = "audsync:jobs";

/// Default stream carrying job results.
pub const DEFAULT_STATUS_STREAM: &str = "audsync:status";

/// Default consumer group name.
pub const DEFAULT_CONSUMER_GROUP: &str = "audsync";

const PAYLOAD_FIELD: &str = "payload";
const CORRELATION_FIELD: &str = "correlation_id";

/// Entries fetched per XREADGROUP call.
const READ_BATCH: usize = 10;

/// How long XREADGROUP blocks waiting for new entries.
const READ_BLOCK_MS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),
}

impl RedisStreamsError {
    fn command(what: &str, err: RedisError) -> Self {
        Self::Command(format!("{what} failed: {err}"))
    }
}

/// One Redis stream used as a [`MessageBus`].
#[derive(Debug, Clone)]
pub struct RedisStreamsBus {
    client: Arc<redis::Client>,
    endpoint: String,
    stream_key: String,
    group_name: String,
    consumer_name: String,
    guardian: ConnectionGuardian,
}

impl RedisStreamsBus {
    /// Create a bus over `stream_key`.
    ///
    /// Consumers default to group [`DEFAULT_CONSUMER_GROUP`] with a generated consumer name.
    pub fn new(redis_url: &str, stream_key: impl Into<String>) -> Result<Self, RedisStreamsError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            endpoint: crate::redact_url(redis_url),
            stream_key: stream_key.into(),
            group_name: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name: format!("worker-{}", uuid::Uuid::now_v7()),
            guardian: ConnectionGuardian::default(),
        })
    }

    pub fn with_consumer(
        mut self,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Self {
        self.group_name = group_name.into();
        self.consumer_name = consumer_name.into();
        self
    }

    pub fn with_guardian(mut self, guardian: ConnectionGuardian) -> Self {
        self.guardian = guardian;
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Create the consumer group (and the stream) if missing.
    pub fn ensure_consumer_group(&self, conn: &mut Connection) -> Result<(), RedisStreamsError> {
        let created: Result<(), RedisError> =
            conn.xgroup_create_mkstream(&self.stream_key, &self.group_name, "0");

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::command("XGROUP CREATE", e)),
        }
    }

    #[instrument(
        skip(self, message),
        fields(
            stream_key = %self.stream_key,
            message_id = %message.message_id(),
        ),
        err
    )]
    fn publish_sync(&self, message: BrokerMessage) -> Result<(), RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let mut fields = vec![(PAYLOAD_FIELD, message.body())];
        if let Some(correlation_id) = message.correlation_id() {
            fields.push((CORRELATION_FIELD, correlation_id));
        }

        let _: String = conn
            .xadd(&self.stream_key, "*", &fields[..])
            .map_err(|e| RedisStreamsError::command("XADD", e))?;

        Ok(())
    }

    /// Read the next batch for this consumer and acknowledge it straight away.
    ///
    /// Entries already delivered by XREADGROUP are returned even when XACK fails: a `>` read
    /// never yields them again, so holding them back would lose the jobs.
    fn read_and_ack(&self, conn: &mut Connection) -> Result<ReadBatch, RedisStreamsError> {
        let options = StreamReadOptions::default()
            .group(&self.group_name, &self.consumer_name)
            .count(READ_BATCH)
            .block(READ_BLOCK_MS);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[">"], &options)
            .map_err(|e| RedisStreamsError::command("XREADGROUP", e))?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        if entries.is_empty() {
            return Ok(ReadBatch::default());
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        let acked: Result<u64, RedisError> = conn.xack(&self.stream_key, &self.group_name, &ids[..]);
        let acked = acked
            .map(|_| ())
            .map_err(|e| RedisStreamsError::command("XACK", e));

        Ok(settle_batch(&self.stream_key, &entries, acked))
    }

    fn read_loop(&self, tx: mpsc::Sender<BrokerMessage>) {
        loop {
            let mut conn = self.guardian.acquire(self);

            loop {
                match self.read_and_ack(&mut conn) {
                    Ok(batch) => {
                        for message in batch.messages {
                            if tx.send(message).is_err() {
                                return;
                            }
                        }
                        if batch.ack_failure.is_some() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(stream_key = %self.stream_key, error = %e, "stream read failed; reconnecting");
                        break;
                    }
                }
            }
        }
    }
}

/// Entries handed to the consumer, plus the acknowledgement error if XACK failed.
#[derive(Debug, Default)]
struct ReadBatch {
    messages: Vec<BrokerMessage>,
    ack_failure: Option<RedisStreamsError>,
}

fn settle_batch(
    stream_key: &str,
    entries: &[StreamId],
    acked: Result<(), RedisStreamsError>,
) -> ReadBatch {
    match &acked {
        Ok(()) => {
            debug!(stream_key, count = entries.len(), "stream entries read and acknowledged");
        }
        Err(e) => {
            let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
            warn!(
                stream_key,
                ids = ?ids,
                error = %e,
                "acknowledgement failed; entries are processed but stay pending in the group"
            );
        }
    }

    ReadBatch {
        messages: entries.iter().map(to_message).collect(),
        ack_failure: acked.err(),
    }
}

fn to_message(entry: &StreamId) -> BrokerMessage {
    let body: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    let correlation_id: Option<String> = entry.get(CORRELATION_FIELD);
    BrokerMessage::new(entry.id.clone(), correlation_id, body)
}

impl Connector for RedisStreamsBus {
    type Connection = Connection;
    type Error = RedisStreamsError;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        self.ensure_consumer_group(&mut conn)?;
        Ok(conn)
    }
}

impl MessageBus<BrokerMessage> for RedisStreamsBus {
    type Error = RedisStreamsError;

    fn publish(&self, message: BrokerMessage) -> Result<(), Self::Error> {
        self.publish_sync(message)
    }

    /// Start a reader thread for this consumer.
    ///
    /// The returned subscription yields entries in stream order; the reader reconnects on
    /// its own and stops once the subscription is dropped and another entry arrives.
    fn subscribe(&self) -> Subscription<BrokerMessage> {
        let (tx, rx) = mpsc::channel();
        let bus = self.clone();

        let spawned = thread::Builder::new()
            .name(format!("redis-reader-{}", self.stream_key))
            .spawn(move || bus.read_loop(tx));

        if let Err(e) = spawned {
            error!(stream_key = %self.stream_key, error = %e, "failed to start stream reader");
        }

        Subscription::new(rx)
    }
}
