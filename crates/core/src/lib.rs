//! `audsync-core`: audience-sync job model and collaborator contracts.
//!
//! This crate contains **pure data and traits** (no broker, datastore, or HTTP code).

pub mod cabinet;
pub mod envelope;
pub mod error;
pub mod id;
pub mod record;
pub mod result;

pub use cabinet::Cabinet;
pub use envelope::{ChunkPosition, IntegrationSpec, JobEnvelope, MergedJob, default_audience_name};
pub use error::{MalformedJob, PlatformError, ResolveError};
pub use id::{ApplicationId, AudienceId, ExternalId, RawId};
pub use record::{ContactRecord, InMemoryRecordResolver, RecordResolver};
pub use result::{JobOutcome, JobResult, NO_INTEGRATIONS, PlatformStatus, SyncOutcome};
