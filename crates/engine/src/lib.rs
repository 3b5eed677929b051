//! `audsync-engine`: chunk reassembly, platform dispatch and delayed confirmation.
//!
//! Everything here is synchronous and transport-agnostic: broker, datastore and platform
//! HTTP live behind traits implemented in `audsync-infra`.

pub mod adapter;
pub mod aggregator;
pub mod guardian;
pub mod orchestrator;
pub mod publisher;
pub mod scheduler;
pub mod two_phase;
pub mod worker;

mod integration_tests;

pub use adapter::{AdapterRegistry, NotImplementedAdapter, PlatformAdapter, SendAudience};
pub use aggregator::{ChunkAggregator, PendingBuffer};
pub use guardian::{ConnectionGuardian, Connector};
pub use orchestrator::SyncOrchestrator;
pub use publisher::{PublishError, ResultPublisher};
pub use scheduler::{
    ConfirmTask, ConfirmationKey, ConfirmationScheduler, ConfirmationState, PendingConfirmation,
    SchedulerHandle, SchedulerStats,
};
pub use two_phase::{
    AudienceApi, ModificationType, RemoteSegment, TwoPhaseAdapter, UploadReceipt,
};
pub use worker::{SyncWorker, WorkerHandle};
