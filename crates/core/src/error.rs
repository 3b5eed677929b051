//! Error taxonomy for audience-sync jobs.

use thiserror::Error;

/// An inbound envelope that can never be processed.
///
/// Malformed input is not transient: the envelope is dropped and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedJob {
    #[error("audience_id is missing")]
    MissingAudienceId,

    #[error("current_chunk or total_chunks is missing")]
    MissingChunkInfo,

    #[error("chunk {current} is outside 1..={total}")]
    ChunkOutOfRange { current: i64, total: i64 },

    #[error("payload is not a valid job envelope: {0}")]
    Undecodable(String),
}

impl MalformedJob {
    pub fn undecodable(msg: impl Into<String>) -> Self {
        Self::Undecodable(msg.into())
    }
}

/// Contact record lookup failed; the whole job is aborted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("data source unavailable: {0}")]
    DataSourceUnavailable(String),
}

impl ResolveError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DataSourceUnavailable(msg.into())
    }
}

/// A single platform call failed. Recorded against that platform only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("platform rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    /// An earlier step already changed the remote audience before `failed` happened.
    #[error("{applied} already applied to audience {external_id}, then {failed}")]
    PartiallyApplied {
        applied: String,
        external_id: String,
        failed: Box<PlatformError>,
    },
}

impl PlatformError {
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }
}
