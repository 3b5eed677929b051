//! Chunk reassembly store.
//!
//! Producers split large jobs across several broker messages that share an `audience_id`
//! and carry `current_chunk` / `total_chunks`. The aggregator buffers them per key and emits
//! exactly one [`MergedJob`] once every declared chunk has arrived.
//!
//! ## Buffer lifecycle
//!
//! - Chunk 1 starts a buffer. If a buffer already exists for the key and already holds a
//!   chunk 1 (or declares a different size) it is a leftover of an earlier run and is
//!   discarded. A buffer holding only later chunks of the same size is joined, so chunks
//!   may arrive in any order.
//! - Completion is judged by the number of distinct chunk numbers received, never by the
//!   highest chunk number seen.
//! - On completion the buffer leaves the map and the merged payload is returned to the
//!   caller, who owns it from then on.
//! - A buffer that never completes stays until [`ChunkAggregator::evict_stale`] removes it.
//!
//! One mutex guards the whole map. It is held only for append-and-check; merging, record
//! lookups and platform calls all happen after it is released.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use audsync_core::{
    ApplicationId, AudienceId, ChunkPosition, JobEnvelope, MalformedJob, MergedJob,
    default_audience_name,
};

#[derive(Debug)]
struct ChunkBuffer {
    total: u32,
    chunks: BTreeMap<u32, JobEnvelope>,
    last_chunk_at: Instant,
}

impl ChunkBuffer {
    fn new(total: u32) -> Self {
        Self {
            total,
            chunks: BTreeMap::new(),
            last_chunk_at: Instant::now(),
        }
    }

    /// Whether an incoming chunk must start over instead of joining this buffer.
    fn superseded_by(&self, position: ChunkPosition) -> bool {
        self.total != position.total || (position.is_first() && self.chunks.contains_key(&1))
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() >= self.total as usize
    }
}

/// Snapshot of one incomplete buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBuffer {
    pub audience_id: AudienceId,
    pub received: usize,
    pub total: u32,
}

/// Keyed, thread-safe accumulator of job chunks.
#[derive(Debug, Default)]
pub struct ChunkAggregator {
    buffers: Mutex<HashMap<AudienceId, ChunkBuffer>>,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one chunk. Returns the merged job when this chunk completes it.
    ///
    /// `Ok(None)` means the chunk was buffered and the message is fully consumed.
    pub fn submit(&self, envelope: JobEnvelope) -> Result<Option<MergedJob>, MalformedJob> {
        let (audience_id, position) = envelope.validate()?;

        let chunks = {
            let mut buffers = self.lock();

            if let Some(existing) = buffers.get(&audience_id) {
                if existing.superseded_by(position) {
                    warn!(
                        audience_id = %audience_id,
                        chunk = position.current,
                        total = position.total,
                        discarded_chunks = existing.chunks.len(),
                        discarded_total = existing.total,
                        "discarding stale chunk buffer"
                    );
                    buffers.remove(&audience_id);
                } else if position.is_first() {
                    // Same declared size and no chunk 1 yet: either late arrival within one
                    // run, or leftovers of an earlier run that lost its chunk 1.
                    warn!(
                        audience_id = %audience_id,
                        total = position.total,
                        buffered_chunks = existing.chunks.len(),
                        "chunk 1 joined a buffer that already holds later chunks"
                    );
                }
            }

            let buffer = buffers
                .entry(audience_id.clone())
                .or_insert_with(|| ChunkBuffer::new(position.total));

            if buffer.chunks.insert(position.current, envelope).is_some() {
                debug!(
                    audience_id = %audience_id,
                    chunk = position.current,
                    "duplicate chunk replaced"
                );
            }
            buffer.last_chunk_at = Instant::now();

            if !buffer.is_complete() {
                debug!(
                    audience_id = %audience_id,
                    chunk = position.current,
                    received = buffer.chunks.len(),
                    total = buffer.total,
                    "chunk buffered"
                );
                return Ok(None);
            }

            match buffers.remove(&audience_id) {
                Some(buffer) => buffer.chunks,
                None => return Ok(None),
            }
        };

        info!(
            audience_id = %audience_id,
            total = position.total,
            "all chunks received"
        );
        Ok(merge(audience_id, chunks))
    }

    /// Drop buffers whose most recent chunk is older than `max_age`.
    ///
    /// Returns the keys that were evicted.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<AudienceId> {
        let mut buffers = self.lock();
        let mut evicted = Vec::new();

        buffers.retain(|audience_id, buffer| {
            let keep = buffer.last_chunk_at.elapsed() < max_age;
            if !keep {
                warn!(
                    audience_id = %audience_id,
                    received = buffer.chunks.len(),
                    total = buffer.total,
                    "evicting incomplete chunk buffer"
                );
                evicted.push(audience_id.clone());
            }
            keep
        });

        evicted
    }

    /// Incomplete buffers currently held.
    pub fn pending(&self) -> Vec<PendingBuffer> {
        self.lock()
            .iter()
            .map(|(audience_id, buffer)| PendingBuffer {
                audience_id: audience_id.clone(),
                received: buffer.chunks.len(),
                total: buffer.total,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AudienceId, ChunkBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Merge chunks (ordered by chunk number) into one job.
///
/// Name, external id and integrations come from the lowest-numbered chunk; id lists are
/// concatenated in chunk order with repeats dropped.
fn merge(audience_id: AudienceId, chunks: BTreeMap<u32, JobEnvelope>) -> Option<MergedJob> {
    let mut envelopes = chunks.into_values();
    let first = envelopes.next()?;

    let mut to_add = UniqueIds::default();
    let mut to_delete = UniqueIds::default();
    to_add.extend(&first.application_ids_to_add);
    to_delete.extend(&first.application_ids_to_delete);

    for envelope in envelopes {
        to_add.extend(&envelope.application_ids_to_add);
        to_delete.extend(&envelope.application_ids_to_delete);
    }

    let audience_name = first
        .audience_name
        .unwrap_or_else(|| default_audience_name(&audience_id));

    Some(MergedJob {
        audience_id,
        audience_name,
        external_id: first.external_id,
        application_ids_to_add: to_add.ids,
        application_ids_to_delete: to_delete.ids,
        integrations: first.integrations,
    })
}

#[derive(Default)]
struct UniqueIds {
    seen: HashSet<ApplicationId>,
    ids: Vec<ApplicationId>,
}

impl UniqueIds {
    fn extend(&mut self, ids: &[ApplicationId]) {
        for &id in ids {
            if self.seen.insert(id) {
                self.ids.push(id);
            }
        }
    }
}
