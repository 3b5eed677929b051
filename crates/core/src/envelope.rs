//! Job envelopes as they arrive on the broker, and the merged job they assemble into.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::MalformedJob;
use crate::id::{ApplicationId, AudienceId, ExternalId};

/// One integration target requested by a job.
///
/// Only `cabinet_name` drives routing; any other keys are carried along untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntegrationSpec {
    #[serde(default)]
    pub cabinet_name: Option<String>,

    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl IntegrationSpec {
    pub fn for_cabinet(name: impl Into<String>) -> Self {
        Self {
            cabinet_name: Some(name.into()),
            settings: Map::new(),
        }
    }
}

/// A (possibly partial) job as received from the broker.
///
/// Every field is optional on the wire; [`JobEnvelope::validate`] decides whether the
/// envelope is usable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub audience_id: Option<AudienceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience_name: Option<String>,

    #[serde(default)]
    pub application_ids_to_add: Vec<ApplicationId>,

    #[serde(default)]
    pub application_ids_to_delete: Vec<ApplicationId>,

    #[serde(default)]
    pub integrations: Vec<IntegrationSpec>,

    #[serde(
        default,
        deserialize_with = "known_external_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_id: Option<ExternalId>,

    #[serde(default)]
    pub current_chunk: Option<i64>,

    #[serde(default)]
    pub total_chunks: Option<i64>,
}

/// Validated chunk coordinates: `1 <= current <= total`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkPosition {
    pub current: u32,
    pub total: u32,
}

impl ChunkPosition {
    pub fn is_first(&self) -> bool {
        self.current == 1
    }
}

impl JobEnvelope {
    /// Build a single-chunk envelope (`1/1`).
    pub fn single(audience_id: impl Into<AudienceId>) -> Self {
        Self::chunk(audience_id, 1, 1)
    }

    /// Build chunk `current` of `total`.
    pub fn chunk(audience_id: impl Into<AudienceId>, current: i64, total: i64) -> Self {
        Self {
            audience_id: Some(audience_id.into()),
            current_chunk: Some(current),
            total_chunks: Some(total),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.audience_name = Some(name.into());
        self
    }

    pub fn with_to_add(mut self, ids: impl IntoIterator<Item = ApplicationId>) -> Self {
        self.application_ids_to_add = ids.into_iter().collect();
        self
    }

    pub fn with_to_delete(mut self, ids: impl IntoIterator<Item = ApplicationId>) -> Self {
        self.application_ids_to_delete = ids.into_iter().collect();
        self
    }

    pub fn with_integration(mut self, cabinet_name: impl Into<String>) -> Self {
        self.integrations.push(IntegrationSpec::for_cabinet(cabinet_name));
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<ExternalId>) -> Self {
        let external_id = external_id.into();
        self.external_id = (!external_id.is_unknown()).then_some(external_id);
        self
    }

    /// Check the envelope shape and return its job key and chunk coordinates.
    pub fn validate(&self) -> Result<(AudienceId, ChunkPosition), MalformedJob> {
        let audience_id = self
            .audience_id
            .clone()
            .ok_or(MalformedJob::MissingAudienceId)?;

        let (current, total) = match (self.current_chunk, self.total_chunks) {
            (Some(c), Some(t)) => (c, t),
            _ => return Err(MalformedJob::MissingChunkInfo),
        };

        let in_range = current >= 1 && current <= total && total <= i64::from(u32::MAX);
        if !in_range {
            return Err(MalformedJob::ChunkOutOfRange { current, total });
        }

        Ok((
            audience_id,
            ChunkPosition {
                current: current as u32,
                total: total as u32,
            },
        ))
    }
}

/// Default display name for an audience that arrived without one.
pub fn default_audience_name(audience_id: &AudienceId) -> String {
    format!("Audience_{audience_id}")
}

fn known_external_id<'de, D>(deserializer: D) -> Result<Option<ExternalId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<ExternalId>::deserialize(deserializer)?;
    Ok(raw.filter(|id| !id.is_unknown()))
}

/// A complete job reassembled from all of its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedJob {
    pub audience_id: AudienceId,
    pub audience_name: String,
    pub external_id: Option<ExternalId>,
    pub application_ids_to_add: Vec<ApplicationId>,
    pub application_ids_to_delete: Vec<ApplicationId>,
    pub integrations: Vec<IntegrationSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_wire_envelope_with_defaults() {
        let env: JobEnvelope = serde_json::from_value(json!({
            "audience_id": 61,
            "current_chunk": 1,
            "total_chunks": 2,
            "application_ids_to_add": [1, 2],
            "integrations": [{"cabinet_name": "yandex", "account": "main"}],
        }))
        .unwrap();

        assert_eq!(env.audience_id, Some(AudienceId::number(61)));
        assert!(env.application_ids_to_delete.is_empty());
        assert_eq!(env.external_id, None);
        assert_eq!(env.integrations[0].cabinet_name.as_deref(), Some("yandex"));
        assert_eq!(env.integrations[0].settings.get("account"), Some(&json!("main")));
    }

    #[test]
    fn minus_one_external_id_decodes_as_unknown() {
        let env: JobEnvelope =
            serde_json::from_value(json!({"audience_id": "a", "external_id": -1})).unwrap();
        assert_eq!(env.external_id, None);

        let env: JobEnvelope =
            serde_json::from_value(json!({"audience_id": "a", "external_id": 9001})).unwrap();
        assert_eq!(env.external_id, Some(ExternalId::number(9001)));
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let missing_id = JobEnvelope {
            current_chunk: Some(1),
            total_chunks: Some(1),
            ..JobEnvelope::default()
        };
        assert_eq!(missing_id.validate(), Err(MalformedJob::MissingAudienceId));

        let missing_chunks = JobEnvelope {
            audience_id: Some(AudienceId::number(1)),
            ..JobEnvelope::default()
        };
        assert_eq!(missing_chunks.validate(), Err(MalformedJob::MissingChunkInfo));

        assert_eq!(
            JobEnvelope::chunk(1, 0, 2).validate(),
            Err(MalformedJob::ChunkOutOfRange { current: 0, total: 2 })
        );
        assert_eq!(
            JobEnvelope::chunk(1, 3, 2).validate(),
            Err(MalformedJob::ChunkOutOfRange { current: 3, total: 2 })
        );
    }

    #[test]
    fn validate_accepts_single_chunk() {
        let (id, pos) = JobEnvelope::single(7).validate().unwrap();
        assert_eq!(id, AudienceId::number(7));
        assert!(pos.is_first());
        assert_eq!(pos.total, 1);
    }

    #[test]
    fn default_name_uses_audience_id() {
        assert_eq!(default_audience_name(&AudienceId::number(61)), "Audience_61");
    }
}
