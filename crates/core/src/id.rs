//! Opaque identifiers carried on the wire.
//!
//! Upstream producers and advertising platforms are inconsistent about whether an id is a
//! number or a string, so both are accepted and echoed back in the form they arrived in.

use serde::{Deserialize, Serialize};

/// Identifier of an application (lead) row in the source datastore.
pub type ApplicationId = i64;

/// An id that is either an integer or a string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl core::fmt::Display for RawId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RawId::Number(n) => write!(f, "{n}"),
            RawId::Text(s) => f.write_str(s),
        }
    }
}

/// Job key: identifies one audience-sync job across all of its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudienceId(RawId);

/// Platform-side identifier of an audience (e.g. a Yandex segment id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(RawId);

macro_rules! impl_raw_id_newtype {
    ($t:ty) => {
        impl $t {
            pub fn number(value: i64) -> Self {
                Self(RawId::Number(value))
            }

            pub fn text(value: impl Into<String>) -> Self {
                Self(RawId::Text(value.into()))
            }

            pub fn as_raw(&self) -> &RawId {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self::number(value)
            }
        }

        impl From<i32> for $t {
            fn from(value: i32) -> Self {
                Self::number(i64::from(value))
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self::text(value)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self::text(value)
            }
        }
    };
}

impl_raw_id_newtype!(AudienceId);
impl_raw_id_newtype!(ExternalId);

impl ExternalId {
    /// Producers send `-1` (or an empty string) when the platform id is not known yet.
    pub fn is_unknown(&self) -> bool {
        match &self.0 {
            RawId::Number(n) => *n == -1,
            RawId::Text(s) => s.trim().is_empty() || s.trim() == "-1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_in_their_wire_form() {
        let numeric: AudienceId = serde_json::from_str("61").unwrap();
        assert_eq!(numeric, AudienceId::number(61));
        assert_eq!(serde_json::to_string(&numeric).unwrap(), "61");

        let textual: AudienceId = serde_json::from_str("\"aud-7\"").unwrap();
        assert_eq!(textual, AudienceId::text("aud-7"));
        assert_eq!(textual.to_string(), "aud-7");
    }

    #[test]
    fn minus_one_and_blank_are_unknown_external_ids() {
        assert!(ExternalId::number(-1).is_unknown());
        assert!(ExternalId::text("-1").is_unknown());
        assert!(ExternalId::text("  ").is_unknown());
        assert!(!ExternalId::number(42).is_unknown());
        assert!(!ExternalId::text("42").is_unknown());
    }
}
