//! Contact records and the resolver contract that produces them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::id::ApplicationId;

/// Contact data behind one application id, as stored in the source datastore.
///
/// Values are plain text; hashing happens in the platform export layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactRecord {
    pub application_id: ApplicationId,
    pub contact_id: Option<i64>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

impl ContactRecord {
    pub fn new(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            ..Self::default()
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Turns application ids into contact records.
///
/// Implementations may return fewer records than ids (unknown ids are skipped) and make
/// no ordering promise.
pub trait RecordResolver: Send + Sync {
    fn resolve(&self, ids: &[ApplicationId]) -> Result<Vec<ContactRecord>, ResolveError>;
}

impl<R> RecordResolver for Arc<R>
where
    R: RecordResolver + ?Sized,
{
    fn resolve(&self, ids: &[ApplicationId]) -> Result<Vec<ContactRecord>, ResolveError> {
        (**self).resolve(ids)
    }
}

/// In-memory resolver for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRecordResolver {
    records: HashMap<ApplicationId, ContactRecord>,
    unavailable: Option<String>,
}

impl InMemoryRecordResolver {
    pub fn new(records: impl IntoIterator<Item = ContactRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.application_id, r))
                .collect(),
            unavailable: None,
        }
    }

    /// A resolver whose every lookup fails with `DataSourceUnavailable`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            records: HashMap::new(),
            unavailable: Some(reason.into()),
        }
    }
}

impl RecordResolver for InMemoryRecordResolver {
    fn resolve(&self, ids: &[ApplicationId]) -> Result<Vec<ContactRecord>, ResolveError> {
        if let Some(reason) = &self.unavailable {
            return Err(ResolveError::unavailable(reason.clone()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_resolver_skips_unknown_ids() {
        let resolver = InMemoryRecordResolver::new([
            ContactRecord::new(1).with_phone("+998901112233"),
            ContactRecord::new(2).with_email("a@example.com"),
        ]);

        let found = resolver.resolve(&[2, 3, 1]).unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.application_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn unavailable_resolver_fails_every_lookup() {
        let resolver = InMemoryRecordResolver::unavailable("connection refused");
        let err = resolver.resolve(&[1]).unwrap_err();
        assert_eq!(err, ResolveError::unavailable("connection refused"));
    }
}
