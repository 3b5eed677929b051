//! Platform adapter contract and the cabinet registry.

use std::collections::HashMap;
use std::sync::Arc;

use audsync_core::{Cabinet, ContactRecord, ExternalId, PlatformError, SyncOutcome};

/// Phase-one request for one platform.
#[derive(Debug, Clone, Copy)]
pub struct SendAudience<'a> {
    pub audience_name: &'a str,
    pub records_to_add: &'a [ContactRecord],
    pub records_to_delete: &'a [ContactRecord],
    pub external_id: Option<&'a ExternalId>,
}

/// Per-platform sync logic.
///
/// `send_audience` never fails: platform errors are folded into
/// [`SyncOutcome::Failure`] so one platform cannot abort a job. Adapters own their retry
/// policy; the engine calls each operation exactly once.
pub trait PlatformAdapter: Send + Sync {
    fn cabinet(&self) -> Cabinet;

    /// Look up a remote audience by exact name.
    fn resolve_audience(&self, audience_name: &str) -> Result<Option<ExternalId>, PlatformError>;

    /// Phase one: push the add/delete sets.
    fn send_audience(&self, request: &SendAudience<'_>) -> SyncOutcome;

    /// Phase two: confirm a previously uploaded audience.
    fn confirm_audience(
        &self,
        external_id: &ExternalId,
        audience_name: &str,
    ) -> Result<(), PlatformError>;
}

/// Placeholder for cabinets without a real integration yet.
#[derive(Debug, Clone, Copy)]
pub struct NotImplementedAdapter {
    cabinet: Cabinet,
}

impl NotImplementedAdapter {
    pub const STATUS: &'static str = "not implemented";

    pub fn new(cabinet: Cabinet) -> Self {
        Self { cabinet }
    }
}

impl PlatformAdapter for NotImplementedAdapter {
    fn cabinet(&self) -> Cabinet {
        self.cabinet
    }

    fn resolve_audience(&self, _audience_name: &str) -> Result<Option<ExternalId>, PlatformError> {
        Ok(None)
    }

    fn send_audience(&self, _request: &SendAudience<'_>) -> SyncOutcome {
        SyncOutcome::Success {
            external_id: None,
            status: Self::STATUS.to_string(),
        }
    }

    fn confirm_audience(
        &self,
        _external_id: &ExternalId,
        _audience_name: &str,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported(format!(
            "{} has no confirmation step",
            self.cabinet
        )))
    }
}

/// `Cabinet -> adapter` dispatch table, built once at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Cabinet, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own cabinet, replacing any previous one.
    pub fn register<A>(&mut self, adapter: A) -> &mut Self
    where
        A: PlatformAdapter + 'static,
    {
        self.register_shared(Arc::new(adapter))
    }

    pub fn register_shared(&mut self, adapter: Arc<dyn PlatformAdapter>) -> &mut Self {
        self.adapters.insert(adapter.cabinet(), adapter);
        self
    }

    /// Resolve a wire `cabinet_name`. Unknown names and unregistered cabinets yield `None`.
    pub fn get(&self, cabinet_name: &str) -> Option<Arc<dyn PlatformAdapter>> {
        let cabinet = Cabinet::from_name(cabinet_name)?;
        self.adapters.get(&cabinet).cloned()
    }

    pub fn cabinets(&self) -> Vec<Cabinet> {
        let mut cabinets: Vec<_> = self.adapters.keys().copied().collect();
        cabinets.sort();
        cabinets
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl core::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("cabinets", &self.cabinets())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dispatches_by_wire_name() {
        let mut registry = AdapterRegistry::new();
        registry
            .register(NotImplementedAdapter::new(Cabinet::Facebook))
            .register(NotImplementedAdapter::new(Cabinet::Google));

        assert_eq!(registry.cabinets(), vec![Cabinet::Facebook, Cabinet::Google]);
        assert_eq!(
            registry.get("google").map(|a| a.cabinet()),
            Some(Cabinet::Google)
        );
        assert!(registry.get("yandex").is_none());
        assert!(registry.get("tiktok").is_none());
        assert!(registry.get("Google").is_none());
    }

    #[test]
    fn not_implemented_adapter_reports_success_without_id() {
        let adapter = NotImplementedAdapter::new(Cabinet::Facebook);
        let outcome = adapter.send_audience(&SendAudience {
            audience_name: "Audience_1",
            records_to_add: &[ContactRecord::new(1)],
            records_to_delete: &[],
            external_id: None,
        });

        assert_eq!(
            outcome,
            SyncOutcome::Success {
                external_id: None,
                status: "not implemented".into()
            }
        );
        assert!(matches!(
            adapter.confirm_audience(&ExternalId::number(1), "x"),
            Err(PlatformError::Unsupported(_))
        ));
    }
}
