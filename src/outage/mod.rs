//! Outage lifecycle.
//!
//! Every transition runs inside one store transaction and reads policy from
//! one catalog snapshot, taken when the operation starts. Per
//! (sub-component, source) an outage moves through:
//!
//! ```text
//! absent -> open (unconfirmed | confirmed) -> resolved -> absent
//!                 ^                              |
//!                 +------ end time cleared ------+
//! ```
//!
//! Only an explicit delete removes a record.

mod admin;
mod ingest;

pub use admin::*;
pub use ingest::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::{Catalog, ConfigManager, SubComponent};
use crate::db::{OutageStore, StoreError};

/// Outage operation errors.
#[derive(Error, Debug)]
pub enum OutageError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unknown component {0:?}")]
    UnknownComponent(String),
    #[error("unknown sub-component {sub_component:?} in component {component:?}")]
    UnknownSubComponent {
        component: String,
        sub_component: String,
    },
    #[error("outage {0} not found")]
    NotFound(i64),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for OutageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => OutageError::Conflict(msg),
            other => OutageError::Storage(other),
        }
    }
}

/// What an operation did to the outage it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Transition {
    Created { outage_id: i64 },
    Updated { outage_id: i64 },
    Resolved { outage_id: i64 },
    Unchanged { outage_id: Option<i64> },
}

impl Transition {
    pub fn outage_id(&self) -> Option<i64> {
        match *self {
            Transition::Created { outage_id }
            | Transition::Updated { outage_id }
            | Transition::Resolved { outage_id } => Some(outage_id),
            Transition::Unchanged { outage_id } => outage_id,
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Applies outage transitions against a store using live catalog policy.
pub struct OutageController<S> {
    store: Arc<S>,
    catalog: Arc<ConfigManager<Catalog>>,
    clock: Clock,
}

impl<S: OutageStore> OutageController<S> {
    pub fn new(store: Arc<S>, catalog: Arc<ConfigManager<Catalog>>) -> Self {
        Self {
            store,
            catalog,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, for deterministic timestamps.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

/// Look up a sub-component's policy in one catalog snapshot.
fn policy<'a>(catalog: &'a Catalog, component: &str, sub_component: &str) -> Result<&'a SubComponent, OutageError> {
    catalog
        .component(component)
        .ok_or_else(|| OutageError::UnknownComponent(component.to_string()))?
        .sub_component(sub_component)
        .ok_or_else(|| OutageError::UnknownSubComponent {
            component: component.to_string(),
            sub_component: sub_component.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::SAMPLE;
    use crate::db::MemoryStore;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Controller over a memory store with a clock tests can move.
    pub(crate) struct Harness {
        pub controller: OutageController<MemoryStore>,
        pub store: Arc<MemoryStore>,
        pub catalog: Arc<ConfigManager<Catalog>>,
        pub clock: Arc<Mutex<DateTime<Utc>>>,
        _dir: TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("catalog.yaml");
            std::fs::write(&path, SAMPLE).unwrap();
            let catalog = Arc::new(ConfigManager::new(&path, |b: &[u8]| Ok(Catalog::from_yaml(b)?)).unwrap());
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
            let c = clock.clone();
            let controller = OutageController::new(store.clone(), catalog.clone()).with_clock(move || *c.lock());
            Self {
                controller,
                store,
                catalog,
                clock,
                _dir: dir,
            }
        }

        pub fn now(&self) -> DateTime<Utc> {
            *self.clock.lock()
        }

        pub fn advance(&self, minutes: i64) -> DateTime<Utc> {
            let mut clock = self.clock.lock();
            *clock += chrono::Duration::minutes(minutes);
            *clock
        }

        /// Rewrite the catalog file and apply it.
        pub fn set_catalog(&self, yaml: &str) {
            std::fs::write(self.catalog.path(), yaml).unwrap();
            self.catalog.reload().unwrap();
        }
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let err: OutageError = StoreError::Conflict("dup".to_string()).into();
        assert!(matches!(err, OutageError::Conflict(_)));
        let err: OutageError = StoreError::NotFound.into();
        assert!(matches!(err, OutageError::Storage(StoreError::NotFound)));
    }

    #[test]
    fn test_transition_json() {
        let json = serde_json::to_value(Transition::Created { outage_id: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"action": "created", "outage_id": 7}));
        assert_eq!(Transition::Unchanged { outage_id: None }.outage_id(), None);
    }

    #[test]
    fn test_policy_lookup() {
        let h = Harness::new();
        let catalog = h.catalog.get();
        assert!(policy(&catalog, "build-farm", "api").unwrap().auto_resolve);
        assert!(matches!(
            policy(&catalog, "nope", "api"),
            Err(OutageError::UnknownComponent(_))
        ));
        assert!(matches!(
            policy(&catalog, "build-farm", "nope"),
            Err(OutageError::UnknownSubComponent { .. })
        ));
    }
}
