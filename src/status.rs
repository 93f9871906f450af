//! Derived component status.
//!
//! Status is computed on every read from the active outages and the latest
//! heartbeat. It is never stored or cached, so administrative edits to
//! outages show up on the next request.
//!
//! Statuses are totally ordered, worst first:
//! `Down > Degraded > Partial > Suspected > Unknown > Healthy`.
//! A component takes the worst status of its sub-components, so a silent
//! sub-component (Unknown) is never hidden by Healthy siblings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Catalog, Component, ConfigManager};
use crate::db::{Outage, OutageStore, OutageTx, Severity, StoreError};
use crate::outage::OutageError;

/// Displayed health of a sub-component or component, ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    Healthy,
    Unknown,
    Suspected,
    Partial,
    Degraded,
    Down,
}

impl From<Severity> for Status {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Suspected => Status::Suspected,
            Severity::Partial => Status::Partial,
            Severity::Degraded => Status::Degraded,
            Severity::Down => Status::Down,
        }
    }
}

/// Status of one sub-component.
///
/// `absent_after = None` means no probe watches the sub-component, so a
/// missing heartbeat says nothing about its health.
pub fn sub_component_status(
    active: &[Outage],
    last_heartbeat: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    absent_after: Option<Duration>,
) -> Status {
    if let Some(worst) = active.iter().map(|o| o.severity).max() {
        return worst.into();
    }

    let Some(threshold) = absent_after else {
        return Status::Healthy;
    };

    match last_heartbeat {
        None => Status::Unknown,
        // A heartbeat from the future (clock skew) counts as fresh.
        Some(seen) => match now.signed_duration_since(seen).to_std() {
            Ok(age) if age > threshold => Status::Unknown,
            _ => Status::Healthy,
        },
    }
}

/// Worst status among sub-components. No sub-components means Unknown.
pub fn component_status(statuses: impl IntoIterator<Item = Status>) -> Status {
    statuses.into_iter().max().unwrap_or(Status::Unknown)
}

#[derive(Debug, Clone, Serialize)]
pub struct SubComponentStatus {
    pub component: String,
    pub sub_component: String,
    pub status: Status,
    pub last_ping_time: Option<DateTime<Utc>>,
    pub active_outages: Vec<Outage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub name: String,
    pub status: Status,
    /// Most recent heartbeat across the component's sub-components.
    pub last_ping_time: Option<DateTime<Utc>>,
    pub sub_components: Vec<SubComponentStatus>,
}

/// Loads outages and heartbeats and derives status for each request.
pub struct StatusReader<S> {
    store: Arc<S>,
    catalog: Arc<ConfigManager<Catalog>>,
    default_absent: Duration,
}

impl<S: OutageStore> StatusReader<S> {
    pub fn new(store: Arc<S>, catalog: Arc<ConfigManager<Catalog>>, default_absent: Duration) -> Self {
        Self {
            store,
            catalog,
            default_absent,
        }
    }

    /// Status of every catalog component.
    pub fn all(&self, now: DateTime<Utc>) -> Result<Vec<ComponentStatus>, OutageError> {
        let catalog = self.catalog.get();
        catalog
            .components
            .iter()
            .map(|component| {
                self.store
                    .transaction(|tx| self.load_component(tx, component, now))
                    .map_err(OutageError::from)
            })
            .collect()
    }

    pub fn component(&self, slug: &str, now: DateTime<Utc>) -> Result<ComponentStatus, OutageError> {
        let catalog = self.catalog.get();
        let component = catalog
            .component(slug)
            .ok_or_else(|| OutageError::UnknownComponent(slug.to_string()))?;
        Ok(self.store.transaction(|tx| self.load_component(tx, component, now))?)
    }

    pub fn sub_component(
        &self,
        component: &str,
        sub_component: &str,
        now: DateTime<Utc>,
    ) -> Result<SubComponentStatus, OutageError> {
        let catalog = self.catalog.get();
        let sub = catalog
            .component(component)
            .ok_or_else(|| OutageError::UnknownComponent(component.to_string()))?
            .sub_component(sub_component)
            .ok_or_else(|| OutageError::UnknownSubComponent {
                component: component.to_string(),
                sub_component: sub_component.to_string(),
            })?;
        let absent_after = sub.absent_after(self.default_absent);

        Ok(self.store.transaction(|tx| {
            let active = tx.list_active(component, Some(sub_component), now)?;
            let last_ping_time = tx.last_heartbeat(component, sub_component)?;
            Ok(SubComponentStatus {
                component: component.to_string(),
                sub_component: sub_component.to_string(),
                status: sub_component_status(&active, last_ping_time, now, absent_after),
                last_ping_time,
                active_outages: active,
            })
        })?)
    }

    fn load_component(
        &self,
        tx: &mut dyn OutageTx,
        component: &Component,
        now: DateTime<Utc>,
    ) -> Result<ComponentStatus, StoreError> {
        let active = tx.list_active(&component.slug, None, now)?;

        let mut sub_components = Vec::with_capacity(component.sub_components.len());
        for sub in &component.sub_components {
            let last_ping_time = tx.last_heartbeat(&component.slug, &sub.slug)?;
            let outages: Vec<Outage> = active
                .iter()
                .filter(|o| o.sub_component_name == sub.slug)
                .cloned()
                .collect();
            sub_components.push(SubComponentStatus {
                component: component.slug.clone(),
                sub_component: sub.slug.clone(),
                status: sub_component_status(&outages, last_ping_time, now, sub.absent_after(self.default_absent)),
                last_ping_time,
                active_outages: outages,
            });
        }

        Ok(ComponentStatus {
            component: component.slug.clone(),
            name: component.name.clone(),
            status: component_status(sub_components.iter().map(|s| s.status)),
            last_ping_time: sub_components.iter().filter_map(|s| s.last_ping_time).max(),
            sub_components,
        })
    }
}
