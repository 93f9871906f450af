//! Probe report ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{policy, OutageController, OutageError, Transition};
use crate::catalog::SubComponent;
use crate::db::{Outage, OutageStore, OutageTx, Reason, Severity, StoreError, MANUAL_SOURCE, SYSTEM_IDENTITY};

/// Findings submitted by one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Name of the probe; becomes `discovered_from` on outages it opens.
    pub monitor: String,
    #[serde(default)]
    pub statuses: Vec<ReportEntry>,
}

/// Verdict for one sub-component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub component: String,
    pub sub_component: String,
    pub healthy: bool,
    /// Defaults to Down for new outages; keeps the current severity otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Reason>,
}

/// Outcome for one report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub component: String,
    pub sub_component: String,
    #[serde(flatten)]
    pub transition: Transition,
}

impl<S: OutageStore> OutageController<S> {
    /// Apply a probe report.
    ///
    /// Every entry is checked against the catalog before anything is written;
    /// one unknown slug, or a sub-component assigned to another monitor,
    /// rejects the whole report. Each entry then commits in its own
    /// transaction together with its heartbeat.
    pub fn ingest(&self, report: &HealthReport) -> Result<Vec<EntryOutcome>, OutageError> {
        let monitor = report.monitor.trim();
        if monitor.is_empty() {
            return Err(OutageError::Validation("monitor must not be empty".to_string()));
        }
        if monitor == MANUAL_SOURCE {
            return Err(OutageError::Validation(format!("monitor name {:?} is reserved", MANUAL_SOURCE)));
        }

        let catalog = self.catalog.get();
        let policies = report
            .statuses
            .iter()
            .map(|entry| {
                let sub = policy(&catalog, &entry.component, &entry.sub_component)?;
                match &sub.monitoring {
                    Some(monitoring) if monitoring.monitor != monitor => Err(OutageError::Validation(format!(
                        "{}/{} is probed by {}, not {}",
                        entry.component, entry.sub_component, monitoring.monitor, monitor
                    ))),
                    _ => Ok(sub),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcomes = Vec::with_capacity(report.statuses.len());
        for (entry, sub) in report.statuses.iter().zip(policies) {
            let transition = self.apply_entry(monitor, entry, sub)?;
            match transition {
                Transition::Created { outage_id } => tracing::info!(
                    "Opened outage {} for {}/{} from {}",
                    outage_id,
                    entry.component,
                    entry.sub_component,
                    monitor
                ),
                Transition::Resolved { outage_id } => tracing::info!(
                    "Auto-resolved outage {} for {}/{} from {}",
                    outage_id,
                    entry.component,
                    entry.sub_component,
                    monitor
                ),
                Transition::Updated { outage_id } => tracing::debug!(
                    "Updated outage {} for {}/{} from {}",
                    outage_id,
                    entry.component,
                    entry.sub_component,
                    monitor
                ),
                Transition::Unchanged { .. } => {}
            }
            outcomes.push(EntryOutcome {
                component: entry.component.clone(),
                sub_component: entry.sub_component.clone(),
                transition,
            });
        }

        Ok(outcomes)
    }

    /// The store transaction serializes the open-outage lookup with the insert,
    /// so concurrent reports for the same sub-component never both create.
    fn apply_entry(&self, monitor: &str, entry: &ReportEntry, sub: &SubComponent) -> Result<Transition, OutageError> {
        let now = self.now();
        let transition = self.store.transaction(|tx| {
            let transition = decide(tx, monitor, entry, sub, now)?;
            tx.record_heartbeat(&entry.component, &entry.sub_component, now)?;
            Ok(transition)
        })?;
        Ok(transition)
    }
}

/// Decide and apply the transition for one entry inside a transaction.
fn decide(
    tx: &mut dyn OutageTx,
    monitor: &str,
    entry: &ReportEntry,
    sub: &SubComponent,
    now: DateTime<Utc>,
) -> Result<Transition, StoreError> {
    let existing = tx.find_open(&entry.component, &entry.sub_component, monitor)?;

    match (entry.healthy, existing) {
        (false, None) => {
            let mut outage = Outage::new(
                &entry.component,
                &entry.sub_component,
                entry.severity.unwrap_or(Severity::Down),
                monitor,
                now,
            );
            outage.description = format!("Detected by {}", monitor);
            outage.created_by = Some(monitor.to_string());
            outage.reasons = entry.reasons.clone();
            if !sub.requires_confirmation {
                outage.confirmed_at = Some(now);
            }
            let created = tx.create(&outage)?;
            Ok(Transition::Created { outage_id: created.id })
        }
        (false, Some(mut outage)) => {
            let mut changed = false;
            if let Some(severity) = entry.severity {
                if outage.severity != severity {
                    outage.severity = severity;
                    changed = true;
                }
            }
            changed |= merge_reasons(&mut outage.reasons, &entry.reasons);

            if changed {
                outage.updated_at = now;
                tx.save(&outage)?;
                Ok(Transition::Updated { outage_id: outage.id })
            } else {
                Ok(Transition::Unchanged { outage_id: Some(outage.id) })
            }
        }
        (true, Some(mut outage)) if sub.auto_resolve => {
            outage.end_time = Some(now);
            outage.resolved_by = Some(SYSTEM_IDENTITY.to_string());
            outage.updated_at = now;
            tx.save(&outage)?;
            Ok(Transition::Resolved { outage_id: outage.id })
        }
        (true, existing) => Ok(Transition::Unchanged {
            outage_id: existing.map(|o| o.id),
        }),
    }
}

/// Add reasons not seen before and refresh results of known ones.
pub(super) fn merge_reasons(current: &mut Vec<Reason>, incoming: &[Reason]) -> bool {
    let mut changed = false;
    for reason in incoming {
        match current
            .iter_mut()
            .find(|r| r.reason_type == reason.reason_type && r.check == reason.check)
        {
            Some(known) if known.results != reason.results => {
                known.results = reason.results.clone();
                changed = true;
            }
            Some(_) => {}
            None => {
                current.push(reason.clone());
                changed = true;
            }
        }
    }
    changed
}
