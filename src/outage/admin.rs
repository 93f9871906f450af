//! Manual outage management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ingest::merge_reasons;
use super::{policy, OutageController, OutageError, Transition};
use crate::db::{display_time, Outage, OutageStore, Reason, Severity, SlackThread, MANUAL_SOURCE};

/// Body of a manual outage declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutage {
    pub severity: Severity,
    /// Defaults to now. May lie in the future for a scheduled outage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Set to record an outage that is already over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_notes: Option<String>,
    /// Defaults to `manual`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Reason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slack_threads: Vec<SlackThread>,
}

impl NewOutage {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            start_time: None,
            end_time: None,
            description: None,
            triage_notes: None,
            discovered_from: None,
            reasons: Vec::new(),
            slack_threads: Vec::new(),
        }
    }
}

/// A timestamp that can be explicitly cleared.
///
/// `valid = false` removes the value; `valid = true` requires `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullableTime {
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    pub valid: bool,
}

impl NullableTime {
    pub fn set(time: DateTime<Utc>) -> Self {
        Self { time: Some(time), valid: true }
    }

    pub fn clear() -> Self {
        Self { time: None, valid: false }
    }
}

/// Partial update of an outage. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NullableTime>,
    /// Appended to the existing threads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slack_threads: Vec<SlackThread>,
}

impl<S: OutageStore> OutageController<S> {
    /// Declare an outage by hand.
    ///
    /// Manual outages are confirmed on creation. An open outage from the same
    /// source is updated rather than duplicated.
    pub fn create_outage(
        &self,
        component: &str,
        sub_component: &str,
        new: &NewOutage,
        user: &str,
    ) -> Result<(Transition, Outage), OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        let now = self.now();
        let start_time = new.start_time.unwrap_or(now);
        check_window(start_time, new.end_time)?;

        let source = new
            .discovered_from
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(MANUAL_SOURCE);

        let (transition, outage) = self.store.transaction(|tx| {
            if new.end_time.is_none() {
                if let Some(mut open) = tx.find_open(component, sub_component, source)? {
                    // A scheduled outage that has not begun yet starts with this declaration.
                    if open.start_time > now && start_time < open.start_time {
                        open.start_time = start_time;
                    }
                    open.severity = new.severity;
                    if let Some(description) = &new.description {
                        open.description = description.clone();
                    }
                    if let Some(notes) = &new.triage_notes {
                        open.triage_notes = notes.clone();
                    }
                    merge_reasons(&mut open.reasons, &new.reasons);
                    append_threads(&mut open.slack_threads, &new.slack_threads);
                    confirm(&mut open, user, now);
                    open.updated_at = now;
                    tx.save(&open)?;
                    return Ok((Transition::Updated { outage_id: open.id }, open));
                }
            }

            let mut outage = Outage::new(component, sub_component, new.severity, source, now);
            outage.start_time = start_time;
            outage.end_time = new.end_time;
            outage.description = new.description.clone().unwrap_or_default();
            outage.triage_notes = new.triage_notes.clone().unwrap_or_default();
            outage.reasons = new.reasons.clone();
            outage.slack_threads = new.slack_threads.clone();
            outage.created_by = Some(user.to_string());
            if outage.end_time.is_some() {
                outage.resolved_by = Some(user.to_string());
            }
            confirm(&mut outage, user, now);

            let created = tx.create(&outage)?;
            Ok((Transition::Created { outage_id: created.id }, created))
        })?;

        tracing::info!(
            "{} {} outage {} for {}/{} starting {}",
            user,
            if matches!(transition, Transition::Created { .. }) { "declared" } else { "updated" },
            outage.id,
            component,
            sub_component,
            display_time(outage.start_time)
        );
        Ok((transition, outage))
    }

    /// Mark an outage as confirmed. Confirming twice keeps the first confirmation.
    pub fn confirm_outage(&self, component: &str, sub_component: &str, id: i64, user: &str) -> Result<Outage, OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        let now = self.now();

        let outage = self.store.transaction(|tx| {
            let Some(mut outage) = tx.get(component, sub_component, id)? else {
                return Ok(None);
            };
            if confirm(&mut outage, user, now) {
                outage.updated_at = now;
                tx.save(&outage)?;
            }
            Ok(Some(outage))
        })?;

        let outage = outage.ok_or(OutageError::NotFound(id))?;
        tracing::info!("{} confirmed outage {} for {}/{}", user, id, component, sub_component);
        Ok(outage)
    }

    /// End an outage now. An already resolved outage is returned unchanged.
    pub fn resolve_outage(&self, component: &str, sub_component: &str, id: i64, user: &str) -> Result<Outage, OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        let now = self.now();

        let outage = self.store.transaction(|tx| {
            let Some(mut outage) = tx.get(component, sub_component, id)? else {
                return Ok(None);
            };
            if outage.is_open() {
                // A scheduled outage resolved before it starts ends at its start.
                outage.end_time = Some(now.max(outage.start_time));
                outage.resolved_by = Some(user.to_string());
                outage.updated_at = now;
                tx.save(&outage)?;
            }
            Ok(Some(outage))
        })?;

        let outage = outage.ok_or(OutageError::NotFound(id))?;
        tracing::info!("{} resolved outage {} for {}/{}", user, id, component, sub_component);
        Ok(outage)
    }

    /// Apply a partial update.
    ///
    /// Clearing the end time re-opens the outage, which fails with
    /// [`OutageError::Conflict`] when another open outage from the same
    /// source exists.
    pub fn update_outage(
        &self,
        component: &str,
        sub_component: &str,
        id: i64,
        patch: &OutagePatch,
        user: &str,
    ) -> Result<Outage, OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        let now = self.now();

        let outage = self.store.transaction(|tx| {
            let Some(mut outage) = tx.get(component, sub_component, id)? else {
                return Ok(None);
            };
            if let Err(e) = apply_patch(&mut outage, patch, user, now) {
                return Ok(Some(Err(e)));
            }
            outage.updated_at = now;
            tx.save(&outage)?;
            Ok(Some(Ok(outage)))
        });

        let outage = match outage? {
            Some(result) => result?,
            None => return Err(OutageError::NotFound(id)),
        };
        tracing::info!("{} updated outage {} for {}/{}", user, id, component, sub_component);
        Ok(outage)
    }

    /// Permanently remove an outage.
    pub fn delete_outage(&self, component: &str, sub_component: &str, id: i64) -> Result<(), OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;

        let deleted = self.store.transaction(|tx| match tx.get(component, sub_component, id)? {
            Some(_) => tx.delete(id),
            None => Ok(false),
        })?;

        if !deleted {
            return Err(OutageError::NotFound(id));
        }
        tracing::info!("Deleted outage {} for {}/{}", id, component, sub_component);
        Ok(())
    }

    pub fn get_outage(&self, component: &str, sub_component: &str, id: i64) -> Result<Outage, OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        self.store
            .transaction(|tx| tx.get(component, sub_component, id))?
            .ok_or(OutageError::NotFound(id))
    }

    /// Every outage of a sub-component, newest first.
    pub fn list_outages(&self, component: &str, sub_component: &str) -> Result<Vec<Outage>, OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        Ok(self.store.transaction(|tx| tx.list(component, sub_component))?)
    }

    /// Outages of a sub-component that are in effect right now.
    pub fn list_active_outages(&self, component: &str, sub_component: &str) -> Result<Vec<Outage>, OutageError> {
        policy(&self.catalog.get(), component, sub_component)?;
        let now = self.now();
        Ok(self
            .store
            .transaction(|tx| tx.list_active(component, Some(sub_component), now))?)
    }
}

/// Record a confirmation unless one exists. Returns true when it changed.
fn confirm(outage: &mut Outage, user: &str, now: DateTime<Utc>) -> bool {
    if outage.is_confirmed() {
        return false;
    }
    outage.confirmed_at = Some(now);
    outage.confirmed_by = Some(user.to_string());
    true
}

fn check_window(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<(), OutageError> {
    match end {
        Some(end) if end < start => Err(OutageError::Validation(format!(
            "end_time {} is before start_time {}",
            display_time(end),
            display_time(start)
        ))),
        _ => Ok(()),
    }
}

fn append_threads(current: &mut Vec<SlackThread>, incoming: &[SlackThread]) {
    for thread in incoming {
        if !current.contains(thread) {
            current.push(thread.clone());
        }
    }
}

fn apply_patch(outage: &mut Outage, patch: &OutagePatch, user: &str, now: DateTime<Utc>) -> Result<(), OutageError> {
    if let Some(severity) = patch.severity {
        outage.severity = severity;
    }
    if let Some(description) = &patch.description {
        outage.description = description.clone();
    }
    if let Some(notes) = &patch.triage_notes {
        outage.triage_notes = notes.clone();
    }
    if let Some(start) = patch.start_time {
        outage.start_time = start;
    }
    match patch.confirmed {
        Some(true) => {
            confirm(outage, user, now);
        }
        Some(false) => {
            outage.confirmed_at = None;
            outage.confirmed_by = None;
        }
        None => {}
    }
    match patch.end_time {
        Some(NullableTime { valid: false, .. }) => {
            outage.end_time = None;
            outage.resolved_by = None;
        }
        Some(NullableTime { time: Some(end), valid: true }) => {
            if outage.end_time.is_none() {
                outage.resolved_by = Some(user.to_string());
            }
            outage.end_time = Some(end);
        }
        Some(NullableTime { time: None, valid: true }) => {
            return Err(OutageError::Validation("end_time.valid is true but no time given".to_string()));
        }
        None => {}
    }
    append_threads(&mut outage.slack_threads, &patch.slack_threads);
    check_window(outage.start_time, outage.end_time)
}
