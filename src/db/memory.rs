//! In-memory outage store that records every write.
//!
//! Transactions work on a copy of the state that replaces the original only
//! on success, so a failed closure leaves nothing behind, matching the SQLite
//! store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::models::Outage;
use super::store::*;

/// A write observed by [`MemoryStore`], in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create { id: i64 },
    Save { id: i64 },
    Delete { id: i64 },
    Heartbeat { component: String, sub_component: String },
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    outages: BTreeMap<i64, Outage>,
    heartbeats: HashMap<(String, String), DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    calls: Mutex<Vec<StoreCall>>,
    fail_heartbeats: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes committed so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Make heartbeat writes fail, aborting the surrounding transaction.
    pub fn fail_heartbeats(&self, fail: bool) {
        self.fail_heartbeats.store(fail, Ordering::SeqCst);
    }

    /// Every stored outage, by id.
    pub fn outages(&self) -> Vec<Outage> {
        self.state.lock().outages.values().cloned().collect()
    }

    pub fn open_outages(&self, component: &str, sub_component: &str) -> Vec<Outage> {
        self.outages()
            .into_iter()
            .filter(|o| o.component_name == component && o.sub_component_name == sub_component && o.is_open())
            .collect()
    }
}

impl OutageStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn OutageTx) -> Result<T, StoreError>,
    {
        let mut state = self.state.lock();
        let mut tx = MemoryTx {
            state: state.clone(),
            calls: Vec::new(),
            fail_heartbeats: self.fail_heartbeats.load(Ordering::SeqCst),
        };
        let out = f(&mut tx)?;

        *state = tx.state;
        self.calls.lock().extend(tx.calls);
        Ok(out)
    }
}

struct MemoryTx {
    state: MemoryState,
    calls: Vec<StoreCall>,
    fail_heartbeats: bool,
}

impl MemoryTx {
    fn check_unique_open(&self, outage: &Outage) -> Result<(), StoreError> {
        if !outage.is_open() {
            return Ok(());
        }
        let clash = self.state.outages.values().any(|o| {
            o.id != outage.id
                && o.is_open()
                && o.component_name == outage.component_name
                && o.sub_component_name == outage.sub_component_name
                && o.discovered_from == outage.discovered_from
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "an open outage from {} already exists for {}/{}",
                outage.discovered_from, outage.component_name, outage.sub_component_name
            )));
        }
        Ok(())
    }
}

fn newest_first(mut outages: Vec<Outage>) -> Vec<Outage> {
    outages.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
    outages
}

impl OutageTx for MemoryTx {
    fn find_open(
        &mut self,
        component: &str,
        sub_component: &str,
        discovered_from: &str,
    ) -> Result<Option<Outage>, StoreError> {
        Ok(self
            .state
            .outages
            .values()
            .find(|o| {
                o.component_name == component
                    && o.sub_component_name == sub_component
                    && o.discovered_from == discovered_from
                    && o.is_open()
            })
            .cloned())
    }

    fn list_active(
        &mut self,
        component: &str,
        sub_component: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Outage>, StoreError> {
        Ok(newest_first(
            self.state
                .outages
                .values()
                .filter(|o| o.component_name == component)
                .filter(|o| sub_component.map_or(true, |s| o.sub_component_name == s))
                .filter(|o| o.is_active(now))
                .cloned()
                .collect(),
        ))
    }

    fn list(&mut self, component: &str, sub_component: &str) -> Result<Vec<Outage>, StoreError> {
        Ok(newest_first(
            self.state
                .outages
                .values()
                .filter(|o| o.component_name == component && o.sub_component_name == sub_component)
                .cloned()
                .collect(),
        ))
    }

    fn get(&mut self, component: &str, sub_component: &str, id: i64) -> Result<Option<Outage>, StoreError> {
        Ok(self
            .state
            .outages
            .get(&id)
            .filter(|o| o.component_name == component && o.sub_component_name == sub_component)
            .cloned())
    }

    fn create(&mut self, outage: &Outage) -> Result<Outage, StoreError> {
        self.check_unique_open(&Outage { id: 0, ..outage.clone() })?;

        self.state.next_id += 1;
        let mut created = outage.clone();
        created.id = self.state.next_id;
        self.state.outages.insert(created.id, created.clone());
        self.calls.push(StoreCall::Create { id: created.id });
        Ok(created)
    }

    fn save(&mut self, outage: &Outage) -> Result<(), StoreError> {
        if !self.state.outages.contains_key(&outage.id) {
            return Err(StoreError::NotFound);
        }
        self.check_unique_open(outage)?;

        self.state.outages.insert(outage.id, outage.clone());
        self.calls.push(StoreCall::Save { id: outage.id });
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        let existed = self.state.outages.remove(&id).is_some();
        if existed {
            self.calls.push(StoreCall::Delete { id });
        }
        Ok(existed)
    }

    fn record_heartbeat(
        &mut self,
        component: &str,
        sub_component: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.fail_heartbeats {
            return Err(StoreError::Unavailable("heartbeat writes disabled".to_string()));
        }
        let seen = self
            .state
            .heartbeats
            .entry((component.to_string(), sub_component.to_string()))
            .or_insert(at);
        *seen = (*seen).max(at);
        self.calls.push(StoreCall::Heartbeat {
            component: component.to_string(),
            sub_component: sub_component.to_string(),
        });
        Ok(())
    }

    fn last_heartbeat(
        &mut self,
        component: &str,
        sub_component: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .state
            .heartbeats
            .get(&(component.to_string(), sub_component.to_string()))
            .copied())
    }
}
