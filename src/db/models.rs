//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source recorded on outages created by a person or API client.
pub const MANUAL_SOURCE: &str = "manual";

/// Identity recorded when the system itself resolves an outage.
pub const SYSTEM_IDENTITY: &str = "system";

/// Outage severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Suspected,
    Partial,
    Degraded,
    Down,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Suspected => "Suspected",
            Severity::Partial => "Partial",
            Severity::Degraded => "Degraded",
            Severity::Down => "Down",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Suspected" => Ok(Severity::Suspected),
            "Partial" => Ok(Severity::Partial),
            "Degraded" => Ok(Severity::Degraded),
            "Down" => Ok(Severity::Down),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One diagnostic signal that contributed to an outage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    #[serde(rename = "type")]
    pub reason_type: String,
    pub check: String,
    #[serde(default)]
    pub results: String,
}

/// Slack thread used to correlate notifications with an outage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackThread {
    pub channel: String,
    pub thread_url: String,
}

/// A recorded degraded or down period for one sub-component from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outage {
    pub id: i64,
    pub component_name: String,
    pub sub_component_name: String,
    pub severity: Severity,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub description: String,
    pub triage_notes: String,
    pub discovered_from: String,
    pub created_by: Option<String>,
    pub resolved_by: Option<String>,
    pub confirmed_by: Option<String>,
    pub reasons: Vec<Reason>,
    pub slack_threads: Vec<SlackThread>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Outage {
    /// A new, unsaved outage starting at `now`.
    pub fn new(
        component: &str,
        sub_component: &str,
        severity: Severity,
        discovered_from: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            component_name: component.to_string(),
            sub_component_name: sub_component.to_string(),
            severity,
            start_time: now,
            end_time: None,
            confirmed_at: None,
            description: String::new(),
            triage_notes: String::new(),
            discovered_from: discovered_from.to_string(),
            created_by: None,
            resolved_by: None,
            confirmed_by: None,
            reasons: Vec::new(),
            slack_threads: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Ongoing at `now`: started and not yet ended.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && self.end_time.map_or(true, |end| end > now)
    }

    /// No end time recorded.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Down > Severity::Degraded);
        assert!(Severity::Degraded > Severity::Partial);
        assert!(Severity::Partial > Severity::Suspected);
        assert_eq!("Degraded".parse::<Severity>(), Ok(Severity::Degraded));
        assert!("down".parse::<Severity>().is_err());
    }

    #[test]
    fn test_outage_activity() {
        let now = Utc::now();
        let mut outage = Outage::new("c", "s", Severity::Down, MANUAL_SOURCE, now);
        assert!(outage.is_active(now));
        assert!(outage.is_open());

        outage.start_time = now + Duration::hours(1);
        assert!(!outage.is_active(now), "scheduled outages are not active yet");

        outage.start_time = now - Duration::hours(2);
        outage.end_time = Some(now - Duration::hours(1));
        assert!(!outage.is_active(now));
        assert!(!outage.is_open());
    }

    #[test]
    fn test_reason_json_uses_type_key() {
        let reason = Reason {
            reason_type: "http".to_string(),
            check: "https://example.com/healthz".to_string(),
            results: "503".to_string(),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["type"], "http");
    }
}
