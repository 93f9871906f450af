//! Monitored-component catalog.
//!
//! The catalog is configuration, not state: it is read from a YAML file,
//! held by a [`ConfigManager`] and replaced wholesale on every reload.

mod manager;
mod watch;

pub use manager::*;
pub use watch::*;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern is valid"));

/// The full catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    #[serde(default)]
    pub components: Vec<Component>,
}

/// A top-level monitored component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub sub_components: Vec<SubComponent>,
}

/// Ownership metadata used for routing and UI gating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Owner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

/// A sub-component and its outage policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubComponent {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    /// A healthy report closes the matching open outage.
    #[serde(default)]
    pub auto_resolve: bool,
    /// Outages created by probes stay unconfirmed until a human acts.
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<Monitoring>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerting: Option<Alerting>,
}

/// Describes which probe checks a sub-component and how often.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitoring {
    #[serde(with = "humantime_serde")]
    pub frequency: Duration,
    pub monitor: String,
    /// Overrides the server-wide silence threshold for this sub-component.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub absent_after: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Alerting {
    #[serde(default)]
    pub slack_channels: Vec<String>,
}

/// Catalog validation failures.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("invalid YAML: {0}")]
    Yaml(String),
    #[error("invalid slug {0:?}")]
    InvalidSlug(String),
    #[error("duplicate component slug {0:?}")]
    DuplicateComponent(String),
    #[error("duplicate sub-component slug {sub_component:?} in component {component:?}")]
    DuplicateSubComponent {
        component: String,
        sub_component: String,
    },
    #[error("monitoring for {0:?} has a zero frequency")]
    ZeroFrequency(String),
}

impl Catalog {
    /// Parse and validate a catalog from raw YAML bytes.
    ///
    /// Missing slugs are derived from names.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, CatalogError> {
        let mut catalog: Catalog =
            serde_yaml::from_slice(bytes).map_err(|e| CatalogError::Yaml(e.to_string()))?;
        catalog.normalize()?;
        Ok(catalog)
    }

    fn normalize(&mut self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();

        for component in &mut self.components {
            if component.slug.is_empty() {
                component.slug = slugify(&component.name);
            }
            validate_slug(&component.slug)?;
            if !seen.insert(component.slug.clone()) {
                return Err(CatalogError::DuplicateComponent(component.slug.clone()));
            }

            let mut seen_subs = HashSet::new();
            for sub in &mut component.sub_components {
                if sub.slug.is_empty() {
                    sub.slug = slugify(&sub.name);
                }
                validate_slug(&sub.slug)?;
                if !seen_subs.insert(sub.slug.clone()) {
                    return Err(CatalogError::DuplicateSubComponent {
                        component: component.slug.clone(),
                        sub_component: sub.slug.clone(),
                    });
                }
                if let Some(monitoring) = &sub.monitoring {
                    if monitoring.frequency.is_zero() {
                        return Err(CatalogError::ZeroFrequency(sub.slug.clone()));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn component(&self, slug: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.slug == slug)
    }

    pub fn sub_component(&self, component: &str, sub_component: &str) -> Option<&SubComponent> {
        self.component(component)?.sub_component(sub_component)
    }
}

impl Component {
    pub fn sub_component(&self, slug: &str) -> Option<&SubComponent> {
        self.sub_components.iter().find(|s| s.slug == slug)
    }
}

impl SubComponent {
    /// Silence threshold after which a missing heartbeat means Unknown.
    ///
    /// Sub-components no probe watches have no threshold.
    pub fn absent_after(&self, default: Duration) -> Option<Duration> {
        self.monitoring
            .as_ref()
            .map(|m| m.absent_after.unwrap_or(default))
    }
}

/// Turn a human name into a URL-safe slug.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn validate_slug(slug: &str) -> Result<(), CatalogError> {
    if SLUG_RE.is_match(slug) {
        Ok(())
    } else {
        Err(CatalogError::InvalidSlug(slug.to_string()))
    }
}
