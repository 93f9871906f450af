//! Configuration module for the status board.
//!
//! Loads process configuration from environment variables with sensible defaults.
//! The monitored-component catalog lives in its own file, see [`crate::catalog`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::DEFAULT_SIGNED_HEADERS;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "status-board.db")
    pub db_path: String,
    /// Path to the YAML catalog (default: "catalog.yaml")
    pub catalog_path: PathBuf,
    /// Pre-shared bearer token accepted from probes and API clients.
    pub ingest_token: Option<String>,
    /// Identity recorded on outages changed by bearer-token callers.
    pub api_identity: String,
    /// Secret shared with the identity proxy and signing probes.
    pub hmac_secret: Option<String>,
    /// Header carrying the request signature.
    pub signature_header: String,
    /// Ordered header names covered by the signature.
    pub signed_headers: Vec<String>,
    /// How long a monitored sub-component may stay silent before it is Unknown.
    pub absent_threshold: Duration,
    /// Quiet period used to collapse bursts of catalog file events.
    pub reload_debounce: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "status-board.db".to_string(),
            catalog_path: PathBuf::from("catalog.yaml"),
            ingest_token: None,
            api_identity: "api".to_string(),
            hmac_secret: None,
            signature_header: "GAP-Signature".to_string(),
            signed_headers: DEFAULT_SIGNED_HEADERS.iter().map(|h| h.to_string()).collect(),
            absent_threshold: Duration::from_secs(300),
            reload_debounce: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUS_BOARD_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STATUS_BOARD_DB_PATH`: Database file path (default: "status-board.db")
    /// - `STATUS_BOARD_CATALOG_PATH`: Catalog file path (default: "catalog.yaml")
    /// - `STATUS_BOARD_INGEST_TOKEN`: Bearer token for machine callers (default: unset)
    /// - `STATUS_BOARD_API_IDENTITY`: Identity of bearer callers (default: "api")
    /// - `STATUS_BOARD_HMAC_SECRET`: Signature secret (default: unset)
    /// - `STATUS_BOARD_SIGNATURE_HEADER`: Signature header (default: "GAP-Signature")
    /// - `STATUS_BOARD_SIGNED_HEADERS`: Comma separated signed header names
    /// - `STATUS_BOARD_ABSENT_THRESHOLD_SECS`: Heartbeat silence threshold (default: 300)
    /// - `STATUS_BOARD_RELOAD_DEBOUNCE_MS`: Catalog reload debounce (default: 500)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = lookup("STATUS_BOARD_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("STATUS_BOARD_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(catalog_path) = lookup("STATUS_BOARD_CATALOG_PATH") {
            cfg.catalog_path = PathBuf::from(catalog_path);
        }

        cfg.ingest_token = lookup("STATUS_BOARD_INGEST_TOKEN").filter(|t| !t.is_empty());
        cfg.hmac_secret = lookup("STATUS_BOARD_HMAC_SECRET").filter(|s| !s.is_empty());

        if let Some(identity) = lookup("STATUS_BOARD_API_IDENTITY").filter(|s| !s.is_empty()) {
            cfg.api_identity = identity;
        }

        if let Some(header) = lookup("STATUS_BOARD_SIGNATURE_HEADER").filter(|s| !s.is_empty()) {
            cfg.signature_header = header;
        }

        if let Some(headers) = lookup("STATUS_BOARD_SIGNED_HEADERS") {
            cfg.signed_headers = headers
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }

        if let Some(secs) = lookup("STATUS_BOARD_ABSENT_THRESHOLD_SECS").and_then(|s| s.parse().ok()) {
            cfg.absent_threshold = Duration::from_secs(secs);
        }

        if let Some(ms) = lookup("STATUS_BOARD_RELOAD_DEBOUNCE_MS").and_then(|s| s.parse().ok()) {
            cfg.reload_debounce = Duration::from_millis(ms);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "status-board.db");
        assert_eq!(cfg.signature_header, "GAP-Signature");
        assert!(cfg.signed_headers.iter().any(|h| h == "X-Forwarded-User"));
        assert!(cfg.ingest_token.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STATUS_BOARD_HTTP_PORT", "9090"),
            ("STATUS_BOARD_INGEST_TOKEN", "s3cret"),
            ("STATUS_BOARD_SIGNED_HEADERS", "Content-Type, Date ,"),
            ("STATUS_BOARD_ABSENT_THRESHOLD_SECS", "60"),
            ("STATUS_BOARD_HMAC_SECRET", ""),
        ]);
        let cfg = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.ingest_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.signed_headers, vec!["Content-Type", "Date"]);
        assert_eq!(cfg.absent_threshold, Duration::from_secs(60));
        assert!(cfg.hmac_secret.is_none());
    }

    #[test]
    fn test_invalid_port_keeps_default() {
        let cfg = ServerConfig::from_lookup(|k| {
            (k == "STATUS_BOARD_HTTP_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(cfg.http_port, 8080);
    }
}
