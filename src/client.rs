//! Client used by probes to submit health reports.

use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::auth::sign_request;
use crate::outage::{EntryOutcome, HealthReport};

/// Report client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid server address: {0}")]
    InvalidUrl(String),
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// How the client proves who it is.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token(String),
    Signed {
        secret: Vec<u8>,
        header: String,
        signed_headers: Vec<String>,
    },
}

#[derive(Deserialize)]
struct ReportResponse {
    results: Vec<EntryOutcome>,
}

/// Submits reports to the status board.
pub struct ReportClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    timeout: Duration,
}

impl ReportClient {
    pub fn new(address: &str, credentials: Credentials, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            timeout,
        })
    }

    /// Build the authenticated request for a report without sending it.
    pub fn build_request(&self, report: &HealthReport) -> Result<reqwest::Request, ClientError> {
        let url = reqwest::Url::parse(&format!("{}/api/reports", self.base_url))
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let body = serde_json::to_vec(report)?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        match &self.credentials {
            Credentials::Token(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ClientError::InvalidUrl(format!("unusable token: {}", e)))?;
                headers.insert(header::AUTHORIZATION, value);
            }
            Credentials::Signed {
                secret,
                header: header_name,
                signed_headers,
            } => {
                let target = match url.query() {
                    Some(query) => format!("{}?{}", url.path(), query),
                    None => url.path().to_string(),
                };
                let uri: Uri = target.parse().map_err(|e| ClientError::InvalidUrl(format!("{}", e)))?;
                let signature = sign_request(secret, &Method::POST, &uri, &headers, signed_headers, &body);
                let name = header::HeaderName::from_bytes(header_name.as_bytes())
                    .map_err(|e| ClientError::InvalidUrl(format!("bad signature header: {}", e)))?;
                let value = HeaderValue::from_str(&signature)
                    .map_err(|e| ClientError::InvalidUrl(format!("bad signature: {}", e)))?;
                headers.insert(name, value);
            }
        }

        self.http
            .post(url)
            .headers(headers)
            .body(body)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))
    }

    /// Send a report and return what the server did with each entry.
    pub async fn submit(&self, report: &HealthReport) -> Result<Vec<EntryOutcome>, ClientError> {
        let request = self.build_request(report)?;
        let response = self.http.execute(request).await.map_err(|e| self.network(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ReportResponse = response.json().await.map_err(|e| self.network(e))?;
        tracing::debug!("Report from {} applied to {} entries", report.monitor, parsed.results.len());
        Ok(parsed.results)
    }

    fn network(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, Caller};
    use crate::config::ServerConfig;
    use crate::outage::ReportEntry;

    fn report() -> HealthReport {
        HealthReport {
            monitor: "app-probe".to_string(),
            statuses: vec![ReportEntry {
                component: "build-farm".to_string(),
                sub_component: "api".to_string(),
                healthy: false,
                severity: None,
                reasons: vec![],
            }],
        }
    }

    fn server_config() -> ServerConfig {
        ServerConfig {
            ingest_token: Some("probe-token".to_string()),
            hmac_secret: Some("shared".to_string()),
            ..ServerConfig::default()
        }
    }

    fn authenticate(request: &reqwest::Request) -> Result<Caller, crate::auth::AuthError> {
        let uri: Uri = request.url().path().parse().unwrap();
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        Authenticator::new(&server_config()).authenticate(request.method(), &uri, request.headers(), body)
    }

    #[test]
    fn test_signed_request_verifies_on_server() {
        let config = server_config();
        let client = ReportClient::new(
            "localhost:8080/",
            Credentials::Signed {
                secret: b"shared".to_vec(),
                header: config.signature_header.clone(),
                signed_headers: config.signed_headers.clone(),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        let request = client.build_request(&report()).unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8080/api/reports");
        assert!(request.headers().contains_key("GAP-Signature"));
        assert_eq!(authenticate(&request), Ok(Caller::Signed { user: None }));
    }

    #[test]
    fn test_token_request_verifies_on_server() {
        let client = ReportClient::new(
            "https://status.example.com",
            Credentials::Token("probe-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let request = client.build_request(&report()).unwrap();
        assert_eq!(
            authenticate(&request),
            Ok(Caller::Token {
                identity: "api".to_string()
            })
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let config = server_config();
        let client = ReportClient::new(
            "localhost:8080",
            Credentials::Signed {
                secret: b"not-shared".to_vec(),
                header: config.signature_header.clone(),
                signed_headers: config.signed_headers.clone(),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        let request = tokio_test::assert_ok!(client.build_request(&report()));
        tokio_test::assert_err!(authenticate(&request));
    }

    #[tokio::test]
    async fn test_submit_to_unreachable_server() {
        let client = ReportClient::new(
            "http://256.256.256.256",
            Credentials::Token("t".to_string()),
            Duration::from_millis(100),
        )
        .unwrap();
        tokio_test::assert_err!(client.submit(&report()).await);
    }
}
