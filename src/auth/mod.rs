//! Authentication of probe reports and administrative requests.
//!
//! Two credential forms are accepted: a pre-shared bearer token, or a
//! message signature produced by the identity proxy (or a probe holding the
//! same secret). Both are checked before a request body is trusted.

mod signature;

pub use signature::*;

use axum::http::{header, HeaderMap, Method, Uri};
use thiserror::Error;

use crate::config::ServerConfig;

/// Header the identity proxy uses to pass the authenticated user.
pub const FORWARDED_USER_HEADER: &str = "X-Forwarded-User";

/// Authentication failures.
///
/// Callers only ever see a generic rejection; the variants exist for logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credentials presented")]
    MissingCredentials,
    #[error("bearer token rejected")]
    InvalidToken,
    #[error("signature header malformed")]
    MalformedSignature,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("signed request carries no user")]
    MissingIdentity,
}

/// Who made an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Presented the shared bearer token.
    Token { identity: String },
    /// Signed by the identity proxy or a probe holding the signing secret.
    Signed { user: Option<String> },
}

impl Caller {
    /// Identity to record on outages changed by this caller.
    pub fn user(&self) -> Result<&str, AuthError> {
        match self {
            Caller::Token { identity } => Ok(identity.as_str()),
            Caller::Signed { user: Some(user) } => Ok(user.as_str()),
            Caller::Signed { user: None } => Err(AuthError::MissingIdentity),
        }
    }
}

/// Verifies request credentials.
#[derive(Debug, Clone)]
pub struct Authenticator {
    token: Option<String>,
    api_identity: String,
    secret: Option<Vec<u8>>,
    signature_header: String,
    signed_headers: Vec<String>,
}

impl Authenticator {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            token: config.ingest_token.clone(),
            api_identity: config.api_identity.clone(),
            secret: config.hmac_secret.as_ref().map(|s| s.as_bytes().to_vec()),
            signature_header: config.signature_header.clone(),
            signed_headers: config.signed_headers.clone(),
        }
    }

    /// True when at least one credential form is configured.
    pub fn is_enabled(&self) -> bool {
        self.token.is_some() || self.secret.is_some()
    }

    pub fn signature_header(&self) -> &str {
        &self.signature_header
    }

    pub fn signed_headers(&self) -> &[String] {
        &self.signed_headers
    }

    /// Authenticate a request from its parts and raw body.
    ///
    /// A signature header, when present, is authoritative; otherwise the
    /// bearer token is checked.
    pub fn authenticate(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Caller, AuthError> {
        if let Some(signature) = headers.get(self.signature_header.as_str()) {
            let secret = self.secret.as_deref().ok_or(AuthError::SignatureMismatch)?;
            let signature = signature.to_str().map_err(|_| AuthError::MalformedSignature)?;
            verify_request(secret, signature, method, uri, headers, &self.signed_headers, body)?;

            let user = headers
                .get(FORWARDED_USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string);
            return Ok(Caller::Signed { user });
        }

        let presented = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
        let expected = self.token.as_deref().ok_or(AuthError::InvalidToken)?;
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Caller::Token {
                identity: self.api_identity.clone(),
            })
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim()).filter(|t| !t.is_empty())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authenticator() -> Authenticator {
        Authenticator::new(&ServerConfig {
            ingest_token: Some("probe-token".to_string()),
            hmac_secret: Some("proxy-secret".to_string()),
            ..Default::default()
        })
    }

    fn uri() -> Uri {
        "/api/reports".parse().unwrap()
    }

    #[test]
    fn test_bearer_token() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer probe-token"));

        let caller = auth.authenticate(&Method::POST, &uri(), &headers, b"{}").unwrap();
        assert_eq!(caller, Caller::Token { identity: "api".to_string() });
        assert_eq!(caller.user(), Ok("api"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert_eq!(
            auth.authenticate(&Method::POST, &uri(), &headers, b"{}"),
            Err(AuthError::InvalidToken)
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic probe-token"));
        assert_eq!(
            auth.authenticate(&Method::POST, &uri(), &headers, b"{}"),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn test_no_credentials() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&Method::GET, &uri(), &HeaderMap::new(), b""),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn test_signed_request_with_user() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        let sig = sign_request(b"proxy-secret", &Method::POST, &uri(), &headers, auth.signed_headers(), b"{}");
        headers.insert("gap-signature", HeaderValue::from_str(&sig).unwrap());

        let caller = auth.authenticate(&Method::POST, &uri(), &headers, b"{}").unwrap();
        assert_eq!(caller.user(), Ok("alice"));
    }

    #[test]
    fn test_signed_request_without_user() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        let sig = sign_request(b"proxy-secret", &Method::POST, &uri(), &headers, auth.signed_headers(), b"{}");
        headers.insert("gap-signature", HeaderValue::from_str(&sig).unwrap());

        let caller = auth.authenticate(&Method::POST, &uri(), &headers, b"{}").unwrap();
        assert_eq!(caller, Caller::Signed { user: None });
        assert_eq!(caller.user(), Err(AuthError::MissingIdentity));
    }

    #[test]
    fn test_bad_signature_does_not_fall_back_to_token() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer probe-token"));
        headers.insert("gap-signature", HeaderValue::from_static("sha256 AAAA"));

        assert_eq!(
            auth.authenticate(&Method::POST, &uri(), &headers, b"{}"),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn test_unconfigured_rejects_everything() {
        let auth = Authenticator::new(&ServerConfig::default());
        assert!(!auth.is_enabled());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer anything"));
        assert!(auth.authenticate(&Method::POST, &uri(), &headers, b"{}").is_err());
    }
}
