//! Request signatures compatible with the identity proxy.
//!
//! The string to sign is the method, then the value of every signed header,
//! then the request path and query, each on its own line. The MAC covers
//! that string followed by the raw body and is carried as `sha256 <base64>`.

use axum::http::{HeaderMap, Method, Uri};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "sha256";

/// Headers the identity proxy signs, in order.
pub const DEFAULT_SIGNED_HEADERS: &[&str] = &[
    "Content-Length",
    "Content-Md5",
    "Content-Type",
    "Date",
    "Authorization",
    "X-Forwarded-User",
    "X-Forwarded-Email",
    "X-Forwarded-Preferred-Username",
    "X-Forwarded-Access-Token",
    "Cookie",
    "Gap-Auth",
];

/// Build the canonical string covered by the signature.
pub fn string_to_sign(method: &Method, uri: &Uri, headers: &HeaderMap, signed_headers: &[String]) -> String {
    let mut out = String::new();
    out.push_str(method.as_str());
    out.push('\n');

    for name in signed_headers {
        let values: Vec<&str> = headers
            .get_all(name.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        out.push_str(&values.join(","));
        out.push('\n');
    }

    out.push_str(uri.path());
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    out
}

fn mac(secret: &[u8], canonical: &str, body: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .expect("HMAC can take a key of any size so this cannot fail");
    mac.update(canonical.as_bytes());
    mac.update(body);
    mac
}

/// Compute the signature header value for a request.
pub fn sign_request(
    secret: &[u8],
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
    body: &[u8],
) -> String {
    let canonical = string_to_sign(method, uri, headers, signed_headers);
    let digest = mac(secret, &canonical, body).finalize().into_bytes();
    format!("{} {}", ALGORITHM, STANDARD.encode(digest))
}

/// Verify a signature header value against the request.
pub fn verify_request(
    secret: &[u8],
    signature: &str,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed_headers: &[String],
    body: &[u8],
) -> Result<(), AuthError> {
    let (algorithm, encoded) = signature
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedSignature)?;
    if algorithm != ALGORITHM {
        return Err(AuthError::MalformedSignature);
    }
    let expected = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::MalformedSignature)?;

    let canonical = string_to_sign(method, uri, headers, signed_headers);
    mac(secret, &canonical, body)
        .verify_slice(&expected)
        .map_err(|_| AuthError::SignatureMismatch)
}

/// Compare two byte strings without an early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed() -> Vec<String> {
        DEFAULT_SIGNED_HEADERS.iter().map(|h| h.to_string()).collect()
    }

    fn headers() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("content-type", HeaderValue::from_static("application/json"));
        h.insert("content-length", HeaderValue::from_static("2"));
        h.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        h
    }

    #[test]
    fn test_string_to_sign_layout() {
        let uri: Uri = "/api/reports?dry=1".parse().unwrap();
        let canonical = string_to_sign(
            &Method::POST,
            &uri,
            &headers(),
            &["Content-Type".to_string(), "Date".to_string(), "X-Forwarded-User".to_string()],
        );
        assert_eq!(canonical, "POST\napplication/json\n\nalice\n/api/reports?dry=1");
    }

    #[test]
    fn test_sign_and_verify() {
        let uri: Uri = "/api/reports".parse().unwrap();
        let sig = sign_request(b"secret", &Method::POST, &uri, &headers(), &signed(), b"{}");
        assert!(sig.starts_with("sha256 "));
        assert!(verify_request(b"secret", &sig, &Method::POST, &uri, &headers(), &signed(), b"{}").is_ok());
    }

    #[test]
    fn test_tampering_is_detected() {
        let uri: Uri = "/api/reports".parse().unwrap();
        let sig = sign_request(b"secret", &Method::POST, &uri, &headers(), &signed(), b"{}");

        let verify = |secret: &[u8], uri: &Uri, headers: &HeaderMap, body: &[u8]| {
            verify_request(secret, &sig, &Method::POST, uri, headers, &signed(), body)
        };

        assert_eq!(verify(b"other", &uri, &headers(), b"{}"), Err(AuthError::SignatureMismatch));
        assert_eq!(verify(b"secret", &uri, &headers(), b"[]"), Err(AuthError::SignatureMismatch));

        let other_uri: Uri = "/api/reports?x=1".parse().unwrap();
        assert_eq!(verify(b"secret", &other_uri, &headers(), b"{}"), Err(AuthError::SignatureMismatch));

        let mut forged = headers();
        forged.insert("x-forwarded-user", HeaderValue::from_static("mallory"));
        assert_eq!(verify(b"secret", &uri, &forged, b"{}"), Err(AuthError::SignatureMismatch));
    }

    #[test]
    fn test_malformed_signature() {
        let uri: Uri = "/".parse().unwrap();
        for bad in ["", "sha256", "sha1 AAAA", "sha256 not*base64"] {
            assert_eq!(
                verify_request(b"k", bad, &Method::GET, &uri, &HeaderMap::new(), &signed(), b""),
                Err(AuthError::MalformedSignature),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token2"));
        assert!(constant_time_eq(b"", b""));
    }
}
