//! Bearer token exchange with the registry's auth realm

use crate::error::{ExportError, Result};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Body returned by the auth realm; Docker Hub sends both `token` and `access_token`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    issued_at: Option<String>,
}

/// A freshly issued pull token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    /// Parse a token response body; `token` wins over `access_token`
    pub fn parse(body: &[u8]) -> Result<Self> {
        let response: TokenResponse = serde_json::from_slice(body)
            .map_err(|e| ExportError::Auth(format!("malformed token response: {}", e)))?;

        let token = response
            .token
            .filter(|t| !t.is_empty())
            .or(response.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| ExportError::Auth("token response carries no token".to_string()))?;

        Ok(Self {
            token,
            expires_in: response.expires_in,
        })
    }

    /// Absolute expiry in unix seconds, if the realm reported a lifetime
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_in.map(|secs| unix_now().saturating_add(secs))
    }
}

/// `repository:<namespace>/<repository>:pull`
pub fn pull_scope(namespace: &str, repository: &str) -> String {
    if namespace.is_empty() {
        format!("repository:{}:pull", repository)
    } else {
        format!("repository:{}/{}:pull", namespace, repository)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefers_token_field() {
        let grant = TokenGrant::parse(
            br#"{"token":"abc","access_token":"xyz","expires_in":300,"issued_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(grant.token, "abc");
        assert_eq!(grant.expires_in, Some(300));
        assert!(grant.expires_at().unwrap() >= unix_now() + 299);
    }

    #[test]
    fn test_parse_falls_back_to_access_token() {
        let grant = TokenGrant::parse(br#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(grant.token, "xyz");
        assert_eq!(grant.expires_at(), None);
    }

    #[test]
    fn test_parse_rejects_missing_or_malformed() {
        assert!(matches!(
            TokenGrant::parse(br#"{"expires_in":300}"#),
            Err(ExportError::Auth(_))
        ));
        assert!(matches!(
            TokenGrant::parse(b"<html>"),
            Err(ExportError::Auth(_))
        ));
    }

    #[test]
    fn test_pull_scope() {
        assert_eq!(pull_scope("library", "busybox"), "repository:library/busybox:pull");
        assert_eq!(pull_scope("", "team/app"), "repository:team/app:pull");
    }
}
