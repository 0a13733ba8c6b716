//! Configuration management for the export pipeline

use crate::error::{ExportError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "IMAGE_EXPORTER_";

/// How a cached bearer token is judged still usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValidation {
    /// HEAD the repository's manifest endpoint with the token
    Probe,
    /// Trust the `expires_in` the auth realm reported when the token was issued
    Expiry,
}

impl std::str::FromStr for TokenValidation {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "probe" => Ok(TokenValidation::Probe),
            "expiry" => Ok(TokenValidation::Expiry),
            other => Err(ExportError::Config(format!(
                "token_validation must be 'probe' or 'expiry', got '{}'",
                other
            ))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Registry base URL, without the `/v2` suffix
    pub registry_url: String,
    pub auth_realm: String,
    pub auth_service: String,
    /// Path segment between `/v2/` and the repository name (`library` on Docker Hub)
    pub namespace: String,
    pub export_path: PathBuf,
    pub token_cache_path: PathBuf,
    pub max_concurrent_layers: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub verify_digests: bool,
    pub token_validation: TokenValidation,
    pub ipfs_api_url: String,
    pub pin: bool,
    pub verbose: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://index.docker.io".to_string(),
            auth_realm: "https://auth.docker.io/token".to_string(),
            auth_service: "registry.docker.io".to_string(),
            namespace: "library".to_string(),
            export_path: PathBuf::from("./export"),
            token_cache_path: PathBuf::from("./cache/tokens.json"),
            max_concurrent_layers: 4,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8000,
            request_timeout_secs: 300,
            verify_digests: true,
            token_validation: TokenValidation::Probe,
            ipfs_api_url: "http://127.0.0.1:5001".to_string(),
            pin: true,
            verbose: false,
        }
    }
}

impl ExportConfig {
    /// Create config from environment variables and defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Build a config from an arbitrary key lookup; keys are upper-case without the prefix
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REGISTRY_URL") {
            config.registry_url = val;
        }
        if let Some(val) = lookup("AUTH_REALM") {
            config.auth_realm = val;
        }
        if let Some(val) = lookup("AUTH_SERVICE") {
            config.auth_service = val;
        }
        if let Some(val) = lookup("NAMESPACE") {
            config.namespace = val;
        }
        if let Some(val) = lookup("EXPORT_PATH") {
            config.export_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("TOKEN_CACHE_PATH") {
            config.token_cache_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("MAX_CONCURRENT_LAYERS") {
            config.max_concurrent_layers = parse_number("MAX_CONCURRENT_LAYERS", &val)?;
        }
        if let Some(val) = lookup("RETRY_ATTEMPTS") {
            config.retry_attempts = parse_number("RETRY_ATTEMPTS", &val)?;
        }
        if let Some(val) = lookup("RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = parse_number("RETRY_BASE_DELAY_MS", &val)?;
        }
        if let Some(val) = lookup("RETRY_MAX_DELAY_MS") {
            config.retry_max_delay_ms = parse_number("RETRY_MAX_DELAY_MS", &val)?;
        }
        if let Some(val) = lookup("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = lookup("VERIFY_DIGESTS") {
            config.verify_digests = parse_flag(&val);
        }
        if let Some(val) = lookup("TOKEN_VALIDATION") {
            config.token_validation = val.parse()?;
        }
        if let Some(val) = lookup("IPFS_API_URL") {
            config.ipfs_api_url = val;
        }
        if let Some(val) = lookup("PIN") {
            config.pin = parse_flag(&val);
        }
        if let Some(val) = lookup("VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("registry_url", &self.registry_url),
            ("auth_realm", &self.auth_realm),
            ("ipfs_api_url", &self.ipfs_api_url),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(ExportError::Config(format!(
                    "{} must start with http:// or https://, got '{}'",
                    name, value
                )));
            }
            url::Url::parse(value)?;
        }
        if self.export_path.as_os_str().is_empty() {
            return Err(ExportError::Config("export_path cannot be empty".to_string()));
        }
        if self.export_path.parent().is_none() {
            return Err(ExportError::Config(format!(
                "refusing to use {} as export_path",
                self.export_path.display()
            )));
        }
        if self.max_concurrent_layers == 0 {
            return Err(ExportError::Config(
                "max_concurrent_layers must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ExportError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ExportError::Config(
                "retry_base_delay_ms cannot exceed retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_registry(mut self, registry_url: &str, auth_realm: &str) -> Self {
        self.registry_url = registry_url.trim_end_matches('/').to_string();
        self.auth_realm = auth_realm.to_string();
        self
    }

    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = path.into();
        self
    }

    pub fn with_token_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_cache_path = path.into();
        self
    }

    pub fn with_max_concurrent_layers(mut self, max: usize) -> Self {
        self.max_concurrent_layers = max;
        self
    }

    pub fn with_retry(mut self, attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_base_delay_ms = base_delay_ms;
        self.retry_max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    pub fn with_token_validation(mut self, validation: TokenValidation) -> Self {
        self.token_validation = validation;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ExportError::Config(format!("{}{} must be a number, got '{}'", ENV_PREFIX, key, value))
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ExportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.namespace, "library");
        assert!(config.verify_digests);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = ExportConfig::from_lookup(lookup_from(&[
            ("EXPORT_PATH", "/tmp/out"),
            ("MAX_CONCURRENT_LAYERS", "12"),
            ("VERIFY_DIGESTS", "false"),
            ("TOKEN_VALIDATION", "expiry"),
        ]))
        .unwrap();

        assert_eq!(config.export_path, PathBuf::from("/tmp/out"));
        assert_eq!(config.max_concurrent_layers, 12);
        assert!(!config.verify_digests);
        assert_eq!(config.token_validation, TokenValidation::Expiry);
    }

    #[test]
    fn test_bad_number_is_reported() {
        let err = ExportConfig::from_lookup(lookup_from(&[("RETRY_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("RETRY_ATTEMPTS"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ExportConfig::default()
            .with_max_concurrent_layers(0)
            .validate()
            .is_err());
        assert!(ExportConfig::default()
            .with_registry("index.docker.io", "https://auth.docker.io/token")
            .validate()
            .is_err());
        assert!(ExportConfig::default()
            .with_export_path("/")
            .validate()
            .is_err());
        assert!(ExportConfig::default()
            .with_retry(3, 10_000, 100)
            .validate()
            .is_err());
    }
}
