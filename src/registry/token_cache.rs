//! Persistent per-repository bearer token cache
//!
//! Tokens live in a single JSON file as an ordered list of records, one per
//! repository. The whole store is read, changed in memory and written back
//! through a temp file in the same directory followed by a rename.

use crate::error::{ExportError, Result};
use crate::logging::Logger;
use crate::registry::auth::unix_now;
use crate::registry::client::RegistryClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "Repository")]
    pub repository: String,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "ExpiresAt", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStore {
    #[serde(rename = "Tokens", default)]
    pub tokens: Vec<TokenRecord>,
}

impl TokenStore {
    pub fn find(&self, repository: &str) -> Option<&TokenRecord> {
        self.tokens.iter().find(|r| r.repository == repository)
    }

    /// Renew the repository's entry in place, or append a new one
    pub fn upsert(&mut self, record: TokenRecord) {
        match self
            .tokens
            .iter_mut()
            .find(|r| r.repository == record.repository)
        {
            Some(existing) => *existing = record,
            None => self.tokens.push(record),
        }
    }
}

/// Decides whether a cached token can still be used for `reference`
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn is_valid(&self, record: &TokenRecord, reference: &str) -> bool;
}

/// Asks the registry: a `HEAD` on the manifest being copied must succeed with the token
pub struct ProbeValidator {
    client: RegistryClient,
}

impl ProbeValidator {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenValidator for ProbeValidator {
    async fn is_valid(&self, record: &TokenRecord, reference: &str) -> bool {
        self.client
            .probe_manifest(&record.repository, reference, &record.token)
            .await
            .is_ok()
    }
}

/// Trusts the lifetime reported by the auth realm; records without one are stale
pub struct ExpiryValidator {
    /// Seconds of remaining lifetime required for a token to count as valid
    pub leeway_secs: u64,
}

impl Default for ExpiryValidator {
    fn default() -> Self {
        Self { leeway_secs: 30 }
    }
}

#[async_trait]
impl TokenValidator for ExpiryValidator {
    async fn is_valid(&self, record: &TokenRecord, _reference: &str) -> bool {
        record
            .expires_at
            .is_some_and(|at| at > unix_now().saturating_add(self.leeway_secs))
    }
}

pub struct TokenCache {
    path: PathBuf,
    validator: Arc<dyn TokenValidator>,
    output: Logger,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>, validator: Arc<dyn TokenValidator>, output: Logger) -> Self {
        Self {
            path: path.into(),
            validator,
            output,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return a cached token that still validates for `reference`; a stale or absent entry is `None`
    pub async fn get_token(&self, repository: &str, reference: &str) -> Result<Option<String>> {
        let store = self.load().await?;
        let Some(record) = store.find(repository) else {
            self.output
                .verbose(&format!("No cached token for {}", repository));
            return Ok(None);
        };

        if self.validator.is_valid(record, reference).await {
            self.output
                .verbose(&format!("Using cached token for {}", repository));
            Ok(Some(record.token.clone()))
        } else {
            self.output
                .verbose(&format!("Cached token for {} is no longer valid", repository));
            Ok(None)
        }
    }

    pub async fn put_token(&self, repository: &str, token: &str) -> Result<()> {
        self.put_token_with_expiry(repository, token, None).await
    }

    /// Insert or renew the repository's token and persist the whole store before returning
    pub async fn put_token_with_expiry(
        &self,
        repository: &str,
        token: &str,
        expires_at: Option<u64>,
    ) -> Result<()> {
        let mut store = self.load().await?;
        store.upsert(TokenRecord {
            repository: repository.to_string(),
            token: token.to_string(),
            expires_at,
        });

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_store(&path, &store)).await??;

        self.output
            .detail(&format!("Stored token for {} in {}", repository, self.path.display()));
        Ok(())
    }

    /// Read the store, creating an empty backing file first if there is none
    pub async fn load(&self) -> Result<TokenStore> {
        let path = self.path.clone();
        let output = self.output.clone();
        tokio::task::spawn_blocking(move || load_store(&path, &output)).await?
    }
}

fn load_store(path: &Path, output: &Logger) -> Result<TokenStore> {
    if !path.exists() {
        ensure_parent(path)?;
        std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
        return Ok(TokenStore::default());
    }

    let raw = std::fs::read(path).map_err(|e| ExportError::io(path, e))?;
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(TokenStore::default());
    }

    match serde_json::from_slice(&raw) {
        Ok(store) => Ok(store),
        Err(e) => {
            output.warning(&format!(
                "Ignoring unreadable token cache {}: {}",
                path.display(),
                e
            ));
            Ok(TokenStore::default())
        }
    }
}

/// Temp file in the same directory, fsync, then rename over the old store
fn save_store(path: &Path, store: &TokenStore) -> Result<()> {
    let dir = ensure_parent(path)?;
    let data = serde_json::to_vec_pretty(store)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ExportError::io(&dir, e))?;
    tmp.write_all(&data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ExportError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ExportError::io(path, e.error))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<PathBuf> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| ExportError::io(&dir, e))?;
    Ok(dir)
}
