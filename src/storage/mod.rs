//! Content-addressed storage backends the export tree is handed to

pub mod kubo;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

pub use kubo::KuboBackend;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Add the directory at `path` recursively and return the root content id
    async fn add(&self, path: &Path, pin: bool) -> Result<String>;

    /// Liveness check; not part of the copy pipeline
    async fn is_up(&self) -> bool;
}
