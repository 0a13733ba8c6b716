//! End-to-end copy pipeline
//!
//! [`CopyOrchestrator`] resolves a pull token, resolves the image's manifest
//! (multi-platform list first, single manifest as fallback), fetches every
//! platform's manifest, config and layers into the export tree, and finally
//! hands the tree to a [`StorageBackend`]. Platforms are processed one at a
//! time in list order; layers within a platform are fetched concurrently.

pub mod report;
pub mod state;

pub use report::{CopyReport, PlatformSummary};
pub use state::{CopyState, ManifestKind};

use crate::concurrency::ConcurrentFetcher;
use crate::config::{ExportConfig, TokenValidation};
use crate::digest::DigestUtils;
use crate::error::{ExportError, Result};
use crate::export::ExportLayout;
use crate::image::{ManifestList, PlatformManifest};
use crate::logging::{Logger, short_digest};
use crate::registry::{
    ExpiryValidator, ProbeValidator, RegistryClient, TokenCache, TokenValidator,
};
use crate::storage::StorageBackend;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

enum ResolvedManifest {
    Fat { list: ManifestList, raw: Vec<u8> },
    Single { manifest: PlatformManifest, raw: Vec<u8> },
}

struct PlatformOutcome {
    summary: PlatformSummary,
    blobs: usize,
    bytes: u64,
}

pub struct CopyOrchestrator {
    config: ExportConfig,
    client: RegistryClient,
    token_cache: TokenCache,
    layout: ExportLayout,
    fetcher: ConcurrentFetcher,
    storage: Arc<dyn StorageBackend>,
    output: Logger,
    states: Mutex<Vec<CopyState>>,
}

impl CopyOrchestrator {
    pub fn new(
        config: ExportConfig,
        storage: Arc<dyn StorageBackend>,
        output: Logger,
    ) -> Result<Self> {
        config.validate()?;

        let client = RegistryClient::from_config(&config, output.clone())?;
        let validator: Arc<dyn TokenValidator> = match config.token_validation {
            TokenValidation::Probe => Arc::new(ProbeValidator::new(client.clone())),
            TokenValidation::Expiry => Arc::new(ExpiryValidator::default()),
        };
        let token_cache = TokenCache::new(&config.token_cache_path, validator, output.clone());
        let layout = ExportLayout::new(&config.export_path);
        let fetcher = ConcurrentFetcher::new(
            client.clone(),
            layout.clone(),
            config.max_concurrent_layers,
            output.clone(),
        );

        Ok(Self {
            config,
            client,
            token_cache,
            layout,
            fetcher,
            storage,
            output,
            states: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn layout(&self) -> &ExportLayout {
        &self.layout
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.token_cache
    }

    /// States visited by the most recent copy, in order
    pub fn last_states(&self) -> Vec<CopyState> {
        self.states
            .lock()
            .map(|states| states.clone())
            .unwrap_or_default()
    }

    pub async fn copy_image(&self, repository: &str, reference: &str) -> Result<CopyReport> {
        self.copy_image_with_cancel(repository, reference, &CancellationToken::new())
            .await
    }

    /// Copy `repository:reference` into the export tree and hand it to storage
    ///
    /// Returns the content id inside a [`CopyReport`], or the first fatal error
    /// wrapped with the stage it happened in. Cancellation yields [`ExportError::Cancelled`].
    pub async fn copy_image_with_cancel(
        &self,
        repository: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<CopyReport> {
        if let Ok(mut states) = self.states.lock() {
            states.clear();
        }
        let mut state = CopyState::Init;
        self.record(state);

        match self.run(repository, reference, cancel, &mut state).await {
            Ok(report) => Ok(report),
            Err(err) => {
                let stage = state.stage();
                self.advance(&mut state, CopyState::Failed);
                match err {
                    ExportError::Cancelled => {
                        self.output.warning(&format!("Copy of {} cancelled during {}", repository, stage));
                        Err(ExportError::Cancelled)
                    }
                    err => {
                        let err = err.in_stage(stage, repository);
                        self.output.error(&err.to_string());
                        Err(err)
                    }
                }
            }
        }
    }

    async fn run(
        &self,
        repository: &str,
        reference: &str,
        cancel: &CancellationToken,
        state: &mut CopyState,
    ) -> Result<CopyReport> {
        self.output
            .section(&format!("Copying {}:{}", repository, reference));

        check_cancelled(cancel)?;
        let token = cancellable(cancel, self.resolve_token(repository, reference)).await?;
        self.advance(state, CopyState::TokenResolved);

        self.layout.reset().await?;
        self.output.detail(&format!(
            "Export tree reset at {}",
            self.layout.root().display()
        ));

        check_cancelled(cancel)?;
        let resolved = cancellable(
            cancel,
            self.resolve_manifest(repository, reference, &token),
        )
        .await?;

        let mut platforms = Vec::new();
        let mut blobs_written = 0;
        let mut bytes_written = 0;

        let kind = match resolved {
            ResolvedManifest::Fat { list, raw } => {
                if list.manifests.is_empty() {
                    return Err(ExportError::Validation(format!(
                        "manifest list for {}:{} has no entries",
                        repository, reference
                    )));
                }
                let digest = DigestUtils::compute_docker_digest(&raw);
                self.layout.write_top_level(&raw, &digest).await?;
                bytes_written += raw.len() as u64;
                self.advance(state, CopyState::ManifestResolved(ManifestKind::Fat));

                let total = list.manifests.len();
                for (index, entry) in list.manifests.iter().enumerate() {
                    check_cancelled(cancel)?;
                    let label = entry.platform_label();
                    self.output.subsection(&format!(
                        "Platform {}/{}: {} ({})",
                        index + 1,
                        total,
                        label,
                        short_digest(&entry.digest)
                    ));

                    let (manifest, raw) = cancellable(
                        cancel,
                        self.client.fetch_manifest(repository, &entry.digest, Some(&token)),
                    )
                    .await?;
                    self.layout.write_manifest(&raw, &entry.digest).await?;

                    let outcome = self
                        .fetch_platform(repository, &label, &entry.digest, &manifest, &token, cancel)
                        .await?;
                    blobs_written += outcome.blobs;
                    bytes_written += outcome.bytes + raw.len() as u64;
                    platforms.push(outcome.summary);
                }
                ManifestKind::Fat
            }
            ResolvedManifest::Single { manifest, raw } => {
                let digest = DigestUtils::compute_docker_digest(&raw);
                self.layout.write_top_level(&raw, &digest).await?;
                bytes_written += raw.len() as u64;
                self.advance(state, CopyState::ManifestResolved(ManifestKind::Single));

                self.output.subsection(&format!(
                    "Platform 1/1: {} ({})",
                    reference,
                    short_digest(&digest)
                ));
                let outcome = self
                    .fetch_platform(repository, reference, &digest, &manifest, &token, cancel)
                    .await?;
                blobs_written += outcome.blobs;
                bytes_written += outcome.bytes;
                platforms.push(outcome.summary);
                ManifestKind::Single
            }
        };
        self.advance(state, CopyState::BlobsDownloaded);

        check_cancelled(cancel)?;
        self.output.step(&format!(
            "Handing {} to storage (pin: {})",
            self.layout.root().display(),
            self.config.pin
        ));
        let content_id = cancellable(
            cancel,
            self.storage.add(self.layout.root(), self.config.pin),
        )
        .await?;
        if content_id.trim().is_empty() {
            return Err(ExportError::Storage(
                "storage backend returned an empty content id".to_string(),
            ));
        }
        self.advance(state, CopyState::HandedOff);

        self.output.success(&format!(
            "Copied {}:{} ({} platform(s), {}) in {} -> {}",
            repository,
            reference,
            platforms.len(),
            self.output.format_size(bytes_written),
            self.output.format_duration(self.output.elapsed()),
            content_id
        ));
        self.advance(state, CopyState::Done);

        Ok(CopyReport {
            content_id,
            repository: repository.to_string(),
            reference: reference.to_string(),
            kind,
            platforms,
            blobs_written,
            bytes_written,
        })
    }

    /// Cached token if it still validates, otherwise a fresh one stored back into the cache
    async fn resolve_token(&self, repository: &str, reference: &str) -> Result<String> {
        match self.token_cache.get_token(repository, reference).await {
            Ok(Some(token)) => {
                self.output
                    .info(&format!("Using cached token for {}", repository));
                return Ok(token);
            }
            Ok(None) => {}
            Err(e) => {
                self.output
                    .warning(&format!("Token cache unavailable, fetching a new token: {}", e));
            }
        }

        let grant = self.client.fetch_token(repository).await?;
        self.token_cache
            .put_token_with_expiry(repository, &grant.token, grant.expires_at())
            .await?;
        self.output
            .info(&format!("Fetched and cached a new token for {}", repository));
        Ok(grant.token)
    }

    async fn resolve_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: &str,
    ) -> Result<ResolvedManifest> {
        match self
            .client
            .fetch_manifest_list(repository, reference, Some(token))
            .await
        {
            Ok((list, raw)) => {
                self.output.info(&format!(
                    "{}:{} is multi-platform with {} entries",
                    repository,
                    reference,
                    list.manifests.len()
                ));
                Ok(ResolvedManifest::Fat { list, raw })
            }
            Err(err) if err.is_not_multi_platform() => {
                self.output.info(&format!(
                    "{}:{} is not multi-platform, fetching the single manifest",
                    repository, reference
                ));
                let (manifest, raw) = self
                    .client
                    .fetch_manifest(repository, reference, Some(token))
                    .await?;
                Ok(ResolvedManifest::Single { manifest, raw })
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_platform(
        &self,
        repository: &str,
        label: &str,
        manifest_digest: &str,
        manifest: &PlatformManifest,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<PlatformOutcome> {
        let config_digest = &manifest.config.digest;
        self.output
            .step(&format!("Fetching config {}", short_digest(config_digest)));
        let config = cancellable(
            cancel,
            self.client
                .fetch_blob(repository, config_digest, Some(token), false),
        )
        .await?;
        self.layout.write_blob(&config, config_digest).await?;

        let layers = self
            .fetcher
            .fetch_layers(repository, manifest, Some(token), cancel)
            .await?;

        self.output.success(&format!(
            "Platform {} complete: {} layers ({} unique, {})",
            label,
            layers.layers,
            layers.unique,
            self.output.format_size(layers.bytes)
        ));

        Ok(PlatformOutcome {
            summary: PlatformSummary {
                platform: label.to_string(),
                manifest_digest: manifest_digest.to_string(),
                layers: layers.layers,
            },
            blobs: 1 + layers.unique,
            bytes: config.len() as u64 + layers.bytes,
        })
    }

    fn advance(&self, state: &mut CopyState, next: CopyState) {
        debug_assert!(
            state.can_transition_to(next),
            "invalid copy transition {} -> {}",
            state,
            next
        );
        self.output.debug(&format!("State {} -> {}", state, next));
        *state = next;
        self.record(next);
    }

    fn record(&self, state: CopyState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ExportError::Cancelled)
    } else {
        Ok(())
    }
}

/// Race `operation` against the cancellation token
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ExportError::Cancelled),
        result = operation => result,
    }
}
