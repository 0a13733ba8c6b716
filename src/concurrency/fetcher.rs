//! Concurrent layer fetcher for one platform manifest

use crate::error::{ExportError, Result};
use crate::export::ExportLayout;
use crate::image::{Descriptor, PlatformManifest};
use crate::logging::Logger;
use crate::registry::RegistryClient;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// What one platform's layer fan-out produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerSummary {
    /// Layer slots in the manifest, duplicates included
    pub layers: usize,
    /// Distinct digests actually fetched
    pub unique: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ConcurrentFetcher {
    client: RegistryClient,
    layout: ExportLayout,
    max_concurrent: usize,
    output: Logger,
}

impl ConcurrentFetcher {
    pub fn new(
        client: RegistryClient,
        layout: ExportLayout,
        max_concurrent: usize,
        output: Logger,
    ) -> Self {
        Self {
            client,
            layout,
            max_concurrent: max_concurrent.max(1),
            output,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Fetch and write every layer of `manifest`
    ///
    /// Layers are submitted in manifest order and may finish in any order. A failed
    /// layer does not stop its siblings; once all are joined the first failure in
    /// manifest order is returned as [`ExportError::LayerFetch`].
    pub async fn fetch_layers(
        &self,
        repository: &str,
        manifest: &PlatformManifest,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<LayerSummary> {
        let total = manifest.layers.len();
        let unique = unique_layers(&manifest.layers);

        self.output.step(&format!(
            "Fetching {} layers ({} unique, {}) with up to {} concurrent downloads",
            total,
            unique.len(),
            self.output.format_size(manifest.total_layer_size()),
            self.max_concurrent
        ));

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(unique.len());

        for (index, layer) in &unique {
            let semaphore = Arc::clone(&semaphore);
            let client = self.client.clone();
            let layout = self.layout.clone();
            let output = self.output.clone();
            let cancel = cancel.clone();
            let repository = repository.to_string();
            let token = token.map(str::to_string);
            let index = *index;
            let layer = layer.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ExportError::Task(format!("layer permit unavailable: {}", e)))?;
                if cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }

                output.notify_layer_start(index, total, &layer.digest, layer.size);
                let started = Instant::now();

                let data = tokio::select! {
                    _ = cancel.cancelled() => return Err(ExportError::Cancelled),
                    fetched = client.fetch_blob(&repository, &layer.digest, token.as_deref(), true) => fetched?,
                };
                layout.write_blob(&data, &layer.digest).await?;

                let size = data.len() as u64;
                output.notify_layer_complete(index, &layer.digest, started.elapsed(), size);
                Ok(size)
            }));
        }

        let results = join_all(handles).await;
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let mut bytes = 0;
        for ((_, layer), joined) in unique.iter().zip(results) {
            match joined.map_err(ExportError::from).and_then(|outcome| outcome) {
                Ok(size) => bytes += size,
                Err(ExportError::Cancelled) => return Err(ExportError::Cancelled),
                Err(err) => {
                    return Err(ExportError::LayerFetch {
                        digest: layer.digest.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }

        Ok(LayerSummary {
            layers: total,
            unique: unique.len(),
            bytes,
        })
    }
}

/// First occurrence of each digest, with its manifest position
fn unique_layers(layers: &[Descriptor]) -> Vec<(usize, Descriptor)> {
    let mut seen = HashSet::new();
    layers
        .iter()
        .enumerate()
        .filter(|(_, layer)| seen.insert(layer.digest.as_str()))
        .map(|(index, layer)| (index, layer.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestUtils;
    use crate::registry::RetryPolicy;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn layer(data: &[u8]) -> Descriptor {
        Descriptor {
            media_type: crate::image::manifest::DOCKER_ROOTFS_DIFF_GZIP.to_string(),
            digest: DigestUtils::compute_docker_digest(data),
            size: data.len() as u64,
        }
    }

    fn manifest_with(layers: Vec<Descriptor>) -> PlatformManifest {
        PlatformManifest {
            schema_version: 2,
            media_type: crate::image::manifest::DOCKER_MANIFEST_V2.to_string(),
            config: layer(b"config"),
            layers,
        }
    }

    async fn mount_blob(server: &MockServer, data: &[u8], expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/v2/library/busybox/blobs/{}",
                DigestUtils::compute_docker_digest(data)
            )))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.to_vec()))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    async fn fetcher_for(server: &MockServer, root: &std::path::Path) -> ConcurrentFetcher {
        let client = RegistryClient::builder(&server.uri())
            .with_retry(RetryPolicy::none())
            .with_output(Logger::new_quiet())
            .build()
            .unwrap();
        let layout = ExportLayout::new(root);
        layout.reset().await.unwrap();
        ConcurrentFetcher::new(client, layout, 2, Logger::new_quiet())
    }

    #[test]
    fn test_unique_layers_keeps_first_slot() {
        let a = layer(b"a");
        let b = layer(b"b");
        let unique = unique_layers(&[a.clone(), b.clone(), a.clone()]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0], (0, a));
        assert_eq!(unique[1], (1, b));
    }

    #[tokio::test]
    async fn test_duplicate_digest_fetched_once() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_blob(&server, b"layer-1", 1).await;
        mount_blob(&server, b"layer-2", 1).await;

        let fetcher = fetcher_for(&server, dir.path()).await;
        let manifest = manifest_with(vec![layer(b"layer-1"), layer(b"layer-2"), layer(b"layer-1")]);

        let summary = fetcher
            .fetch_layers("busybox", &manifest, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.layers, 3);
        assert_eq!(summary.unique, 2);
        assert_eq!(summary.bytes, 14);
        assert_eq!(std::fs::read_dir(dir.path().join("blobs")).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_first_failed_digest_in_manifest_order() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_blob(&server, b"ok", 1).await;
        // "missing-1" and "missing-2" are not mounted, wiremock answers 404

        let fetcher = fetcher_for(&server, dir.path()).await;
        let missing = layer(b"missing-1");
        let manifest = manifest_with(vec![layer(b"ok"), missing.clone(), layer(b"missing-2")]);

        let err = fetcher
            .fetch_layers("busybox", &manifest, None, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ExportError::LayerFetch { digest, source } => {
                assert_eq!(digest, missing.digest);
                assert!(matches!(*source, ExportError::HttpStatus { status: 404, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the sibling that succeeded was still written
        assert!(dir.path().join("blobs").join(layer(b"ok").digest).exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher_for(&server, dir.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher
            .fetch_layers("busybox", &manifest_with(vec![layer(b"x")]), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
    }
}
