//! Runs the parsed command against the configured registry and IPFS node

use crate::cli::args::{Args, Command};
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::image::ImageReference;
use crate::logging::Logger;
use crate::pipeline::{CopyOrchestrator, CopyReport};
use crate::storage::{KuboBackend, StorageBackend};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    config: ExportConfig,
    output: Logger,
}

impl Runner {
    /// Defaults, then `IMAGE_EXPORTER_*` environment, then flags
    pub fn new(args: Args) -> Result<Self> {
        let config = args.apply_to(ExportConfig::from_env()?);
        config.validate()?;

        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(config.verbose)
        };

        Ok(Self {
            args,
            config,
            output,
        })
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let storage: Arc<dyn StorageBackend> = Arc::new(KuboBackend::new(
            &self.config.ipfs_api_url,
            self.config.request_timeout(),
            self.output.clone(),
        )?);

        match &self.args.command {
            Command::Copy { image } => {
                let report = self.copy(image, storage, cancel).await?;
                report.print(&self.output);
                println!("{}", report.content_id);
                Ok(())
            }
            Command::Check => {
                if storage.is_up().await {
                    self.output
                        .success(&format!("IPFS node at {} is up", self.config.ipfs_api_url));
                    Ok(())
                } else {
                    Err(ExportError::Storage(format!(
                        "IPFS node at {} is not reachable",
                        self.config.ipfs_api_url
                    )))
                }
            }
        }
    }

    async fn copy(
        &self,
        image: &str,
        storage: Arc<dyn StorageBackend>,
        cancel: &CancellationToken,
    ) -> Result<CopyReport> {
        let reference = ImageReference::parse(image)?;
        self.output.section("Image Exporter");
        self.output.summary_kv(
            "Configuration",
            &[
                ("Image", reference.to_string()),
                ("Registry", self.config.registry_url.clone()),
                ("Export path", self.config.export_path.display().to_string()),
                ("Concurrency", self.config.max_concurrent_layers.to_string()),
                ("Verify digests", self.config.verify_digests.to_string()),
                ("IPFS API", self.config.ipfs_api_url.clone()),
            ],
        );

        let orchestrator = CopyOrchestrator::new(self.config.clone(), storage, self.output.clone())?;
        orchestrator
            .copy_image_with_cancel(&reference.repository, &reference.reference, cancel)
            .await
    }
}
