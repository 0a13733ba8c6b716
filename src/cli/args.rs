//! Command-line argument parsing

use crate::config::ExportConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "image-exporter")]
#[command(about = "Copy multi-platform container images into a content-addressed export tree and add it to IPFS")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Directory the export tree is written to (wiped at the start of every copy)
    #[arg(long = "export-path", global = true)]
    pub export_path: Option<PathBuf>,

    /// Registry base URL, e.g. https://index.docker.io
    #[arg(long = "registry", global = true)]
    pub registry: Option<String>,

    /// Token endpoint of the registry's auth realm
    #[arg(long = "auth-realm", global = true)]
    pub auth_realm: Option<String>,

    /// Maximum concurrent layer downloads per platform
    #[arg(long = "concurrency", short = 'j', global = true)]
    pub concurrency: Option<usize>,

    /// Skip digest verification of fetched manifests and blobs
    #[arg(long = "no-verify", global = true)]
    pub no_verify: bool,

    /// Kubo RPC API URL
    #[arg(long = "ipfs-api", global = true)]
    pub ipfs_api: Option<String>,

    /// Add to IPFS without pinning
    #[arg(long = "no-pin", global = true)]
    pub no_pin: bool,

    #[arg(long = "verbose", short = 'v', global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(long = "quiet", short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Copy an image (`name[:tag]` or `name@digest`) and print its content id
    Copy {
        image: String,
    },
    /// Report whether the IPFS node is reachable
    Check,
}

impl Args {
    /// Layer command-line flags over an env/default config
    pub fn apply_to(&self, mut config: ExportConfig) -> ExportConfig {
        if let Some(path) = &self.export_path {
            config.export_path = path.clone();
        }
        if let Some(registry) = &self.registry {
            let realm = self.auth_realm.clone().unwrap_or(config.auth_realm.clone());
            config = config.with_registry(registry, &realm);
        } else if let Some(realm) = &self.auth_realm {
            config.auth_realm = realm.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_layers = concurrency;
        }
        if self.no_verify {
            config.verify_digests = false;
        }
        if let Some(api) = &self.ipfs_api {
            config.ipfs_api_url = api.clone();
        }
        if self.no_pin {
            config.pin = false;
        }
        if self.verbose {
            config.verbose = true;
        }
        config
    }
}
