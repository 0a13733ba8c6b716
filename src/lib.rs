//! Image Exporter Library
//!
//! Copies a multi-platform container image from a Docker Registry v2 / OCI
//! distribution endpoint into a digest-addressed export tree, fetching each
//! platform's layers concurrently, and hands the tree to a content-addressed
//! storage backend such as IPFS.

pub mod cli;
pub mod concurrency;
pub mod config;
pub mod digest;
pub mod error;
pub mod export;
pub mod image;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod storage;

pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use logging::Logger;
pub use pipeline::{CopyOrchestrator, CopyReport};
