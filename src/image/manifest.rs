//! Manifest documents served by Docker Registry v2 / OCI distribution endpoints

use crate::error::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONTAINER_CONFIG_V1: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_ROOTFS_DIFF_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const DOCKER_ROOTFS_FOREIGN_DIFF_GZIP: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";
pub const DOCKER_PLUGIN_V1: &str = "application/vnd.docker.plugin.v1+json";
pub const OCI_IMAGE_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

/// Every media type the client understands, sent as the `Accept` header on all registry GETs
pub const ACCEPTED_MEDIA_TYPES: [&str; 9] = [
    DOCKER_MANIFEST_V1,
    DOCKER_MANIFEST_V2,
    DOCKER_MANIFEST_LIST_V2,
    DOCKER_CONTAINER_CONFIG_V1,
    DOCKER_ROOTFS_DIFF_GZIP,
    DOCKER_ROOTFS_FOREIGN_DIFF_GZIP,
    DOCKER_PLUGIN_V1,
    OCI_IMAGE_INDEX_V1,
    OCI_IMAGE_MANIFEST_V1,
];

pub fn accept_header() -> String {
    ACCEPTED_MEDIA_TYPES.join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestType {
    DockerV1,
    DockerV2,
    DockerManifestList,
    OciManifest,
    OciIndex,
    Unknown,
}

impl ManifestType {
    /// Classify a media type or `Content-Type` header value; parameters after `;` are ignored
    pub fn from_media_type(media_type: &str) -> Self {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            DOCKER_MANIFEST_V1 => ManifestType::DockerV1,
            DOCKER_MANIFEST_V2 => ManifestType::DockerV2,
            DOCKER_MANIFEST_LIST_V2 => ManifestType::DockerManifestList,
            OCI_IMAGE_MANIFEST_V1 => ManifestType::OciManifest,
            OCI_IMAGE_INDEX_V1 => ManifestType::OciIndex,
            _ => ManifestType::Unknown,
        }
    }

    pub fn is_multi_platform(self) -> bool {
        matches!(self, ManifestType::DockerManifestList | ManifestType::OciIndex)
    }
}

/// `{mediaType, digest, size}` reference to a content-addressed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) if !variant.is_empty() => {
                write!(f, "{}/{}/{}", self.os, self.architecture, variant)
            }
            _ => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

/// One platform build listed in a manifest list / image index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestListEntry {
    pub digest: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ManifestListEntry {
    pub fn platform_label(&self) -> String {
        self.platform
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Multi-platform "fat" manifest; entry order is the processing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub manifests: Vec<ManifestListEntry>,
}

/// Single-platform manifest: a config blob plus layers in bottom-to-top order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl PlatformManifest {
    pub fn total_layer_size(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }
}

pub fn parse_manifest_list(data: &[u8]) -> Result<ManifestList> {
    serde_json::from_slice(data)
        .map_err(|e| ExportError::Parse(format!("invalid manifest list: {}", e)))
}

pub fn parse_platform_manifest(data: &[u8]) -> Result<PlatformManifest> {
    serde_json::from_slice(data)
        .map_err(|e| ExportError::Parse(format!("invalid image manifest: {}", e)))
}
