//! Result of a completed copy

use crate::logging::Logger;
use crate::pipeline::state::ManifestKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSummary {
    pub platform: String,
    pub manifest_digest: String,
    pub layers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub content_id: String,
    pub repository: String,
    pub reference: String,
    pub kind: ManifestKind,
    pub platforms: Vec<PlatformSummary>,
    /// Config and layer files written, duplicates counted once per platform
    pub blobs_written: usize,
    pub bytes_written: u64,
}

impl CopyReport {
    pub fn print(&self, output: &Logger) {
        output.summary_kv(
            "Copy Summary",
            &[
                ("Image", format!("{}:{}", self.repository, self.reference)),
                ("Manifest", self.kind.to_string()),
                ("Platforms", self.platforms.len().to_string()),
                ("Blobs written", self.blobs_written.to_string()),
                ("Bytes written", output.format_size(self.bytes_written)),
                ("Content ID", self.content_id.clone()),
            ],
        );
        output.list(
            "Platforms",
            &self
                .platforms
                .iter()
                .map(|p| format!("{} {} ({} layers)", p.platform, p.manifest_digest, p.layers))
                .collect::<Vec<_>>(),
        );
    }
}
