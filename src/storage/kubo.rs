//! Kubo (go-ipfs) RPC backend
//!
//! `add` uploads the export directory as one multipart request to
//! `/api/v0/add`: directories are empty `application/x-directory` parts and
//! files are streamed octet-stream parts, named by their path relative to the
//! export directory's parent.

use crate::error::handlers::NetworkErrorHandler;
use crate::error::{ExportError, Result};
use crate::logging::Logger;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DIRECTORY_MIME: &str = "application/x-directory";
const FILE_MIME: &str = "application/octet-stream";

/// One NDJSON line of the `/api/v0/add` response
#[derive(Debug, Deserialize)]
struct AddedEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug)]
struct TreeEntry {
    name: String,
    path: PathBuf,
    len: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct KuboBackend {
    client: Client,
    api_url: String,
    output: Logger,
}

impl KuboBackend {
    pub fn new(api_url: &str, timeout: Duration, output: Logger) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "IPFS client setup"))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            output,
        })
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }

    async fn build_form(&self, root: &Path, root_name: &str) -> Result<(Form, usize)> {
        let entries = collect_tree(root, root_name).await?;
        let count = entries.len();
        let mut form = Form::new().percent_encode_noop();

        for entry in entries {
            let file_name = escape_name(&entry.name);
            let part = match entry.len {
                None => Part::bytes(Vec::new()).mime_str(DIRECTORY_MIME)?,
                Some(len) => {
                    let file = tokio::fs::File::open(&entry.path)
                        .await
                        .map_err(|e| ExportError::io(&entry.path, e))?;
                    Part::stream_with_length(Body::from(file), len).mime_str(FILE_MIME)?
                }
            };
            form = form.part("file", part.file_name(file_name));
        }

        Ok((form, count))
    }
}

#[async_trait]
impl StorageBackend for KuboBackend {
    async fn add(&self, path: &Path, pin: bool) -> Result<String> {
        let root_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("export")
            .to_string();

        let (form, count) = self.build_form(path, &root_name).await?;
        self.output.step(&format!(
            "Adding {} ({} entries) to IPFS at {}",
            path.display(),
            count,
            self.api_url
        ));

        let pin_flag = if pin { "true" } else { "false" };
        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&[("pin", pin_flag), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "IPFS add"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "IPFS add"))?;

        if !status.is_success() {
            return Err(ExportError::Storage(format!(
                "IPFS add returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let cid = root_hash(&body, &root_name)?;
        self.output.detail(&format!("IPFS root {} -> {}", root_name, cid));
        Ok(cid)
    }

    async fn is_up(&self) -> bool {
        match self.client.post(self.endpoint("id")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                self.output.verbose(&format!("IPFS node unreachable: {}", e));
                false
            }
        }
    }
}

/// Depth-first listing, each directory before its children, siblings sorted by name
async fn collect_tree(root: &Path, root_name: &str) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pending = vec![(root.to_path_buf(), root_name.to_string())];

    while let Some((dir, name)) = pending.pop() {
        entries.push(TreeEntry {
            name: name.clone(),
            path: dir.clone(),
            len: None,
        });

        let mut children = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ExportError::io(&dir, e))?;
        while let Some(child) = reader
            .next_entry()
            .await
            .map_err(|e| ExportError::io(&dir, e))?
        {
            let metadata = child
                .metadata()
                .await
                .map_err(|e| ExportError::io(child.path(), e))?;
            let child_name = format!("{}/{}", name, child.file_name().to_string_lossy());
            children.push((child_name, child.path(), metadata));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        let mut subdirs = Vec::new();
        for (child_name, child_path, metadata) in children {
            if metadata.is_dir() {
                subdirs.push((child_path, child_name));
            } else {
                entries.push(TreeEntry {
                    name: child_name,
                    path: child_path,
                    len: Some(metadata.len()),
                });
            }
        }
        // reversed so the stack pops them in name order
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(entries)
}

fn escape_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

/// Pick the root directory's hash from the NDJSON response, falling back to the last entry
fn root_hash(body: &str, root_name: &str) -> Result<String> {
    let mut last = None;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let entry: AddedEntry = serde_json::from_str(line)
            .map_err(|e| ExportError::Storage(format!("unexpected IPFS add output: {}", e)))?;
        if entry.name == root_name {
            return Ok(entry.hash);
        }
        last = Some(entry.hash);
    }

    last.filter(|h| !h.is_empty())
        .ok_or_else(|| ExportError::Storage("IPFS add returned no entries".to_string()))
}
