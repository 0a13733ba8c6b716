//! Parsing of `name[:tag]` / `name@digest` image references

use crate::digest::DigestUtils;
use crate::error::{ExportError, Result};
use std::fmt;

pub const DEFAULT_TAG: &str = "latest";

/// Repository plus the tag or digest to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub reference: String,
}

impl ImageReference {
    pub fn new(repository: &str, reference: &str) -> Self {
        Self {
            repository: repository.to_string(),
            reference: reference.to_string(),
        }
    }

    /// Parse `busybox`, `busybox:1.36` or `busybox@sha256:...`
    pub fn parse(image: &str) -> Result<Self> {
        let image = image.trim();

        let (repository, reference) = if let Some((name, digest)) = image.split_once('@') {
            if !DigestUtils::is_valid_digest(digest) {
                return Err(ExportError::Validation(format!(
                    "invalid digest reference: {}",
                    image
                )));
            }
            (name, digest)
        } else {
            // A colon before the last slash belongs to a registry port, not a tag
            let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
            match image[last_slash..].rfind(':') {
                Some(pos) => (&image[..last_slash + pos], &image[last_slash + pos + 1..]),
                None => (image, DEFAULT_TAG),
            }
        };

        if repository.is_empty() {
            return Err(ExportError::Validation(
                "Repository name cannot be empty".to_string(),
            ));
        }
        if reference.is_empty() {
            return Err(ExportError::Validation(format!(
                "empty tag in image reference: {}",
                image
            )));
        }
        if repository
            .chars()
            .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c)))
        {
            return Err(ExportError::Validation(format!(
                "invalid repository name: {}",
                repository
            )));
        }

        Ok(Self::new(repository, reference))
    }

    pub fn is_digest(&self) -> bool {
        DigestUtils::is_valid_digest(&self.reference)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest() {
            write!(f, "{}@{}", self.repository, self.reference)
        } else {
            write!(f, "{}:{}", self.repository, self.reference)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_tag() {
        assert_eq!(
            ImageReference::parse("busybox").unwrap(),
            ImageReference::new("busybox", "latest")
        );
        assert_eq!(
            ImageReference::parse("busybox:1.36").unwrap(),
            ImageReference::new("busybox", "1.36")
        );
        assert_eq!(
            ImageReference::parse("bitnami/redis:7.2").unwrap(),
            ImageReference::new("bitnami/redis", "7.2")
        );
    }

    #[test]
    fn test_parse_digest_reference() {
        let digest = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let parsed = ImageReference::parse(&format!("alpine@{}", digest)).unwrap();
        assert_eq!(parsed.repository, "alpine");
        assert_eq!(parsed.reference, digest);
        assert!(parsed.is_digest());
        assert_eq!(parsed.to_string(), format!("alpine@{}", digest));

        assert!(ImageReference::parse("alpine@sha256:short").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse(":latest").is_err());
        assert!(ImageReference::parse("busybox:").is_err());
        assert!(ImageReference::parse("BusyBox").is_err());
    }
}
