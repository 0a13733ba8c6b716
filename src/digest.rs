//! Content digest utilities
//!
//! Registry digests have the form `algorithm:hex`. They name every manifest and
//! blob in the export tree and double as integrity checks over the fetched bytes.

use crate::error::{ExportError, Result};
use sha2::{Digest, Sha256, Sha512};

pub const SHA256_PREFIX: &str = "sha256:";

/// Utilities for working with content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 hex digest from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    fn expected_hex_len(algorithm: &str) -> Option<usize> {
        match algorithm {
            "sha256" => Some(64),
            "sha512" => Some(128),
            _ => None,
        }
    }

    /// Split `algorithm:hex` into its parts, validating both
    pub fn split(digest: &str) -> Result<(&str, &str)> {
        let (algorithm, hex_part) = digest
            .split_once(':')
            .ok_or_else(|| ExportError::InvalidDigest(format!("missing algorithm prefix: {}", digest)))?;

        let expected = Self::expected_hex_len(algorithm).ok_or_else(|| {
            ExportError::InvalidDigest(format!("unsupported digest algorithm: {}", algorithm))
        })?;

        if hex_part.len() != expected
            || !hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(ExportError::InvalidDigest(format!(
                "expected {} lowercase hex characters after {}: in {}",
                expected, algorithm, digest
            )));
        }

        Ok((algorithm, hex_part))
    }

    /// Validate digest format (`sha256:<64 hex>` or `sha512:<128 hex>`)
    pub fn is_valid_digest(digest: &str) -> bool {
        Self::split(digest).is_ok()
    }

    /// Verify data matches expected digest
    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        let (algorithm, expected_hex) = Self::split(expected_digest)?;

        let computed = match algorithm {
            "sha512" => {
                let mut hasher = Sha512::new();
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
            _ => Self::compute_sha256(data),
        };

        if computed != expected_hex {
            return Err(ExportError::DigestMismatch {
                expected: expected_digest.to_string(),
                actual: format!("{}:{}", algorithm, computed),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_docker_digest() {
        assert_eq!(DigestUtils::compute_docker_digest(b"hello world"), HELLO);
    }

    #[test]
    fn test_validate_digest() {
        assert!(DigestUtils::is_valid_digest(HELLO));
        assert!(!DigestUtils::is_valid_digest("sha256:invalid"));
        assert!(!DigestUtils::is_valid_digest(&HELLO[7..]));
        assert!(!DigestUtils::is_valid_digest("md5:d41d8cd98f00b204e9800998ecf8427e"));
        assert!(!DigestUtils::is_valid_digest("sha256:../../etc/passwd"));
        assert!(!DigestUtils::is_valid_digest(&HELLO.to_uppercase().replace("SHA256", "sha256")));
    }

    #[test]
    fn test_verify_data_integrity() {
        assert!(DigestUtils::verify_data_integrity(b"hello world", HELLO).is_ok());

        let wrong = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        match DigestUtils::verify_data_integrity(b"hello world", wrong) {
            Err(ExportError::DigestMismatch { expected, actual }) => {
                assert_eq!(expected, wrong);
                assert_eq!(actual, HELLO);
            }
            other => panic!("expected digest mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_sha512() {
        let digest = format!("sha512:{}", {
            let mut hasher = Sha512::new();
            hasher.update(b"layer");
            hex::encode(hasher.finalize())
        });
        assert!(DigestUtils::verify_data_integrity(b"layer", &digest).is_ok());
        assert!(DigestUtils::verify_data_integrity(b"other", &digest).is_err());
    }
}
