//! Copy state machine
//!
//! `Init -> TokenResolved -> ManifestResolved{Fat|Single} -> BlobsDownloaded -> HandedOff -> Done`,
//! with `Failed` reachable from every non-terminal state and absorbing.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Multi-platform manifest list / image index
    Fat,
    /// Single-platform manifest reached through the fallback
    Single,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Fat => write!(f, "multi-platform"),
            ManifestKind::Single => write!(f, "single-platform"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Init,
    TokenResolved,
    ManifestResolved(ManifestKind),
    BlobsDownloaded,
    HandedOff,
    Done,
    Failed,
}

impl CopyState {
    pub fn can_transition_to(self, next: CopyState) -> bool {
        use CopyState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Init, TokenResolved) => true,
            (TokenResolved, ManifestResolved(_)) => true,
            (ManifestResolved(_), BlobsDownloaded) => true,
            (BlobsDownloaded, HandedOff) => true,
            (HandedOff, Done) => true,
            _ => false,
        }
    }

    /// Name used in error context for failures raised while in this state
    pub fn stage(self) -> &'static str {
        match self {
            CopyState::Init => "token resolution",
            CopyState::TokenResolved => "manifest resolution",
            CopyState::ManifestResolved(_) => "platform fetch",
            CopyState::BlobsDownloaded => "storage handoff",
            CopyState::HandedOff | CopyState::Done => "completion",
            CopyState::Failed => "failed",
        }
    }
}

impl fmt::Display for CopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyState::ManifestResolved(kind) => write!(f, "ManifestResolved({})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            CopyState::Init,
            CopyState::TokenResolved,
            CopyState::ManifestResolved(ManifestKind::Fat),
            CopyState::BlobsDownloaded,
            CopyState::HandedOff,
            CopyState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_is_absorbing() {
        assert!(CopyState::HandedOff.can_transition_to(CopyState::Failed));
        assert!(!CopyState::Failed.can_transition_to(CopyState::Init));
        assert!(!CopyState::Failed.can_transition_to(CopyState::Failed));
        assert!(!CopyState::Done.can_transition_to(CopyState::Failed));
    }

    #[test]
    fn test_no_skipping_stages() {
        assert!(!CopyState::Init.can_transition_to(CopyState::BlobsDownloaded));
        assert!(!CopyState::TokenResolved.can_transition_to(CopyState::HandedOff));
    }
}
