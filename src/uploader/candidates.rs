//! Candidate selection capability shared by the uploader variants

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Result of trying to take ownership of a candidate file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The file is ours to upload and delete until released
    Claimed,
    /// Someone else holds the file (lock marker present)
    Locked,
    /// The file disappeared since it was selected
    Vanished,
}

/// How an uploader finds and claims the files it ships.
///
/// The poll/upload/manifest loop in [`super::Uploader`] is shared; variants
/// differ only in these operations.
#[async_trait]
pub trait CandidateSource: Send {
    /// Short variant name, used in logs and metric labels
    fn kind(&self) -> &'static str;

    /// Files to attempt this cycle, in upload order. Ignored files are never
    /// returned.
    async fn select(&mut self) -> Vec<PathBuf>;

    /// Take ownership of a selected file before uploading it
    async fn claim(&mut self, path: &Path) -> Claim;

    /// Give up ownership taken by [`CandidateSource::claim`]
    async fn release(&mut self, path: &Path);

    /// Stop tracking a file (uploaded or vanished)
    fn forget(&mut self, path: &Path);

    /// Stop tracking a file and never select it again while it exists
    fn ignore(&mut self, path: &Path);

    fn is_ignored(&self, path: &Path) -> bool;

    /// Files known but not yet uploaded
    fn pending(&self) -> usize {
        0
    }
}
