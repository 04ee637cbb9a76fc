//! Watched-directory candidates
//!
//! Every regular file in the directory is a candidate. A file with a sibling
//! `<name>.lock` marker is being written by someone else and is skipped. To
//! claim a file the uploader creates that marker itself, exclusively, so two
//! uploaders sharing a directory never ship the same file.

use super::candidates::{CandidateSource, Claim};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;

/// Suffix of lock marker files
pub const LOCK_SUFFIX: &str = ".lock";

/// Marker path guarding `path`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

pub struct DirectoryCandidates {
    dir: PathBuf,
    held: HashSet<PathBuf>,
    ignored: HashSet<PathBuf>,
}

impl DirectoryCandidates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            held: HashSet::new(),
            ignored: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn scan(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(LOCK_SUFFIX) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[async_trait]
impl CandidateSource for DirectoryCandidates {
    fn kind(&self) -> &'static str {
        "directory"
    }

    async fn select(&mut self) -> Vec<PathBuf> {
        match self.scan().await {
            Ok(files) => {
                // Ignored files that are gone no longer need remembering
                self.ignored.retain(|p| files.contains(p));
                files
                    .into_iter()
                    .filter(|p| !self.ignored.contains(p))
                    .collect()
            }
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "Directory scan failed");
                }
                Vec::new()
            }
        }
    }

    async fn claim(&mut self, path: &Path) -> Claim {
        if !is_file(path).await {
            return Claim::Vanished;
        }

        let marker = lock_path(path);
        match OpenOptions::new().write(true).create_new(true).open(&marker).await {
            Ok(_) => {
                // The writer may have removed the file between the check and the marker
                if !is_file(path).await {
                    let _ = tokio::fs::remove_file(&marker).await;
                    return Claim::Vanished;
                }
                self.held.insert(path.to_path_buf());
                Claim::Claimed
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Claim::Locked,
            Err(e) => {
                // Read-only directories still get uploaded, just without a marker
                tracing::warn!(marker = %marker.display(), error = %e, "Could not create lock marker");
                Claim::Claimed
            }
        }
    }

    async fn release(&mut self, path: &Path) {
        if !self.held.remove(path) {
            return;
        }
        let marker = lock_path(path);
        if let Err(e) = tokio::fs::remove_file(&marker).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(marker = %marker.display(), error = %e, "Could not remove lock marker");
            }
        }
    }

    fn forget(&mut self, _path: &Path) {}

    fn ignore(&mut self, path: &Path) {
        self.ignored.insert(path.to_path_buf());
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.contains(path)
    }
}
