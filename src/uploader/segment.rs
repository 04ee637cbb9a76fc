//! Segment file candidates
//!
//! Finalized segments arrive through a pending channel fed by the connector
//! whenever the upstream sink reports a segment closed. A directory sweep for
//! prefix-matching files picks up leftovers (for example segments closed before
//! a restart); it only takes files untouched for at least `settle`, so the
//! segment currently being written is never selected.

use super::candidates::{CandidateSource, Claim};
use super::directory::LOCK_SUFFIX;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Producer half of a segment uploader's pending set
pub type PendingSender = mpsc::UnboundedSender<PathBuf>;

pub struct SegmentCandidates {
    dir: PathBuf,
    prefix: String,
    settle: Option<Duration>,
    receiver: mpsc::UnboundedReceiver<PathBuf>,
    pending: Vec<PathBuf>,
    known: HashSet<PathBuf>,
    ignored: HashSet<PathBuf>,
}

/// Result of one directory sweep
struct Sweep {
    settled: Vec<PathBuf>,
    listed: HashSet<PathBuf>,
}

impl SegmentCandidates {
    /// Create the candidate source and the sender used to enqueue closed segments.
    ///
    /// `settle: None` disables the directory sweep.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        settle: Option<Duration>,
    ) -> (Self, PendingSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let candidates = Self {
            dir: dir.into(),
            prefix: prefix.into(),
            settle,
            receiver: rx,
            pending: Vec::new(),
            known: HashSet::new(),
            ignored: HashSet::new(),
        };
        (candidates, tx)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn push(&mut self, path: PathBuf) {
        if self.ignored.contains(&path) {
            return;
        }
        if self.known.insert(path.clone()) {
            self.pending.push(path);
        }
    }

    fn drain_channel(&mut self) {
        while let Ok(path) = self.receiver.try_recv() {
            self.push(path);
        }
    }
}

/// List prefix-matching segment files in `dir`
async fn sweep(dir: &Path, prefix: &str, settle: Duration) -> std::io::Result<Sweep> {
    let mut sweep = Sweep {
        settled: Vec::new(),
        listed: HashSet::new(),
    };
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) || name.ends_with(LOCK_SUFFIX) {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let path = entry.path();
        sweep.listed.insert(path.clone());
        let settled = settle.is_zero()
            || meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age >= settle);
        if settled {
            sweep.settled.push(path);
        }
    }
    sweep.settled.sort();
    Ok(sweep)
}

#[async_trait]
impl CandidateSource for SegmentCandidates {
    fn kind(&self) -> &'static str {
        "segment"
    }

    async fn select(&mut self) -> Vec<PathBuf> {
        self.drain_channel();
        if let Some(settle) = self.settle {
            let (dir, prefix) = (self.dir.clone(), self.prefix.clone());
            match sweep(&dir, &prefix, settle).await {
                Ok(sweep) => {
                    // Ignored files that are gone no longer need remembering
                    self.ignored.retain(|p| sweep.listed.contains(p));
                    for path in sweep.settled {
                        self.push(path);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "Segment directory sweep failed")
                }
            }
        }
        self.pending.clone()
    }

    async fn claim(&mut self, path: &Path) -> Claim {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Claim::Claimed,
            _ => Claim::Vanished,
        }
    }

    async fn release(&mut self, _path: &Path) {}

    fn forget(&mut self, path: &Path) {
        if self.known.remove(path) {
            self.pending.retain(|p| p != path);
        }
    }

    fn ignore(&mut self, path: &Path) {
        self.forget(path);
        self.ignored.insert(path.to_path_buf());
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.contains(path)
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}
