use std::path::PathBuf;
use std::time::Duration;

use feedrelay_core::{FingerprintRules, SourceRef};

use crate::error::PipelineError;

/// Where historical dedup state comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Rebuilt each run from the destination's recent history.
    Reconcile,
    /// Loaded from and saved to the fingerprint cache file.
    Persisted,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub mode: DedupMode,
    /// Destination history scanned in reconcile mode; cache bound in persisted mode.
    pub cache_size: usize,
    pub rules: FingerprintRules,
}

/// Immutable settings for one forwarder, built once at startup.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub sources: Vec<SourceRef>,
    pub destination: SourceRef,
    /// Keywords matched case-insensitively against normalized item text.
    pub blacklist: Vec<String>,
    /// `None` disables both dedup tiers.
    pub dedup: Option<DedupConfig>,
    /// Parallelism for resolution and per-source fetch.
    pub concurrency: usize,
    pub history_page_size: usize,
    pub state_dir: PathBuf,
    /// Opt-in staleness window for abandoned run locks.
    pub lock_stale_after: Option<Duration>,
}

impl ForwarderConfig {
    pub fn new(sources: Vec<SourceRef>, destination: SourceRef) -> Self {
        Self {
            sources,
            destination,
            blacklist: Vec::new(),
            dedup: Some(DedupConfig {
                mode: DedupMode::Reconcile,
                cache_size: 1_000,
                rules: FingerprintRules::default(),
            }),
            concurrency: 4,
            history_page_size: 100,
            state_dir: PathBuf::from("cache"),
            lock_stale_after: None,
        }
    }

    /// Rejects settings that would make any run meaningless.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config("no sources configured".into()));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be at least 1".into()));
        }
        if self.history_page_size == 0 {
            return Err(PipelineError::Config(
                "history page size must be at least 1".into(),
            ));
        }
        if let Some(dedup) = &self.dedup {
            if dedup.cache_size == 0 {
                return Err(PipelineError::Config(
                    "dedup cache size must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir.join("last_ids")
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.state_dir.join("fingerprints.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("run.lock")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.state_dir.join("downloads")
    }
}
