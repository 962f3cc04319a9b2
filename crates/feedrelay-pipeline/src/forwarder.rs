use std::collections::HashSet;

use tracing::{debug, info, warn};

use feedrelay_core::ChannelId;
use feedrelay_messaging::MessagingService;
use feedrelay_store::{CheckpointStore, FingerprintCache, LockAttempt, RunLock};

use crate::config::{DedupMode, ForwarderConfig};
use crate::deliver::deliver_batch;
use crate::error::PipelineError;
use crate::fetch::{fetch_sources, SourceBatch};
use crate::filter::{build_delivery_batch, Blacklist, HistoricalSet};
use crate::reconcile::reconcile_destination;
use crate::report::{FailureStage, RunOutcome, RunReport, SourceFailure, SourceReport};
use crate::resolve::{resolve_one, resolve_sources};

/// Runs the forward-and-deduplicate pipeline against one messaging backend.
pub struct Forwarder<M> {
    service: M,
    config: ForwarderConfig,
    checkpoints: CheckpointStore,
    lock: RunLock,
    blacklist: Blacklist,
}

impl<M> Forwarder<M>
where
    M: MessagingService,
{
    pub fn new(service: M, config: ForwarderConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let checkpoints = CheckpointStore::open(config.checkpoint_dir())?;
        let lock = RunLock::new(config.lock_path()).with_stale_after(config.lock_stale_after);
        let blacklist = Blacklist::new(&config.blacklist);
        Ok(Self {
            service,
            config,
            checkpoints,
            lock,
            blacklist,
        })
    }

    pub fn service(&self) -> &M {
        &self.service
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Performs one complete run.
    ///
    /// Returns [`RunOutcome::Skipped`] without touching any state when another
    /// run holds the lock. The lock is released before returning, on success
    /// and on error alike.
    pub async fn run_once(&self) -> Result<RunOutcome, PipelineError> {
        let guard = match self.lock.acquire()? {
            LockAttempt::Acquired(guard) => guard,
            LockAttempt::AlreadyHeld(holder) => {
                info!(
                    path = %self.lock.path().display(),
                    holder_pid = holder.as_ref().map(|h| h.pid),
                    "another run is in progress, skipping"
                );
                return Ok(RunOutcome::Skipped { holder });
            }
        };
        let run_id = guard.owner().run_id.clone();
        let result = self.run_locked(run_id).await;
        if let Err(err) = guard.release() {
            warn!(error = %err, "failed to release run lock");
        }
        result.map(RunOutcome::Completed)
    }

    async fn run_locked(&self, run_id: String) -> Result<RunReport, PipelineError> {
        let cfg = &self.config;
        let mut report = RunReport {
            run_id,
            ..RunReport::default()
        };
        info!(run_id = %report.run_id, sources = cfg.sources.len(), "run started");

        let destination = self.destination().await?;
        report.destination = Some(destination);

        let (sources, failures) =
            resolve_sources(&self.service, &cfg.sources, cfg.concurrency).await;
        report.source_failures.extend(failures);
        if sources.is_empty() {
            warn!("no source could be resolved");
            report.log_summary();
            return Ok(report);
        }

        let mut delivered_links = HashSet::new();
        let mut cache: Option<FingerprintCache> = None;
        if let Some(dedup) = &cfg.dedup {
            match dedup.mode {
                DedupMode::Reconcile => {
                    let reconciled = reconcile_destination(
                        &self.service,
                        destination,
                        &dedup.rules,
                        dedup.cache_size,
                        cfg.history_page_size,
                    )
                    .await;
                    delivered_links = reconciled.delivered_links;
                    report.reconcile = Some(reconciled.report);
                }
                DedupMode::Persisted => {
                    let loaded = FingerprintCache::load(cfg.fingerprint_path(), dedup.cache_size)?;
                    debug!(fingerprints = loaded.size(), "loaded fingerprint cache");
                    cache = Some(loaded);
                }
            }
        }

        let (batches, failures) = fetch_sources(
            &self.service,
            &sources,
            &self.checkpoints,
            cfg.history_page_size,
            cfg.concurrency,
        )
        .await;
        report.source_failures.extend(failures);

        let historical = match (&cfg.dedup, &cache) {
            (None, _) => HistoricalSet::None,
            (Some(_), Some(cache)) => HistoricalSet::Cache(cache),
            (Some(_), None) => HistoricalSet::Links(&delivered_links),
        };
        let (to_deliver, stats) =
            build_delivery_batch(&batches, &self.blacklist, cfg.dedup.as_ref(), historical);
        report.filter = stats;

        let (delivered, failures) = deliver_batch(
            &self.service,
            destination,
            &to_deliver,
            &cfg.downloads_dir(),
        )
        .await;
        report.delivered = delivered;
        report.delivery_failures = failures;

        for batch in &batches {
            self.commit(batch, &mut report);
        }

        if let Some(cache) = &cache {
            match cache.persist(cfg.fingerprint_path()) {
                Ok(count) => report.fingerprints_persisted = Some(count),
                Err(err) => {
                    warn!(error = %err, "failed to persist fingerprint cache");
                    report.state_failures.push(err.to_string());
                }
            }
        }

        report.log_summary();
        Ok(report)
    }

    /// Advances one source's checkpoint to the largest id it observed.
    fn commit(&self, batch: &SourceBatch, report: &mut RunReport) {
        let mut checkpoint = batch.since;
        if let Some(observed) = batch.max_observed {
            match self.checkpoints.advance(batch.channel, observed) {
                Ok(id) => checkpoint = id,
                Err(err) => {
                    warn!(channel = %batch.channel, error = %err, "checkpoint not saved");
                    report.source_failures.push(SourceFailure {
                        source: batch.reference.clone(),
                        channel: Some(batch.channel),
                        stage: FailureStage::Commit,
                        error: err.to_string(),
                    });
                }
            }
        }
        report.sources.push(SourceReport {
            channel: batch.channel,
            previous_checkpoint: batch.since,
            fetched: batch.items.len(),
            max_observed: batch.max_observed,
            checkpoint,
        });
    }

    /// Resolves the destination without running the pipeline.
    pub async fn destination(&self) -> Result<ChannelId, PipelineError> {
        resolve_one(&self.service, &self.config.destination)
            .await
            .map_err(|source| PipelineError::Destination {
                identifier: self.config.destination.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::Forwarder;
    use crate::config::ForwarderConfig;
    use crate::error::PipelineError;
    use crate::report::RunOutcome;
    use feedrelay_core::{ChannelId, ItemId, SourceRef};
    use feedrelay_messaging::InMemoryMessaging;
    use feedrelay_store::{LockAttempt, RunLock};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (InMemoryMessaging, ForwarderConfig) {
        let svc = InMemoryMessaging::new();
        let src = svc.add_channel("news", ChannelId(1));
        svc.add_channel("archive", ChannelId(99));
        svc.push_text(src, "one https://n.test/1", 10);
        svc.push_text(src, "two https://n.test/2", 20);
        let mut cfg = ForwarderConfig::new(
            vec![SourceRef::Handle("news".into())],
            SourceRef::Handle("archive".into()),
        );
        cfg.state_dir = dir.path().to_path_buf();
        (svc, cfg)
    }

    #[tokio::test]
    async fn run_forwards_and_commits() {
        let dir = TempDir::new().expect("tempdir");
        let (svc, cfg) = setup(&dir);
        let forwarder = Forwarder::new(svc, cfg).expect("forwarder");

        let RunOutcome::Completed(report) = forwarder.run_once().await.expect("run") else {
            panic!("run was skipped");
        };
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(report.sources[0].checkpoint, ItemId(2));
        assert_eq!(forwarder.checkpoints().get(ChannelId(1)), ItemId(2));
        assert_eq!(forwarder.service().items(ChannelId(99)).len(), 2);
        assert!(!forwarder.config().lock_path().exists());

        let RunOutcome::Completed(again) = forwarder.run_once().await.expect("second run") else {
            panic!("run was skipped");
        };
        assert!(again.delivered.is_empty());
    }

    #[tokio::test]
    async fn held_lock_skips_run() {
        let dir = TempDir::new().expect("tempdir");
        let (svc, cfg) = setup(&dir);
        let LockAttempt::Acquired(guard) = RunLock::new(cfg.lock_path()).acquire().expect("lock")
        else {
            panic!("lock should be free");
        };
        let forwarder = Forwarder::new(svc, cfg).expect("forwarder");

        let outcome = forwarder.run_once().await.expect("run");
        assert!(matches!(outcome, RunOutcome::Skipped { holder: Some(_) }));
        assert!(forwarder.service().items(ChannelId(99)).is_empty());
        assert_eq!(forwarder.checkpoints().get(ChannelId(1)), ItemId(0));
        guard.release().expect("release");
    }

    #[tokio::test]
    async fn missing_destination_aborts_and_releases_lock() {
        let dir = TempDir::new().expect("tempdir");
        let (svc, mut cfg) = setup(&dir);
        cfg.destination = SourceRef::Handle("nowhere".into());
        let forwarder = Forwarder::new(svc, cfg).expect("forwarder");

        let err = forwarder.run_once().await.expect_err("destination missing");
        assert!(matches!(err, PipelineError::Destination { .. }));
        assert!(!forwarder.config().lock_path().exists());
        assert_eq!(forwarder.checkpoints().get(ChannelId(1)), ItemId(0));
    }

    #[tokio::test]
    async fn unresolvable_sources_end_run_early() {
        let dir = TempDir::new().expect("tempdir");
        let (svc, mut cfg) = setup(&dir);
        cfg.sources = vec![SourceRef::Handle("ghost".into())];
        let forwarder = Forwarder::new(svc, cfg).expect("forwarder");

        let RunOutcome::Completed(report) = forwarder.run_once().await.expect("run") else {
            panic!("run was skipped");
        };
        assert!(report.sources.is_empty());
        assert_eq!(report.source_failures.len(), 1);
        assert!(report.reconcile.is_none());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let dir = TempDir::new().expect("tempdir");
        let (svc, mut cfg) = setup(&dir);
        cfg.sources.clear();
        assert!(matches!(
            Forwarder::new(svc, cfg),
            Err(PipelineError::Config(_))
        ));
    }
}
