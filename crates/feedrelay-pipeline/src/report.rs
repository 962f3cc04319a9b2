use feedrelay_core::{ChannelId, ItemId};
use feedrelay_store::LockOwner;
use serde::Serialize;
use tracing::info;

/// Stage at which a source was dropped from the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Resolve,
    Fetch,
    Commit,
}

/// A contained per-source failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub channel: Option<ChannelId>,
    pub stage: FailureStage,
    pub error: String,
}

/// What one source contributed to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub channel: ChannelId,
    pub previous_checkpoint: ItemId,
    pub fetched: usize,
    pub max_observed: Option<ItemId>,
    /// Checkpoint after commit; equals `previous_checkpoint` when nothing was observed.
    pub checkpoint: ItemId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub merged: usize,
    pub control: usize,
    pub empty: usize,
    pub blacklisted: usize,
    pub intra_batch_duplicates: usize,
    pub historical_duplicates: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    /// Distinct links found in the scanned history.
    pub authoritative: usize,
    pub deleted: Vec<ItemId>,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveredItem {
    pub source: ChannelId,
    pub source_item: ItemId,
    pub delivered_as: ItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub source: ChannelId,
    pub item: ItemId,
    pub error: String,
}

/// Aggregated result of one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub destination: Option<ChannelId>,
    pub sources: Vec<SourceReport>,
    pub source_failures: Vec<SourceFailure>,
    pub reconcile: Option<ReconcileReport>,
    pub filter: FilterStats,
    pub delivered: Vec<DeliveredItem>,
    pub delivery_failures: Vec<DeliveryFailure>,
    pub fingerprints_persisted: Option<usize>,
    /// Non-fatal state persistence problems.
    pub state_failures: Vec<String>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.source_failures.is_empty()
            || !self.delivery_failures.is_empty()
            || !self.state_failures.is_empty()
            || self
                .reconcile
                .as_ref()
                .is_some_and(|r| !r.failures.is_empty())
    }

    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            sources = self.sources.len(),
            source_failures = self.source_failures.len(),
            fetched = self.sources.iter().map(|s| s.fetched).sum::<usize>(),
            batch = self.filter.batch_size,
            delivered = self.delivered.len(),
            delivery_failures = self.delivery_failures.len(),
            reconciled_deletes = self.reconcile.as_ref().map_or(0, |r| r.deleted.len()),
            "run finished"
        );
    }
}

/// Outcome of [`crate::Forwarder::run_once`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run holds the lock; nothing was touched.
    Skipped { holder: Option<LockOwner> },
}

#[cfg(test)]
mod tests {
    use super::{DeliveryFailure, ReconcileReport, RunOutcome, RunReport};
    use feedrelay_core::{ChannelId, ItemId};

    #[test]
    fn failures_are_detected_across_sections() {
        let mut report = RunReport::default();
        assert!(!report.has_failures());
        report.reconcile = Some(ReconcileReport {
            failures: vec!["delete failed".into()],
            ..ReconcileReport::default()
        });
        assert!(report.has_failures());

        let mut report = RunReport::default();
        report.delivery_failures.push(DeliveryFailure {
            source: ChannelId(1),
            item: ItemId(2),
            error: "send rejected".into(),
        });
        assert!(report.has_failures());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(RunOutcome::Skipped { holder: None }).expect("encode");
        assert_eq!(json["outcome"], "skipped");
        let json = serde_json::to_value(RunOutcome::Completed(RunReport {
            run_id: "abc".into(),
            ..RunReport::default()
        }))
        .expect("encode");
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["run_id"], "abc");
    }
}
