use std::collections::{HashMap, HashSet};

use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use feedrelay_core::{ChannelId, Fingerprint, FingerprintRules, ItemId};
use feedrelay_messaging::{recent_items, MessagingService};

use crate::report::ReconcileReport;

/// Destination state rebuilt from its own recent history.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Links already present in the destination; the run's historical set.
    pub delivered_links: HashSet<Fingerprint>,
    pub report: ReconcileReport,
}

/// Scans up to `history_size` recent destination items, keeps the newest item
/// per link and deletes the older copies.
///
/// A scan error keeps whatever was read before it. The first delete failure
/// stops further deletes; both are recorded in the report and never abort the
/// run.
pub async fn reconcile_destination<M>(
    service: &M,
    destination: ChannelId,
    rules: &FingerprintRules,
    history_size: usize,
    page_size: usize,
) -> Reconciliation
where
    M: MessagingService,
{
    let mut report = ReconcileReport::default();
    let mut newest: HashMap<Fingerprint, ItemId> = HashMap::new();
    let mut copies: HashMap<Fingerprint, Vec<ItemId>> = HashMap::new();

    let mut history = Box::pin(recent_items(service, destination, history_size, page_size));
    while let Some(next) = history.next().await {
        let item = match next {
            Ok(item) => item,
            Err(err) => {
                warn!(channel = %destination, error = %err, "destination scan interrupted");
                report.failures.push(format!("scan: {err}"));
                break;
            }
        };
        report.scanned += 1;
        let Some(link) = rules.link_of(&item) else {
            continue;
        };
        copies.entry(link.clone()).or_default().push(item.id);
        let keep = newest.entry(link).or_insert(item.id);
        if item.id > *keep {
            *keep = item.id;
        }
    }

    let mut redundant: Vec<ItemId> = copies
        .iter()
        .flat_map(|(link, ids)| {
            let keep = newest.get(link).copied();
            ids.iter().copied().filter(move |id| Some(*id) != keep)
        })
        .collect();
    redundant.sort();
    redundant.dedup();
    report.authoritative = newest.len();

    let batch = service.max_delete_batch().max(1);
    for chunk in redundant.chunks(batch) {
        match service.delete(destination, chunk).await {
            Ok(()) => {
                debug!(channel = %destination, count = chunk.len(), "deleted duplicate items");
                report.deleted.extend_from_slice(chunk);
            }
            Err(err) => {
                warn!(channel = %destination, error = %err, "duplicate cleanup failed");
                report.failures.push(format!("delete: {err}"));
                break;
            }
        }
    }

    if !report.deleted.is_empty() {
        info!(
            channel = %destination,
            deleted = report.deleted.len(),
            "removed duplicate items from destination"
        );
    }

    Reconciliation {
        delivered_links: newest.into_keys().collect(),
        report,
    }
}
