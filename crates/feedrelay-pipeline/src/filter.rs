use std::collections::{HashMap, HashSet};

use tracing::debug;

use feedrelay_core::{normalize_text, Fingerprint, Item};
use feedrelay_store::FingerprintCache;

use crate::config::DedupConfig;
use crate::fetch::SourceBatch;
use crate::report::FilterStats;

/// Case-insensitive keyword filter over normalized item text.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    keywords: Vec<String>,
}

impl Blacklist {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| normalize_text(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn matches(&self, item: &Item) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let text = normalize_text(&item.text);
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// Previously delivered content the batch is checked against.
#[derive(Debug, Clone, Copy)]
pub enum HistoricalSet<'a> {
    None,
    /// Links found in the destination by reconciliation.
    Links(&'a HashSet<Fingerprint>),
    /// Persisted fingerprint cache; surviving items are claimed as they pass.
    Cache(&'a FingerprintCache),
}

/// Merges fetched batches into the ordered list of items to deliver.
///
/// Control and empty items are dropped, the rest ordered by
/// `(timestamp, channel, id)`, then blacklist, intra-batch and historical
/// dedup are applied in that order.
pub fn build_delivery_batch(
    batches: &[SourceBatch],
    blacklist: &Blacklist,
    dedup: Option<&DedupConfig>,
    historical: HistoricalSet<'_>,
) -> (Vec<Item>, FilterStats) {
    let mut stats = FilterStats::default();
    let mut merged: Vec<Item> = Vec::new();
    for item in batches.iter().flat_map(|b| b.items.iter()) {
        stats.merged += 1;
        if item.is_control {
            stats.control += 1;
        } else if !item.has_content() {
            stats.empty += 1;
        } else {
            merged.push(item.clone());
        }
    }
    merged.sort_by(|a, b| {
        (a.timestamp, a.channel, a.id).cmp(&(b.timestamp, b.channel, b.id))
    });

    merged.retain(|item| {
        let blocked = blacklist.matches(item);
        if blocked {
            debug!(channel = %item.channel, item = %item.id, "blacklisted");
            stats.blacklisted += 1;
        }
        !blocked
    });

    let Some(dedup) = dedup else {
        stats.batch_size = merged.len();
        return (merged, stats);
    };

    // Newest item per link, by (id, timestamp).
    let mut winners: HashMap<Fingerprint, (usize, (i64, u64))> = HashMap::new();
    for (idx, item) in merged.iter().enumerate() {
        let Some(link) = dedup.rules.link_of(item) else {
            continue;
        };
        let rank = (item.id.0, item.timestamp);
        winners
            .entry(link)
            .and_modify(|best| {
                if rank > best.1 {
                    *best = (idx, rank);
                }
            })
            .or_insert((idx, rank));
    }
    let mut idx = 0;
    merged.retain(|item| {
        let here = idx;
        idx += 1;
        match dedup.rules.link_of(item) {
            Some(link) if winners.get(&link).map(|w| w.0) != Some(here) => {
                stats.intra_batch_duplicates += 1;
                false
            }
            _ => true,
        }
    });

    merged.retain(|item| {
        let seen = match historical {
            HistoricalSet::None => false,
            HistoricalSet::Links(links) => dedup
                .rules
                .link_of(item)
                .is_some_and(|link| links.contains(&link)),
            HistoricalSet::Cache(cache) => dedup
                .rules
                .fingerprint(item)
                .is_some_and(|fp| !cache.add(fp)),
        };
        if seen {
            debug!(channel = %item.channel, item = %item.id, "already delivered");
            stats.historical_duplicates += 1;
        }
        !seen
    });

    stats.batch_size = merged.len();
    (merged, stats)
}
