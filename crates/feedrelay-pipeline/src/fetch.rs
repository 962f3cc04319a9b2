use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use feedrelay_core::{ChannelId, Item, ItemId};
use feedrelay_messaging::{items_since, MessagingError, MessagingService};
use feedrelay_store::CheckpointStore;

use crate::report::{FailureStage, SourceFailure};
use crate::resolve::ResolvedSource;

/// Everything newer than one source's checkpoint.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub reference: String,
    pub channel: ChannelId,
    /// Checkpoint read before fetching.
    pub since: ItemId,
    /// Ascending by id, control items included.
    pub items: Vec<Item>,
    /// Largest id observed, control items included.
    pub max_observed: Option<ItemId>,
}

/// Pages through one source from its checkpoint.
pub async fn fetch_source<M>(
    service: &M,
    source: &ResolvedSource,
    since: ItemId,
    page_size: usize,
) -> Result<SourceBatch, MessagingError>
where
    M: MessagingService,
{
    let items: Vec<Item> = items_since(service, source.channel, since, page_size)
        .try_collect()
        .await?;
    let max_observed = items.iter().map(|item| item.id).max();
    debug!(
        channel = %source.channel,
        since = %since,
        fetched = items.len(),
        "fetched source"
    );
    Ok(SourceBatch {
        reference: source.reference.to_string(),
        channel: source.channel,
        since,
        items,
        max_observed,
    })
}

/// Fetches all sources with at most `concurrency` in flight.
///
/// A source whose history cannot be read is reported and contributes nothing;
/// its checkpoint is left alone.
pub async fn fetch_sources<M>(
    service: &M,
    sources: &[ResolvedSource],
    checkpoints: &CheckpointStore,
    page_size: usize,
    concurrency: usize,
) -> (Vec<SourceBatch>, Vec<SourceFailure>)
where
    M: MessagingService,
{
    let results: Vec<_> = stream::iter(sources)
        .map(|source| async move {
            let since = checkpoints.get(source.channel);
            (source, fetch_source(service, source, since, page_size).await)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut batches = Vec::new();
    let mut failures = Vec::new();
    for (source, result) in results {
        match result {
            Ok(batch) => batches.push(batch),
            Err(err) => {
                warn!(channel = %source.channel, error = %err, "source history unavailable");
                failures.push(SourceFailure {
                    source: source.reference.to_string(),
                    channel: Some(source.channel),
                    stage: FailureStage::Fetch,
                    error: err.to_string(),
                });
            }
        }
    }
    (batches, failures)
}
