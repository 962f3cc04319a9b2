use std::collections::HashSet;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use feedrelay_core::{ChannelId, SourceRef};
use feedrelay_messaging::{MessagingError, MessagingService};

use crate::report::{FailureStage, SourceFailure};

/// A configured source that mapped to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub reference: SourceRef,
    pub channel: ChannelId,
}

/// Resolves one reference; numeric ids are taken as-is.
pub async fn resolve_one<M>(service: &M, reference: &SourceRef) -> Result<ChannelId, MessagingError>
where
    M: MessagingService,
{
    match reference.channel_id() {
        Some(id) => Ok(id),
        None => service.resolve(&reference.lookup_key()).await,
    }
}

/// Resolves every source with at most `concurrency` lookups in flight.
///
/// Output keeps configuration order. A reference that fails is reported and
/// skipped; a channel reached through two references is kept once.
pub async fn resolve_sources<M>(
    service: &M,
    sources: &[SourceRef],
    concurrency: usize,
) -> (Vec<ResolvedSource>, Vec<SourceFailure>)
where
    M: MessagingService,
{
    let results: Vec<_> = stream::iter(sources)
        .map(|reference| async move { (reference, resolve_one(service, reference).await) })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    let mut failures = Vec::new();
    for (reference, result) in results {
        match result {
            Ok(channel) => {
                if !seen.insert(channel) {
                    debug!(source = %reference, channel = %channel, "duplicate source reference");
                    continue;
                }
                resolved.push(ResolvedSource {
                    reference: reference.clone(),
                    channel,
                });
            }
            Err(err) => {
                warn!(source = %reference, error = %err, "source could not be resolved");
                failures.push(SourceFailure {
                    source: reference.to_string(),
                    channel: None,
                    stage: FailureStage::Resolve,
                    error: err.to_string(),
                });
            }
        }
    }
    (resolved, failures)
}

#[cfg(test)]
mod tests {
    use super::resolve_sources;
    use crate::report::FailureStage;
    use feedrelay_core::{ChannelId, SourceRef};
    use feedrelay_messaging::InMemoryMessaging;

    #[tokio::test]
    async fn unresolvable_sources_are_reported_and_skipped() {
        let svc = InMemoryMessaging::new();
        svc.add_channel("alpha", ChannelId(10));
        svc.add_channel("https://t.me/+secret", ChannelId(20));
        let sources: Vec<SourceRef> = ["@alpha", "missing", "t.me/+secret", "30"]
            .iter()
            .map(|s| s.parse().expect("valid reference"))
            .collect();

        let (resolved, failures) = resolve_sources(&svc, &sources, 2).await;
        let channels: Vec<_> = resolved.iter().map(|r| r.channel).collect();
        assert_eq!(channels, vec![ChannelId(10), ChannelId(20), ChannelId(30)]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, FailureStage::Resolve);
        assert_eq!(failures[0].source, "@missing");
    }

    #[tokio::test]
    async fn repeated_channels_are_kept_once() {
        let svc = InMemoryMessaging::new();
        svc.add_channel("alpha", ChannelId(10));
        let sources = vec![
            SourceRef::Handle("alpha".into()),
            SourceRef::Id(ChannelId(10)),
        ];
        let (resolved, failures) = resolve_sources(&svc, &sources, 4).await;
        assert_eq!(resolved.len(), 1);
        assert!(failures.is_empty());
    }
}
