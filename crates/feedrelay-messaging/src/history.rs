use futures_util::stream::{self, Stream, TryStreamExt};

use feedrelay_core::{ChannelId, Item, ItemId};

use crate::error::MessagingError;
use crate::service::{HistoryQuery, MessagingService};

/// Lazily yields every item newer than `since`, in ascending id order.
///
/// Pages are requested on demand; a short page ends the stream.
pub fn items_since<'a, M>(
    service: &'a M,
    channel: ChannelId,
    since: ItemId,
    page_size: usize,
) -> impl Stream<Item = Result<Item, MessagingError>> + 'a
where
    M: MessagingService,
{
    let page_size = page_size.max(1);
    stream::try_unfold(Some(since), move |cursor| async move {
        let Some(after) = cursor else {
            return Ok::<_, MessagingError>(None);
        };
        let mut page = service
            .history(
                channel,
                HistoryQuery::After {
                    after,
                    limit: page_size,
                },
            )
            .await?;
        page.retain(|item| item.id > after);
        page.sort_by_key(|item| item.id);
        let Some(last) = page.last().map(|item| item.id) else {
            return Ok(None);
        };
        let next = (page.len() >= page_size).then_some(last);
        Ok(Some((page, next)))
    })
    .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Item, MessagingError>)))
    .try_flatten()
}

/// Lazily yields up to `limit` of the most recent items, newest first.
pub fn recent_items<'a, M>(
    service: &'a M,
    channel: ChannelId,
    limit: usize,
    page_size: usize,
) -> impl Stream<Item = Result<Item, MessagingError>> + 'a
where
    M: MessagingService,
{
    let page_size = page_size.max(1);
    stream::try_unfold(
        Some((None::<ItemId>, limit)),
        move |state| async move {
            let Some((before, remaining)) = state else {
                return Ok::<_, MessagingError>(None);
            };
            if remaining == 0 {
                return Ok(None);
            }
            let want = remaining.min(page_size);
            let mut page = service
                .history(channel, HistoryQuery::Before { before, limit: want })
                .await?;
            if let Some(bound) = before {
                page.retain(|item| item.id < bound);
            }
            page.sort_by(|a, b| b.id.cmp(&a.id));
            page.truncate(want);
            let Some(oldest) = page.last().map(|item| item.id) else {
                return Ok(None);
            };
            let left = remaining - page.len();
            let next = (page.len() == want && left > 0).then_some((Some(oldest), left));
            Ok(Some((page, next)))
        },
    )
    .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Item, MessagingError>)))
    .try_flatten()
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;

    use super::{items_since, recent_items};
    use crate::memory::InMemoryMessaging;
    use feedrelay_core::{ChannelId, ItemId};

    fn seeded(count: i64) -> (InMemoryMessaging, ChannelId) {
        let svc = InMemoryMessaging::new();
        let channel = svc.add_channel("src", ChannelId(1));
        for n in 0..count {
            svc.push_text(channel, &format!("item {n}"), 1_000 + n as u64);
        }
        (svc, channel)
    }

    #[tokio::test]
    async fn since_paginates_transparently_in_ascending_order() {
        let (svc, channel) = seeded(25);
        let items: Vec<_> = items_since(&svc, channel, ItemId(3), 10)
            .try_collect()
            .await
            .expect("stream ok");
        let ids: Vec<i64> = items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, (4..=25).collect::<Vec<_>>());
        assert_eq!(svc.history_calls(), 3);
    }

    #[tokio::test]
    async fn since_past_the_end_is_empty() {
        let (svc, channel) = seeded(5);
        let items: Vec<_> = items_since(&svc, channel, ItemId(5), 10)
            .try_collect()
            .await
            .expect("stream ok");
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn recent_is_bounded_and_newest_first() {
        let (svc, channel) = seeded(25);
        let items: Vec<_> = recent_items(&svc, channel, 12, 5)
            .try_collect()
            .await
            .expect("stream ok");
        let ids: Vec<i64> = items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, (14..=25).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn inaccessible_channel_surfaces_error() {
        let (svc, channel) = seeded(3);
        svc.forbid(channel);
        let err = items_since(&svc, channel, ItemId(0), 10)
            .try_collect::<Vec<_>>()
            .await
            .expect_err("forbidden channel");
        assert!(matches!(err, crate::MessagingError::Forbidden(_)));
    }
}
