use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use feedrelay_core::{ChannelId, Item, ItemId};
use feedrelay_messaging::{MessagingError, MessagingService};

use crate::report::{DeliveredItem, DeliveryFailure};

/// Sends one item to the destination, staging any attachment under
/// `downloads_dir`. The staging directory is removed on every path.
pub async fn deliver_item<M>(
    service: &M,
    destination: ChannelId,
    item: &Item,
    downloads_dir: &Path,
) -> Result<ItemId, MessagingError>
where
    M: MessagingService,
{
    if item.attachment.is_none() {
        return service.send(destination, &item.text, None).await;
    }
    fs::create_dir_all(downloads_dir)?;
    let staging = tempfile::Builder::new()
        .prefix("item-")
        .tempdir_in(downloads_dir)?;
    let file = service.download(item, staging.path()).await?;
    let sent = service.send(destination, &item.text, Some(&file)).await;
    if let Err(err) = staging.close() {
        warn!(item = %item.id, error = %err, "failed to remove staged download");
    }
    sent
}

/// Delivers items one at a time in batch order.
///
/// A failed item is reported and skipped; later items are still attempted.
pub async fn deliver_batch<M>(
    service: &M,
    destination: ChannelId,
    items: &[Item],
    downloads_dir: &Path,
) -> (Vec<DeliveredItem>, Vec<DeliveryFailure>)
where
    M: MessagingService,
{
    let mut delivered = Vec::new();
    let mut failures = Vec::new();
    for item in items {
        if !item.has_content() {
            debug!(channel = %item.channel, item = %item.id, "nothing to send");
            continue;
        }
        match deliver_item(service, destination, item, downloads_dir).await {
            Ok(id) => {
                debug!(channel = %item.channel, item = %item.id, delivered_as = %id, "delivered");
                delivered.push(DeliveredItem {
                    source: item.channel,
                    source_item: item.id,
                    delivered_as: id,
                });
            }
            Err(err) => {
                warn!(channel = %item.channel, item = %item.id, error = %err, "delivery failed");
                failures.push(DeliveryFailure {
                    source: item.channel,
                    item: item.id,
                    error: err.to_string(),
                });
            }
        }
    }
    (delivered, failures)
}

#[cfg(test)]
mod tests {
    use super::deliver_batch;
    use feedrelay_core::{ChannelId, Item, ItemId};
    use feedrelay_messaging::InMemoryMessaging;
    use tempfile::TempDir;

    fn item(id: i64, text: &str) -> Item {
        Item {
            id: ItemId(id),
            channel: ChannelId(1),
            timestamp: id as u64,
            text: text.to_string(),
            attachment: None,
            is_control: false,
        }
    }

    #[tokio::test]
    async fn rejected_item_does_not_block_later_items() {
        let dir = TempDir::new().expect("tempdir");
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(99));
        svc.reject_sends_containing("forbidden word");

        let items = vec![item(1, "first"), item(2, "a forbidden word"), item(3, "third")];
        let (delivered, failures) = deliver_batch(&svc, dest, &items, dir.path()).await;

        let sent: Vec<_> = delivered.iter().map(|d| d.source_item).collect();
        assert_eq!(sent, vec![ItemId(1), ItemId(3)]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].item, ItemId(2));
        let texts: Vec<_> = svc.items(dest).into_iter().map(|i| i.text).collect();
        assert_eq!(texts, vec!["first", "third"]);
    }

    #[tokio::test]
    async fn media_is_staged_and_cleaned_up() {
        let dir = TempDir::new().expect("tempdir");
        let downloads = dir.path().join("downloads");
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(99));
        let mut with_media = item(1, "caption");
        with_media.attachment = Some(svc.add_media("photo.jpg", b"jpeg bytes".to_vec()));

        let (delivered, failures) =
            deliver_batch(&svc, dest, &[with_media], &downloads).await;
        assert!(failures.is_empty());
        assert_eq!(delivered.len(), 1);

        let posted = svc.items(dest);
        let attachment = posted[0].attachment.as_ref().expect("media forwarded");
        assert_eq!(
            svc.media_bytes(&attachment.reference).as_deref(),
            Some(&b"jpeg bytes"[..])
        );
        let leftovers = std::fs::read_dir(&downloads).expect("downloads dir").count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn failed_download_is_contained() {
        let dir = TempDir::new().expect("tempdir");
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(99));
        let attachment = svc.add_media("doc.pdf", b"pdf".to_vec());
        svc.fail_download(attachment.reference.clone());
        let mut with_media = item(1, "report");
        with_media.attachment = Some(attachment);

        let (delivered, failures) =
            deliver_batch(&svc, dest, &[with_media, item(2, "next")], dir.path()).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);
    }

    #[tokio::test]
    async fn rejected_media_send_leaves_no_staged_file() {
        let dir = TempDir::new().expect("tempdir");
        let downloads = dir.path().join("downloads");
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(99));
        svc.reject_sends_containing("blocked");
        let mut with_media = item(1, "blocked caption");
        with_media.attachment = Some(svc.add_media("clip.mp4", b"video".to_vec()));

        let (delivered, failures) =
            deliver_batch(&svc, dest, &[with_media], &downloads).await;
        assert!(delivered.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].item, ItemId(1));
        assert!(svc.items(dest).is_empty());
        let leftovers = std::fs::read_dir(&downloads).expect("downloads dir").count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn empty_items_are_not_sent() {
        let dir = TempDir::new().expect("tempdir");
        let svc = InMemoryMessaging::new();
        let dest = svc.add_channel("dest", ChannelId(99));
        let (delivered, failures) =
            deliver_batch(&svc, dest, &[item(1, "  ")], dir.path()).await;
        assert!(delivered.is_empty());
        assert!(failures.is_empty());
        assert!(svc.items(dest).is_empty());
    }
}
