//! Service seams a node exposes over RPC.
//!
//! Local stores implement these traits directly; the RPC client implements
//! them for a remote node, so either can back a handler.

use crate::article::{ArticleParts, ArticlePosting, ArticleRedirect, OverviewEntry, PartMask};
use crate::blob::{Blob, CompressionHint, DayId};
use crate::error::{ArticleDbError, Result};
use crate::groups::{
    GroupEntryNrt, GroupEntryRtp, GroupNrtStore, GroupPairNrt, GroupRtpStore, NrtUpdate,
};
use crate::kv::run_blocking;
use crate::storage::{ArticleStore, DayFileStore, MessageIdIndex};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ArticleService: Send + Sync {
    async fn put_article(&self, group: &str, number: i64, posting: ArticlePosting) -> Result<()>;

    async fn get_article(&self, group: &str, number: i64, want: PartMask)
    -> Result<Option<ArticleParts>>;

    async fn overview(&self, group: &str, first: i64, last: i64, max: usize)
    -> Result<Vec<OverviewEntry>>;
}

/// Day-file storage of one node.
#[async_trait]
pub trait BlobService: Send + Sync {
    async fn node_id(&self) -> Result<Uuid>;

    /// Free bytes, or -1 when unknown.
    async fn free_storage(&self) -> Result<i64>;

    /// Stores an inline blob and returns its pointer. Pointers pass through.
    async fn add_blob(&self, day: DayId, hint: CompressionHint, blob: Blob) -> Result<Blob>;

    /// Dereferences a pointer. Inline blobs pass through.
    async fn read_blob(&self, blob: Blob) -> Result<Blob>;
}

#[async_trait]
pub trait GroupNrtService: Send + Sync {
    async fn get_group(&self, group: &str) -> Result<Option<GroupEntryNrt>>;

    async fn bulk_get_groups(&self, groups: Vec<String>) -> Result<Vec<GroupPairNrt>>;

    /// Creates the group, or applies a last-writer-wins update if it exists.
    async fn put_group(&self, group: &str, entry: GroupEntryNrt) -> Result<NrtUpdate>;

    async fn range_groups(&self, after: &str, prefix: &str, suffix: &str) -> Result<Vec<GroupPairNrt>>;
}

#[async_trait]
pub trait GroupRtpService: Send + Sync {
    async fn get_rtp(&self, group: &str) -> Result<Option<GroupEntryRtp>>;

    async fn increment(&self, group: &str) -> Result<i64>;

    async fn rollback(&self, group: &str, number: i64) -> Result<()>;
}

#[async_trait]
pub trait MessageIdService: Send + Sync {
    async fn get_message_location(&self, message_id: &str) -> Result<Option<ArticleRedirect>>;

    async fn update_message_location(
        &self,
        message_id: &str,
        redirect: ArticleRedirect,
        timestamp: i64,
    ) -> Result<bool>;

    /// Up to `max` message ids recorded at or after `since`, oldest first.
    async fn message_ids_since(&self, since: i64, max: usize) -> Result<Vec<String>>;
}

#[async_trait]
impl ArticleService for ArticleStore {
    async fn put_article(&self, group: &str, number: i64, posting: ArticlePosting) -> Result<()> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "put article", move || {
            store.put(&group, number, posting)
        })
        .await
    }

    async fn get_article(
        &self,
        group: &str,
        number: i64,
        want: PartMask,
    ) -> Result<Option<ArticleParts>> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "get article", move || {
            store.get(&group, number, want)
        })
        .await
    }

    async fn overview(
        &self,
        group: &str,
        first: i64,
        last: i64,
        max: usize,
    ) -> Result<Vec<OverviewEntry>> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "overview", move || {
            store.overview(&group, first, last, max)
        })
        .await
    }
}

#[async_trait]
impl BlobService for DayFileStore {
    async fn node_id(&self) -> Result<Uuid> {
        Ok(DayFileStore::node_id(self))
    }

    async fn free_storage(&self) -> Result<i64> {
        Ok(DayFileStore::free_storage(self))
    }

    async fn add_blob(&self, day: DayId, hint: CompressionHint, blob: Blob) -> Result<Blob> {
        let store = self.clone();
        run_blocking(self.timeout(), "add blob", move || store.add_blob(day, hint, blob)).await
    }

    async fn read_blob(&self, blob: Blob) -> Result<Blob> {
        if blob.is_inline() {
            return Ok(blob);
        }
        let store = self.clone();
        run_blocking(self.timeout(), "read blob", move || store.read_blob(blob)).await
    }
}

#[async_trait]
impl GroupNrtService for GroupNrtStore {
    async fn get_group(&self, group: &str) -> Result<Option<GroupEntryNrt>> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "get group", move || store.get(&group)).await
    }

    async fn bulk_get_groups(&self, groups: Vec<String>) -> Result<Vec<GroupPairNrt>> {
        let store = self.clone();
        run_blocking(self.kv().timeout(), "bulk get groups", move || {
            store.bulk_get(&groups)
        })
        .await
    }

    async fn put_group(&self, group: &str, entry: GroupEntryNrt) -> Result<NrtUpdate> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "put group", move || {
            match store.create(&group, &entry) {
                Ok(()) => Ok(NrtUpdate {
                    previous: None,
                    applied: true,
                }),
                Err(ArticleDbError::Conflict(_)) => store.update(&group, &entry),
                Err(error) => Err(error),
            }
        })
        .await
    }

    async fn range_groups(&self, after: &str, prefix: &str, suffix: &str) -> Result<Vec<GroupPairNrt>> {
        let store = self.clone();
        let (after, prefix, suffix) = (after.to_string(), prefix.to_string(), suffix.to_string());
        run_blocking(self.kv().timeout(), "range groups", move || {
            store.range(&after, &prefix, &suffix)
        })
        .await
    }
}

#[async_trait]
impl GroupRtpService for GroupRtpStore {
    async fn get_rtp(&self, group: &str) -> Result<Option<GroupEntryRtp>> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "get rtp", move || store.get(&group)).await
    }

    async fn increment(&self, group: &str) -> Result<i64> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "increment", move || store.increment(&group)).await
    }

    async fn rollback(&self, group: &str, number: i64) -> Result<()> {
        let store = self.clone();
        let group = group.to_string();
        run_blocking(self.kv().timeout(), "rollback", move || {
            store.rollback(&group, number).map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl MessageIdService for MessageIdIndex {
    async fn get_message_location(&self, message_id: &str) -> Result<Option<ArticleRedirect>> {
        let index = self.clone();
        let message_id = message_id.to_string();
        run_blocking(self.kv().timeout(), "get message location", move || {
            index.get_location(&message_id)
        })
        .await
    }

    async fn update_message_location(
        &self,
        message_id: &str,
        redirect: ArticleRedirect,
        timestamp: i64,
    ) -> Result<bool> {
        let index = self.clone();
        let message_id = message_id.to_string();
        run_blocking(self.kv().timeout(), "update message location", move || {
            index.update_location(&message_id, &redirect, timestamp)
        })
        .await
    }

    async fn message_ids_since(&self, since: i64, max: usize) -> Result<Vec<String>> {
        let index = self.clone();
        run_blocking(self.kv().timeout(), "list message ids", move || {
            index.since(since, max)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;
    use std::sync::Arc;
    use tokio_test::block_on;

    #[tokio::test]
    async fn test_put_group_creates_then_updates() {
        let service: Arc<dyn GroupNrtService> =
            Arc::new(GroupNrtStore::new(KvStore::open_in_memory().unwrap()));
        let entry = |timestamp| GroupEntryNrt {
            description: "Rust discussion".to_string(),
            status: b'y',
            timestamp,
        };

        let created = service.put_group("comp.lang.rust", entry(5)).await.unwrap();
        assert_eq!(created.previous, None);
        assert!(created.applied);

        let stale = service.put_group("comp.lang.rust", entry(5)).await.unwrap();
        assert!(!stale.applied);
        assert_eq!(stale.previous, Some(entry(5)));

        let newer = service.put_group("comp.lang.rust", entry(6)).await.unwrap();
        assert!(newer.applied);
        assert_eq!(service.get_group("comp.lang.rust").await.unwrap(), Some(entry(6)));
    }

    #[tokio::test]
    async fn test_local_blob_service_passes_inline_through() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DayFileStore::open(temp_dir.path().to_path_buf(), Uuid::new_v4(), 4).unwrap();
        let service: Arc<dyn BlobService> = Arc::new(store.clone());

        assert_eq!(service.node_id().await.unwrap(), store.node_id());
        assert_eq!(service.free_storage().await.unwrap(), -1);

        let inline = Blob::plain("short");
        assert_eq!(service.read_blob(inline.clone()).await.unwrap(), inline);

        let pointer = service
            .add_blob(1, CompressionHint::None, inline.clone())
            .await
            .unwrap();
        assert!(!pointer.is_inline());
        assert_eq!(service.read_blob(pointer).await.unwrap(), inline);
    }

    #[test]
    fn test_message_id_service_lists_since() {
        let service: Arc<dyn MessageIdService> =
            Arc::new(MessageIdIndex::new(KvStore::open_in_memory().unwrap()));
        let redirect = ArticleRedirect {
            group: "alt.test".to_string(),
            number: 1,
        };

        let ids = block_on(async {
            for (message_id, timestamp) in [("<b@x>", 20), ("<a@x>", 10), ("<c@x>", 30)] {
                service
                    .update_message_location(message_id, redirect.clone(), timestamp)
                    .await
                    .unwrap();
            }
            service.message_ids_since(15, 10).await
        });
        assert_eq!(ids.unwrap(), vec!["<b@x>".to_string(), "<c@x>".to_string()]);
        assert!(block_on(service.message_ids_since(0, 0)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rtp_service_rollback() {
        let service: Arc<dyn GroupRtpService> =
            Arc::new(GroupRtpStore::new(KvStore::open_in_memory().unwrap()));
        assert_eq!(service.get_rtp("alt.test").await.unwrap(), None);
        let number = service.increment("alt.test").await.unwrap();
        service.rollback("alt.test", number).await.unwrap();
        assert_eq!(
            service.get_rtp("alt.test").await.unwrap(),
            Some(GroupEntryRtp::default())
        );
    }
}
