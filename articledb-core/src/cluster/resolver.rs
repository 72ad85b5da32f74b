use super::registry::NodeRegistry;
use crate::blob::{Blob, CompressionHint, DayId};
use crate::deadline::with_deadline;
use crate::error::{ArticleDbError, Result};
use crate::service::BlobService;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Turns pointers into content, wherever the owning day file lives.
#[derive(Clone)]
pub struct ClusterResolver {
    local: Arc<dyn BlobService>,
    local_node_id: Uuid,
    registry: Arc<NodeRegistry>,
    read_timeout: Duration,
}

impl ClusterResolver {
    pub fn new(
        local: Arc<dyn BlobService>,
        local_node_id: Uuid,
        registry: Arc<NodeRegistry>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            local,
            local_node_id,
            registry,
            read_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Returns inline blobs unchanged, reads local pointers from the local
    /// store and forwards foreign pointers to their owner.
    pub async fn resolve_read(&self, blob: Blob) -> Result<Blob> {
        let location = match &blob {
            Blob::Location(location) => *location,
            _ => return Ok(blob),
        };

        if location.node == self.local_node_id {
            return self.local.read_blob(blob).await;
        }

        let Some(client) = self.registry.client_for(&location.node) else {
            return Err(ArticleDbError::Unreachable(format!(
                "no route to node {}",
                location.node
            )));
        };

        tracing::debug!(
            "Reading blob of node {} day {} remotely",
            location.node,
            location.day
        );
        let resolved =
            with_deadline(self.read_timeout, "remote blob read", client.read_blob(blob)).await?;

        if !resolved.is_inline() {
            return Err(ArticleDbError::Corrupt(format!(
                "node {} answered a pointer with another pointer",
                location.node
            )));
        }
        Ok(resolved)
    }
}

/// The local day-file store with cluster-wide reads.
#[derive(Clone)]
pub struct ClusteredBlobService {
    local: Arc<dyn BlobService>,
    resolver: ClusterResolver,
}

impl ClusteredBlobService {
    pub fn new(local: Arc<dyn BlobService>, resolver: ClusterResolver) -> Self {
        Self { local, resolver }
    }
}

#[async_trait]
impl BlobService for ClusteredBlobService {
    async fn node_id(&self) -> Result<Uuid> {
        self.local.node_id().await
    }

    async fn free_storage(&self) -> Result<i64> {
        self.local.free_storage().await
    }

    async fn add_blob(&self, day: DayId, hint: CompressionHint, blob: Blob) -> Result<Blob> {
        self.local.add_blob(day, hint, blob).await
    }

    async fn read_blob(&self, blob: Blob) -> Result<Blob> {
        self.resolver.resolve_read(blob).await
    }
}
