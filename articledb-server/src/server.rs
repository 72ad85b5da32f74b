use crate::config::{Config, PeerConfig};
use articledb_core::{
    ArticleStore, BlobService, ClusterResolver, ClusteredBlobService, DayFileStore, GroupNrtStore,
    GroupRtpStore, Handler, KvStore, Member, MembershipEvent, MessageIdIndex, NodeMeta,
    NodeRegistry, Result, RpcServer, TcpDialer,
};
use std::sync::Arc;
use uuid::Uuid;

/// Metadata limit of the membership layer peers are announced through.
const NODE_META_LIMIT: usize = 512;

pub async fn run_server(config: Config, node_id: Uuid) -> Result<()> {
    let deadlines = config.timeouts.deadlines();

    std::fs::create_dir_all(&config.data_dir)?;
    let kv = KvStore::open(&config.data_dir.join("articledb.sqlite"))?
        .with_timeout(deadlines.storage);

    let day_files = DayFileStore::open(
        config.data_dir.join("dayfiles"),
        node_id,
        config.day_file_cache_size,
    )?
    .with_timeout(deadlines.storage);
    let local: Arc<dyn BlobService> = Arc::new(day_files);

    let registry = Arc::new(
        NodeRegistry::new(config.node_name.clone(), Some(node_id))
            .with_tcp_dialer(Arc::new(TcpDialer::new(deadlines))),
    );
    for peer in &config.peers {
        announce_peer(&registry, peer).await;
    }

    let resolver = ClusterResolver::new(
        Arc::clone(&local),
        node_id,
        Arc::clone(&registry),
        deadlines.read(),
    );
    let blobs = Arc::new(ClusteredBlobService::new(local, resolver));

    let services = &config.services;
    let mut handler = Handler::new();
    if services.article {
        handler = handler.with_articles(Arc::new(ArticleStore::new(kv.clone())));
    }
    if services.dayfile {
        handler = handler.with_blobs(blobs);
    }
    if services.groups_nrt {
        handler = handler.with_groups_nrt(Arc::new(GroupNrtStore::new(kv.clone())));
    }
    if services.groups_rtp {
        handler = handler.with_groups_rtp(Arc::new(GroupRtpStore::new(kv.clone())));
    }
    if services.message_id {
        handler = handler.with_message_ids(Arc::new(MessageIdIndex::new(kv.clone())));
    }

    let server = RpcServer::bind(&config.bind_addr, Arc::new(handler)).await?;
    tracing::info!(
        "Node {} ({}) advertising {} with {} static peer(s)",
        config.node_name,
        node_id,
        config.effective_address(),
        registry.peer_names().len()
    );

    server
        .run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", error);
            }
        })
        .await
}

/// Feeds a statically configured peer to the registry as a join.
async fn announce_peer(registry: &NodeRegistry, peer: &PeerConfig) {
    let addr = match tokio::net::lookup_host(peer.addr.as_str()).await {
        Ok(mut addrs) => addrs.next(),
        Err(error) => {
            tracing::warn!("Cannot resolve peer {} at {}: {}", peer.name, peer.addr, error);
            return;
        }
    };
    let Some(addr) = addr else {
        tracing::warn!("Peer {} at {} resolved to nothing", peer.name, peer.addr);
        return;
    };

    let Some(meta) = NodeMeta::tcp(addr.port(), peer.node_id).encode(NODE_META_LIMIT) else {
        return;
    };
    registry.apply(MembershipEvent::Joined(Member {
        name: peer.name.clone(),
        addr: addr.ip(),
        meta,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_peer_is_registered() {
        let registry = NodeRegistry::new("news-1", Some(Uuid::new_v4()))
            .with_tcp_dialer(Arc::new(TcpDialer::default()));
        let node_id = Uuid::new_v4();

        announce_peer(
            &registry,
            &PeerConfig {
                name: "news-2".to_string(),
                addr: "127.0.0.1:7071".to_string(),
                node_id: Some(node_id),
            },
        )
        .await;
        announce_peer(
            &registry,
            &PeerConfig {
                name: "news-3".to_string(),
                addr: "not an address".to_string(),
                node_id: None,
            },
        )
        .await;

        assert_eq!(registry.peer_names(), vec!["news-2".to_string()]);
        let peer = registry.peer("news-2").unwrap();
        assert_eq!(peer.rpc_addr.port(), 7071);
        assert!(registry.client_for(&node_id).is_some());
    }
}
