use super::membership::{Member, MembershipEvent};
use super::node_meta::{NodeMeta, PROTOCOL_TCP};
use crate::service::BlobService;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Builds a client for a peer's RPC endpoint.
pub trait Dialer: Send + Sync {
    fn dial(&self, addr: SocketAddr) -> Arc<dyn BlobService>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub name: String,
    pub rpc_addr: SocketAddr,
    pub meta: NodeMeta,
}

struct PeerNode {
    info: PeerInfo,
    client: Arc<dyn BlobService>,
}

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<String, PeerNode>,
    // Node id to the name of the peer currently serving it.
    by_node_id: HashMap<Uuid, String>,
}

impl RegistryState {
    fn remove(&mut self, name: &str) -> bool {
        let Some(node) = self.nodes.remove(name) else {
            return false;
        };
        let Some(node_id) = node.info.meta.node_id else {
            return true;
        };
        if self.by_node_id.get(&node_id).map(String::as_str) != Some(name) {
            return true;
        }

        self.by_node_id.remove(&node_id);
        // Hand the id over to another peer still advertising it.
        let successor = self
            .nodes
            .values()
            .filter(|peer| peer.info.meta.node_id == Some(node_id))
            .map(|peer| peer.info.name.clone())
            .min();
        if let Some(successor) = successor {
            tracing::info!("Node id {} now served by {}", node_id, successor);
            self.by_node_id.insert(node_id, successor);
        }
        true
    }

    fn client_for(&self, node_id: &Uuid) -> Option<Arc<dyn BlobService>> {
        let name = self.by_node_id.get(node_id)?;
        self.nodes.get(name).map(|node| Arc::clone(&node.client))
    }
}

/// Peer nodes and the node-id to client mapping, rebuilt from membership
/// events. The local node never appears in either map.
pub struct NodeRegistry {
    local_name: String,
    local_node_id: Option<Uuid>,
    dialers: HashMap<String, Arc<dyn Dialer>>,
    state: RwLock<RegistryState>,
}

impl NodeRegistry {
    pub fn new(local_name: impl Into<String>, local_node_id: Option<Uuid>) -> Self {
        Self {
            local_name: local_name.into(),
            local_node_id,
            dialers: HashMap::new(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Registers how to reach peers advertising `protocol`.
    pub fn with_dialer(mut self, protocol: impl Into<String>, dialer: Arc<dyn Dialer>) -> Self {
        self.dialers.insert(protocol.into(), dialer);
        self
    }

    pub fn with_tcp_dialer(self, dialer: Arc<dyn Dialer>) -> Self {
        self.with_dialer(PROTOCOL_TCP, dialer)
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn apply(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Joined(member) | MembershipEvent::Updated(member) => {
                self.insert(member)
            }
            MembershipEvent::Left { name } => {
                let removed = self
                    .state
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&name);
                if removed {
                    tracing::info!("Node {} left", name);
                }
            }
        }
    }

    /// Registers `member`, replacing whatever was known under its name.
    fn insert(&self, member: Member) {
        if member.name == self.local_name {
            return;
        }

        let meta = match NodeMeta::decode(&member.meta) {
            Ok(meta) => meta,
            Err(error) => {
                tracing::warn!("Ignoring node {} with unreadable metadata: {}", member.name, error);
                return;
            }
        };

        let Some(dialer) = self.dialers.get(&meta.rpc_protocol) else {
            tracing::warn!(
                "Ignoring node {} with unsupported rpc protocol {:?}",
                member.name,
                meta.rpc_protocol
            );
            return;
        };

        let rpc_addr = SocketAddr::new(member.addr, meta.rpc_port);
        let client = dialer.dial(rpc_addr);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.remove(&member.name);
        if let Some(node_id) = meta.node_id {
            if Some(node_id) == self.local_node_id {
                tracing::warn!(
                    "Node {} advertises the local node id {}; not mapping it",
                    member.name,
                    node_id
                );
            } else {
                state.by_node_id.insert(node_id, member.name.clone());
            }
        }

        tracing::info!(
            "Registered node {} at {} (node id: {:?})",
            member.name,
            rpc_addr,
            meta.node_id
        );
        state.nodes.insert(
            member.name.clone(),
            PeerNode {
                info: PeerInfo {
                    name: member.name,
                    rpc_addr,
                    meta,
                },
                client,
            },
        );
    }

    /// Client for the node owning `node_id`, if known.
    pub fn client_for(&self, node_id: &Uuid) -> Option<Arc<dyn BlobService>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .client_for(node_id)
    }

    pub fn peer(&self, name: &str) -> Option<PeerInfo> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
            .get(name)
            .map(|node| node.info.clone())
    }

    pub fn peer_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = state.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn client_for_peer(&self, name: &str) -> Option<Arc<dyn BlobService>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
            .get(name)
            .map(|node| Arc::clone(&node.client))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blob::{Blob, CompressionHint, DayId};
    use crate::error::{ArticleDbError, Result};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    /// Client stub that records the address it was dialed for.
    pub(crate) struct StubClient {
        pub addr: SocketAddr,
    }

    #[async_trait]
    impl BlobService for StubClient {
        async fn node_id(&self) -> Result<Uuid> {
            Err(ArticleDbError::Unreachable(self.addr.to_string()))
        }

        async fn free_storage(&self) -> Result<i64> {
            Ok(-1)
        }

        async fn add_blob(&self, _day: DayId, _hint: CompressionHint, blob: Blob) -> Result<Blob> {
            Ok(blob)
        }

        async fn read_blob(&self, blob: Blob) -> Result<Blob> {
            Ok(blob)
        }
    }

    #[derive(Default)]
    pub(crate) struct StubDialer {
        pub dialed: Mutex<Vec<SocketAddr>>,
    }

    impl Dialer for StubDialer {
        fn dial(&self, addr: SocketAddr) -> Arc<dyn BlobService> {
            self.dialed.lock().unwrap().push(addr);
            Arc::new(StubClient { addr })
        }
    }

    fn member(name: &str, octet: u8, meta: &NodeMeta) -> Member {
        Member {
            name: name.to_string(),
            addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet)),
            meta: meta.encode(1024).unwrap(),
        }
    }

    fn registry(local_id: Uuid) -> (NodeRegistry, Arc<StubDialer>) {
        let dialer = Arc::new(StubDialer::default());
        let registry = NodeRegistry::new("local", Some(local_id)).with_tcp_dialer(dialer.clone());
        (registry, dialer)
    }

    #[test]
    fn test_join_update_leave() {
        let (registry, dialer) = registry(Uuid::new_v4());
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();

        registry.apply(MembershipEvent::Joined(member(
            "peer",
            2,
            &NodeMeta::tcp(7700, Some(first_id)),
        )));
        assert!(registry.client_for(&first_id).is_some());
        assert_eq!(
            registry.peer("peer").unwrap().rpc_addr,
            "10.0.0.2:7700".parse::<SocketAddr>().unwrap()
        );

        registry.apply(MembershipEvent::Updated(member(
            "peer",
            3,
            &NodeMeta::tcp(7701, Some(second_id)),
        )));
        assert!(registry.client_for(&first_id).is_none());
        assert!(registry.client_for(&second_id).is_some());
        assert_eq!(dialer.dialed.lock().unwrap().len(), 2);

        registry.apply(MembershipEvent::Left {
            name: "peer".to_string(),
        });
        assert!(registry.client_for(&second_id).is_none());
        assert!(registry.peer_names().is_empty());
    }

    #[test]
    fn test_local_node_is_excluded() {
        let local_id = Uuid::new_v4();
        let (registry, _) = registry(local_id);

        registry.apply(MembershipEvent::Joined(member(
            "local",
            1,
            &NodeMeta::tcp(7700, Some(Uuid::new_v4())),
        )));
        assert!(registry.peer_names().is_empty());

        registry.apply(MembershipEvent::Joined(member(
            "impostor",
            9,
            &NodeMeta::tcp(7700, Some(local_id)),
        )));
        assert!(registry.client_for(&local_id).is_none());
        assert_eq!(registry.peer_names(), vec!["impostor".to_string()]);
    }

    #[test]
    fn test_bad_metadata_and_protocol_are_ignored() {
        let (registry, dialer) = registry(Uuid::new_v4());

        registry.apply(MembershipEvent::Joined(Member {
            name: "garbled".to_string(),
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            meta: b"not json".to_vec(),
        }));

        let mut udp = NodeMeta::tcp(7700, Some(Uuid::new_v4()));
        udp.rpc_protocol = "udp".to_string();
        registry.apply(MembershipEvent::Joined(member("udp-node", 4, &udp)));

        assert!(registry.peer_names().is_empty());
        assert!(dialer.dialed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_peer_without_node_id_is_not_mapped() {
        let (registry, _) = registry(Uuid::new_v4());
        registry.apply(MembershipEvent::Joined(member("meta-only", 5, &NodeMeta::tcp(7700, None))));
        assert_eq!(registry.peer_names(), vec!["meta-only".to_string()]);
        assert!(registry.client_for_peer("meta-only").is_some());
    }

    #[test]
    fn test_leave_keeps_mapping_of_other_peer_with_same_id() {
        let (registry, _) = registry(Uuid::new_v4());
        let node_id = Uuid::new_v4();
        let meta = NodeMeta::tcp(7700, Some(node_id));

        registry.apply(MembershipEvent::Joined(member("news-2", 2, &meta)));
        registry.apply(MembershipEvent::Joined(member("news-2b", 3, &meta)));
        registry.apply(MembershipEvent::Left {
            name: "news-2".to_string(),
        });
        let mapped = registry.client_for(&node_id).unwrap();
        assert!(Arc::ptr_eq(&mapped, &registry.client_for_peer("news-2b").unwrap()));

        // Leaving in the other order hands the id back to the survivor.
        registry.apply(MembershipEvent::Joined(member("news-2", 2, &meta)));
        registry.apply(MembershipEvent::Left {
            name: "news-2".to_string(),
        });
        let mapped = registry.client_for(&node_id).unwrap();
        assert!(Arc::ptr_eq(&mapped, &registry.client_for_peer("news-2b").unwrap()));

        registry.apply(MembershipEvent::Joined(member("news-2", 2, &meta)));
        registry.apply(MembershipEvent::Left {
            name: "news-2b".to_string(),
        });
        let mapped = registry.client_for(&node_id).unwrap();
        assert!(Arc::ptr_eq(&mapped, &registry.client_for_peer("news-2").unwrap()));

        registry.apply(MembershipEvent::Left {
            name: "news-2".to_string(),
        });
        assert!(registry.client_for(&node_id).is_none());
    }

    #[test]
    fn test_rejoin_replaces_previous_node_id() {
        let (registry, _) = registry(Uuid::new_v4());
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();

        registry.apply(MembershipEvent::Joined(member(
            "news-3",
            4,
            &NodeMeta::tcp(7700, Some(old_id)),
        )));
        registry.apply(MembershipEvent::Joined(member(
            "news-3",
            5,
            &NodeMeta::tcp(7702, Some(new_id)),
        )));

        assert!(registry.client_for(&old_id).is_none());
        assert!(registry.client_for(&new_id).is_some());
        assert_eq!(registry.peer_names(), vec!["news-3".to_string()]);
        assert_eq!(
            registry.peer("news-3").unwrap().rpc_addr,
            "10.0.0.5:7702".parse::<SocketAddr>().unwrap()
        );
    }
}
