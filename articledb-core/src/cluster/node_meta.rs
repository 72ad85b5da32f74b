use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROTOCOL_TCP: &str = "tcp";

/// Metadata a node advertises through the membership layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub rpc_port: u16,
    pub rpc_protocol: String,
    /// Present when the node runs a day-file store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
}

impl NodeMeta {
    pub fn tcp(rpc_port: u16, node_id: Option<Uuid>) -> Self {
        Self {
            rpc_port,
            rpc_protocol: PROTOCOL_TCP.to_string(),
            node_id,
        }
    }

    /// Encodes for gossip. `None` if the encoding exceeds `limit` bytes.
    pub fn encode(&self, limit: usize) -> Option<Vec<u8>> {
        let encoded = serde_json::to_vec(self).ok()?;
        if encoded.len() > limit {
            tracing::warn!(
                "Node metadata of {} bytes exceeds limit of {}",
                encoded.len(),
                limit
            );
            return None;
        }
        Some(encoded)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArticleDbError;

    #[test]
    fn test_encode_respects_limit() {
        let meta = NodeMeta::tcp(7700, Some(Uuid::new_v4()));
        let encoded = meta.encode(512).unwrap();
        assert_eq!(NodeMeta::decode(&encoded).unwrap(), meta);
        assert!(meta.encode(8).is_none());
    }

    #[test]
    fn test_node_id_is_optional() {
        let meta = NodeMeta::decode(br#"{"rpc_port":7700,"rpc_protocol":"tcp"}"#).unwrap();
        assert_eq!(meta, NodeMeta::tcp(7700, None));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            NodeMeta::decode(b"\x81\xa7RpcPort"),
            Err(ArticleDbError::Corrupt(_))
        ));
    }
}
