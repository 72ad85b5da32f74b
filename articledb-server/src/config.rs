use articledb_core::{ArticleDbError, Deadlines, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const NODE_ID_FILE: &str = "node-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_name: String,
    pub bind_addr: String,
    #[serde(default)]
    pub advertise_addr: Option<String>,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub node_id: Option<Uuid>,
    #[serde(default = "default_day_file_cache_size")]
    pub day_file_cache_size: usize,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

fn default_day_file_cache_size() -> usize {
    64
}

/// Which services this node answers for. Unconfigured ones reply Empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "enabled")]
    pub article: bool,
    #[serde(default = "enabled")]
    pub dayfile: bool,
    #[serde(default = "enabled")]
    pub groups_nrt: bool,
    #[serde(default = "enabled")]
    pub groups_rtp: bool,
    #[serde(default = "enabled")]
    pub message_id: bool,
}

fn enabled() -> bool {
    true
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            article: true,
            dayfile: true,
            groups_nrt: true,
            groups_rtp: true,
            message_id: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_network_ms")]
    pub network_ms: u64,
    #[serde(default = "default_write_overhead_ms")]
    pub write_overhead_ms: u64,
    #[serde(default = "default_storage_ms")]
    pub storage_ms: u64,
}

fn default_network_ms() -> u64 {
    2000
}

fn default_write_overhead_ms() -> u64 {
    3000
}

fn default_storage_ms() -> u64 {
    5000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            network_ms: default_network_ms(),
            write_overhead_ms: default_write_overhead_ms(),
            storage_ms: default_storage_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn deadlines(&self) -> Deadlines {
        Deadlines {
            network: Duration::from_millis(self.network_ms),
            write_overhead: Duration::from_millis(self.write_overhead_ms),
            storage: Duration::from_millis(self.storage_ms),
        }
    }
}

/// Statically known peer, announced to the registry as if it had joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    /// `host:port` of the peer's RPC listener.
    pub addr: String,
    #[serde(default)]
    pub node_id: Option<Uuid>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("ARTICLEDB"))
            .build()
            .map_err(|e| ArticleDbError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ArticleDbError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn effective_address(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.clone())
    }

    /// The configured node id, else the one persisted in the data directory,
    /// else a fresh one that gets persisted.
    pub fn resolve_node_id(&self) -> Result<Uuid> {
        if let Some(node_id) = self.node_id {
            return Ok(node_id);
        }
        load_or_create_node_id(&self.data_dir)
    }
}

fn load_or_create_node_id(data_dir: &Path) -> Result<Uuid> {
    let path = data_dir.join(NODE_ID_FILE);
    match std::fs::read_to_string(&path) {
        Ok(raw) => Uuid::parse_str(raw.trim()).map_err(|e| {
            ArticleDbError::Config(format!("invalid node id in {:?}: {}", path, e))
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(data_dir)?;
            let node_id = Uuid::new_v4();
            std::fs::write(&path, node_id.to_string())?;
            tracing::info!("Generated node id {} at {:?}", node_id, path);
            Ok(node_id)
        }
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> String {
        let path = dir.join("config.yaml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_config(
            temp_dir.path(),
            "node_name: news-1\nbind_addr: 0.0.0.0:7070\ndata_dir: /var/lib/articledb\n",
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.node_name, "news-1");
        assert_eq!(config.day_file_cache_size, 64);
        assert!(config.services.article && config.services.message_id);
        assert!(config.peers.is_empty());
        assert_eq!(config.effective_address(), "0.0.0.0:7070");

        let deadlines = config.timeouts.deadlines();
        assert_eq!(deadlines, Deadlines::default());
    }

    #[test]
    fn test_peers_and_disabled_services() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_config(
            temp_dir.path(),
            r#"
node_name: news-2
bind_addr: 127.0.0.1:7071
advertise_addr: 10.0.0.2:7071
data_dir: /tmp/news-2
services:
  groups_nrt: false
timeouts:
  network_ms: 500
peers:
  - name: news-1
    addr: 10.0.0.1:7070
    node_id: 6a1c3f0e-9a55-4c1e-8f1f-3d2b1d6c9e10
"#,
        );

        let config = Config::from_file(&path).unwrap();
        assert!(!config.services.groups_nrt);
        assert!(config.services.groups_rtp);
        assert_eq!(config.effective_address(), "10.0.0.2:7071");
        assert_eq!(config.timeouts.deadlines().network, Duration::from_millis(500));
        assert_eq!(config.timeouts.storage_ms, 5000);
        assert_eq!(config.peers.len(), 1);
        assert!(config.peers[0].node_id.is_some());
    }

    #[test]
    fn test_node_id_is_persisted_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("data");

        let first = load_or_create_node_id(&data_dir).unwrap();
        let second = load_or_create_node_id(&data_dir).unwrap();
        assert_eq!(first, second);

        std::fs::write(data_dir.join(NODE_ID_FILE), "not-a-uuid").unwrap();
        assert!(matches!(
            load_or_create_node_id(&data_dir),
            Err(ArticleDbError::Config(_))
        ));
    }
}
