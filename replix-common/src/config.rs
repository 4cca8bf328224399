use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigurationError, utils::NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

/// Immutable configuration of one node process.
///
/// Built once by the bootstrap (usually from a JSON file) and passed into each
/// component's constructor. Nothing in the core reads configuration from
/// ambient global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Replica address table, including this node when it is a replica.
    pub peers: BTreeMap<NodeId, PeerAddress>,
    #[serde(default = "default_private_key_dir")]
    pub private_key_dir: PathBuf,
    #[serde(default = "default_manifest_path")]
    pub public_key_manifest: PathBuf,
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial state of the activity gate.
    #[serde(default = "default_start_active")]
    pub start_active: bool,
    #[serde(default)]
    pub network_io_slots: Option<usize>,
    #[serde(default)]
    pub client_balances: BTreeMap<String, u64>,
}

fn default_private_key_dir() -> PathBuf {
    PathBuf::from("keys/private/")
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("keys/manifest.json")
}

fn default_client_timeout_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_start_active() -> bool {
    true
}

impl NodeConfig {
    pub fn new(node_id: NodeId, peers: BTreeMap<NodeId, PeerAddress>) -> Self {
        Self {
            node_id,
            peers,
            private_key_dir: default_private_key_dir(),
            public_key_manifest: default_manifest_path(),
            client_timeout_ms: default_client_timeout_ms(),
            max_retries: default_max_retries(),
            start_active: default_start_active(),
            network_io_slots: None,
            client_balances: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.node_id.is_empty() {
            return Err(ConfigurationError::Invalid("node_id must not be empty".into()));
        }
        if self.peers.is_empty() {
            return Err(ConfigurationError::Invalid("peer table is empty".into()));
        }
        if self.client_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid("client_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn peer_ids_except(&self, node_id: &NodeId) -> Vec<NodeId> {
        self.peers.keys().filter(|id| *id != node_id).cloned().collect()
    }

    pub fn peers_except(&self, node_id: &NodeId) -> BTreeMap<NodeId, PeerAddress> {
        self.peers
            .iter()
            .filter(|(id, _)| *id != node_id)
            .map(|(id, addr)| (id.clone(), addr.clone()))
            .collect()
    }

    /// Number of faulty replicas the cluster tolerates: f = (n - 1) / 3.
    pub fn fault_tolerance(&self) -> usize {
        self.peers.len().saturating_sub(1) / 3
    }

    /// Matching replies a client needs before trusting an outcome (f + 1).
    pub fn reply_quorum(&self) -> usize {
        self.fault_tolerance() + 1
    }

    /// Outbound network slots: explicit value, or twice the fan-out (min 4).
    pub fn network_io_slots(&self) -> usize {
        self.network_io_slots
            .unwrap_or_else(|| (self.peers.len() * 2).max(4))
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.private_key_dir.join(format!("{}.pem", self.node_id))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, json)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        let parsed = serde_json::from_str::<NodeConfig>(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_replicas() -> BTreeMap<NodeId, PeerAddress> {
        (1..=4)
            .map(|i| {
                (
                    NodeId(format!("n{}", i)),
                    PeerAddress { host: "127.0.0.1".into(), port: 50050 + i as u16 },
                )
            })
            .collect()
    }

    #[test]
    fn test_quorum_sizes() {
        let cfg = NodeConfig::new(NodeId::from("n1"), four_replicas());
        assert_eq!(cfg.fault_tolerance(), 1);
        assert_eq!(cfg.reply_quorum(), 2);
        assert_eq!(cfg.network_io_slots(), 8);
        assert_eq!(cfg.peer_ids_except(&NodeId::from("n1")).len(), 3);
        assert!(!cfg.peers_except(&NodeId::from("n2")).contains_key(&NodeId::from("n2")));
    }

    #[test]
    fn test_defaults_applied_when_missing() {
        let json = r#"{
            "node_id": "n1",
            "peers": { "n1": { "host": "127.0.0.1", "port": 50051 } }
        }"#;
        let cfg: NodeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(cfg.client_timeout_ms, 500);
        assert_eq!(cfg.max_retries, 3);
        assert!(cfg.start_active);
        assert_eq!(cfg.private_key_path(), PathBuf::from("keys/private/n1.pem"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        let mut cfg = NodeConfig::new(NodeId::from("n2"), four_replicas());
        cfg.start_active = false;
        cfg.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.node_id, NodeId::from("n2"));
        assert!(!loaded.start_active);
    }

    #[test]
    fn test_validate_rejects_empty_peer_table() {
        let cfg = NodeConfig::new(NodeId::from("n1"), BTreeMap::new());
        assert!(matches!(cfg.validate(), Err(ConfigurationError::Invalid(_))));
    }
}
