use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use nether_p2p::config::with_default_port;
use nether_p2p::TransportConfig;
use serde::{Deserialize, Serialize};

pub const LEDGER_FILE: &str = "nether.chain";
pub const KEY_FILE: &str = "nether.key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub default_leader_count: usize,
    pub default_difficulty: u32,
    /// Upper bound on one mining round. `None` mines until the round ends.
    pub round_timeout_secs: Option<u64>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            default_leader_count: 1,
            default_difficulty: 16,
            round_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen_addr: String,
    pub data_dir: String,
    /// Mining threads. 0 uses every available core.
    pub pow_workers: usize,
    pub connect_timeout_secs: u64,
    pub election: ElectionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6660".to_string(),
            data_dir: "data".to_string(),
            pow_workers: 0,
            connect_timeout_secs: 10,
            election: ElectionConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn ledger_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(LEDGER_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(KEY_FILE)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.election.round_timeout_secs.map(Duration::from_secs)
    }

    /// Socket settings for the transport. A bare IP in `listen_addr` gets the default port.
    pub fn transport_config(&self) -> io::Result<TransportConfig> {
        let listen_addr = with_default_port(&self.listen_addr)
            .parse::<SocketAddr>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("listen_addr {}: {}", self.listen_addr, e)))?;
        Ok(TransportConfig {
            listen_addr,
            connect_timeout: self.connect_timeout(),
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, json)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.transport_config().unwrap().listen_addr.port(), 6660);
        assert_eq!(config.ledger_path(), Path::new("data").join("nether.chain"));
        assert_eq!(config.key_path(), Path::new("data").join("nether.key"));
        assert_eq!(config.election.default_leader_count, 1);
        assert_eq!(config.election.default_difficulty, 16);
        assert!(config.round_timeout().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = NodeConfig::default();
        config.listen_addr = "127.0.0.1:7100".into();
        config.election.round_timeout_secs = Some(30);
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.round_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "listen_addr": "0.0.0.0:7001", "election": { "default_difficulty": 8 } }"#).unwrap();

        let loaded = NodeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.transport_config().unwrap().listen_addr.port(), 7001);
        assert_eq!(loaded.data_dir, "data");
        assert_eq!(loaded.election.default_difficulty, 8);
        assert_eq!(loaded.election.default_leader_count, 1);
    }

    #[test]
    fn test_transport_config() {
        let mut config = NodeConfig::default();
        config.listen_addr = "127.0.0.1".into();
        config.connect_timeout_secs = 3;
        let transport = config.transport_config().unwrap();
        assert_eq!(transport.listen_addr.to_string(), "127.0.0.1:6660");
        assert_eq!(transport.connect_timeout, Duration::from_secs(3));

        config.listen_addr = "localhost:7000".into();
        assert!(config.transport_config().is_err());
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = NodeConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
