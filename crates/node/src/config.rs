//! Node configuration, loaded from TOML.

use basalt_types::Genesis;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid chain parameters: {0}")]
    Params(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Where the RocksDB database lives.
    pub data_dir: PathBuf,
    /// TCP listen address for the peer transport.
    pub listen: SocketAddr,
    /// Peers dialed at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Encrypted validator keystore; omitted for non-validating nodes.
    #[serde(default)]
    pub keystore: Option<PathBuf>,
    /// The chain's genesis description.
    pub genesis: Genesis,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: NodeConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        // Chain parameters are validated exactly once, here.
        config.genesis.params = config
            .genesis
            .params
            .clone()
            .validated()
            .map_err(|e| ConfigError::Params(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
data_dir = "/tmp/basalt"
listen = "127.0.0.1:30300"
bootstrap_peers = ["127.0.0.1:30301"]

[genesis]
timestamp_ms = 1700000000000

[genesis.params]
chain_id = 100
block_gas_limit = 30000000
base_fee_elasticity = 2
base_fee_change_denominator = 8
initial_base_fee = "1000000000"
epoch_length = 100
block_time_ms = 2000
validator_set_size = 4
min_validator_stake = "1000000000000000000000"
max_pipeline_depth = 3
unbonding_blocks = 1000
inactivity_slash_bps = 100
inactivity_threshold_bps = 5000
protocol_version = 1

[[genesis.accounts]]
address = "1111111111111111111111111111111111111111"
balance = "1000000000000000000000000"

[[genesis.validators]]
address = "2222222222222222222222222222222222222222"
ed25519_public_key = "3333333333333333333333333333333333333333333333333333333333333333"
bls_public_key = "444444444444444444444444444444444444444444444444444444444444444444444444444444444444444444444444"
stake = "2000000000000000000000"
"#;

    #[test]
    fn example_config_parses_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, EXAMPLE).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.genesis.params.chain_id, 100);
        assert_eq!(config.bootstrap_peers.len(), 1);
        assert_eq!(config.genesis.validators.len(), 1);
    }

    #[test]
    fn invalid_params_are_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, EXAMPLE.replace("base_fee_elasticity = 2", "base_fee_elasticity = 0"))
            .unwrap();
        assert!(matches!(
            NodeConfig::load(&path),
            Err(ConfigError::Params(_))
        ));
    }
}
