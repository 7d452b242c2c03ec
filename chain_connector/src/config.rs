use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use xerror::chain_connector::ChainConnectorError;

fn default_receive_timeout_ms() -> i32 {
    1000
}

fn default_min_confirmations() -> i64 {
    3
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainConnectorSettings {
    pub bitcoind_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub raw_tx_socket: String,
    pub raw_block_socket: String,
    /// One of `bitcoin`, `testnet`, `signet` or `regtest`.
    pub network: String,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: i64,
    #[serde(default = "default_receive_timeout_ms")]
    pub zmq_receive_timeout_ms: i32,
}

impl ChainConnectorSettings {
    pub fn network(&self) -> Result<Network, ChainConnectorError> {
        Network::from_str(&self.network).map_err(|_| ChainConnectorError::WrongNetwork(self.network.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(network: &str) -> ChainConnectorSettings {
        ChainConnectorSettings {
            bitcoind_url: "http://127.0.0.1:18443".to_string(),
            rpc_user: "user".to_string(),
            rpc_password: "pass".to_string(),
            raw_tx_socket: "tcp://127.0.0.1:28333".to_string(),
            raw_block_socket: "tcp://127.0.0.1:28332".to_string(),
            network: network.to_string(),
            min_confirmations: 1,
            zmq_receive_timeout_ms: 100,
        }
    }

    #[test]
    fn network_names_are_parsed() {
        assert_eq!(settings("regtest").network().unwrap(), Network::Regtest);
        assert!(settings("moonnet").network().is_err());
    }
}
