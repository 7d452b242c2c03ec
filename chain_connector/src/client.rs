use bitcoin::{Address, Amount, Network, Txid};
use bitcoincore_rpc::{Auth, Client as BitcoinRpcClient, RpcApi};
use slog as log;
use std::str::FromStr;
use xerror::chain_connector::ChainConnectorError;

use crate::config::ChainConnectorSettings;

/// Operations the custodial layer needs from a bitcoin node wallet.
pub trait ChainClient: Send + Sync {
    fn new_address(&self) -> Result<String, ChainConnectorError>;

    /// Broadcasts a payment and returns its txid.
    fn send_to_address(&self, address: &str, amount_sat: i64) -> Result<String, ChainConnectorError>;

    fn confirmations(&self, txid: &str) -> Result<i64, ChainConnectorError>;

    fn block_count(&self) -> Result<i64, ChainConnectorError>;

    fn validate_address(&self, address: &str) -> Result<(), ChainConnectorError>;
}

/// Parses `address` and checks it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> Result<Address, ChainConnectorError> {
    let parsed = Address::from_str(address).map_err(|_| ChainConnectorError::InvalidAddress(address.to_string()))?;
    if !parsed.is_valid_for_network(network) {
        return Err(ChainConnectorError::WrongNetwork(address.to_string()));
    }
    Ok(parsed)
}

pub struct BitcoindClient {
    rpc_client: BitcoinRpcClient,
    network: Network,
    logger: log::Logger,
}

impl BitcoindClient {
    pub fn new(settings: &ChainConnectorSettings, logger: log::Logger) -> Result<Self, ChainConnectorError> {
        let logger = logger.new(log::o!("component" => "bitcoind_client"));
        let network = settings.network()?;
        let auth = Auth::UserPass(settings.rpc_user.clone(), settings.rpc_password.clone());
        let rpc_client =
            BitcoinRpcClient::new(&settings.bitcoind_url, auth).map_err(|err| ChainConnectorError::Rpc(err.to_string()))?;

        Ok(Self {
            rpc_client,
            network,
            logger,
        })
    }

    fn rpc_error(&self, call: &str, err: bitcoincore_rpc::Error) -> ChainConnectorError {
        log::error!(self.logger, "Bitcoind {} failed: {}", call, err);
        ChainConnectorError::Rpc(err.to_string())
    }
}

impl ChainClient for BitcoindClient {
    fn new_address(&self) -> Result<String, ChainConnectorError> {
        self.rpc_client
            .get_new_address(None, None)
            .map(|address| address.to_string())
            .map_err(|err| self.rpc_error("getnewaddress", err))
    }

    fn send_to_address(&self, address: &str, amount_sat: i64) -> Result<String, ChainConnectorError> {
        let address = parse_address(address, self.network)?;
        let amount = u64::try_from(amount_sat)
            .ok()
            .filter(|amount| *amount > 0)
            .map(Amount::from_sat)
            .ok_or(ChainConnectorError::InvalidAmount)?;

        let txid = self
            .rpc_client
            .send_to_address(&address, amount, None, None, None, None, None, None)
            .map_err(|err| self.rpc_error("sendtoaddress", err))?;
        log::info!(self.logger, "Sent {} sats to {} in {}", amount_sat, address, txid);
        Ok(txid.to_string())
    }

    fn confirmations(&self, txid: &str) -> Result<i64, ChainConnectorError> {
        let txid = Txid::from_str(txid).map_err(|_| ChainConnectorError::InvalidTxid(txid.to_string()))?;
        let tx = self
            .rpc_client
            .get_transaction(&txid, Some(true))
            .map_err(|err| self.rpc_error("gettransaction", err))?;
        // conflicted transactions report negative confirmations
        Ok(i64::from(tx.info.confirmations).max(0))
    }

    fn block_count(&self) -> Result<i64, ChainConnectorError> {
        self.rpc_client
            .get_block_count()
            .map(|count| count as i64)
            .map_err(|err| self.rpc_error("getblockcount", err))
    }

    fn validate_address(&self, address: &str) -> Result<(), ChainConnectorError> {
        parse_address(address, self.network).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_checked_against_the_network() {
        let mainnet = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert!(parse_address(mainnet, Network::Bitcoin).is_ok());
        assert_eq!(
            parse_address(mainnet, Network::Regtest).unwrap_err(),
            ChainConnectorError::WrongNetwork(mainnet.to_string())
        );
        assert!(matches!(
            parse_address("definitely not an address", Network::Bitcoin),
            Err(ChainConnectorError::InvalidAddress(_))
        ));
    }
}
