use bitcoin::{Address, Block, Network, Transaction};
use crossbeam_channel::Sender;
use msgs::chain::{BlockEvent, Chain, TxEvent, TxOutput};
use msgs::Message;
use slog as log;
use std::thread::JoinHandle;
use utils::shutdown::Shutdown;
use utils::xzmq::{SocketContext, ZmqError, ZmqSocket};
use xerror::chain_connector::ChainConnectorError;

use crate::config::ChainConnectorSettings;

const RAW_BLOCK_TOPIC: &[u8] = b"rawblock";
const RAW_TX_TOPIC: &[u8] = b"rawtx";

pub fn parse_block(body: &[u8]) -> Result<BlockEvent, ChainConnectorError> {
    let block = bitcoin::consensus::deserialize::<Block>(body).map_err(|err| ChainConnectorError::Zmq(err.to_string()))?;
    Ok(BlockEvent {
        hash: block.block_hash().to_string(),
        height: block.bip34_block_height().ok().map(|height| height as i64),
        txids: block.txdata.iter().map(|tx| tx.txid().to_string()).collect(),
    })
}

pub fn parse_transaction(body: &[u8], network: Network) -> Result<TxEvent, ChainConnectorError> {
    let tx = bitcoin::consensus::encode::deserialize::<Transaction>(body)
        .map_err(|err| ChainConnectorError::Zmq(err.to_string()))?;
    let outputs = tx
        .output
        .iter()
        .enumerate()
        .map(|(vout, output)| TxOutput {
            vout: vout as u32,
            address: Address::from_script(&output.script_pubkey, network)
                .ok()
                .map(|address| address.to_string()),
            value_sat: output.value,
        })
        .collect();

    Ok(TxEvent {
        txid: tx.txid().to_string(),
        outputs,
    })
}

/// Subscribes to the node's `rawblock` and `rawtx` notifications and turns them into chain
/// events, one thread and one channel per stream.
pub struct ZmqListener {
    context: SocketContext,
    settings: ChainConnectorSettings,
    network: Network,
    logger: log::Logger,
}

impl ZmqListener {
    pub fn new(settings: ChainConnectorSettings, logger: log::Logger) -> Result<Self, ChainConnectorError> {
        let network = settings.network()?;
        Ok(Self {
            context: SocketContext::new(),
            settings,
            network,
            logger: logger.new(log::o!("component" => "zmq_listener")),
        })
    }

    fn subscribe(&self, address: &str, topic: &[u8]) -> Result<ZmqSocket, ChainConnectorError> {
        self.context
            .create_subscriber(address, topic, self.settings.zmq_receive_timeout_ms)
            .map_err(|err| ChainConnectorError::Zmq(err.to_string()))
    }

    pub fn spawn_block_listener(&self, sender: Sender<Message>, shutdown: Shutdown) -> Result<JoinHandle<()>, ChainConnectorError> {
        let socket = self.subscribe(&self.settings.raw_block_socket, RAW_BLOCK_TOPIC)?;
        let logger = self.logger.new(log::o!("stream" => "rawblock"));

        std::thread::Builder::new()
            .name("zmq-rawblock".to_string())
            .spawn(move || {
                listen(socket, shutdown, &logger, |body| match parse_block(body) {
                    Ok(block) => {
                        log::info!(logger, "New block {} at height {:?}", block.hash, block.height);
                        sender.send(Message::Chain(Chain::NewBlock(block))).is_ok()
                    }
                    Err(err) => {
                        log::warn!(logger, "Skipping undecodable block: {}", err);
                        true
                    }
                })
            })
            .map_err(|err| ChainConnectorError::Zmq(err.to_string()))
    }

    pub fn spawn_tx_listener(&self, sender: Sender<Message>, shutdown: Shutdown) -> Result<JoinHandle<()>, ChainConnectorError> {
        let socket = self.subscribe(&self.settings.raw_tx_socket, RAW_TX_TOPIC)?;
        let logger = self.logger.new(log::o!("stream" => "rawtx"));
        let network = self.network;

        std::thread::Builder::new()
            .name("zmq-rawtx".to_string())
            .spawn(move || {
                listen(socket, shutdown, &logger, |body| match parse_transaction(body, network) {
                    Ok(tx) => {
                        log::debug!(logger, "New transaction {}", tx.txid);
                        sender.send(Message::Chain(Chain::NewTransaction(tx))).is_ok()
                    }
                    Err(err) => {
                        log::warn!(logger, "Skipping undecodable transaction: {}", err);
                        true
                    }
                })
            })
            .map_err(|err| ChainConnectorError::Zmq(err.to_string()))
    }
}

/// Reads `[topic, body, sequence]` frames until shutdown, a closed socket, or `on_body`
/// returning false.
fn listen<F>(socket: ZmqSocket, shutdown: Shutdown, logger: &log::Logger, mut on_body: F)
where
    F: FnMut(&[u8]) -> bool,
{
    while !shutdown.is_triggered() {
        match socket.recv_multipart(0) {
            Ok(frames) => match frames.get(1) {
                Some(body) => {
                    if !on_body(body) {
                        log::warn!(logger, "Event receiver is gone");
                        break;
                    }
                }
                None => log::warn!(logger, "Received a message with {} frames", frames.len()),
            },
            Err(ZmqError::EAGAIN) | Err(ZmqError::EINTR) => continue,
            Err(ZmqError::ETERM) | Err(ZmqError::ENOTSOCK) => {
                log::warn!(logger, "Zmq socket closed");
                break;
            }
            Err(err) => log::warn!(logger, "Failed to read from zmq: {}", err),
        }
    }
    log::info!(logger, "Listener stopped");
}
