use serde::{Deserialize, Serialize};

/// A block announced by the node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub hash: String,
    // None when the coinbase does not carry a BIP34 height
    pub height: Option<i64>,
    pub txids: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub vout: u32,
    // None for scripts that do not map to an address
    pub address: Option<String>,
    pub value_sat: u64,
}

/// A transaction that entered the node's mempool or a block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxEvent {
    pub txid: String,
    pub outputs: Vec<TxOutput>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Chain {
    NewBlock(BlockEvent),
    NewTransaction(TxEvent),
}
