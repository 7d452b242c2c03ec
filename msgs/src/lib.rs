use serde::{Deserialize, Serialize};

pub mod chain;
pub mod lightning;

use chain::*;
use lightning::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Message {
    Invoice(InvoiceUpdate),
    Chain(Chain),
}

impl From<InvoiceUpdate> for Message {
    fn from(update: InvoiceUpdate) -> Self {
        Message::Invoice(update)
    }
}

impl From<Chain> for Message {
    fn from(event: Chain) -> Self {
        Message::Chain(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged_by_stream() {
        let block = Message::from(Chain::NewBlock(BlockEvent {
            hash: "00ff".to_string(),
            height: Some(120),
            txids: vec![],
        }));
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["Chain"]["NewBlock"]["height"], 120);
    }
}
