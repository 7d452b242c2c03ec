use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
}

/// State change of an invoice reported by the lightning node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InvoiceUpdate {
    pub payment_hash: String,
    pub payment_request: String,
    pub preimage: Option<String>,
    pub state: InvoiceState,
    pub amount_paid_msat: i64,
    pub settle_date: i64,
    /// Position of the settlement in the node's settle order, zero while unsettled.
    pub settle_index: u64,
}
