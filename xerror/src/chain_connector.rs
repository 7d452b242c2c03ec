use err_derive::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainConnectorError {
    #[error(display = "Bitcoind rpc call failed: {}", _0)]
    Rpc(String),
    #[error(display = "Invalid bitcoin address: {}", _0)]
    InvalidAddress(String),
    #[error(display = "Address {} belongs to another network", _0)]
    WrongNetwork(String),
    #[error(display = "Invalid txid: {}", _0)]
    InvalidTxid(String),
    #[error(display = "Invalid amount.")]
    InvalidAmount,
    #[error(display = "Zmq failure: {}", _0)]
    Zmq(String),
}
