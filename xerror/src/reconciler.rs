use err_derive::Error;

use crate::chain_connector::ChainConnectorError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(display = "Unable to get connection to Db.")]
    DbConnection,
    #[error(display = "Db operation failed: {}", _0)]
    Db(String),
    #[error(display = "Chain lookup failed: {}", _0)]
    Chain(#[source] ChainConnectorError),
}
