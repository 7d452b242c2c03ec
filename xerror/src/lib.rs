pub mod api;
pub mod chain_connector;
pub mod lnd_connector;
pub mod reconciler;
