pub mod client;
pub mod config;
pub mod zmq_handlers;

pub use client::{BitcoindClient, ChainClient};
pub use config::ChainConnectorSettings;
pub use zmq_handlers::ZmqListener;
