use crate::actions::DbAction;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use structopt::StructOpt;

use api::mailer::EmailSettings;
use api::{ApiSettings, PaymentSettings};
use chain_connector::ChainConnectorSettings;
use lnd_connector::LndConnectorSettings;
use reconciler::outbound::OutboundSettings;
use reconciler::ReconcilerSettings;
use utils::xlogging::LoggingSettings;

fn default_callback_timeout() -> u64 {
    10
}

fn default_pool_size() -> u32 {
    10
}

/// Everything `serve` needs, read from one config file.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    pub psql_url: String,
    #[serde(default = "default_pool_size")]
    pub psql_pool_size: u32,
    pub api: ApiSettings,
    pub lnd: LndConnectorSettings,
    pub bitcoind: ChainConnectorSettings,
    pub email: EmailSettings,
    #[serde(default)]
    pub payments: PaymentSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Timeout of settlement callbacks.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
    #[serde(default)]
    pub outbound: OutboundSettings,
}

impl Settings {
    pub fn reconciler(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            min_confirmations: self.bitcoind.min_confirmations,
            outbound: self.outbound.clone(),
        }
    }
}

/// The subset of the config the `db` commands read.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DbSettings {
    pub psql_url: String,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "lnhub")]
pub struct Cli {
    /// Config file. Defaults to `${FILE_NAME}.${ENV}.toml`.
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    pub config: Option<PathBuf>,
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Runs the api, the node listeners and the reconciler.
    Serve,
    /// Database maintenance.
    Db {
        #[structopt(subcommand)]
        action: DbAction,
        /// Directory holding the migration sources.
        #[structopt(long = "migrations", parse(from_os_str))]
        migrations: Option<PathBuf>,
    },
}

impl Cli {
    pub fn load<T>(&self) -> Result<T, utils::config::ConfigError>
    where
        T: serde::de::DeserializeOwned,
    {
        match &self.config {
            Some(path) => utils::config::get_config_from_path(&path.to_string_lossy()),
            None => utils::config::get_config_from_env(),
        }
    }
}
