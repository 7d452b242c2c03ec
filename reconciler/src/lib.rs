pub mod notifier;
pub mod outbound;

use chain_connector::ChainClient;
use core_types::DbPool;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use diesel::PgConnection;
use models::error::ModelError;
use models::payments::{Payment, Transition};
use models::transactions::{DepositMatch, Transaction};
use msgs::chain::{BlockEvent, Chain, TxEvent};
use msgs::lightning::{InvoiceState, InvoiceUpdate};
use msgs::Message;
use notifier::SettlementNotifier;
use serde::{Deserialize, Serialize};
use slog as log;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use utils::shutdown::Shutdown;
use xerror::reconciler::ReconcileError;

type PooledConnection = r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReconcilerSettings {
    pub min_confirmations: i64,
    #[serde(default)]
    pub outbound: outbound::OutboundSettings,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            min_confirmations: 3,
            outbound: outbound::OutboundSettings::default(),
        }
    }
}

pub(crate) fn db_error(err: ModelError) -> ReconcileError {
    ReconcileError::Db(err.to_string())
}

/// Applies node events to the database. Every balance change shares a database transaction
/// with the status change that causes it, so replaying an event is harmless.
pub struct Reconciler {
    pool: DbPool,
    chain: Arc<dyn ChainClient>,
    notifier: Arc<dyn SettlementNotifier>,
    min_confirmations: i64,
    logger: log::Logger,
}

impl Reconciler {
    pub fn new(
        pool: DbPool,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<dyn SettlementNotifier>,
        settings: &ReconcilerSettings,
        logger: log::Logger,
    ) -> Self {
        Self {
            pool,
            chain,
            notifier,
            min_confirmations: settings.min_confirmations.max(1),
            logger: logger.new(log::o!("component" => "reconciler")),
        }
    }

    fn connection(&self) -> Result<PooledConnection, ReconcileError> {
        self.pool.get().map_err(|err| {
            log::error!(self.logger, "Failed to get a db connection: {}", err);
            ReconcileError::DbConnection
        })
    }

    pub fn handle(&self, msg: Message) -> Result<(), ReconcileError> {
        match msg {
            Message::Invoice(update) => self.handle_invoice(update),
            Message::Chain(Chain::NewTransaction(tx)) => self.handle_transaction(tx),
            Message::Chain(Chain::NewBlock(block)) => self.handle_block(block),
        }
    }

    pub fn handle_invoice(&self, update: InvoiceUpdate) -> Result<(), ReconcileError> {
        let transition = match update.state {
            InvoiceState::Settled => {
                let conn = self.connection()?;
                let settle_index = i64::try_from(update.settle_index).ok().filter(|index| *index > 0);
                Payment::settle_inbound(
                    &conn,
                    &update.payment_hash,
                    update.preimage.as_deref(),
                    update.amount_paid_msat,
                    settle_index,
                )
            }
            InvoiceState::Canceled => {
                let conn = self.connection()?;
                Payment::fail_open_by_hash(&conn, &update.payment_hash)
            }
            InvoiceState::Open | InvoiceState::Accepted => {
                log::debug!(self.logger, "Invoice {} is {:?}", update.payment_hash, update.state);
                return Ok(());
            }
        };

        match transition {
            Ok(Transition::Applied(payment)) => {
                log::info!(
                    self.logger,
                    "Payment {} of user {} is now {}",
                    payment.id,
                    payment.uid,
                    payment.status
                );
                if let Some(ref url) = payment.callback_url {
                    self.notifier.notify(url, &payment);
                }
                Ok(())
            }
            Ok(Transition::AlreadyFinal(payment)) => {
                log::debug!(self.logger, "Payment {} was already {}", payment.id, payment.status);
                Ok(())
            }
            Err(ModelError::NotFound) => {
                log::debug!(self.logger, "Unknown invoice {}", update.payment_hash);
                Ok(())
            }
            Err(err) => Err(db_error(err)),
        }
    }

    pub fn handle_transaction(&self, tx: TxEvent) -> Result<(), ReconcileError> {
        let outputs: Vec<_> = tx
            .outputs
            .iter()
            .filter_map(|output| output.address.as_ref().map(|address| (output, address)))
            .collect();
        if outputs.is_empty() {
            return Ok(());
        }

        let conn = self.connection()?;
        for (output, address) in outputs {
            let (vout, amount_sat) = match (i32::try_from(output.vout), i64::try_from(output.value_sat)) {
                (Ok(vout), Ok(amount)) => (vout, amount),
                _ => {
                    log::warn!(self.logger, "Output {}:{} is out of range", tx.txid, output.vout);
                    continue;
                }
            };

            match Transaction::record_deposit_output(&conn, address, &tx.txid, vout, amount_sat).map_err(db_error)? {
                DepositMatch::Attached(row) | DepositMatch::Recorded(row) => {
                    log::info!(
                        self.logger,
                        "Deposit of {} sats to {} for user {} seen in {}:{}",
                        amount_sat,
                        address,
                        row.uid,
                        tx.txid,
                        vout
                    );
                }
                DepositMatch::Duplicate => {
                    log::debug!(self.logger, "Output {}:{} already recorded", tx.txid, vout);
                }
                DepositMatch::UnknownAddress => {
                    log::debug!(self.logger, "Ignoring output to unknown address {}", address);
                }
            }
        }
        Ok(())
    }

    pub fn handle_block(&self, block: BlockEvent) -> Result<(), ReconcileError> {
        let height = match block.height {
            Some(height) => height,
            None => self.chain.block_count()?,
        };
        let conn = self.connection()?;
        let pending = Transaction::unconfirmed(&conn).map_err(db_error)?;

        for row in pending {
            let txid = match row.txid {
                Some(ref txid) => txid,
                None => continue,
            };
            let confirmations = match self.chain.confirmations(txid) {
                Ok(confirmations) => confirmations,
                Err(err) => {
                    log::warn!(self.logger, "Could not get confirmations of {}: {}", txid, err);
                    continue;
                }
            };
            if confirmations < self.min_confirmations {
                continue;
            }

            match Transaction::confirm(&conn, row.id, height) {
                Ok(Some(confirmed)) => {
                    log::info!(
                        self.logger,
                        "Transaction {} of user {} confirmed at block {} with {} confirmations",
                        txid,
                        confirmed.uid,
                        height,
                        confirmations
                    );
                }
                Ok(None) => log::debug!(self.logger, "Transaction {} was already confirmed", txid),
                Err(err) => log::error!(self.logger, "Failed to confirm transaction {}: {}", txid, err),
            }
        }
        Ok(())
    }

    /// Consumes one event stream on a dedicated thread until `shutdown` fires or every sender
    /// is gone. Failed events are logged; the next duplicate notification or block retries them.
    pub fn spawn_consumer(
        self: &Arc<Self>,
        stream: &'static str,
        receiver: Receiver<Message>,
        shutdown: Shutdown,
    ) -> std::io::Result<JoinHandle<()>> {
        let reconciler = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("reconcile-{}", stream))
            .spawn(move || reconciler.consume(stream, receiver, shutdown))
    }

    fn consume(&self, stream: &str, receiver: Receiver<Message>, shutdown: Shutdown) {
        let logger = self.logger.new(log::o!("stream" => stream.to_string()));
        log::info!(logger, "Consumer started");
        while !shutdown.is_triggered() {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => {
                    if let Err(err) = self.handle(msg) {
                        log::error!(logger, "Failed to reconcile event: {}", err);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!(logger, "Event stream closed");
                    break;
                }
            }
        }
        log::info!(logger, "Consumer stopped");
    }
}
