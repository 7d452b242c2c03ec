use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_types::DbPool;
use diesel::PgConnection;
use lnd_connector::{LightningClient, OutboundState};
use models::payments::{Payment, Transition};
use serde::{Deserialize, Serialize};
use slog as log;
use std::sync::Arc;
use std::time::Duration;
use utils::shutdown::Shutdown;
use xerror::reconciler::ReconcileError;

use crate::db_error;

fn default_grace_secs() -> i64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    60
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OutboundSettings {
    /// How long a payment the node has never heard of stays reserved before it is refunded.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: i64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Complete { preimage: String, fee_msat: i64 },
    Refund,
    Wait,
}

/// Decides what to do with an open outbound payment given what the node reports.
pub fn resolution(state: OutboundState, created_at: DateTime<Utc>, now: DateTime<Utc>, grace: ChronoDuration) -> Resolution {
    match state {
        OutboundState::Succeeded { preimage, fee_msat } => Resolution::Complete { preimage, fee_msat },
        OutboundState::Failed => Resolution::Refund,
        OutboundState::Unknown if now >= created_at + grace => Resolution::Refund,
        OutboundState::Unknown | OutboundState::InFlight => Resolution::Wait,
    }
}

/// Settles or refunds outbound payments whose send call never returned a final answer.
pub struct OutboundResolver {
    pool: DbPool,
    lightning: Arc<dyn LightningClient>,
    grace: ChronoDuration,
    interval: Duration,
    logger: log::Logger,
}

impl OutboundResolver {
    pub fn new(pool: DbPool, lightning: Arc<dyn LightningClient>, settings: &OutboundSettings, logger: log::Logger) -> Self {
        Self {
            pool,
            lightning,
            grace: ChronoDuration::seconds(settings.grace_secs.max(0)),
            interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            logger: logger.new(log::o!("component" => "outbound_resolver")),
        }
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, ReconcileError>
    where
        T: Send + 'static,
        F: FnOnce(&PgConnection) -> Result<T, ReconcileError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|_| ReconcileError::DbConnection)?;
            f(&*conn)
        })
        .await
        .map_err(|err| ReconcileError::Db(err.to_string()))?
    }

    /// One pass over every open outbound payment. Returns how many reached a final state.
    pub async fn resolve_pending(&self) -> Result<usize, ReconcileError> {
        let pending = self
            .with_connection(|conn| Payment::open_outbound(conn).map_err(db_error))
            .await?;

        let mut resolved = 0;
        for payment in pending {
            let state = match self.lightning.track_payment(&payment.payment_hash).await {
                Ok(state) => state,
                Err(err) => {
                    log::warn!(self.logger, "Could not look up payment {}: {}", payment.id, err);
                    continue;
                }
            };

            let id = payment.id;
            let transition = match resolution(state, payment.created_at, Utc::now(), self.grace) {
                Resolution::Wait => {
                    log::debug!(self.logger, "Payment {} is still pending", id);
                    continue;
                }
                Resolution::Complete { preimage, fee_msat } => {
                    self.with_connection(move |conn| {
                        Payment::complete_outbound(conn, id, &preimage, fee_msat).map_err(db_error)
                    })
                    .await?
                }
                Resolution::Refund => {
                    self.with_connection(move |conn| Payment::fail_outbound_and_refund(conn, id).map_err(db_error))
                        .await?
                }
            };

            if let Transition::Applied(ref payment) = transition {
                log::info!(
                    self.logger,
                    "Resolved payment {} of user {} as {}",
                    payment.id,
                    payment.uid,
                    payment.status
                );
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Resolves pending payments right away and then on every tick until `shutdown` fires.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.resolve_pending().await {
                        log::error!(self.logger, "Failed to resolve outbound payments: {}", err);
                    }
                }
            }
        }
        log::info!(self.logger, "Outbound resolver stopped");
    }
}
