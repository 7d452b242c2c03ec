pub mod actions;
pub mod cli;

use crossbeam_channel::{unbounded, Sender};
use diesel::{r2d2::ConnectionManager, PgConnection};
use slog as log;
use std::error::Error;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use api::ApiContext;
use chain_connector::{BitcoindClient, ChainClient, ZmqListener};
use core_types::DbPool;
use lnd_connector::{LightningClient, LndConnector};
use models::payments::Payment;
use reconciler::notifier::HttpNotifier;
use reconciler::outbound::OutboundResolver;
use reconciler::Reconciler;
use utils::shutdown::Shutdown;

use crate::cli::Settings;

pub type ServeResult = Result<(), Box<dyn Error>>;

/// Runs every component until the http server stops, then shuts the background loops down.
///
/// Blocking components are built and joined outside of the async runtime.
pub fn serve(settings: Settings, logger: log::Logger) -> ServeResult {
    let pool = r2d2::Pool::builder()
        .max_size(settings.psql_pool_size)
        .build(ConnectionManager::<PgConnection>::new(settings.psql_url.clone()))?;
    let settle_index = {
        let conn = pool.get()?;
        models::init(&conn)?;
        Payment::last_settle_index(&conn)?.max(settings.lnd.settle_index)
    };
    log::info!(logger, "Database migrations are applied");

    let chain: Arc<dyn ChainClient> = Arc::new(BitcoindClient::new(&settings.bitcoind, logger.clone())?);
    let notifier = Arc::new(HttpNotifier::new(
        Duration::from_secs(settings.callback_timeout_secs),
        logger.clone(),
    )?);
    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        chain.clone(),
        notifier,
        &settings.reconciler(),
        logger.clone(),
    ));

    let (trigger, shutdown) = utils::shutdown::channel();
    let (invoice_tx, invoice_rx) = unbounded();
    let (block_tx, block_rx) = unbounded();
    let (tx_tx, tx_rx) = unbounded();

    let listener = ZmqListener::new(settings.bitcoind.clone(), logger.clone())?;
    let mut threads: Vec<JoinHandle<()>> = vec![
        listener.spawn_block_listener(block_tx, shutdown.clone())?,
        listener.spawn_tx_listener(tx_tx, shutdown.clone())?,
        reconciler.spawn_consumer("invoices", invoice_rx, shutdown.clone())?,
        reconciler.spawn_consumer("blocks", block_rx, shutdown.clone())?,
    ];
    threads.push(reconciler.spawn_consumer("transactions", tx_rx, shutdown.clone())?);

    let served = actix_web::rt::System::new().block_on(run_async(
        settings,
        pool,
        chain,
        invoice_tx,
        settle_index,
        shutdown,
        logger.clone(),
    ));

    log::info!(logger, "Stopping background loops");
    trigger.trigger();
    for handle in threads {
        if handle.join().is_err() {
            log::error!(logger, "A background thread panicked");
        }
    }

    served
}

async fn run_async(
    settings: Settings,
    pool: DbPool,
    chain: Arc<dyn ChainClient>,
    invoice_tx: Sender<msgs::Message>,
    settle_index: u64,
    shutdown: Shutdown,
    logger: log::Logger,
) -> ServeResult {
    let lnd = Arc::new(LndConnector::new(settings.lnd.clone(), logger.clone()).await?);

    let subscriber = lnd.clone();
    let subscription_logger = logger.clone();
    let subscription_shutdown = shutdown.clone();
    let subscription = actix_web::rt::spawn(async move {
        if let Err(err) = subscriber
            .subscribe_invoices(invoice_tx, settle_index, subscription_shutdown)
            .await
        {
            log::error!(subscription_logger, "Invoice subscription stopped: {}", err);
        }
    });

    let node: Arc<dyn LightningClient> = lnd.clone();
    let resolver = OutboundResolver::new(pool.clone(), node, &settings.outbound, logger.clone());
    let resolving = actix_web::rt::spawn(resolver.run(shutdown));

    let mailer = api::mailer::from_settings(&settings.email, logger.clone())?;
    let context = ApiContext::new(settings.api, settings.payments, lnd, chain, mailer, logger.clone());
    let served = api::start(pool, context).await;

    // shutdown fires after the runtime returns, the node tasks are stopped here
    subscription.abort();
    resolving.abort();
    Ok(served?)
}
