use models::payments::Payment;
use slog as log;
use std::time::Duration;

/// Delivers settled payments to the callback url the user registered with the invoice.
pub trait SettlementNotifier: Send + Sync {
    fn notify(&self, url: &str, payment: &Payment);
}

pub struct HttpNotifier {
    client: reqwest::blocking::Client,
    logger: log::Logger,
}

impl HttpNotifier {
    pub fn new(timeout: Duration, logger: log::Logger) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            logger: logger.new(log::o!("component" => "settlement_notifier")),
        })
    }
}

impl SettlementNotifier for HttpNotifier {
    fn notify(&self, url: &str, payment: &Payment) {
        match self.client.post(url).json(payment).send() {
            Ok(response) if response.status().is_success() => {
                log::debug!(self.logger, "Delivered settlement of payment {} to {}", payment.id, url);
            }
            Ok(response) => {
                log::warn!(
                    self.logger,
                    "Callback {} for payment {} answered {}",
                    url,
                    payment.id,
                    response.status()
                );
            }
            Err(err) => {
                log::warn!(self.logger, "Callback {} for payment {} failed: {}", url, payment.id, err);
            }
        }
    }
}

/// Used when callbacks are disabled.
pub struct NoopNotifier;

impl SettlementNotifier for NoopNotifier {
    fn notify(&self, _url: &str, _payment: &Payment) {}
}
