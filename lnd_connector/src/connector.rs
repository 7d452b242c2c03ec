use msgs::lightning::{InvoiceState, InvoiceUpdate};
use msgs::Message;
use xerror::lnd_connector::*;

use async_trait::async_trait;
use core_types::*;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use slog as log;
use std::time::Duration;
use tonic_openssl_lnd::{lnrpc, routerrpc};
use utils::shutdown::Shutdown;

pub const DEFAULT_INVOICE_EXPIRY_SECS: i64 = 86400;
const TRACK_TIMEOUT: Duration = Duration::from_secs(10);
const GRPC_NOT_FOUND: i32 = 5;

fn default_settle_index() -> u64 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LndConnectorSettings {
    pub host: String,
    pub port: u32,
    pub macaroon_path: String,
    pub tls_path: String,
    /// Lowest settle index the invoice subscription resumes from. The index persisted with
    /// settled payments takes over once it is higher.
    #[serde(default = "default_settle_index")]
    pub settle_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub amount_msat: i64,
    pub memo: Option<String>,
    /// Committed to through the invoice's description hash instead of being embedded.
    pub description: Option<String>,
    pub expiry_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub payment_request: String,
    pub payment_hash: String,
    pub add_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPaymentRequest {
    pub destination: String,
    pub payment_hash: String,
    pub amount_msat: i64,
    pub timestamp: i64,
    pub expiry_secs: i64,
    pub description: String,
}

impl DecodedPaymentRequest {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.timestamp.saturating_add(self.expiry_secs) <= now_secs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayResponse {
    pub payment_hash: String,
    pub preimage: String,
    pub fee_msat: i64,
}

/// What the node knows about an outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundState {
    /// The node has no record of the payment.
    Unknown,
    InFlight,
    Succeeded { preimage: String, fee_msat: i64 },
    Failed,
}

/// Operations the custodial layer needs from a lightning node.
#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn add_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice, LndConnectorError>;

    async fn pay_invoice(&self, payment_request: &str, max_fee_msat: i64) -> Result<PayResponse, LndConnectorError>;

    async fn decode_payment_request(&self, payment_request: &str) -> Result<DecodedPaymentRequest, LndConnectorError>;

    async fn node_info(&self) -> Result<LndNodeInfo, LndConnectorError>;

    /// Current state of the outgoing payment with `payment_hash`.
    async fn track_payment(&self, payment_hash: &str) -> Result<OutboundState, LndConnectorError>;
}

/// Clients are cloned per call, concurrent calls share the underlying channel.
pub struct LndConnector {
    ln_client: tonic_openssl_lnd::LndLightningClient,
    router_client: tonic_openssl_lnd::LndRouterClient,
    logger: log::Logger,
}

impl LndConnector {
    pub async fn new(settings: LndConnectorSettings, logger: log::Logger) -> Result<Self, LndConnectorError> {
        let logger = logger.new(log::o!("component" => "lnd_connector"));
        let ln_client = tonic_openssl_lnd::connect_lightning(
            settings.host.clone(),
            settings.port,
            settings.tls_path.clone(),
            settings.macaroon_path.clone(),
        )
        .await
        .map_err(|err| {
            log::error!(logger, "Failed to connect to lnd at {}:{}: {:?}", settings.host, settings.port, err);
            LndConnectorError::FailedToConnect
        })?;
        let router_client = tonic_openssl_lnd::connect_router(
            settings.host.clone(),
            settings.port,
            settings.tls_path.clone(),
            settings.macaroon_path.clone(),
        )
        .await
        .map_err(|err| {
            log::error!(logger, "Failed to connect to the lnd router at {}:{}: {:?}", settings.host, settings.port, err);
            LndConnectorError::FailedToConnect
        })?;

        log::info!(logger, "Connected to lnd at {}:{}", settings.host, settings.port);
        Ok(Self {
            ln_client,
            router_client,
            logger,
        })
    }

    /// Forwards every invoice state change to `listener` until the stream ends, the receiving
    /// side goes away or `shutdown` fires. Settlements after `settle_index` are replayed first.
    /// The stream is not reopened after an error.
    pub async fn subscribe_invoices(
        &self,
        listener: Sender<Message>,
        settle_index: u64,
        mut shutdown: Shutdown,
    ) -> Result<(), LndConnectorError> {
        let subscription = lnrpc::InvoiceSubscription {
            add_index: 0,
            settle_index,
        };
        let mut client = self.ln_client.clone();
        let mut stream = client
            .subscribe_invoices(subscription)
            .await
            .map_err(|status| {
                log::error!(self.logger, "Failed to subscribe to invoices: {}", status);
                LndConnectorError::FailedToSubscribeInvoices
            })?
            .into_inner();
        log::info!(self.logger, "Subscribed to invoice updates after settle index {}", settle_index);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!(self.logger, "Shutting down the invoice subscription");
                    break;
                }
                next = stream.message() => match next {
                    Ok(Some(invoice)) => {
                        let update = match invoice_update(&invoice) {
                            Some(update) => update,
                            None => {
                                log::warn!(self.logger, "Skipping invoice with unknown state {}", invoice.state);
                                continue;
                            }
                        };
                        log::debug!(self.logger, "Invoice {} is now {:?}", update.payment_hash, update.state);
                        if listener.send(Message::Invoice(update)).is_err() {
                            log::warn!(self.logger, "Invoice listener is gone, stopping the subscription");
                            break;
                        }
                    }
                    Ok(None) => {
                        log::warn!(self.logger, "Invoice stream was closed by lnd");
                        break;
                    }
                    Err(status) => {
                        log::error!(self.logger, "Invoice stream failed: {}", status);
                        return Err(LndConnectorError::FailedToSubscribeInvoices);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Maps an lnd invoice onto the update forwarded to the reconciler.
pub fn invoice_update(invoice: &lnrpc::Invoice) -> Option<InvoiceUpdate> {
    let state = match lnrpc::invoice::InvoiceState::from_i32(invoice.state)? {
        lnrpc::invoice::InvoiceState::Open => InvoiceState::Open,
        lnrpc::invoice::InvoiceState::Settled => InvoiceState::Settled,
        lnrpc::invoice::InvoiceState::Canceled => InvoiceState::Canceled,
        lnrpc::invoice::InvoiceState::Accepted => InvoiceState::Accepted,
    };
    let preimage = if invoice.r_preimage.is_empty() {
        None
    } else {
        Some(hex::encode(&invoice.r_preimage))
    };

    Some(InvoiceUpdate {
        payment_hash: hex::encode(&invoice.r_hash),
        payment_request: invoice.payment_request.clone(),
        preimage,
        state,
        amount_paid_msat: invoice.amt_paid_msat,
        settle_date: invoice.settle_date,
        settle_index: invoice.settle_index,
    })
}

/// Maps an lnd payment onto the state the payment resolver acts on. Anything that is not final
/// counts as in flight.
pub fn outbound_state(payment: &lnrpc::Payment) -> OutboundState {
    match lnrpc::payment::PaymentStatus::from_i32(payment.status) {
        Some(lnrpc::payment::PaymentStatus::Succeeded) => OutboundState::Succeeded {
            preimage: payment.payment_preimage.clone(),
            fee_msat: payment.fee_msat,
        },
        Some(lnrpc::payment::PaymentStatus::Failed) => OutboundState::Failed,
        _ => OutboundState::InFlight,
    }
}

fn description_hash(description: &str) -> Result<Vec<u8>, LndConnectorError> {
    hex::decode(sha256::digest(description)).map_err(|_| LndConnectorError::InvalidDescriptionHash)
}

#[async_trait]
impl LightningClient for LndConnector {
    async fn add_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice, LndConnectorError> {
        let description_hash = match request.description {
            Some(ref description) => description_hash(description)?,
            None => Vec::new(),
        };

        let invoice = lnrpc::Invoice {
            value_msat: request.amount_msat,
            memo: request.memo.clone().unwrap_or_default(),
            expiry: request.expiry_secs,
            description_hash,
            ..Default::default()
        };

        let mut client = self.ln_client.clone();
        match client.add_invoice(invoice).await {
            Ok(resp) => {
                let added = resp.into_inner();
                Ok(CreatedInvoice {
                    payment_request: added.payment_request,
                    payment_hash: hex::encode(added.r_hash),
                    add_index: added.add_index,
                })
            }
            Err(status) => {
                log::error!(self.logger, "Failed to create an invoice: {}", status);
                Err(LndConnectorError::FailedToCreateInvoice)
            }
        }
    }

    async fn pay_invoice(&self, payment_request: &str, max_fee_msat: i64) -> Result<PayResponse, LndConnectorError> {
        let limit = lnrpc::fee_limit::Limit::Fixed(msats_to_sats(max_fee_msat.max(0)));
        let send_request = lnrpc::SendRequest {
            payment_request: payment_request.to_string(),
            fee_limit: Some(lnrpc::FeeLimit { limit: Some(limit) }),
            ..Default::default()
        };

        let mut client = self.ln_client.clone();
        let response = match client.send_payment_sync(send_request).await {
            Ok(resp) => resp.into_inner(),
            Err(status) => {
                log::error!(self.logger, "Failed to send a payment: {}", status);
                return Err(LndConnectorError::FailedToSendPayment);
            }
        };

        if !response.payment_error.is_empty() {
            log::warn!(self.logger, "Payment error: {}", response.payment_error);
            return Err(LndConnectorError::PaymentRejected);
        }
        let fee_msat = response.payment_route.map(|route| route.total_fees_msat).unwrap_or(0);

        Ok(PayResponse {
            payment_hash: hex::encode(response.payment_hash),
            preimage: hex::encode(response.payment_preimage),
            fee_msat,
        })
    }

    async fn decode_payment_request(&self, payment_request: &str) -> Result<DecodedPaymentRequest, LndConnectorError> {
        let decode = lnrpc::PayReqString {
            pay_req: payment_request.to_string(),
        };

        let mut client = self.ln_client.clone();
        match client.decode_pay_req(decode).await {
            Ok(resp) => {
                let decoded = resp.into_inner();
                Ok(DecodedPaymentRequest {
                    destination: decoded.destination,
                    payment_hash: decoded.payment_hash,
                    amount_msat: decoded.num_msat,
                    timestamp: decoded.timestamp,
                    expiry_secs: decoded.expiry,
                    description: decoded.description,
                })
            }
            Err(status) => {
                log::debug!(self.logger, "Failed to decode a payment request: {}", status);
                Err(LndConnectorError::FailedToDecodePaymentRequest)
            }
        }
    }

    async fn node_info(&self) -> Result<LndNodeInfo, LndConnectorError> {
        let mut client = self.ln_client.clone();
        match client.get_info(lnrpc::GetInfoRequest::default()).await {
            Ok(ni) => {
                let resp = ni.into_inner();
                Ok(LndNodeInfo {
                    identity_pubkey: resp.identity_pubkey,
                    alias: resp.alias,
                    uris: resp.uris,
                    num_active_channels: resp.num_active_channels as u64,
                    num_pending_channels: resp.num_pending_channels as u64,
                    num_peers: resp.num_peers as u64,
                    block_height: resp.block_height as u64,
                    synced_to_chain: resp.synced_to_chain,
                    testnet: resp.testnet,
                })
            }
            Err(status) => {
                log::error!(self.logger, "Failed to get node info: {}", status);
                Err(LndConnectorError::FailedToGetNodeInfo)
            }
        }
    }

    async fn track_payment(&self, payment_hash: &str) -> Result<OutboundState, LndConnectorError> {
        let request = routerrpc::TrackPaymentRequest {
            payment_hash: hex::decode(payment_hash).map_err(|_| LndConnectorError::InvalidPaymentHash)?,
            no_inflight_updates: false,
            ..Default::default()
        };

        let mut client = self.router_client.clone();
        let mut stream = match client.track_payment_v2(request).await {
            Ok(resp) => resp.into_inner(),
            Err(status) if status.code() as i32 == GRPC_NOT_FOUND => return Ok(OutboundState::Unknown),
            Err(status) => {
                log::error!(self.logger, "Failed to track payment {}: {}", payment_hash, status);
                return Err(LndConnectorError::FailedToTrackPayment);
            }
        };

        // the first update carries the current state
        match tokio::time::timeout(TRACK_TIMEOUT, stream.message()).await {
            Ok(Ok(Some(payment))) => Ok(outbound_state(&payment)),
            Ok(Err(status)) if status.code() as i32 == GRPC_NOT_FOUND => Ok(OutboundState::Unknown),
            Ok(Err(status)) => {
                log::error!(self.logger, "Tracking payment {} failed: {}", payment_hash, status);
                Err(LndConnectorError::FailedToTrackPayment)
            }
            Ok(Ok(None)) | Err(_) => {
                log::warn!(self.logger, "No state received for payment {}", payment_hash);
                Err(LndConnectorError::FailedToTrackPayment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_invoice_becomes_an_update() {
        let invoice = lnrpc::Invoice {
            r_hash: vec![0xab, 0xcd],
            r_preimage: vec![0x01, 0x02],
            payment_request: "lnbcrt10n1test".to_string(),
            state: lnrpc::invoice::InvoiceState::Settled as i32,
            amt_paid_msat: 1_000,
            settle_date: 1_700_000_000,
            settle_index: 7,
            ..Default::default()
        };

        let update = invoice_update(&invoice).unwrap();
        assert_eq!(update.payment_hash, "abcd");
        assert_eq!(update.preimage.as_deref(), Some("0102"));
        assert_eq!(update.state, InvoiceState::Settled);
        assert_eq!(update.amount_paid_msat, 1_000);
        assert_eq!(update.settle_index, 7);
    }

    #[test]
    fn open_invoice_has_no_preimage_and_unknown_states_are_dropped() {
        let open = lnrpc::Invoice {
            r_hash: vec![0x01],
            state: lnrpc::invoice::InvoiceState::Open as i32,
            ..Default::default()
        };
        let update = invoice_update(&open).unwrap();
        assert_eq!(update.preimage, None);
        assert_eq!(update.state, InvoiceState::Open);

        let unknown = lnrpc::Invoice {
            state: 42,
            ..Default::default()
        };
        assert!(invoice_update(&unknown).is_none());
    }

    #[test]
    fn only_final_payments_leave_flight() {
        let succeeded = lnrpc::Payment {
            status: lnrpc::payment::PaymentStatus::Succeeded as i32,
            payment_preimage: "0102".to_string(),
            fee_msat: 15,
            ..Default::default()
        };
        assert_eq!(
            outbound_state(&succeeded),
            OutboundState::Succeeded {
                preimage: "0102".to_string(),
                fee_msat: 15
            }
        );

        let failed = lnrpc::Payment {
            status: lnrpc::payment::PaymentStatus::Failed as i32,
            ..Default::default()
        };
        assert_eq!(outbound_state(&failed), OutboundState::Failed);

        for status in [lnrpc::payment::PaymentStatus::InFlight as i32, 0, 42] {
            let payment = lnrpc::Payment {
                status,
                ..Default::default()
            };
            assert_eq!(outbound_state(&payment), OutboundState::InFlight);
        }
    }

    #[test]
    fn settings_resume_after_the_first_settlement_by_default() {
        let settings: LndConnectorSettings = serde_json::from_str(
            r#"{"host": "localhost", "port": 10009, "macaroon_path": "admin.macaroon", "tls_path": "tls.cert"}"#,
        )
        .unwrap();
        assert_eq!(settings.settle_index, 1);
    }

    #[test]
    fn description_is_committed_as_sha256() {
        let hash = description_hash("").unwrap();
        assert_eq!(
            hex::encode(hash),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn expiry_is_relative_to_the_timestamp() {
        let decoded = DecodedPaymentRequest {
            destination: "02aa".to_string(),
            payment_hash: "ff".to_string(),
            amount_msat: 5_000,
            timestamp: 1_000,
            expiry_secs: 60,
            description: String::new(),
        };
        assert!(!decoded.is_expired(1_059));
        assert!(decoded.is_expired(1_060));
    }
}
