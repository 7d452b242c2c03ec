#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LndConnectorError {
    FailedToConnect,
    FailedToCreateInvoice,
    FailedToSendPayment,
    PaymentRejected,
    FailedToGetNodeInfo,
    FailedToDecodePaymentRequest,
    FailedToSubscribeInvoices,
    InvalidDescriptionHash,
    InvalidPaymentHash,
    FailedToTrackPayment,
}

impl std::fmt::Display for LndConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for LndConnectorError {}
