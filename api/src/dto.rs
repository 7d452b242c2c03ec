use chrono::{DateTime, Utc};
use core_types::{msats_to_sats, Direction, PaymentId, PaymentStatus, TransactionId, UserId};
use models::api_keys::ApiKey;
use models::payments::Payment;
use models::transactions::Transaction;
use models::users::User;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
pub struct UserResponse {
    pub uid: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub balance_msat: i64,
    pub balance_sat: i64,
    pub has_verified_email: bool,
    pub totp_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            balance_msat: user.balance_msat,
            balance_sat: msats_to_sats(user.balance_msat),
            has_verified_email: user.has_verified_email,
            totp_enabled: user.totp_enabled(),
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub payment_request: String,
    pub payment_hash: String,
    pub preimage: Option<String>,
    pub status: PaymentStatus,
    pub direction: Direction,
    pub amount_msat: i64,
    pub fee_msat: i64,
    pub memo: Option<String>,
    pub description: Option<String>,
    pub expiry_secs: i64,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            payment_request: payment.payment_request.clone(),
            payment_hash: payment.payment_hash.clone(),
            preimage: payment.preimage.clone(),
            status: payment.status,
            direction: payment.direction,
            amount_msat: payment.amount_msat,
            fee_msat: payment.fee_msat,
            memo: payment.memo.clone(),
            description: payment.description.clone(),
            expiry_secs: payment.expiry_secs,
            settled_at: payment.settled_at,
            created_at: payment.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct TransactionResponse {
    pub id: TransactionId,
    pub address: String,
    pub txid: Option<String>,
    pub vout: Option<i32>,
    pub direction: Direction,
    pub amount_sat: Option<i64>,
    pub description: Option<String>,
    pub confirmed_at_block: Option<i64>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            address: tx.address.clone(),
            txid: tx.txid.clone(),
            vout: tx.vout,
            direction: tx.direction,
            amount_sat: tx.amount_sat,
            description: tx.description.clone(),
            confirmed_at_block: tx.confirmed_at_block,
            confirmed_at: tx.confirmed_at,
            settled_at: tx.settled_at,
            created_at: tx.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ApiKeyResponse {
    pub id: i32,
    /// Only present right after creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub last_letters: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ApiKey> for ApiKeyResponse {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id,
            key: None,
            last_letters: key.last_letters.clone(),
            created_at: key.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct TotpSetupResponse {
    pub secret: String,
    pub uri: String,
}

/// `?limit=&offset=` of list endpoints.
#[derive(Deserialize, Debug, Default)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(i64, i64), xerror::api::ApiError> {
        let (limit, offset) = (self.limit(), self.offset());
        crate::validation::Validator::default()
            .check(
                (1..=MAX_PAGE_SIZE).contains(&limit),
                "limit",
                "out_of_range",
                "Limit must be between 1 and 200.",
            )
            .check(offset >= 0, "offset", "out_of_range", "Offset must not be negative.")
            .finish()?;
        Ok((limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        assert_eq!(Pagination::default().validate().unwrap(), (DEFAULT_PAGE_SIZE, 0));
        let too_big = Pagination {
            limit: Some(MAX_PAGE_SIZE + 1),
            offset: Some(-1),
        };
        match too_big.validate() {
            Err(xerror::api::ApiError::Validation(fields)) => assert_eq!(fields.len(), 2),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn payment_response_serializes_enums_as_text() {
        let now = Utc::now();
        let response = PaymentResponse {
            id: 1,
            payment_request: "lnbcrt1".to_string(),
            payment_hash: "00".to_string(),
            preimage: None,
            status: PaymentStatus::Open,
            direction: Direction::Inbound,
            amount_msat: 1_000,
            fee_msat: 0,
            memo: None,
            description: None,
            expiry_secs: 3600,
            settled_at: None,
            created_at: now,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "OPEN");
        assert_eq!(json["direction"], "INBOUND");
    }
}
