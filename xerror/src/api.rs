use err_derive::Error;
use serde::Serialize;

use actix_web::{error, http::StatusCode, HttpResponse};

/// A single rejected request field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, code: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error, Serialize)]
#[error(display = "An Error has occured when authenticating.")]
pub enum AuthError {
    #[error(display = "User already exists.")]
    UserExists,
    #[error(display = "Incorrect password supplied.")]
    IncorrectPassword,
    #[error(display = "A TOTP code is required.")]
    TotpRequired,
    #[error(display = "Invalid TOTP code.")]
    InvalidTotp,
    #[error(display = "TOTP is not enabled.")]
    TotpNotEnabled,
    #[error(display = "TOTP is already enabled.")]
    TotpAlreadyEnabled,
    #[error(display = "Invalid api key.")]
    InvalidApiKey,
    #[error(display = "Invalid or expired token.")]
    InvalidToken,
    #[error(display = "Internal Error.")]
    InternalError,
}

#[derive(Debug, Error, Serialize, PartialEq, Eq)]
#[error(display = "An Error has occured when authenticating.")]
pub enum JWTError {
    #[error(display = "No authorization header supplied.")]
    NotSupplied,
    #[error(display = "Jwt token that was supplied is invalid.")]
    Invalid,
    #[error(display = "Jwt token that was supplied is expired.")]
    Expired,
}

#[derive(Debug, Error, Serialize)]
#[error(display = "An Error has occured when accessing the database.")]
pub enum DbError {
    #[error(display = "Unable to get connection to Db.")]
    DbConnectionError,
    #[error(display = "User already exists.")]
    UserAlreadyExists,
    #[error(display = "User does not exist.")]
    UserDoesNotExist,
    #[error(display = "Couldn't fetch data.")]
    CouldNotFetchData,
    #[error(display = "An unknown error has occured.")]
    Unknown,
}

#[derive(Debug, Error, Serialize)]
#[error(display = "The request is invalid.")]
pub enum RequestError {
    #[error(display = "Invalid data supplied.")]
    InvalidDataSupplied,
    #[error(display = "Invalid request body: {}", _0)]
    InvalidBody(String),
}

#[derive(Debug, Error, Serialize)]
#[error(display = "The payment could not be processed.")]
pub enum PaymentError {
    #[error(display = "Insufficient funds.")]
    InsufficientFunds,
    #[error(display = "Invoice has already been paid.")]
    InvoiceAlreadyPaid,
    #[error(display = "Invoice has expired.")]
    InvoiceExpired,
    #[error(display = "Invalid payment request.")]
    InvalidPaymentRequest,
    #[error(display = "Invalid bitcoin address.")]
    InvalidAddress,
    #[error(display = "Payment failed: {}", _0)]
    PaymentFailed(String),
    #[error(display = "Node is unavailable.")]
    NodeUnavailable,
}

#[derive(Debug, Error, Serialize)]
pub enum ApiError {
    #[error(display = "Auth error.")]
    Auth(AuthError),
    #[error(display = "Db error.")]
    Db(DbError),
    #[error(display = "Jwt error.")]
    JWT(JWTError),
    #[error(display = "Request error.")]
    Request(RequestError),
    #[error(display = "Payment error.")]
    Payment(PaymentError),
    #[error(display = "Validation failed.")]
    Validation(Vec<FieldError>),
    #[error(display = "{} not found.", _0)]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "no_fields")]
    fields: &'a [FieldError],
}

fn no_fields(fields: &&[FieldError]) -> bool {
    fields.is_empty()
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

impl ApiError {
    /// Stable machine readable code of the error.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(auth) => match auth {
                AuthError::UserExists => "ERR_USER_EXISTS",
                AuthError::IncorrectPassword => "ERR_INCORRECT_PASSWORD",
                AuthError::TotpRequired => "ERR_TOTP_REQUIRED",
                AuthError::InvalidTotp => "ERR_INVALID_TOTP",
                AuthError::TotpNotEnabled => "ERR_TOTP_NOT_ENABLED",
                AuthError::TotpAlreadyEnabled => "ERR_TOTP_ALREADY_ENABLED",
                AuthError::InvalidApiKey => "ERR_INVALID_API_KEY",
                AuthError::InvalidToken => "ERR_INVALID_TOKEN",
                AuthError::InternalError => "ERR_INTERNAL",
            },
            ApiError::Db(db) => match db {
                DbError::UserAlreadyExists => "ERR_USER_EXISTS",
                DbError::UserDoesNotExist => "ERR_USER_NOT_FOUND",
                _ => "ERR_INTERNAL",
            },
            ApiError::JWT(jwt) => match jwt {
                JWTError::NotSupplied => "ERR_AUTH_NOT_SUPPLIED",
                JWTError::Invalid => "ERR_INVALID_JWT",
                JWTError::Expired => "ERR_EXPIRED_JWT",
            },
            ApiError::Request(_) => "ERR_BAD_REQUEST",
            ApiError::Payment(payment) => match payment {
                PaymentError::InsufficientFunds => "ERR_INSUFFICIENT_FUNDS",
                PaymentError::InvoiceAlreadyPaid => "ERR_INVOICE_ALREADY_PAID",
                PaymentError::InvoiceExpired => "ERR_INVOICE_EXPIRED",
                PaymentError::InvalidPaymentRequest => "ERR_INVALID_PAYMENT_REQUEST",
                PaymentError::InvalidAddress => "ERR_INVALID_ADDRESS",
                PaymentError::PaymentFailed(_) => "ERR_PAYMENT_FAILED",
                PaymentError::NodeUnavailable => "ERR_NODE_UNAVAILABLE",
            },
            ApiError::Validation(_) => "ERR_VALIDATION",
            ApiError::NotFound(_) => "ERR_NOT_FOUND",
        }
    }

    /// Client facing message. Internal failures stay opaque.
    fn message(&self) -> String {
        match self {
            ApiError::Auth(auth) => auth.to_string(),
            ApiError::Db(db) => match db {
                DbError::UserAlreadyExists | DbError::UserDoesNotExist => db.to_string(),
                _ => "Internal server error.".to_string(),
            },
            ApiError::JWT(jwt) => jwt.to_string(),
            ApiError::Request(request) => request.to_string(),
            ApiError::Payment(payment) => payment.to_string(),
            ApiError::Validation(_) | ApiError::NotFound(_) => self.to_string(),
        }
    }
}

impl error::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let fields: &[FieldError] = match self {
            ApiError::Validation(fields) => fields,
            _ => &[],
        };
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.message(),
                fields,
            },
        };
        HttpResponse::build(self.status_code()).json(envelope)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Auth(auth) => match auth {
                AuthError::UserExists => StatusCode::CONFLICT,
                AuthError::IncorrectPassword => StatusCode::UNAUTHORIZED,
                AuthError::TotpRequired => StatusCode::UNAUTHORIZED,
                AuthError::InvalidTotp => StatusCode::UNAUTHORIZED,
                AuthError::TotpNotEnabled => StatusCode::BAD_REQUEST,
                AuthError::TotpAlreadyEnabled => StatusCode::BAD_REQUEST,
                AuthError::InvalidApiKey => StatusCode::UNAUTHORIZED,
                AuthError::InvalidToken => StatusCode::BAD_REQUEST,
                AuthError::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Db(db) => match db {
                DbError::UserAlreadyExists => StatusCode::CONFLICT,
                DbError::UserDoesNotExist => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::JWT(_) => StatusCode::UNAUTHORIZED,
            ApiError::Request(_) => StatusCode::BAD_REQUEST,
            ApiError::Payment(payment) => match payment {
                PaymentError::InvoiceAlreadyPaid => StatusCode::CONFLICT,
                PaymentError::NodeUnavailable => StatusCode::BAD_GATEWAY,
                _ => StatusCode::BAD_REQUEST,
            },
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::ResponseError;

    async fn body_of(err: ApiError) -> serde_json::Value {
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[actix_rt::test]
    async fn validation_errors_carry_fields() {
        let err = ApiError::Validation(vec![FieldError::new("password", "weak", "Password is too weak.")]);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let body = body_of(err).await;
        assert_eq!(body["error"]["code"], "ERR_VALIDATION");
        assert_eq!(body["error"]["fields"][0]["field"], "password");
        assert_eq!(body["error"]["fields"][0]["code"], "weak");
    }

    #[actix_rt::test]
    async fn internal_db_errors_are_opaque() {
        let err = ApiError::Db(DbError::DbConnectionError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_of(err).await;
        assert_eq!(body["error"]["message"], "Internal server error.");
        assert!(body["error"].get("fields").is_none());
    }

    #[test]
    fn jwt_errors_are_unauthorized() {
        for err in [JWTError::NotSupplied, JWTError::Invalid, JWTError::Expired] {
            assert_eq!(ApiError::JWT(err).status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn insufficient_funds_is_a_client_error() {
        let err = ApiError::Payment(PaymentError::InsufficientFunds);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "ERR_INSUFFICIENT_FUNDS");
    }
}
