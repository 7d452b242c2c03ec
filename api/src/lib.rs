use actix_cors::Cors;
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use serde::{Deserialize, Serialize};
use slog as log;
use std::sync::Arc;

use chain_connector::ChainClient;
use core_types::DbPool;
use lnd_connector::{LightningClient, DEFAULT_INVOICE_EXPIRY_SECS};
use models::error::ModelError;
use models::users::User;
use xerror::api::*;
use xerror::lnd_connector::LndConnectorError;

pub mod dto;
pub mod jwt;
pub mod mailer;
pub mod routes;
pub mod totp;
pub mod validation;

use jwt::{Claims, JwtKeys, TokenPurpose};
use mailer::Mailer;

fn default_endpoint() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_access_token_lifetime() -> i64 {
    60 * 60 * 12
}

fn default_email_token_lifetime() -> i64 {
    60 * 60 * 24
}

fn default_min_password_score() -> u8 {
    3
}

fn default_totp_issuer() -> String {
    "lnhub".to_string()
}

fn default_node_timeout() -> u64 {
    5
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub jwt_secret: String,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: i64,
    /// Lifetime of email verification and password reset tokens.
    #[serde(default = "default_email_token_lifetime")]
    pub email_token_lifetime_secs: i64,
    /// Lowest accepted zxcvbn score, 0 to 4.
    #[serde(default = "default_min_password_score")]
    pub min_password_score: u8,
    #[serde(default = "default_totp_issuer")]
    pub totp_issuer: String,
    /// Base url used in links sent by email.
    pub public_url: String,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
}

fn default_invoice_expiry() -> i64 {
    DEFAULT_INVOICE_EXPIRY_SECS
}

fn default_max_invoice_expiry() -> i64 {
    60 * 60 * 24 * 7
}

fn default_max_invoice_amount() -> i64 {
    4_294_967_000
}

fn default_fee_ppm() -> i64 {
    5_000
}

fn default_min_fee() -> i64 {
    10_000
}

fn default_min_withdrawal() -> i64 {
    10_000
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PaymentSettings {
    #[serde(default = "default_invoice_expiry")]
    pub default_invoice_expiry_secs: i64,
    #[serde(default = "default_max_invoice_expiry")]
    pub max_invoice_expiry_secs: i64,
    #[serde(default = "default_max_invoice_amount")]
    pub max_invoice_amount_msat: i64,
    /// Routing fee reserved for outbound payments that do not set `max_fee_msat`, in parts per
    /// million of the amount.
    #[serde(default = "default_fee_ppm")]
    pub fee_ppm: i64,
    #[serde(default = "default_min_fee")]
    pub min_fee_msat: i64,
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal_sat: i64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            default_invoice_expiry_secs: default_invoice_expiry(),
            max_invoice_expiry_secs: default_max_invoice_expiry(),
            max_invoice_amount_msat: default_max_invoice_amount(),
            fee_ppm: default_fee_ppm(),
            min_fee_msat: default_min_fee(),
            min_withdrawal_sat: default_min_withdrawal(),
        }
    }
}

impl PaymentSettings {
    /// Fee reserved for paying `amount_msat` when the caller did not pick a limit.
    pub fn default_max_fee(&self, amount_msat: i64) -> i64 {
        let proportional = (amount_msat as i128 * self.fee_ppm as i128 / 1_000_000) as i64;
        proportional.max(self.min_fee_msat)
    }
}

/// Everything a request handler needs besides the database pool.
pub struct ApiContext {
    pub settings: ApiSettings,
    pub payments: PaymentSettings,
    pub jwt: JwtKeys,
    pub lightning: Arc<dyn LightningClient>,
    pub chain: Arc<dyn ChainClient>,
    pub mailer: Arc<dyn Mailer>,
    pub logger: log::Logger,
}

pub type WebDbPool = web::Data<DbPool>;
pub type WebContext = web::Data<ApiContext>;

impl ApiContext {
    pub fn new(
        settings: ApiSettings,
        payments: PaymentSettings,
        lightning: Arc<dyn LightningClient>,
        chain: Arc<dyn ChainClient>,
        mailer: Arc<dyn Mailer>,
        logger: log::Logger,
    ) -> Self {
        Self {
            jwt: JwtKeys::new(&settings.jwt_secret),
            settings,
            payments,
            lightning,
            chain,
            mailer,
            logger: logger.new(log::o!("component" => "api")),
        }
    }

    /// Maps domain failures onto the api taxonomy. Anything unexpected is logged here and
    /// reaches the client as an opaque internal error.
    pub fn model_error(&self, err: ModelError) -> ApiError {
        match err {
            ModelError::NotFound => ApiError::NotFound("Record".to_string()),
            ModelError::InsufficientFunds => ApiError::Payment(PaymentError::InsufficientFunds),
            ModelError::InvalidAmount => ApiError::Request(RequestError::InvalidDataSupplied),
            other => {
                log::error!(self.logger, "Database operation failed: {}", other);
                ApiError::Db(DbError::Unknown)
            }
        }
    }

    pub fn node_error(&self, err: LndConnectorError) -> ApiError {
        match err {
            LndConnectorError::FailedToDecodePaymentRequest => ApiError::Payment(PaymentError::InvalidPaymentRequest),
            LndConnectorError::PaymentRejected => {
                ApiError::Payment(PaymentError::PaymentFailed("The node could not route the payment.".to_string()))
            }
            LndConnectorError::InvalidDescriptionHash => ApiError::Request(RequestError::InvalidDataSupplied),
            other => {
                log::error!(self.logger, "Lightning node call failed: {}", other);
                ApiError::Payment(PaymentError::NodeUnavailable)
            }
        }
    }

    pub fn access_token(&self, user: &User) -> Result<(String, Claims), ApiError> {
        self.jwt
            .generate_for(user.uid, TokenPurpose::Access, self.settings.access_token_lifetime_secs)
    }

    /// Sends a verification link for the user's current email. Delivery failures are logged only.
    pub async fn send_verification_email(&self, user: &User) {
        let now = utils::time::time_now_secs();
        let claims = Claims {
            iat: now,
            exp: now + self.settings.email_token_lifetime_secs,
            uid: user.uid,
            purpose: TokenPurpose::VerifyEmail,
            email: Some(user.email.clone()),
            stamp: None,
        };
        let token = match self.jwt.generate(&claims) {
            Ok(token) => token,
            Err(_) => {
                log::error!(self.logger, "Could not sign a verification token for {}", user.uid);
                return;
            }
        };

        let email = mailer::verification_email(&user.email, &self.settings.public_url, &token);
        if let Err(err) = self.mailer.send(email).await {
            log::error!(self.logger, "Failed to send verification email to user {}: {}", user.uid, err);
        }
    }
}

fn body_error(message: String) -> actix_web::Error {
    ApiError::Request(RequestError::InvalidBody(message)).into()
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _| body_error(err.to_string()))
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _| body_error(err.to_string()))
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _| body_error(err.to_string()))
}

/// Registers shared state, extractor configs and every route.
pub fn configure(pool: WebDbPool, context: WebContext) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(pool)
            .app_data(context)
            .app_data(json_config())
            .app_data(path_config())
            .app_data(query_config())
            .service(routes::users::create_user)
            .service(routes::users::login)
            .service(routes::users::refresh_token)
            .service(routes::users::get_user)
            .service(routes::users::update_user)
            .service(routes::users::change_password)
            .service(routes::users::verify_email)
            .service(routes::users::request_password_reset)
            .service(routes::users::reset_password)
            .service(routes::two_factor::create_totp)
            .service(routes::two_factor::confirm_totp)
            .service(routes::two_factor::disable_totp)
            .service(routes::api_keys::create_api_key)
            .service(routes::api_keys::list_api_keys)
            .service(routes::api_keys::delete_api_key)
            .service(routes::payments::create_invoice)
            .service(routes::payments::pay_invoice)
            .service(routes::payments::list_payments)
            .service(routes::payments::get_payment)
            .service(routes::onchain::deposit)
            .service(routes::onchain::withdraw)
            .service(routes::onchain::list_transactions)
            .service(routes::onchain::get_transaction)
            .service(routes::health::health);
    }
}

pub async fn start(pool: DbPool, context: ApiContext) -> std::io::Result<()> {
    let endpoint = context.settings.endpoint.clone();
    let logger = context.logger.clone();
    let pool = Data::new(pool);
    let context = Data::new(context);

    log::info!(logger, "Starting api on {}", endpoint);
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .configure(configure(pool.clone(), context.clone()))
    })
    .bind(endpoint)?
    .run()
    .await
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use async_trait::async_trait;
    use core_types::LndNodeInfo;
    use diesel::{r2d2::ConnectionManager, PgConnection};
    use lnd_connector::{CreatedInvoice, DecodedPaymentRequest, InvoiceRequest, OutboundState, PayResponse};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use xerror::chain_connector::ChainConnectorError;

    pub const SECRET: &str = "test-secret";
    /// Withdrawals to this address fail to broadcast.
    pub const UNREACHABLE_ADDRESS: &str = "bcrt1qunreachable";

    static INVOICES: AtomicU64 = AtomicU64::new(0);
    static USERS: AtomicU64 = AtomicU64::new(0);

    pub struct MockLightning;

    #[async_trait]
    impl LightningClient for MockLightning {
        async fn add_invoice(&self, request: InvoiceRequest) -> Result<CreatedInvoice, LndConnectorError> {
            let add_index = INVOICES.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CreatedInvoice {
                payment_request: format!("lnbcrt{}n1mock{}", request.amount_msat, add_index),
                payment_hash: format!("{:032x}{:032x}", utils::time::time_now(), add_index),
                add_index,
            })
        }

        async fn pay_invoice(&self, _: &str, _: i64) -> Result<PayResponse, LndConnectorError> {
            Err(LndConnectorError::PaymentRejected)
        }

        async fn decode_payment_request(&self, payment_request: &str) -> Result<DecodedPaymentRequest, LndConnectorError> {
            let timestamp = match payment_request {
                "lnbcrt-expired" => 0,
                "lnbcrt-fresh" => utils::time::time_now_secs(),
                _ => return Err(LndConnectorError::FailedToDecodePaymentRequest),
            };
            Ok(DecodedPaymentRequest {
                destination: "02".repeat(33),
                payment_hash: "cd".repeat(32),
                amount_msat: 10_000,
                timestamp,
                expiry_secs: 3600,
                description: String::new(),
            })
        }

        async fn node_info(&self) -> Result<LndNodeInfo, LndConnectorError> {
            Ok(LndNodeInfo {
                alias: "mock".to_string(),
                block_height: 800_000,
                synced_to_chain: true,
                ..Default::default()
            })
        }

        async fn track_payment(&self, _: &str) -> Result<OutboundState, LndConnectorError> {
            Ok(OutboundState::Unknown)
        }
    }

    pub struct MockChain;

    impl ChainClient for MockChain {
        fn new_address(&self) -> Result<String, ChainConnectorError> {
            Ok("bcrt1qmock".to_string())
        }

        fn send_to_address(&self, address: &str, _: i64) -> Result<String, ChainConnectorError> {
            if address == UNREACHABLE_ADDRESS {
                return Err(ChainConnectorError::Rpc("connection refused".to_string()));
            }
            Ok("00".repeat(32))
        }

        fn confirmations(&self, _: &str) -> Result<i64, ChainConnectorError> {
            Ok(0)
        }

        fn block_count(&self) -> Result<i64, ChainConnectorError> {
            Ok(800_000)
        }

        fn validate_address(&self, address: &str) -> Result<(), ChainConnectorError> {
            if address.starts_with("bcrt1") {
                Ok(())
            } else {
                Err(ChainConnectorError::InvalidAddress(address.to_string()))
            }
        }
    }

    #[derive(Default)]
    pub struct CountingMailer {
        pub sent: AtomicUsize,
    }

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send(&self, _: mailer::Email) -> Result<(), mailer::MailerError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn settings() -> ApiSettings {
        ApiSettings {
            endpoint: default_endpoint(),
            jwt_secret: SECRET.to_string(),
            access_token_lifetime_secs: default_access_token_lifetime(),
            email_token_lifetime_secs: default_email_token_lifetime(),
            min_password_score: default_min_password_score(),
            totp_issuer: default_totp_issuer(),
            public_url: "http://localhost:8080".to_string(),
            node_timeout_secs: 1,
        }
    }

    pub fn context() -> WebContext {
        context_with_chain(Arc::new(MockChain))
    }

    pub fn context_with_chain(chain: Arc<dyn ChainClient>) -> WebContext {
        Data::new(ApiContext::new(
            settings(),
            PaymentSettings::default(),
            Arc::new(MockLightning),
            chain,
            Arc::new(CountingMailer::default()),
            utils::xlogging::discard(),
        ))
    }

    /// Migrated pool on `TEST_DATABASE_URL`.
    pub fn database_pool() -> WebDbPool {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let pool = r2d2::Pool::builder()
            .max_size(4)
            .build(ConnectionManager::<PgConnection>::new(url))
            .unwrap();
        models::init(&pool.get().unwrap()).unwrap();
        Data::new(pool)
    }

    /// Fresh user holding `balance_msat`.
    pub fn funded_user(pool: &DbPool, balance_msat: i64) -> User {
        use models::users::{hash_password, InsertableUser};

        let conn = pool.get().unwrap();
        let user = InsertableUser {
            email: format!(
                "api-{}-{}@example.com",
                utils::time::time_now(),
                USERS.fetch_add(1, Ordering::SeqCst)
            ),
            hashed_password: hash_password("irrelevant").unwrap(),
            first_name: None,
            last_name: None,
        }
        .insert(&conn)
        .unwrap();
        if balance_msat > 0 {
            User::credit(&conn, user.uid, balance_msat).unwrap();
        }
        User::get_by_id(&conn, user.uid).unwrap()
    }

    pub fn balance(pool: &DbPool, uid: core_types::UserId) -> i64 {
        User::get_by_id(&pool.get().unwrap(), uid).unwrap().balance_msat
    }

    /// Pool pointing at a closed port. Handlers that get past validation fail with a db error.
    pub fn unreachable_pool() -> WebDbPool {
        let manager = ConnectionManager::<PgConnection>::new("postgres://lnhub@127.0.0.1:1/lnhub");
        Data::new(
            r2d2::Pool::builder()
                .max_size(1)
                .connection_timeout(Duration::from_millis(200))
                .build_unchecked(manager),
        )
    }

    pub fn bearer(uid: core_types::UserId) -> String {
        let (token, _) = JwtKeys::new(SECRET)
            .generate_for(uid, TokenPurpose::Access, 600)
            .unwrap();
        format!("Bearer {}", token)
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use actix_web::{http::StatusCode, test};

    macro_rules! app {
        () => {
            test::init_service(App::new().configure(configure(unreachable_pool(), context()))).await
        };
    }

    async fn error_code(response: actix_web::dev::ServiceResponse) -> String {
        let body: serde_json::Value = test::read_body_json(response).await;
        body["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    #[::core::prelude::v1::test]
    fn insufficient_funds_keep_their_code() {
        let err = context().model_error(ModelError::InsufficientFunds);
        assert_eq!(err.code(), "ERR_INSUFFICIENT_FUNDS");
        assert_eq!(actix_web::ResponseError::status_code(&err), StatusCode::BAD_REQUEST);
    }

    #[::core::prelude::v1::test]
    fn default_fee_has_a_floor() {
        let settings = PaymentSettings::default();
        assert_eq!(settings.default_max_fee(1_000), settings.min_fee_msat);
        assert_eq!(settings.default_max_fee(100_000_000), 500_000);
    }

    #[actix_rt::test]
    async fn missing_token_is_unauthorized() {
        let app = app!();
        let response = test::call_service(&app, test::TestRequest::get().uri("/user").to_request()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "ERR_AUTH_NOT_SUPPLIED");
    }

    #[actix_rt::test]
    async fn malformed_token_is_unauthorized() {
        let app = app!();
        let request = test::TestRequest::get()
            .uri("/payments")
            .insert_header(("Authorization", "Bearer not.a.jwt"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "ERR_INVALID_JWT");
    }

    #[actix_rt::test]
    async fn expired_token_is_unauthorized() {
        let app = app!();
        let now = utils::time::time_now_secs();
        let claims = Claims {
            iat: now - 7_200,
            exp: now - 3_600,
            uid: 1,
            purpose: TokenPurpose::Access,
            email: None,
            stamp: None,
        };
        let token = JwtKeys::new(SECRET).generate(&claims).unwrap();
        let request = test::TestRequest::get()
            .uri("/payments")
            .insert_header(("Authorization", token))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "ERR_EXPIRED_JWT");
    }

    #[actix_rt::test]
    async fn reset_tokens_do_not_authorize() {
        let app = app!();
        let (token, _) = JwtKeys::new(SECRET)
            .generate_for(1, TokenPurpose::ResetPassword, 600)
            .unwrap();
        let request = test::TestRequest::get()
            .uri("/payments")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn weak_password_is_rejected_with_fields() {
        let app = app!();
        let request = test::TestRequest::post()
            .uri("/users")
            .set_json(serde_json::json!({"email": "satoshi@example.com", "password": "password1"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"]["code"], "ERR_VALIDATION");
        assert_eq!(body["error"]["fields"][0]["field"], "password");
        assert_eq!(body["error"]["fields"][0]["code"], "weak");
    }

    #[actix_rt::test]
    async fn malformed_json_is_a_bad_request() {
        let app = app!();
        let request = test::TestRequest::post()
            .uri("/login")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{\"email\": ")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "ERR_BAD_REQUEST");
    }

    #[actix_rt::test]
    async fn database_outage_is_opaque() {
        let app = app!();
        let request = test::TestRequest::get()
            .uri("/user")
            .insert_header(("Authorization", bearer(1)))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"]["message"], "Internal server error.");
    }
}
