use actix_web::{
    get, post,
    web::{Json, Path, Query},
    HttpResponse,
};
use serde::Deserialize;
use slog as log;

use core_types::{Direction, PaymentStatus};
use lnd_connector::InvoiceRequest;
use models::error::ModelError;
use models::payments::{InsertablePayment, Payment};
use xerror::api::*;
use xerror::lnd_connector::LndConnectorError;

use crate::dto::{Pagination, PaymentResponse};
use crate::jwt::AuthData;
use crate::validation::{Validator, MAX_MEMO_LEN};
use crate::{PaymentSettings, WebContext, WebDbPool};

#[derive(Deserialize)]
pub struct CreateInvoiceData {
    /// Zero creates an invoice the payer picks the amount for.
    pub amount_msat: i64,
    pub memo: Option<String>,
    /// Committed to by hash instead of being embedded in the invoice.
    pub description: Option<String>,
    /// Receives a POST with the payment once the invoice settles.
    pub callback_url: Option<String>,
    pub expiry_secs: Option<i64>,
}

fn is_callback_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

fn validate_invoice(data: &CreateInvoiceData, settings: &PaymentSettings) -> Result<i64, ApiError> {
    let expiry_secs = data.expiry_secs.unwrap_or(settings.default_invoice_expiry_secs);
    Validator::default()
        .check(data.amount_msat >= 0, "amount_msat", "negative", "Amount must not be negative.")
        .check(
            data.amount_msat <= settings.max_invoice_amount_msat,
            "amount_msat",
            "too_large",
            "Amount is above the invoice limit.",
        )
        .check(
            data.memo.as_ref().map_or(true, |memo| memo.len() <= MAX_MEMO_LEN),
            "memo",
            "too_long",
            "Memo is too long.",
        )
        .check(
            data.callback_url.as_deref().map_or(true, is_callback_url),
            "callback_url",
            "invalid",
            "Callback url must be an http(s) url.",
        )
        .check(
            (1..=settings.max_invoice_expiry_secs).contains(&expiry_secs),
            "expiry_secs",
            "out_of_range",
            "Expiry is out of range.",
        )
        .finish()?;
    Ok(expiry_secs)
}

#[post("/invoices/create")]
pub async fn create_invoice(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    invoice_data: Json<CreateInvoiceData>,
) -> Result<HttpResponse, ApiError> {
    let invoice_data = invoice_data.into_inner();
    let expiry_secs = validate_invoice(&invoice_data, &context.payments)?;

    let invoice = context
        .lightning
        .add_invoice(InvoiceRequest {
            amount_msat: invoice_data.amount_msat,
            memo: invoice_data.memo.clone(),
            description: invoice_data.description.clone(),
            expiry_secs,
        })
        .await
        .map_err(|e| context.node_error(e))?;

    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let payment = InsertablePayment {
        uid: auth_data.uid,
        payment_request: invoice.payment_request,
        payment_hash: invoice.payment_hash,
        preimage: None,
        status: PaymentStatus::Open,
        direction: Direction::Inbound,
        amount_msat: invoice_data.amount_msat,
        fee_msat: 0,
        memo: invoice_data.memo,
        description: invoice_data.description,
        callback_url: invoice_data.callback_url,
        expiry_secs,
    }
    .insert(&conn)
    .map_err(|e| context.model_error(e))?;

    log::info!(context.logger, "User {} created invoice {}", auth_data.uid, payment.id);
    Ok(HttpResponse::Created().json(PaymentResponse::from(&payment)))
}

#[derive(Deserialize)]
pub struct PayInvoiceData {
    pub payment_request: String,
    /// Upper bound on routing fees, defaults to a share of the amount.
    pub max_fee_msat: Option<i64>,
}

#[post("/invoices/pay")]
pub async fn pay_invoice(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    pay_data: Json<PayInvoiceData>,
) -> Result<HttpResponse, ApiError> {
    let payment_request = pay_data.payment_request.trim().to_string();
    Validator::default()
        .check(
            !payment_request.is_empty(),
            "payment_request",
            "required",
            "Payment request is required.",
        )
        .check(
            pay_data.max_fee_msat.map_or(true, |fee| fee >= 0),
            "max_fee_msat",
            "negative",
            "Fee limit must not be negative.",
        )
        .finish()?;

    let decoded = context
        .lightning
        .decode_payment_request(&payment_request)
        .await
        .map_err(|e| context.node_error(e))?;

    Validator::default()
        .check(
            decoded.amount_msat > 0,
            "payment_request",
            "amount_required",
            "Invoices without an amount cannot be paid.",
        )
        .finish()?;
    if decoded.is_expired(utils::time::time_now_secs()) {
        return Err(ApiError::Payment(PaymentError::InvoiceExpired));
    }

    let max_fee_msat = pay_data
        .max_fee_msat
        .unwrap_or_else(|| context.payments.default_max_fee(decoded.amount_msat));

    let reserved = {
        let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
        InsertablePayment {
            uid: auth_data.uid,
            payment_request: payment_request.clone(),
            payment_hash: decoded.payment_hash.clone(),
            preimage: None,
            status: PaymentStatus::Open,
            direction: Direction::Outbound,
            amount_msat: decoded.amount_msat,
            fee_msat: max_fee_msat,
            memo: None,
            description: Some(decoded.description.clone()).filter(|description| !description.is_empty()),
            callback_url: None,
            expiry_secs: decoded.expiry_secs,
        }
        .reserve_outbound(&conn)
        .map_err(|e| match e {
            ModelError::AlreadyExists => ApiError::Payment(PaymentError::InvoiceAlreadyPaid),
            other => context.model_error(other),
        })?
    };

    let result = context.lightning.pay_invoice(&payment_request, max_fee_msat).await;
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    match result {
        Ok(paid) => {
            let transition = Payment::complete_outbound(&conn, reserved.id, &paid.preimage, paid.fee_msat)
                .map_err(|e| context.model_error(e))?;
            log::info!(
                context.logger,
                "User {} paid {} msat with {} msat fees",
                auth_data.uid,
                reserved.amount_msat,
                paid.fee_msat
            );
            Ok(HttpResponse::Ok().json(PaymentResponse::from(transition.payment())))
        }
        Err(LndConnectorError::PaymentRejected) => {
            Payment::fail_outbound_and_refund(&conn, reserved.id).map_err(|e| context.model_error(e))?;
            log::warn!(context.logger, "Payment {} failed, refunded user {}", reserved.id, auth_data.uid);
            Err(context.node_error(LndConnectorError::PaymentRejected))
        }
        Err(e) => {
            // outcome unknown, the outbound resolver settles or refunds it once lnd knows
            log::error!(context.logger, "Payment {} left open: {}", reserved.id, e);
            Err(context.node_error(e))
        }
    }
}

#[get("/payments")]
pub async fn list_payments(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    pagination: Query<Pagination>,
) -> Result<HttpResponse, ApiError> {
    let (limit, offset) = pagination.validate()?;

    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let payments = Payment::list_for_user(&conn, auth_data.uid, limit, offset).map_err(|e| context.model_error(e))?;

    let payments: Vec<PaymentResponse> = payments.iter().map(PaymentResponse::from).collect();
    Ok(HttpResponse::Ok().json(payments))
}

#[get("/payment/{id}")]
pub async fn get_payment(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    id: Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let payment = match Payment::get_by_id_for_user(&conn, auth_data.uid, id.into_inner()) {
        Ok(payment) => payment,
        Err(ModelError::NotFound) => return Err(ApiError::NotFound("Payment".to_string())),
        Err(e) => return Err(context.model_error(e)),
    };

    Ok(HttpResponse::Ok().json(PaymentResponse::from(&payment)))
}
