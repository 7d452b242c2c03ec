use actix_web::{
    get, post,
    web::{self, Json, Path, Query},
    HttpResponse,
};
use serde::Deserialize;
use serde_json::json;
use slog as log;

use core_types::{DbPool, UserId};
use models::error::ModelError;
use models::transactions::{InsertableTransaction, Transaction};
use xerror::api::*;

use crate::dto::{Pagination, TransactionResponse};
use crate::jwt::AuthData;
use crate::validation::{Validator, MAX_MEMO_LEN};
use crate::{ApiContext, WebContext, WebDbPool};

/// Hands out the user's unused deposit address, or a fresh one from the node.
#[post("/deposit")]
pub async fn deposit(pool: WebDbPool, context: WebContext, auth_data: AuthData) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;

    if let Some(unused) = Transaction::unused_deposit_for_user(&conn, auth_data.uid).map_err(|e| context.model_error(e))? {
        return Ok(HttpResponse::Ok().json(json!({"address": unused.address, "transaction_id": unused.id})));
    }

    let chain = context.chain.clone();
    let address = web::block(move || chain.new_address())
        .await
        .map_err(|_| ApiError::Payment(PaymentError::NodeUnavailable))?
        .map_err(|e| {
            log::error!(context.logger, "Could not get a new address: {}", e);
            ApiError::Payment(PaymentError::NodeUnavailable)
        })?;
    let row = InsertableTransaction::deposit(auth_data.uid, address)
        .insert(&conn)
        .map_err(|e| context.model_error(e))?;

    log::info!(context.logger, "New deposit address for user {}", auth_data.uid);
    Ok(HttpResponse::Created().json(json!({"address": row.address, "transaction_id": row.id})))
}

#[derive(Deserialize)]
pub struct WithdrawData {
    pub address: String,
    pub amount_sat: i64,
    pub description: Option<String>,
}

/// Reserves the amount, broadcasts, then records the txid. A failed broadcast is refunded.
fn send_withdrawal(
    pool: &DbPool,
    context: &ApiContext,
    uid: UserId,
    address: &str,
    amount_sat: i64,
    description: Option<String>,
) -> Result<Transaction, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let pending = Transaction::reserve_withdrawal(&conn, uid, address, amount_sat, description)
        .map_err(|e| context.model_error(e))?;

    match context.chain.send_to_address(address, amount_sat) {
        Ok(txid) => Transaction::record_broadcast(&conn, pending.id, &txid).map_err(|e| {
            log::crit!(
                context.logger,
                "Withdrawal {} was broadcast in {} but the txid was not recorded: {}",
                pending.id,
                txid,
                e
            );
            context.model_error(e)
        }),
        Err(err) => {
            log::error!(context.logger, "Withdrawal {} of user {} was not broadcast: {}", pending.id, uid, err);
            if let Err(e) = Transaction::refund_withdrawal(&conn, pending.id) {
                log::crit!(context.logger, "Could not refund withdrawal {}: {}", pending.id, e);
            }
            Err(ApiError::Payment(PaymentError::NodeUnavailable))
        }
    }
}

#[post("/withdraw")]
pub async fn withdraw(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    withdraw_data: Json<WithdrawData>,
) -> Result<HttpResponse, ApiError> {
    let withdraw_data = withdraw_data.into_inner();
    let address = withdraw_data.address.trim().to_string();

    Validator::default()
        .check(!address.is_empty(), "address", "required", "Address is required.")
        .check(
            withdraw_data.amount_sat >= context.payments.min_withdrawal_sat,
            "amount_sat",
            "too_small",
            "Amount is below the withdrawal minimum.",
        )
        .check(
            withdraw_data
                .description
                .as_ref()
                .map_or(true, |description| description.len() <= MAX_MEMO_LEN),
            "description",
            "too_long",
            "Description is too long.",
        )
        .finish()?;

    if context.chain.validate_address(&address).is_err() {
        return Err(ApiError::Payment(PaymentError::InvalidAddress));
    }

    let uid = auth_data.uid;
    let amount_sat = withdraw_data.amount_sat;
    let sender = context.clone();
    let tx = web::block(move || send_withdrawal(&pool, &sender, uid, &address, amount_sat, withdraw_data.description))
        .await
        .map_err(|_| ApiError::Payment(PaymentError::NodeUnavailable))??;

    log::info!(context.logger, "User {} withdrew {} sat in {:?}", uid, amount_sat, tx.txid);
    Ok(HttpResponse::Ok().json(TransactionResponse::from(&tx)))
}

#[get("/transactions")]
pub async fn list_transactions(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    pagination: Query<Pagination>,
) -> Result<HttpResponse, ApiError> {
    let (limit, offset) = pagination.validate()?;

    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let transactions =
        Transaction::list_for_user(&conn, auth_data.uid, limit, offset).map_err(|e| context.model_error(e))?;

    let transactions: Vec<TransactionResponse> = transactions.iter().map(TransactionResponse::from).collect();
    Ok(HttpResponse::Ok().json(transactions))
}

#[get("/transaction/{id}")]
pub async fn get_transaction(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    id: Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let tx = match Transaction::get_by_id_for_user(&conn, auth_data.uid, id.into_inner()) {
        Ok(tx) => tx,
        Err(ModelError::NotFound) => return Err(ApiError::NotFound("Transaction".to_string())),
        Err(e) => return Err(context.model_error(e)),
    };

    Ok(HttpResponse::Ok().json(TransactionResponse::from(&tx)))
}
