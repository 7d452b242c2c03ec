use actix_web::{delete, post, put, web::Json, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use slog as log;

use models::users::User;
use xerror::api::*;

use crate::dto::TotpSetupResponse;
use crate::jwt::AuthData;
use crate::totp;
use crate::{WebContext, WebDbPool};

#[derive(Deserialize)]
pub struct TotpCode {
    pub code: String,
}

/// Starts enrollment. The secret only protects logins once it is confirmed with a code.
#[post("/user/2fa")]
pub async fn create_totp(pool: WebDbPool, context: WebContext, auth_data: AuthData) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = User::get_by_id(&conn, auth_data.uid).map_err(|e| context.model_error(e))?;
    if user.totp_enabled() {
        return Err(ApiError::Auth(AuthError::TotpAlreadyEnabled));
    }

    let secret = totp::generate_secret().ok_or(ApiError::Auth(AuthError::InternalError))?;
    let uri = totp::provisioning_uri(&secret, &user.email, &context.settings.totp_issuer)
        .map_err(|_| ApiError::Auth(AuthError::InternalError))?;
    User::set_totp(&conn, user.uid, Some(&secret), false).map_err(|e| context.model_error(e))?;

    Ok(HttpResponse::Ok().json(TotpSetupResponse { secret, uri }))
}

#[put("/user/2fa")]
pub async fn confirm_totp(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    code: Json<TotpCode>,
) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = User::get_by_id(&conn, auth_data.uid).map_err(|e| context.model_error(e))?;
    if user.totp_enabled() {
        return Err(ApiError::Auth(AuthError::TotpAlreadyEnabled));
    }

    let secret = user
        .totp_secret
        .as_deref()
        .ok_or(ApiError::Auth(AuthError::TotpNotEnabled))?;
    if !totp::verify_now(secret, &code.code) {
        return Err(ApiError::Auth(AuthError::InvalidTotp));
    }

    User::set_totp(&conn, user.uid, Some(secret), true).map_err(|e| context.model_error(e))?;
    log::info!(context.logger, "User {} enabled 2fa", user.uid);

    Ok(HttpResponse::Ok().json(json!({"totp_enabled": true})))
}

#[delete("/user/2fa")]
pub async fn disable_totp(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    code: Json<TotpCode>,
) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = User::get_by_id(&conn, auth_data.uid).map_err(|e| context.model_error(e))?;

    let secret = match user.totp_secret.as_deref() {
        Some(secret) if user.totp_enabled() => secret,
        _ => return Err(ApiError::Auth(AuthError::TotpNotEnabled)),
    };
    if !totp::verify_now(secret, &code.code) {
        return Err(ApiError::Auth(AuthError::InvalidTotp));
    }

    User::set_totp(&conn, user.uid, None, false).map_err(|e| context.model_error(e))?;
    log::info!(context.logger, "User {} disabled 2fa", user.uid);

    Ok(HttpResponse::Ok().json(json!({"totp_enabled": false})))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use actix_web::{http::StatusCode, test, App};

    #[actix_rt::test]
    async fn enrollment_needs_a_token() {
        let app = test::init_service(App::new().configure(crate::configure(unreachable_pool(), context()))).await;
        let response = test::call_service(&app, test::TestRequest::post().uri("/user/2fa").to_request()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn confirmation_needs_a_code() {
        let app = test::init_service(App::new().configure(crate::configure(unreachable_pool(), context()))).await;
        let request = test::TestRequest::put()
            .uri("/user/2fa")
            .insert_header(("Authorization", bearer(1)))
            .set_json(serde_json::json!({"totp": "123456"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
