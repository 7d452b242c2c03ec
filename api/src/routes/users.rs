use actix_web::{get, post, put, web::Json, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use slog as log;

use models::error::ModelError;
use models::users::*;
use xerror::api::*;

use crate::dto::{TokenResponse, UserResponse};
use crate::jwt::*;
use crate::mailer;
use crate::totp;
use crate::validation::{normalize_email, Validator};
use crate::{ApiContext, WebContext, WebDbPool};

#[derive(Deserialize)]
pub struct RegisterData {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

fn user_inputs<'a>(email: &'a str, first_name: Option<&'a str>, last_name: Option<&'a str>) -> Vec<&'a str> {
    let mut inputs = vec![email];
    if let Some((local, _)) = email.split_once('@') {
        inputs.push(local);
    }
    inputs.extend(first_name);
    inputs.extend(last_name);
    inputs
}

fn conflict_or(context: &ApiContext, err: ModelError) -> ApiError {
    match err {
        ModelError::AlreadyExists => ApiError::Auth(AuthError::UserExists),
        other => context.model_error(other),
    }
}

fn user_not_found(context: &ApiContext, err: ModelError) -> ApiError {
    match err {
        ModelError::NotFound => ApiError::Db(DbError::UserDoesNotExist),
        other => context.model_error(other),
    }
}

#[post("/users")]
pub async fn create_user(
    pool: WebDbPool,
    context: WebContext,
    register_data: Json<RegisterData>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&register_data.email);
    let first_name = register_data.first_name.as_deref().map(str::trim);
    let last_name = register_data.last_name.as_deref().map(str::trim);

    Validator::default()
        .email("email", &email)
        .password(
            "password",
            &register_data.password,
            &user_inputs(&email, first_name, last_name),
            context.settings.min_password_score,
        )
        .name("first_name", first_name)
        .name("last_name", last_name)
        .finish()?;

    let hashed_password = hash_password(&register_data.password).map_err(|e| context.model_error(e))?;
    let user = {
        let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
        InsertableUser {
            email,
            hashed_password,
            first_name: first_name.map(String::from),
            last_name: last_name.map(String::from),
        }
        .insert(&conn)
        .map_err(|e| conflict_or(&context, e))?
    };

    log::info!(context.logger, "Created user {}", user.uid);
    context.send_verification_email(&user).await;

    Ok(HttpResponse::Created().json(UserResponse::from(&user)))
}

#[derive(Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
    /// Current TOTP code, required once 2FA is enabled.
    pub totp: Option<String>,
}

#[post("/login")]
pub async fn login(pool: WebDbPool, context: WebContext, login_data: Json<LoginData>) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;

    // unknown emails look like wrong passwords
    let user = match User::get_by_email(&conn, &normalize_email(&login_data.email)) {
        Ok(user) => user,
        Err(ModelError::NotFound) => return Err(ApiError::Auth(AuthError::IncorrectPassword)),
        Err(e) => return Err(context.model_error(e)),
    };

    if !verify_password(&user.hashed_password, &login_data.password) {
        return Err(ApiError::Auth(AuthError::IncorrectPassword));
    }

    if user.totp_enabled() {
        let secret = user.totp_secret.as_deref().unwrap_or_default();
        match login_data.totp.as_deref() {
            None => return Err(ApiError::Auth(AuthError::TotpRequired)),
            Some(code) if !totp::verify_now(secret, code) => return Err(ApiError::Auth(AuthError::InvalidTotp)),
            Some(_) => {}
        }
    }

    let (token, claims) = context.access_token(&user)?;
    Ok(HttpResponse::Ok().json(TokenResponse {
        token,
        expires_at: claims.when_expires(),
    }))
}

#[post("/auth/refresh_token")]
pub async fn refresh_token(pool: WebDbPool, context: WebContext, auth_data: AuthData) -> Result<HttpResponse, ApiError> {
    if auth_data.auth_type != AuthType::Jwt {
        return Err(ApiError::JWT(JWTError::NotSupplied));
    }

    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = User::get_by_id(&conn, auth_data.uid).map_err(|e| user_not_found(&context, e))?;

    let (token, claims) = context.access_token(&user)?;
    Ok(HttpResponse::Ok().json(TokenResponse {
        token,
        expires_at: claims.when_expires(),
    }))
}

#[get("/user")]
pub async fn get_user(pool: WebDbPool, context: WebContext, auth_data: AuthData) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = User::get_by_id(&conn, auth_data.uid).map_err(|e| user_not_found(&context, e))?;

    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

#[derive(Deserialize)]
pub struct UpdateUserData {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[put("/user")]
pub async fn update_user(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    update_data: Json<UpdateUserData>,
) -> Result<HttpResponse, ApiError> {
    let email = update_data.email.as_deref().map(normalize_email);
    let first_name = update_data.first_name.as_deref().map(str::trim);
    let last_name = update_data.last_name.as_deref().map(str::trim);

    let mut validator = Validator::default();
    if let Some(email) = &email {
        validator.email("email", email);
    }
    validator
        .name("first_name", first_name)
        .name("last_name", last_name)
        .finish()?;

    let (user, email_changed) = {
        let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
        let current = User::get_by_id(&conn, auth_data.uid).map_err(|e| user_not_found(&context, e))?;
        let new_email = email.filter(|email| *email != current.email);
        let email_changed = new_email.is_some();

        let changes = UserProfileUpdate {
            has_verified_email: if email_changed { Some(false) } else { None },
            email: new_email,
            first_name: first_name.map(String::from),
            last_name: last_name.map(String::from),
        };
        let user = User::update_profile(&conn, auth_data.uid, &changes).map_err(|e| conflict_or(&context, e))?;
        (user, email_changed)
    };

    if email_changed {
        context.send_verification_email(&user).await;
    }

    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

#[derive(Deserialize)]
pub struct ChangePasswordData {
    pub old_password: String,
    pub new_password: String,
}

#[put("/user/change_password")]
pub async fn change_password(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    password_data: Json<ChangePasswordData>,
) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = User::get_by_id(&conn, auth_data.uid).map_err(|e| user_not_found(&context, e))?;

    if !verify_password(&user.hashed_password, &password_data.old_password) {
        return Err(ApiError::Auth(AuthError::IncorrectPassword));
    }

    Validator::default()
        .password(
            "new_password",
            &password_data.new_password,
            &user_inputs(&user.email, user.first_name.as_deref(), user.last_name.as_deref()),
            context.settings.min_password_score,
        )
        .finish()?;

    let hashed_password = hash_password(&password_data.new_password).map_err(|e| context.model_error(e))?;
    User::update_password(&conn, user.uid, &hashed_password).map_err(|e| context.model_error(e))?;

    Ok(HttpResponse::Ok().json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct TokenData {
    pub token: String,
}

fn check_email_token(context: &ApiContext, token: &str, purpose: TokenPurpose) -> Result<Claims, ApiError> {
    context
        .jwt
        .check(token.trim(), purpose)
        .map_err(|_| ApiError::Auth(AuthError::InvalidToken))
}

#[post("/user/verify_email")]
pub async fn verify_email(pool: WebDbPool, context: WebContext, token_data: Json<TokenData>) -> Result<HttpResponse, ApiError> {
    let claims = check_email_token(&context, &token_data.token, TokenPurpose::VerifyEmail)?;

    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = match User::get_by_id(&conn, claims.uid) {
        Ok(user) => user,
        Err(ModelError::NotFound) => return Err(ApiError::Auth(AuthError::InvalidToken)),
        Err(e) => return Err(context.model_error(e)),
    };

    // the token only verifies the address it was sent to
    if claims.email.as_deref() != Some(user.email.as_str()) {
        return Err(ApiError::Auth(AuthError::InvalidToken));
    }

    if !user.has_verified_email {
        User::mark_email_verified(&conn, user.uid).map_err(|e| context.model_error(e))?;
        log::info!(context.logger, "User {} verified their email", user.uid);
    }

    Ok(HttpResponse::Ok().json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct ResetRequestData {
    pub email: String,
}

/// Always answers 200 so that registered emails cannot be discovered.
#[post("/user/reset_password")]
pub async fn request_password_reset(
    pool: WebDbPool,
    context: WebContext,
    reset_data: Json<ResetRequestData>,
) -> Result<HttpResponse, ApiError> {
    let user = {
        let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
        match User::get_by_email(&conn, &normalize_email(&reset_data.email)) {
            Ok(user) => Some(user),
            Err(ModelError::NotFound) => None,
            Err(e) => return Err(context.model_error(e)),
        }
    };

    if let Some(user) = user {
        let now = utils::time::time_now_secs();
        let claims = Claims {
            iat: now,
            exp: now + context.settings.email_token_lifetime_secs,
            uid: user.uid,
            purpose: TokenPurpose::ResetPassword,
            email: Some(user.email.clone()),
            stamp: Some(password_stamp(&user.hashed_password)),
        };
        let token = context.jwt.generate(&claims)?;
        let email = mailer::password_reset_email(&user.email, &context.settings.public_url, &token);
        if let Err(err) = context.mailer.send(email).await {
            log::error!(context.logger, "Failed to send password reset email to user {}: {}", user.uid, err);
        }
    }

    Ok(HttpResponse::Ok().json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
pub struct ResetPasswordData {
    pub token: String,
    pub new_password: String,
}

#[put("/user/reset_password")]
pub async fn reset_password(
    pool: WebDbPool,
    context: WebContext,
    reset_data: Json<ResetPasswordData>,
) -> Result<HttpResponse, ApiError> {
    let claims = check_email_token(&context, &reset_data.token, TokenPurpose::ResetPassword)?;

    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;
    let user = match User::get_by_id(&conn, claims.uid) {
        Ok(user) => user,
        Err(ModelError::NotFound) => return Err(ApiError::Auth(AuthError::InvalidToken)),
        Err(e) => return Err(context.model_error(e)),
    };

    // a token stops working once the password it was issued against has changed
    if claims.stamp.as_deref() != Some(password_stamp(&user.hashed_password).as_str()) {
        return Err(ApiError::Auth(AuthError::InvalidToken));
    }

    Validator::default()
        .password(
            "new_password",
            &reset_data.new_password,
            &user_inputs(&user.email, user.first_name.as_deref(), user.last_name.as_deref()),
            context.settings.min_password_score,
        )
        .finish()?;

    let hashed_password = hash_password(&reset_data.new_password).map_err(|e| context.model_error(e))?;
    User::update_password(&conn, user.uid, &hashed_password).map_err(|e| context.model_error(e))?;
    log::info!(context.logger, "User {} reset their password", user.uid);

    Ok(HttpResponse::Ok().json(json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use actix_web::{http::StatusCode, test, App};

    macro_rules! app {
        () => {
            test::init_service(App::new().configure(crate::configure(unreachable_pool(), context()))).await
        };
    }

    #[::core::prelude::v1::test]
    fn user_inputs_include_the_mailbox() {
        let inputs = user_inputs("hal@example.com", Some("Hal"), None);
        assert_eq!(inputs, vec!["hal@example.com", "hal", "Hal"]);
    }

    #[actix_rt::test]
    async fn invalid_email_token_is_rejected_before_the_database() {
        let app = app!();
        let request = test::TestRequest::post()
            .uri("/user/verify_email")
            .set_json(json!({"token": "garbage"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"]["code"], "ERR_INVALID_TOKEN");
    }

    #[actix_rt::test]
    async fn access_token_cannot_reset_a_password() {
        let app = app!();
        let (token, _) = JwtKeys::new(SECRET).generate_for(1, TokenPurpose::Access, 600).unwrap();
        let request = test::TestRequest::put()
            .uri("/user/reset_password")
            .set_json(json!({"token": token, "new_password": "correct-Horse-battery-staple-91"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn invalid_registration_reports_every_field() {
        let app = app!();
        let request = test::TestRequest::post()
            .uri("/users")
            .set_json(json!({"email": "nope", "password": "short", "first_name": ""}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(response).await;
        let fields: Vec<&str> = body["error"]["fields"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|field| field["field"].as_str())
            .collect();
        assert_eq!(fields, vec!["email", "password", "first_name"]);
    }
}
