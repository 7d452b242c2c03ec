use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use futures::future::{err, ok, Ready};

use jsonwebtoken::{decode, encode, errors as JError, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use models::api_keys::ApiKey;
use models::error::ModelError;
use ring::digest;
use serde::{Deserialize, Serialize};
use slog as log;

use core_types::UserId;
use xerror::api::*;

use crate::{WebContext, WebDbPool};

pub const API_KEY_HEADER: &str = "x-api-key";

/// What a signed token may be used for. Tokens are only accepted for the purpose they were
/// issued with.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum TokenPurpose {
    Access,
    VerifyEmail,
    ResetPassword,
}

/// Struct holds info needed for JWT to function correctly
#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Timestamp when the token was issued.
    pub iat: i64,
    /// Timestamp when the token expires.
    pub exp: i64,
    /// User id
    pub uid: UserId,
    pub purpose: TokenPurpose,
    /// Email the verification token was sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Fingerprint of the password hash a reset token was issued against, so the token dies
    /// with the password it resets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
}

impl Claims {
    #[inline]
    pub const fn when_expires(&self) -> i64 {
        self.exp
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        utils::time::time_now_secs() >= self.exp
    }
}

/// Signing and verification keys, derived once from the configured secret.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey<'static>,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()).into_static(),
        }
    }

    /// Signs `claims` with HS512.
    pub fn generate(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::new(Algorithm::HS512), claims, &self.encoding).map_err(|_| ApiError::Auth(AuthError::InternalError))
    }

    pub fn generate_for(&self, uid: UserId, purpose: TokenPurpose, lifetime: i64) -> Result<(String, Claims), ApiError> {
        let now = utils::time::time_now_secs();
        let claims = Claims {
            iat: now,
            exp: now + lifetime,
            uid,
            purpose,
            email: None,
            stamp: None,
        };
        Ok((self.generate(&claims)?, claims))
    }

    /// Function checks the token supplied and validates it against the expected purpose.
    pub fn check(&self, token: &str, purpose: TokenPurpose) -> Result<Claims, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS512)).map_err(|e| {
            match e.into_kind() {
                JError::ErrorKind::ExpiredSignature => ApiError::JWT(JWTError::Expired),
                _ => ApiError::JWT(JWTError::Invalid),
            }
        })?;

        if data.claims.purpose != purpose {
            return Err(ApiError::JWT(JWTError::Invalid));
        }
        Ok(data.claims)
    }
}

/// Short fingerprint of a stored password hash.
pub fn password_stamp(hashed_password: &str) -> String {
    let digest = digest::digest(&digest::SHA256, hashed_password.as_bytes());
    base64::encode(&digest.as_ref()[..12])
}

#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize, Hash)]
pub enum AuthType {
    Jwt,
    ApiKey,
}

/// This struct unifies auth data across
/// multiple authentication methods.
#[derive(Debug, Clone)]
pub struct AuthData {
    pub uid: UserId,
    pub expiry: Option<i64>,
    pub auth_type: AuthType,
}

fn bearer_token(header: &str) -> &str {
    let header = header.trim();
    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => header,
    }
}

impl AuthData {
    fn from_api_key(request: &HttpRequest, key: &str) -> Result<Self, ApiError> {
        let pool = request
            .app_data::<WebDbPool>()
            .ok_or(ApiError::Auth(AuthError::InternalError))?;
        let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;

        match ApiKey::get_by_key(&conn, key) {
            Ok(api_key) => Ok(Self {
                uid: api_key.uid,
                expiry: None,
                auth_type: AuthType::ApiKey,
            }),
            Err(ModelError::NotFound) => Err(ApiError::Auth(AuthError::InvalidApiKey)),
            Err(_) => Err(ApiError::Db(DbError::CouldNotFetchData)),
        }
    }

    fn from_jwt(request: &HttpRequest, header: &str) -> Result<Self, ApiError> {
        let context = request
            .app_data::<WebContext>()
            .ok_or(ApiError::Auth(AuthError::InternalError))?;
        let claims = context.jwt.check(bearer_token(header), TokenPurpose::Access).map_err(|e| {
            log::debug!(context.logger, "Rejected bearer token: {}", e);
            e
        })?;

        Ok(Self {
            uid: claims.uid,
            expiry: Some(claims.when_expires()),
            auth_type: AuthType::Jwt,
        })
    }
}

impl FromRequest for AuthData {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(request: &HttpRequest, _: &mut Payload) -> Self::Future {
        let headers = request.headers();
        let result = if let Some(key) = headers.get(API_KEY_HEADER) {
            match key.to_str() {
                Ok(key) => Self::from_api_key(request, key.trim()),
                Err(_) => Err(ApiError::Auth(AuthError::InvalidApiKey)),
            }
        } else if let Some(jwt) = headers.get("authorization") {
            match jwt.to_str() {
                Ok(header) => Self::from_jwt(request, header),
                Err(_) => Err(ApiError::JWT(JWTError::Invalid)),
            }
        } else {
            Err(ApiError::JWT(JWTError::NotSupplied))
        };

        match result {
            Ok(auth_data) => ok(auth_data),
            Err(e) => err(Error::from(e)),
        }
    }
}
