use crate::error::ModelError;
use crate::schema::users;

use chrono::{DateTime, Utc};
use core_types::UserId;
use diesel::prelude::*;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
static ITERATIONS: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(100_000) };
const CREDENTIAL_LEN: usize = digest::SHA256_OUTPUT_LEN;
const SALT_LEN: usize = 16;

type Credential = [u8; CREDENTIAL_LEN];

#[must_use]
fn derive(salt: &[u8], password: &str) -> Credential {
    let mut to_store: Credential = [0; CREDENTIAL_LEN];
    pbkdf2::derive(PBKDF2_ALG, ITERATIONS, salt, password.as_bytes(), &mut to_store);
    to_store
}

/// Hashes a password with a fresh random salt. The result is stored as `salt$hash`, both base64.
pub fn hash_password(password: &str) -> Result<String, ModelError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| ModelError::Randomness)?;

    Ok(format!("{}${}", base64::encode(&salt), base64::encode(&derive(&salt, password))))
}

#[must_use]
pub fn verify_password(stored: &str, attempted_password: &str) -> bool {
    let (salt, real_pwd) = match stored.split_once('$') {
        Some((salt, hash)) => match (base64::decode(salt), base64::decode(hash)) {
            (Ok(salt), Ok(hash)) => (salt, hash),
            _ => return false,
        },
        None => return false,
    };

    pbkdf2::verify(
        PBKDF2_ALG,
        ITERATIONS,
        salt.as_slice(),
        attempted_password.as_bytes(),
        real_pwd.as_slice(),
    )
    .is_ok()
}

#[derive(Queryable, Identifiable, Debug, Clone, Serialize)]
#[primary_key(uid)]
pub struct User {
    pub uid: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub balance_msat: i64,
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    pub confirmed_totp_secret: bool,
    pub has_verified_email: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Deserialize)]
#[table_name = "users"]
pub struct InsertableUser {
    pub email: String,
    pub hashed_password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Partial profile update. `None` fields are left untouched.
#[derive(AsChangeset, Debug, Default)]
#[table_name = "users"]
pub struct UserProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub has_verified_email: Option<bool>,
}

impl User {
    pub fn get_by_id(conn: &PgConnection, uid: UserId) -> Result<Self, ModelError> {
        Ok(users::dsl::users.find(uid).first::<Self>(conn)?)
    }

    pub fn get_by_email(conn: &PgConnection, email: &str) -> Result<Self, ModelError> {
        Ok(users::dsl::users.filter(users::email.eq(email)).first::<Self>(conn)?)
    }

    /// 2FA counts as enabled only once the secret has been confirmed with a code.
    pub fn totp_enabled(&self) -> bool {
        self.confirmed_totp_secret && self.totp_secret.is_some()
    }

    pub fn update_profile(conn: &PgConnection, uid: UserId, changes: &UserProfileUpdate) -> Result<Self, ModelError> {
        Ok(diesel::update(users::dsl::users.find(uid))
            .set((changes, users::updated_at.eq(Utc::now())))
            .get_result::<Self>(conn)?)
    }

    pub fn update_password(conn: &PgConnection, uid: UserId, hashed_password: &str) -> Result<usize, ModelError> {
        Ok(diesel::update(users::dsl::users.find(uid))
            .set((
                users::hashed_password.eq(hashed_password),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?)
    }

    pub fn mark_email_verified(conn: &PgConnection, uid: UserId) -> Result<usize, ModelError> {
        Ok(diesel::update(users::dsl::users.find(uid))
            .set((users::has_verified_email.eq(true), users::updated_at.eq(Utc::now())))
            .execute(conn)?)
    }

    pub fn set_totp(conn: &PgConnection, uid: UserId, secret: Option<&str>, confirmed: bool) -> Result<usize, ModelError> {
        Ok(diesel::update(users::dsl::users.find(uid))
            .set((
                users::totp_secret.eq(secret),
                users::confirmed_totp_secret.eq(confirmed),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?)
    }

    /// Adds `amount_msat` to the balance and returns the new balance.
    pub fn credit(conn: &PgConnection, uid: UserId, amount_msat: i64) -> Result<i64, ModelError> {
        if amount_msat < 0 {
            return Err(ModelError::InvalidAmount);
        }

        Ok(diesel::update(users::dsl::users.find(uid))
            .set((
                users::balance_msat.eq(users::balance_msat + amount_msat),
                users::updated_at.eq(Utc::now()),
            ))
            .returning(users::balance_msat)
            .get_result::<i64>(conn)?)
    }

    /// Subtracts `amount_msat` in a single guarded statement, so concurrent debits can never
    /// take the balance below zero. Returns the new balance.
    pub fn debit(conn: &PgConnection, uid: UserId, amount_msat: i64) -> Result<i64, ModelError> {
        if amount_msat < 0 {
            return Err(ModelError::InvalidAmount);
        }

        diesel::update(
            users::dsl::users
                .filter(users::uid.eq(uid))
                .filter(users::balance_msat.ge(amount_msat)),
        )
        .set((
            users::balance_msat.eq(users::balance_msat - amount_msat),
            users::updated_at.eq(Utc::now()),
        ))
        .returning(users::balance_msat)
        .get_result::<i64>(conn)
        .optional()?
        .ok_or(ModelError::InsufficientFunds)
    }
}

impl InsertableUser {
    pub fn insert(&self, conn: &PgConnection) -> Result<User, ModelError> {
        Ok(diesel::insert_into(users::table).values(self).get_result::<User>(conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{connection, create_user};

    #[test]
    fn password_hash_verifies() {
        let stored = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password(&stored, "correct horse battery staple"));
        assert!(!verify_password(&stored, "correct horse battery stable"));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let first = hash_password("hunter2hunter2").unwrap();
        let second = hash_password("hunter2hunter2").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("not-a-hash", "anything"));
        assert!(!verify_password("%%%$%%%", "anything"));
    }

    #[test]
    #[ignore]
    fn debit_never_goes_below_zero() {
        let conn = connection();
        conn.test_transaction::<_, ModelError, _>(|| {
            let user = create_user(&conn, "debit@example.com");
            assert_eq!(User::credit(&conn, user.uid, 5_000)?, 5_000);
            assert!(matches!(User::debit(&conn, user.uid, 5_001), Err(ModelError::InsufficientFunds)));
            assert_eq!(User::get_by_id(&conn, user.uid)?.balance_msat, 5_000);
            assert_eq!(User::debit(&conn, user.uid, 5_000)?, 0);
            Ok(())
        });
    }

    #[test]
    #[ignore]
    fn duplicate_email_is_rejected() {
        let conn = connection();
        conn.test_transaction::<_, ModelError, _>(|| {
            create_user(&conn, "dup@example.com");
            let again = InsertableUser {
                email: "dup@example.com".to_string(),
                hashed_password: "x".to_string(),
                first_name: None,
                last_name: None,
            };
            assert!(matches!(again.insert(&conn), Err(ModelError::AlreadyExists)));
            Ok(())
        });
    }
}
