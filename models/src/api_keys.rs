use crate::error::ModelError;
use crate::schema::api_keys;
use crate::users::User;

use chrono::{DateTime, Utc};
use core_types::UserId;
use diesel::prelude::*;
use ring::digest;
use serde::Serialize;
use uuid::Uuid;

const VISIBLE_LETTERS: usize = 4;

#[derive(Queryable, Identifiable, Associations, Debug, Clone, Serialize)]
#[belongs_to(User, foreign_key = "uid")]
pub struct ApiKey {
    pub id: i32,
    pub uid: UserId,
    #[serde(skip_serializing)]
    pub hashed_key: String,
    pub last_letters: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[table_name = "api_keys"]
pub struct InsertableApiKey {
    pub uid: UserId,
    pub hashed_key: String,
    pub last_letters: String,
}

/// Only the SHA-256 digest of a key ever reaches the database.
pub fn hash_key(key: &str) -> String {
    base64::encode(digest::digest(&digest::SHA256, key.as_bytes()).as_ref())
}

impl ApiKey {
    pub fn get_by_key(conn: &PgConnection, key: &str) -> Result<Self, ModelError> {
        Ok(api_keys::dsl::api_keys
            .filter(api_keys::hashed_key.eq(hash_key(key)))
            .first::<Self>(conn)?)
    }

    pub fn list_for_user(conn: &PgConnection, uid: UserId) -> Result<Vec<Self>, ModelError> {
        Ok(api_keys::dsl::api_keys
            .filter(api_keys::uid.eq(uid))
            .order(api_keys::id.asc())
            .load::<Self>(conn)?)
    }

    /// Removes key `kid` if it belongs to `uid`. Returns the number of deleted rows.
    pub fn delete_of_user(conn: &PgConnection, uid: UserId, kid: i32) -> Result<usize, ModelError> {
        Ok(
            diesel::delete(api_keys::table.filter(api_keys::id.eq(kid).and(api_keys::uid.eq(uid))))
                .execute(conn)?,
        )
    }
}

impl InsertableApiKey {
    /// Generates a fresh random key for `uid`. The plain key is returned next to the row and
    /// cannot be recovered later.
    pub fn generate(uid: UserId) -> (String, Self) {
        let key = Uuid::new_v4().to_simple().to_string();
        let last_letters = key[key.len() - VISIBLE_LETTERS..].to_string();
        let row = Self {
            uid,
            hashed_key: hash_key(&key),
            last_letters,
        };
        (key, row)
    }

    pub fn insert(&self, conn: &PgConnection) -> Result<ApiKey, ModelError> {
        Ok(diesel::insert_into(api_keys::table).values(self).get_result::<ApiKey>(conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{connection, create_user};

    #[test]
    fn generated_key_is_stored_hashed() {
        let (key, row) = InsertableApiKey::generate(3);
        assert_eq!(key.len(), 32);
        assert_ne!(row.hashed_key, key);
        assert_eq!(row.hashed_key, hash_key(&key));
        assert!(key.ends_with(&row.last_letters));
    }

    #[test]
    #[ignore]
    fn keys_are_scoped_to_their_owner() {
        let conn = connection();
        conn.test_transaction::<_, ModelError, _>(|| {
            let owner = create_user(&conn, "keys@example.com");
            let other = create_user(&conn, "other-keys@example.com");
            let (key, row) = InsertableApiKey::generate(owner.uid);
            let stored = row.insert(&conn)?;

            assert_eq!(ApiKey::get_by_key(&conn, &key)?.uid, owner.uid);
            assert_eq!(ApiKey::list_for_user(&conn, owner.uid)?.len(), 1);
            assert_eq!(ApiKey::delete_of_user(&conn, other.uid, stored.id)?, 0);
            assert_eq!(ApiKey::delete_of_user(&conn, owner.uid, stored.id)?, 1);
            assert!(matches!(ApiKey::get_by_key(&conn, &key), Err(ModelError::NotFound)));
            Ok(())
        });
    }
}
