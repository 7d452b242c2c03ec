#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod api_keys;
pub mod error;
pub mod payments;
mod schema;
pub mod transactions;
pub mod users;

use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use diesel::migration::Migration;
use error::ModelError;
use std::path::{Path, PathBuf};

embed_migrations!("./migrations");

/// Our init function must be called once at the startup of any program using this crate.
/// It applies every pending embedded migration.
pub fn init(conn: &PgConnection) -> Result<(), ModelError> {
    Ok(embedded_migrations::run(conn)?)
}

/// Location of the migration sources, needed for the revert and status commands.
pub fn migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

/// Reverts the most recently applied migration and returns its version.
pub fn revert_latest(conn: &PgConnection, dir: &Path) -> Result<String, ModelError> {
    diesel_migrations::revert_latest_migration_in_directory(conn, dir)
        .map_err(|err| ModelError::MigrationCommand(err.to_string()))
}

/// Lists every known migration version and whether it has been applied.
pub fn status(conn: &PgConnection, dir: &Path) -> Result<Vec<(String, bool)>, ModelError> {
    let marked = diesel_migrations::mark_migrations_in_directory(conn, dir)?;
    Ok(marked
        .into_iter()
        .map(|(migration, applied)| (migration.version().to_string(), applied))
        .collect())
}

/// Drops every table, including the migration bookkeeping.
pub fn drop_all(conn: &PgConnection) -> Result<(), ModelError> {
    conn.batch_execute(
        "DROP TABLE IF EXISTS api_keys, transactions, payments, users CASCADE; \
         DROP TABLE IF EXISTS __diesel_schema_migrations;",
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use crate::users::{hash_password, InsertableUser, User};
    use diesel::{Connection, PgConnection};

    /// Connection to the database named by `TEST_DATABASE_URL`, migrated to the latest schema.
    pub fn connection() -> PgConnection {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let conn = PgConnection::establish(&url).expect("failed to connect to the test database");
        crate::init(&conn).expect("failed to run migrations");
        conn
    }

    pub fn create_user(conn: &PgConnection, email: &str) -> User {
        InsertableUser {
            email: email.to_string(),
            hashed_password: hash_password("not so secret").unwrap(),
            first_name: None,
            last_name: None,
        }
        .insert(conn)
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_ship_with_the_crate() {
        let dir = migrations_dir();
        for table in ["users", "payments", "transactions", "api_keys"] {
            let found = std::fs::read_dir(&dir)
                .unwrap()
                .filter_map(Result::ok)
                .any(|entry| entry.file_name().to_string_lossy().ends_with(&format!("create_{}", table)));
            assert!(found, "missing migration for {}", table);
        }
    }
}
