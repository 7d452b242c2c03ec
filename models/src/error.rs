use diesel::result::{DatabaseErrorKind, Error as DieselError};
use err_derive::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(display = "Migrations failed to run")]
    MigrationError(#[source] diesel_migrations::RunMigrationsError),
    #[error(display = "Migration command failed: {}", _0)]
    MigrationCommand(String),
    #[error(display = "Database error: {}", _0)]
    Db(DieselError),
    #[error(display = "Record already exists.")]
    AlreadyExists,
    #[error(display = "Record not found.")]
    NotFound,
    #[error(display = "Insufficient funds.")]
    InsufficientFunds,
    #[error(display = "Invalid amount.")]
    InvalidAmount,
    #[error(display = "System randomness unavailable.")]
    Randomness,
}

impl From<DieselError> for ModelError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => ModelError::NotFound,
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => ModelError::AlreadyExists,
            other => ModelError::Db(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_mapped() {
        assert!(matches!(ModelError::from(DieselError::NotFound), ModelError::NotFound));
        assert!(matches!(ModelError::from(DieselError::RollbackTransaction), ModelError::Db(_)));
    }
}
