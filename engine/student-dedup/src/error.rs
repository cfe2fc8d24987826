//! Error types for student cleanup

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Constraint violation: {message}")]
    Constraint { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, DedupError>;

impl DedupError {
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint { message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Whether the error reports a record that no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Database(sqlx::Error::RowNotFound))
    }

    /// Translate driver errors for foreign key / unique violations into `Constraint`
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_foreign_key_violation() || db_err.is_unique_violation() {
                return Self::Constraint { message: db_err.message().to_string() };
            }
        }
        Self::Database(err)
    }
}
