//! Catalogue store errors

use thiserror::Error;

/// Errors surfaced by the catalogue store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row absent for the given identifier
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A column held a value the model cannot represent
    #[error("invalid catalogue data: {0}")]
    Invalid(String),

    /// Underlying database failure
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// JSON column (de)serialization failure
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether this is a foreign-key constraint violation (e.g. deleting a
    /// template still referenced by a server).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.message().to_ascii_lowercase().contains("constraint")
            }
            _ => false,
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
