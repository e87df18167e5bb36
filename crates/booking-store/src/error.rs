use thiserror::Error;

use crate::BookingId;

/// Errors that can occur when interacting with the booking store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The booking does not exist.
    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    /// A unique key (booking id, hold code) is already taken.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A persisted value could not be mapped back into the model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A model value does not fit its column.
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<common::ParseStatusError> for StoreError {
    fn from(err: common::ParseStatusError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for booking store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
