//! Domain error types.

use booking_store::{BookingId, BookingStatus, PaymentStatus, StoreError};
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The booking is not in a status the operation accepts.
    #[error("Booking {booking_id} is {actual}; operation requires {}", list_statuses(.expected))]
    InvalidState {
        booking_id: BookingId,
        actual: BookingStatus,
        expected: Vec<BookingStatus>,
    },

    /// The requested edge is not part of the status graph.
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// The booking does not exist.
    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    /// The booking has no payment attached yet.
    #[error("Booking {0} has no payment")]
    PaymentMissing(BookingId),

    /// The payment is not in a status the operation accepts.
    #[error("Payment for booking {booking_id} is {actual}")]
    PaymentState {
        booking_id: BookingId,
        actual: PaymentStatus,
    },

    /// The payment changed between read and write.
    #[error("Payment for booking {0} was modified concurrently")]
    PaymentConflict(BookingId),

    /// Input rejected before touching the store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred in the booking store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn list_statuses(statuses: &[BookingStatus]) -> String {
    statuses
        .iter()
        .map(BookingStatus::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_lists_expected_statuses() {
        let err = DomainError::InvalidState {
            booking_id: BookingId::new(),
            actual: BookingStatus::Cancelled,
            expected: vec![BookingStatus::Pending, BookingStatus::ConfirmationFailed],
        };
        let text = err.to_string();
        assert!(text.contains("is Cancelled"));
        assert!(text.ends_with("Pending | ConfirmationFailed"));
    }
}
