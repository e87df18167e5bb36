//! Saga error types.
//!
//! Every variant carries the technical detail for operators. Guests only
//! ever see [`SagaError::user_message`].

use booking_store::{BookingId, BookingStatus};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The supplier quote was an error, below the price floor or already expired.
    #[error("Supplier quote rejected: {0}")]
    SupplierQuote(String),

    /// Operation attempted on a booking in the wrong status.
    #[error("Booking {booking_id} is {actual}; operation requires {}", list_statuses(.expected))]
    InvalidState {
        booking_id: BookingId,
        actual: BookingStatus,
        expected: Vec<BookingStatus>,
    },

    /// The supplier commit failed or timed out.
    #[error("Supplier commit failed: {message}")]
    SupplierCommit {
        message: String,
        /// True if the supplier may have created the reservation anyway.
        outcome_unknown: bool,
    },

    /// The supplier refused or failed to cancel.
    #[error("Supplier cancellation failed: {0}")]
    SupplierCancel(String),

    /// The payment provider call failed.
    #[error("Payment gateway error [{code}]: {message}")]
    Gateway { code: String, message: String },

    /// Refund attempted against a non-refundable booking without an override.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Booking, hold code or payment reference is unknown.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected before any side effect.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A notification could not be delivered.
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(DomainError),
}

fn list_statuses(statuses: &[BookingStatus]) -> String {
    statuses
        .iter()
        .map(BookingStatus::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidState {
                booking_id,
                actual,
                expected,
            } => SagaError::InvalidState {
                booking_id,
                actual,
                expected,
            },
            DomainError::NotFound(id) => SagaError::NotFound(format!("booking {id}")),
            DomainError::Validation(message) => SagaError::Validation(message),
            other => SagaError::Domain(other),
        }
    }
}

impl SagaError {
    pub fn gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        SagaError::Gateway {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Sanitized text safe to show a guest.
    pub fn user_message(&self) -> String {
        match self {
            SagaError::SupplierQuote(_) => {
                "This room is no longer available at the quoted price. Please search again."
                    .to_string()
            }
            SagaError::InvalidState { .. } => {
                "This booking can no longer be changed in its current state.".to_string()
            }
            SagaError::SupplierCommit { .. } => {
                "We received your payment but could not finalise your reservation yet. \
                 Our team has been notified and will contact you shortly."
                    .to_string()
            }
            SagaError::SupplierCancel(_) => {
                "The hotel could not cancel this reservation right now. Please try again later."
                    .to_string()
            }
            SagaError::Gateway { .. } => {
                "The payment provider could not process the request. Please try again later."
                    .to_string()
            }
            SagaError::PolicyViolation(_) => "This booking is non-refundable.".to_string(),
            SagaError::NotFound(_) => "Booking not found.".to_string(),
            SagaError::Validation(message) => message.clone(),
            SagaError::Notification(_) | SagaError::Domain(_) => {
                "Something went wrong on our side. Please try again later.".to_string()
            }
        }
    }

    /// Returns true if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::SupplierQuote(_)
            | SagaError::SupplierCommit { .. }
            | SagaError::SupplierCancel(_)
            | SagaError::Gateway { .. }
            | SagaError::Notification(_) => true,
            SagaError::Domain(err) => matches!(
                err,
                DomainError::Store(_) | DomainError::PaymentConflict(_)
            ),
            SagaError::InvalidState { .. }
            | SagaError::PolicyViolation(_)
            | SagaError::NotFound(_)
            | SagaError::Validation(_) => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
