//! Booking and payment status machines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a persisted status string is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// The status of a booking in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed ──┬──► Cancelled
///           │        ▲       └──► Refunded
///           │        │
///           ├──► ConfirmationFailed ──► Failed
///           │
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BookingStatus {
    /// Supplier hold obtained, awaiting payment and commit.
    #[default]
    Pending,

    /// Supplier reservation committed.
    Confirmed,

    /// Supplier reservation cancelled (terminal state).
    Cancelled,

    /// Guest refunded in full (terminal state).
    Refunded,

    /// Booking abandoned or given up on (terminal state).
    Failed,

    /// Guest was charged but the supplier commit did not happen.
    ConfirmationFailed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Cancelled,
        BookingStatus::Refunded,
        BookingStatus::Failed,
        BookingStatus::ConfirmationFailed,
    ];

    /// Returns true if `to` is a legal edge from this status.
    pub fn can_transition_to(&self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Pending, Failed)
                | (Pending, ConfirmationFailed)
                | (ConfirmationFailed, Confirmed)
                | (ConfirmationFailed, Failed)
                | (Confirmed, Cancelled)
                | (Confirmed, Refunded)
        )
    }

    /// Returns true if a supplier commit may be attempted in this status.
    pub fn can_confirm(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::ConfirmationFailed
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Refunded | BookingStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Refunded => "Refunded",
            BookingStatus::Failed => "Failed",
            BookingStatus::ConfirmationFailed => "ConfirmationFailed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                kind: "booking",
                value: s.to_string(),
            })
    }
}

/// The status of the gateway payment attached to a booking.
///
/// ```text
/// Pending ──┬──► Completed ◄──► Refunding ──► Refunded
///           └──► Failed
/// ```
///
/// `Refunding` marks a refund in flight at the gateway; only one may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Refunding,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Completed,
        PaymentStatus::Refunding,
        PaymentStatus::Refunded,
        PaymentStatus::Failed,
    ];

    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Completed)
                | (Pending, Failed)
                | (Completed, Refunding)
                | (Refunding, Completed)
                | (Refunding, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Refunding => "Refunding",
            PaymentStatus::Refunded => "Refunded",
            PaymentStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                kind: "payment",
                value: s.to_string(),
            })
    }
}
