//! HTTP route handlers.

pub mod admin;
pub mod bookings;
pub mod health;
pub mod metrics;
pub mod webhooks;

use booking_store::{BookingId, BookingStore};
use saga::BookingSaga;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: BookingStore> {
    pub saga: BookingSaga<S>,
}

fn parse_booking_id(id: &str) -> Result<BookingId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid booking ID: {e}")))
}
