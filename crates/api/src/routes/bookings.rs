//! Guest-facing booking endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use booking_store::{
    BookingId, BookingStatus, BookingStore, CancellationPolicySnapshot, ConfirmationDetails, Money,
};
use chrono::NaiveDate;
use saga::{
    ConfirmSource, ConfirmTarget, ConfirmationOutcome, PreBookOutcome, PreBookRequest,
    SessionStatusReport,
};
use serde::{Deserialize, Serialize};

use super::{AppState, parse_booking_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub booking_id: Option<BookingId>,
    pub hold_code: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// What a guest holding the verification token may see.
#[derive(Serialize)]
pub struct GuestBookingResponse {
    pub booking_id: BookingId,
    pub status: BookingStatus,
    pub hotel_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_name: String,
    pub total_price: Money,
    pub currency: String,
    pub cancellation_policy: CancellationPolicySnapshot,
    pub confirmation: Option<ConfirmationDetails>,
}

/// POST /bookings/hotel/prebook: hold the room and open a payment.
#[tracing::instrument(skip(state, req))]
pub async fn prebook<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PreBookRequest>,
) -> Result<(StatusCode, Json<PreBookOutcome>), ApiError> {
    let outcome = state.saga.prebook(req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /bookings/hotel/confirm: idempotent; accepts a booking id or a hold code.
#[tracing::instrument(skip(state, req))]
pub async fn confirm<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmationOutcome>, ApiError> {
    let target = match (req.booking_id, req.hold_code) {
        (Some(id), _) => ConfirmTarget::BookingId(id),
        (None, Some(code)) if !code.trim().is_empty() => ConfirmTarget::HoldCode(code),
        _ => {
            return Err(ApiError::BadRequest(
                "Either booking_id or hold_code is required".to_string(),
            ));
        }
    };

    let outcome = state.saga.confirm(target, ConfirmSource::Guest).await?;
    Ok(Json(outcome))
}

/// GET /bookings/hotel/checkout-session/{id}/status: poll payment and repair a missed webhook.
#[tracing::instrument(skip(state))]
pub async fn session_status<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusReport>, ApiError> {
    let report = state.saga.check_session_status(&session_id).await?;
    Ok(Json(report))
}

/// GET /bookings/{id}?token=: guest view of one booking.
#[tracing::instrument(skip(state, query))]
pub async fn get<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<GuestBookingResponse>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let record = state.saga.guest_booking(booking_id, &query.token).await?;

    Ok(Json(GuestBookingResponse {
        booking_id,
        status: record.status(),
        hotel_id: record.hotel.hotel_id,
        check_in: record.hotel.check_in,
        check_out: record.hotel.check_out,
        guest_name: record.hotel.guest_name,
        total_price: record.booking.total_price,
        currency: record.booking.currency,
        cancellation_policy: record.hotel.cancellation_policy,
        confirmation: record.hotel.confirmation,
    }))
}
