//! Operator endpoints. Errors carry the technical detail.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use booking_store::{BookingRecord, BookingStore, FailedPayment};
use saga::{
    CancellationOutcome, ConfirmationOutcome, GatewayRefund, RefundCommand, RefundOutcome,
    RefundPreview,
};
use serde::{Deserialize, Serialize};

use super::{AppState, parse_booking_id};
use crate::error::ApiError;

#[derive(Deserialize, Default)]
pub struct CancelSupplierRequest {
    /// Refund paid-minus-fee once the supplier has cancelled.
    #[serde(default)]
    pub auto_refund: bool,
    #[serde(default)]
    pub override_policy: bool,
}

#[derive(Deserialize)]
pub struct MarkFailedRequest {
    pub reason: String,
}

/// Response type for one audit-trail entry.
#[derive(Serialize)]
pub struct EventResponse {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: String,
    pub message: Option<String>,
    pub line: String,
    pub payload: serde_json::Value,
}

/// GET /admin/bookings/{id}: full ledger record.
#[tracing::instrument(skip(state))]
pub async fn get<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BookingRecord>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let record = state
        .saga
        .booking(booking_id)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(record))
}

/// POST /admin/bookings/{id}/retry-confirmation
#[tracing::instrument(skip(state))]
pub async fn retry_confirmation<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ConfirmationOutcome>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let outcome = state
        .saga
        .retry_confirmation(booking_id)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(outcome))
}

/// POST /admin/bookings/{id}/refund
#[tracing::instrument(skip(state, command))]
pub async fn refund<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(command): Json<RefundCommand>,
) -> Result<Json<RefundOutcome>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let outcome = state
        .saga
        .refund(booking_id, command)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(outcome))
}

/// GET /admin/bookings/{id}/refund-preview
#[tracing::instrument(skip(state))]
pub async fn refund_preview<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<RefundPreview>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let preview = state
        .saga
        .refund_preview(booking_id)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(preview))
}

/// GET /admin/bookings/{id}/refunds: refunds as the gateway sees them.
#[tracing::instrument(skip(state))]
pub async fn gateway_refunds<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<GatewayRefund>>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let refunds = state
        .saga
        .gateway_refunds(booking_id)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(refunds))
}

/// POST /admin/bookings/{id}/cancel-supplier
#[tracing::instrument(skip(state, req))]
pub async fn cancel_supplier<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelSupplierRequest>,
) -> Result<Json<CancellationOutcome>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let outcome = state
        .saga
        .cancel_supplier(booking_id, req.auto_refund, req.override_policy)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(outcome))
}

/// POST /admin/bookings/{id}/mark-failed
#[tracing::instrument(skip(state, req))]
pub async fn mark_failed<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<MarkFailedRequest>,
) -> Result<Json<BookingRecord>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("A reason is required".to_string()));
    }
    let record = state
        .saga
        .mark_failed(booking_id, &req.reason)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(record))
}

/// GET /admin/bookings/{id}/events: audit trail, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let booking_id = parse_booking_id(&id)?;
    let events = state
        .saga
        .events(booking_id)
        .await
        .map_err(ApiError::operator)?;

    let responses = events
        .into_iter()
        .map(|e| EventResponse {
            event_id: e.event_id.to_string(),
            event_type: e.kind.to_string(),
            timestamp: e.timestamp.to_rfc3339(),
            message: e.message().map(String::from),
            line: e.render(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

/// GET /admin/failed-payments
#[tracing::instrument(skip(state))]
pub async fn failed_payments<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<FailedPayment>>, ApiError> {
    let failed = state
        .saga
        .failed_payments()
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(failed))
}
