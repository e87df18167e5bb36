//! Gateway webhook intake.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use booking_store::BookingStore;
use saga::{GatewayEvent, WebhookOutcome};

use super::AppState;
use crate::error::ApiError;

/// POST /webhooks/payments: apply a gateway event.
#[tracing::instrument(skip(state, body))]
pub async fn payments<S: BookingStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let event = GatewayEvent::from_stripe_json(&body).map_err(ApiError::operator)?;
    tracing::info!(kind = event.kind(), "webhook received");

    let outcome = state
        .saga
        .handle_webhook(event)
        .await
        .map_err(ApiError::operator)?;
    Ok(Json(outcome))
}
