//! API error types with HTTP response mapping.
//!
//! Guest routes answer with the sanitized message only. Operator routes add
//! the technical detail next to it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    /// Saga error raised on a guest-facing route.
    Guest(SagaError),
    /// Saga error raised on an operator route.
    Operator(SagaError),
}

impl ApiError {
    pub fn operator(err: SagaError) -> Self {
        ApiError::Operator(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Guest(err) => {
                let status = status_for(&err);
                log(status, &err);
                (status, serde_json::json!({ "error": err.user_message() }))
            }
            ApiError::Operator(err) => {
                let status = status_for(&err);
                log(status, &err);
                (
                    status,
                    serde_json::json!({
                        "error": err.user_message(),
                        "detail": err.to_string(),
                        "retryable": err.is_retryable(),
                    }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn log(status: StatusCode, err: &SagaError) {
    if status.is_server_error() {
        tracing::error!(error = %err, %status, "request failed");
    } else {
        tracing::warn!(error = %err, %status, "request rejected");
    }
}

fn status_for(err: &SagaError) -> StatusCode {
    match err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::NotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InvalidState { .. } => StatusCode::CONFLICT,
        SagaError::SupplierQuote(_) | SagaError::PolicyViolation(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SagaError::SupplierCommit { .. }
        | SagaError::SupplierCancel(_)
        | SagaError::Gateway { .. } => StatusCode::BAD_GATEWAY,
        SagaError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SagaError::Domain(err) => match err {
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::InvalidState { .. }
            | DomainError::IllegalTransition { .. }
            | DomainError::PaymentMissing(_)
            | DomainError::PaymentState { .. }
            | DomainError::PaymentConflict(_) => StatusCode::CONFLICT,
            DomainError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Guest(err)
    }
}
