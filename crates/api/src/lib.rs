//! HTTP API server for the hotel booking saga.
//!
//! Guest endpoints drive PreBook, confirmation and the status poll; operator
//! endpoints under `/admin` drive retries and compensation. Structured
//! logging comes from tracing and metrics are exported for Prometheus.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use booking_store::BookingStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    BookingSaga, InMemoryPaymentGateway, InMemorySupplier, LoggingNotifier, Notifier,
    PaymentGateway, SagaSettings, SupplierClient,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BookingStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/bookings/hotel/prebook",
            post(routes::bookings::prebook::<S>),
        )
        .route(
            "/bookings/hotel/confirm",
            post(routes::bookings::confirm::<S>),
        )
        .route(
            "/bookings/hotel/checkout-session/{id}/status",
            get(routes::bookings::session_status::<S>),
        )
        .route("/bookings/{id}", get(routes::bookings::get::<S>))
        .route("/admin/bookings/{id}", get(routes::admin::get::<S>))
        .route(
            "/admin/bookings/{id}/retry-confirmation",
            post(routes::admin::retry_confirmation::<S>),
        )
        .route(
            "/admin/bookings/{id}/refund",
            post(routes::admin::refund::<S>),
        )
        .route(
            "/admin/bookings/{id}/refund-preview",
            get(routes::admin::refund_preview::<S>),
        )
        .route(
            "/admin/bookings/{id}/refunds",
            get(routes::admin::gateway_refunds::<S>),
        )
        .route(
            "/admin/bookings/{id}/cancel-supplier",
            post(routes::admin::cancel_supplier::<S>),
        )
        .route(
            "/admin/bookings/{id}/mark-failed",
            post(routes::admin::mark_failed::<S>),
        )
        .route(
            "/admin/bookings/{id}/events",
            get(routes::admin::events::<S>),
        )
        .route(
            "/admin/failed-payments",
            get(routes::admin::failed_payments::<S>),
        )
        .route("/webhooks/payments", post(routes::webhooks::payments::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state from explicitly constructed collaborators.
pub fn create_state<S: BookingStore + Clone + 'static>(
    store: S,
    supplier: Arc<dyn SupplierClient>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    settings: SagaSettings,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        saga: BookingSaga::new(store, supplier, gateway, notifier, settings),
    })
}

/// Creates the default application state with in-memory supplier and gateway.
///
/// The fakes are returned so callers can drive them (complete a checkout,
/// make the supplier fail).
pub fn create_default_state<S: BookingStore + Clone + 'static>(
    store: S,
    settings: SagaSettings,
) -> (Arc<AppState<S>>, InMemorySupplier, InMemoryPaymentGateway) {
    let supplier = InMemorySupplier::new();
    let gateway = InMemoryPaymentGateway::new();

    let state = create_state(
        store,
        Arc::new(supplier.clone()),
        Arc::new(gateway.clone()),
        Arc::new(LoggingNotifier),
        settings,
    );

    (state, supplier, gateway)
}
