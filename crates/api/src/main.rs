//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use booking_store::{BookingStore, InMemoryBookingStore, PostgresBookingStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InMemoryPaymentGateway, InMemorySupplier, LoggingNotifier, PaymentGateway, StripeGateway,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn payment_gateway(config: &Config) -> Result<Arc<dyn PaymentGateway>, BoxError> {
    match config.stripe_config() {
        Some(stripe) => {
            tracing::info!(base_url = %stripe.base_url, "using Stripe payment gateway");
            Ok(Arc::new(StripeGateway::new(stripe)?))
        }
        None => {
            tracing::warn!("STRIPE_API_KEY not set, using in-memory payment gateway");
            Ok(Arc::new(InMemoryPaymentGateway::new()))
        }
    }
}

async fn serve<S: BookingStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let state = api::create_state(
        store,
        Arc::new(InMemorySupplier::new()),
        payment_gateway(&config)?,
        Arc::new(LoggingNotifier),
        config.saga_settings(),
    );
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::debug!(?config, "configuration loaded");

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the ledger store and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            let store = PostgresBookingStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL booking store");
            serve(config, store, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory booking store");
            serve(config, InMemoryBookingStore::new(), metrics_handle).await
        }
    }
}
