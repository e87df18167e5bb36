//! Application configuration loaded from environment variables.

use std::time::Duration;

use booking_store::Money;
use saga::{SagaSettings, StripeConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `TENANT_PREFIX`: prefix of supplier idempotency refs (default: `"hotel"`)
/// - `PRICE_FLOOR_CENTS`: quotes below this are rejected (default: `100`)
/// - `SUPPLIER_TIMEOUT_MS` / `GATEWAY_TIMEOUT_MS`: outbound call bounds
/// - `STRIPE_API_KEY`: enables the Stripe gateway; in-memory gateway when unset
/// - `STRIPE_BASE_URL`: Stripe API root (default: `"https://api.stripe.com"`)
/// - `CHECKOUT_SUCCESS_URL` / `CHECKOUT_CANCEL_URL`: hosted checkout redirects
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub tenant_prefix: String,
    pub price_floor_cents: i64,
    pub supplier_timeout_ms: u64,
    pub gateway_timeout_ms: u64,
    pub stripe_api_key: Option<String>,
    pub stripe_base_url: String,
    pub checkout_success_url: Option<String>,
    pub checkout_cancel_url: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("tenant_prefix", &self.tenant_prefix)
            .field("price_floor_cents", &self.price_floor_cents)
            .field("supplier_timeout_ms", &self.supplier_timeout_ms)
            .field("gateway_timeout_ms", &self.gateway_timeout_ms)
            .field("stripe_api_key", &self.stripe_api_key.as_ref().map(|_| "<redacted>"))
            .field("stripe_base_url", &self.stripe_base_url)
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            tenant_prefix: non_empty("TENANT_PREFIX").unwrap_or(defaults.tenant_prefix),
            price_floor_cents: non_empty("PRICE_FLOOR_CENTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.price_floor_cents),
            supplier_timeout_ms: non_empty("SUPPLIER_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.supplier_timeout_ms),
            gateway_timeout_ms: non_empty("GATEWAY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.gateway_timeout_ms),
            stripe_api_key: non_empty("STRIPE_API_KEY"),
            stripe_base_url: non_empty("STRIPE_BASE_URL").unwrap_or(defaults.stripe_base_url),
            checkout_success_url: non_empty("CHECKOUT_SUCCESS_URL"),
            checkout_cancel_url: non_empty("CHECKOUT_CANCEL_URL"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_settings(&self) -> SagaSettings {
        SagaSettings {
            tenant_prefix: self.tenant_prefix.clone(),
            price_floor: Money::from_cents(self.price_floor_cents),
            supplier_timeout: Duration::from_millis(self.supplier_timeout_ms),
            gateway_timeout: Duration::from_millis(self.gateway_timeout_ms),
            success_url: self.checkout_success_url.clone(),
            cancel_url: self.checkout_cancel_url.clone(),
        }
    }

    /// Stripe client settings, if an API key is configured.
    pub fn stripe_config(&self) -> Option<StripeConfig> {
        let api_key = self.stripe_api_key.clone()?;
        let defaults = StripeConfig::default();
        Some(StripeConfig {
            api_key,
            base_url: self.stripe_base_url.clone(),
            timeout: Duration::from_millis(self.gateway_timeout_ms),
            success_url: self
                .checkout_success_url
                .clone()
                .unwrap_or(defaults.success_url),
            cancel_url: self
                .checkout_cancel_url
                .clone()
                .unwrap_or(defaults.cancel_url),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            tenant_prefix: "hotel".to_string(),
            price_floor_cents: 100,
            supplier_timeout_ms: 30_000,
            gateway_timeout_ms: 15_000,
            stripe_api_key: None,
            stripe_base_url: "https://api.stripe.com".to_string(),
            checkout_success_url: None,
            checkout_cancel_url: None,
        }
    }
}
