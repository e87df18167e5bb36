//! Stripe-backed payment gateway over HTTP.
//!
//! Credentials and timeout are fixed at construction; each instance owns its
//! own `reqwest::Client`, so nothing is shared between tenants or tests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use booking_store::Money;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::gateway::{
    CheckoutSession, GatewayPaymentStatus, GatewayRefund, GatewaySessionStatus, IntentStatus,
    PaymentGateway, PaymentIntent, PaymentRequest, RefundRequest, SessionStatus,
};
use crate::error::SagaError;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub success_url: String,
    pub cancel_url: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            timeout: Duration::from_millis(15_000),
            success_url: "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}"
                .to_string(),
            cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl IntentResponse {
    fn payment_status(&self) -> GatewayPaymentStatus {
        match self.status.as_deref() {
            Some("succeeded") => GatewayPaymentStatus::Paid,
            _ => GatewayPaymentStatus::Unpaid,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    expires_at: Option<i64>,
    payment_status: String,
    status: Option<String>,
    payment_intent: Option<String>,
    amount_total: Option<i64>,
    customer_email: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    amount: i64,
    status: Option<String>,
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundList {
    data: Vec<RefundResponse>,
}

impl RefundResponse {
    fn into_refund(self, fallback_intent: &str) -> GatewayRefund {
        GatewayRefund {
            refund_id: self.id,
            intent_id: self
                .payment_intent
                .unwrap_or_else(|| fallback_intent.to_string()),
            amount: Money::from_cents(self.amount),
            status: self.status.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

fn metadata_params(prefix: &str, metadata: &BTreeMap<String, String>) -> Vec<(String, String)> {
    metadata
        .iter()
        .map(|(k, v)| (format!("{prefix}[{k}]"), v.clone()))
        .collect()
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, SagaError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("hotel-booking/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SagaError::gateway("configuration", e.to_string()))?;

        tracing::info!(base_url = %config.base_url, "created Stripe gateway client");
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn handle_response<T>(response: reqwest::Response, operation: &str) -> Result<T, SagaError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                SagaError::gateway("invalid_response", format!("{operation}: {e}"))
            });
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => (
                envelope
                    .error
                    .code
                    .or(envelope.error.kind)
                    .unwrap_or_else(|| status.as_u16().to_string()),
                envelope.error.message.unwrap_or(text),
            ),
            Err(_) => (status.as_u16().to_string(), text),
        };
        tracing::error!(%status, %code, %message, "Stripe {operation} failed");
        Err(SagaError::Gateway { code, message })
    }

    fn transport_error(operation: &str, err: reqwest::Error) -> SagaError {
        let code = if err.is_timeout() { "timeout" } else { "network" };
        tracing::warn!(error = %err, "Stripe {operation} transport failure");
        SagaError::gateway(code, format!("{operation}: {err}"))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: &PaymentRequest) -> Result<PaymentIntent, SagaError> {
        let mut params = vec![
            ("amount".to_string(), request.amount.cents().to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("description".to_string(), request.description.clone()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            params.push(("receipt_email".to_string(), email.clone()));
        }
        params.extend(metadata_params("metadata", &request.metadata));

        let response = self
            .client
            .post(self.url("payment_intents"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", format!("intent-{}", request.booking_id))
            .form(&params)
            .send()
            .await
            .map_err(|e| Self::transport_error("create_intent", e))?;

        let intent: IntentResponse = Self::handle_response(response, "create_intent").await?;
        Ok(PaymentIntent {
            client_secret: intent.client_secret.unwrap_or_default(),
            intent_id: intent.id,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &PaymentRequest,
    ) -> Result<CheckoutSession, SagaError> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                request
                    .success_url
                    .clone()
                    .unwrap_or_else(|| self.config.success_url.clone()),
            ),
            (
                "cancel_url".to_string(),
                request
                    .cancel_url
                    .clone()
                    .unwrap_or_else(|| self.config.cancel_url.clone()),
            ),
            (
                "client_reference_id".to_string(),
                request.booking_id.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount.cents().to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            params.push(("customer_email".to_string(), email.clone()));
        }
        params.extend(metadata_params("metadata", &request.metadata));
        params.extend(metadata_params(
            "payment_intent_data[metadata]",
            &request.metadata,
        ));

        let response = self
            .client
            .post(self.url("checkout/sessions"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", format!("session-{}", request.booking_id))
            .form(&params)
            .send()
            .await
            .map_err(|e| Self::transport_error("create_checkout_session", e))?;

        let session: SessionResponse =
            Self::handle_response(response, "create_checkout_session").await?;
        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
            expires_at: session
                .expires_at
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, SagaError> {
        let response = self
            .client
            .get(self.url(&format!("checkout/sessions/{session_id}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| Self::transport_error("get_session_status", e))?;

        let session: SessionResponse =
            Self::handle_response(response, "get_session_status").await?;

        let payment_status = match session.payment_status.as_str() {
            "paid" => GatewayPaymentStatus::Paid,
            "no_payment_required" => GatewayPaymentStatus::NoPaymentRequired,
            _ => GatewayPaymentStatus::Unpaid,
        };
        let session_status = match session.status.as_deref() {
            Some("complete") => GatewaySessionStatus::Complete,
            Some("expired") => GatewaySessionStatus::Expired,
            _ => GatewaySessionStatus::Open,
        };

        Ok(SessionStatus {
            session_id: session.id,
            payment_status,
            session_status,
            intent_id: session.payment_intent,
            amount_total: session.amount_total.map(Money::from_cents),
            customer_email: session.customer_email,
            metadata: session.metadata,
        })
    }

    async fn get_intent_status(&self, intent_id: &str) -> Result<IntentStatus, SagaError> {
        let response = self
            .client
            .get(self.url(&format!("payment_intents/{intent_id}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| Self::transport_error("get_intent_status", e))?;

        let intent: IntentResponse = Self::handle_response(response, "get_intent_status").await?;
        Ok(IntentStatus {
            payment_status: intent.payment_status(),
            amount: intent.amount.map(Money::from_cents),
            intent_id: intent.id,
            metadata: intent.metadata,
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<GatewayRefund, SagaError> {
        let mut params = vec![
            ("payment_intent".to_string(), request.intent_id.clone()),
            ("reason".to_string(), request.reason.clone()),
        ];
        if let Some(amount) = request.amount {
            params.push(("amount".to_string(), amount.cents().to_string()));
        }

        let response = self
            .client
            .post(self.url("refunds"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| Self::transport_error("create_refund", e))?;

        let refund: RefundResponse = Self::handle_response(response, "create_refund").await?;
        Ok(refund.into_refund(&request.intent_id))
    }

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<GatewayRefund>, SagaError> {
        let response = self
            .client
            .get(self.url("refunds"))
            .bearer_auth(&self.config.api_key)
            .query(&[("payment_intent", intent_id), ("limit", "100")])
            .send()
            .await
            .map_err(|e| Self::transport_error("list_refunds", e))?;

        let list: RefundList = Self::handle_response(response, "list_refunds").await?;
        Ok(list
            .data
            .into_iter()
            .map(|r| r.into_refund(intent_id))
            .collect())
    }
}
