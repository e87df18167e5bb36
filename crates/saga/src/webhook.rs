//! Gateway webhook events.
//!
//! Only the fields the saga acts on are parsed. Signature verification is
//! left to the edge in front of this service.

use std::collections::BTreeMap;

use booking_store::Money;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::services::GatewayPaymentStatus;

/// A payment event pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    CheckoutCompleted {
        session_id: String,
        intent_id: Option<String>,
        payment_status: GatewayPaymentStatus,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        amount_total: Option<Money>,
        customer_email: Option<String>,
    },
    CheckoutExpired {
        session_id: String,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    PaymentSucceeded {
        intent_id: String,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        amount: Option<Money>,
    },
    PaymentFailed {
        intent_id: String,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        amount: Option<Money>,
        reason: String,
    },
    /// An event type the saga does not act on.
    Ignored { event_type: String },
}

impl GatewayEvent {
    pub fn kind(&self) -> &str {
        match self {
            GatewayEvent::CheckoutCompleted { .. } => "checkout_completed",
            GatewayEvent::CheckoutExpired { .. } => "checkout_expired",
            GatewayEvent::PaymentSucceeded { .. } => "payment_succeeded",
            GatewayEvent::PaymentFailed { .. } => "payment_failed",
            GatewayEvent::Ignored { event_type } => event_type,
        }
    }

    /// Parses a Stripe event envelope.
    pub fn from_stripe_json(body: &[u8]) -> Result<Self, SagaError> {
        let envelope: StripeEnvelope = serde_json::from_slice(body)
            .map_err(|e| SagaError::Validation(format!("malformed webhook body: {e}")))?;

        let event = match envelope.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let session: StripeSessionObject = object(envelope.data.object)?;
                GatewayEvent::CheckoutCompleted {
                    session_id: session.id,
                    intent_id: session.payment_intent,
                    payment_status: parse_payment_status(session.payment_status.as_deref()),
                    metadata: session.metadata,
                    amount_total: session.amount_total.map(Money::from_cents),
                    customer_email: session.customer_details.and_then(|d| d.email),
                }
            }
            "checkout.session.expired" => {
                let session: StripeSessionObject = object(envelope.data.object)?;
                GatewayEvent::CheckoutExpired {
                    session_id: session.id,
                    metadata: session.metadata,
                }
            }
            "payment_intent.succeeded" => {
                let intent: StripeIntentObject = object(envelope.data.object)?;
                GatewayEvent::PaymentSucceeded {
                    intent_id: intent.id,
                    metadata: intent.metadata,
                    amount: intent.amount.map(Money::from_cents),
                }
            }
            "payment_intent.payment_failed" => {
                let intent: StripeIntentObject = object(envelope.data.object)?;
                GatewayEvent::PaymentFailed {
                    intent_id: intent.id,
                    metadata: intent.metadata,
                    amount: intent.amount.map(Money::from_cents),
                    reason: intent
                        .last_payment_error
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "payment failed".to_string()),
                }
            }
            other => GatewayEvent::Ignored {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }
}

fn object<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, SagaError> {
    serde_json::from_value(value)
        .map_err(|e| SagaError::Validation(format!("malformed webhook object: {e}")))
}

fn parse_payment_status(status: Option<&str>) -> GatewayPaymentStatus {
    match status {
        Some("paid") => GatewayPaymentStatus::Paid,
        Some("no_payment_required") => GatewayPaymentStatus::NoPaymentRequired,
        _ => GatewayPaymentStatus::Unpaid,
    }
}

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeSessionObject {
    id: String,
    payment_intent: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    customer_details: Option<StripeCustomerDetails>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeIntentObject {
    id: String,
    amount: Option<i64>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentError {
    message: Option<String>,
}
