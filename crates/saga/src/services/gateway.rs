//! Payment gateway trait and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use booking_store::{BookingId, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// A charge to set up for a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub booking_id: BookingId,
    pub amount: Money,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    /// Copied onto the gateway object so the saga can resume from gateway data alone.
    pub metadata: BTreeMap<String, String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Whether the money has moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl GatewayPaymentStatus {
    /// True once the guest owes nothing further.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            GatewayPaymentStatus::Paid | GatewayPaymentStatus::NoPaymentRequired
        )
    }
}

/// Lifecycle of the hosted checkout page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewaySessionStatus {
    Open,
    Complete,
    Expired,
}

/// Out-of-band view of a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub payment_status: GatewayPaymentStatus,
    pub session_status: GatewaySessionStatus,
    pub intent_id: Option<String>,
    pub amount_total: Option<Money>,
    pub customer_email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl SessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status.is_paid()
    }

    pub fn is_expired(&self) -> bool {
        self.session_status == GatewaySessionStatus::Expired
    }
}

/// Out-of-band view of a payment intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentStatus {
    pub intent_id: String,
    pub payment_status: GatewayPaymentStatus,
    pub amount: Option<Money>,
    pub metadata: BTreeMap<String, String>,
}

impl IntentStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == GatewayPaymentStatus::Paid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub intent_id: String,
    /// `None` refunds whatever is left.
    pub amount: Option<Money>,
    pub reason: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub intent_id: String,
    pub amount: Money,
    pub status: String,
}

/// Contract with the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: &PaymentRequest) -> Result<PaymentIntent, SagaError>;

    async fn create_checkout_session(
        &self,
        request: &PaymentRequest,
    ) -> Result<CheckoutSession, SagaError>;

    /// Queries a session out-of-band, independent of webhooks.
    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, SagaError>;

    /// Queries a payment intent out-of-band, independent of webhooks.
    async fn get_intent_status(&self, intent_id: &str) -> Result<IntentStatus, SagaError>;

    async fn create_refund(&self, request: &RefundRequest) -> Result<GatewayRefund, SagaError>;

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<GatewayRefund>, SagaError>;
}

#[derive(Debug, Clone)]
struct StoredSession {
    request: PaymentRequest,
    status: SessionStatus,
}

#[derive(Debug, Clone)]
struct StoredIntent {
    amount: Money,
    metadata: BTreeMap<String, String>,
    paid: bool,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    sessions: HashMap<String, StoredSession>,
    intents: HashMap<String, StoredIntent>,
    refunds: Vec<GatewayRefund>,
    refunds_by_key: HashMap<String, GatewayRefund>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_status: bool,
    fail_on_refund: bool,
    refund_delay: Option<Duration>,
}

impl InMemoryGatewayState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:06}", self.next_id)
    }
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryGatewayState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGatewayState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    pub fn set_fail_on_status(&self, fail: bool) {
        self.write().fail_on_status = fail;
    }

    pub fn set_fail_on_refund(&self, fail: bool) {
        self.write().fail_on_refund = fail;
    }

    /// Holds every refund call for `delay` before it is processed.
    pub fn set_refund_delay(&self, delay: Duration) {
        self.write().refund_delay = Some(delay);
    }

    /// Simulates the guest paying on the hosted page. Returns the intent id.
    pub fn complete_session(&self, session_id: &str) -> Option<String> {
        let mut state = self.write();
        let intent_id = state.next("pi");
        let session = state.sessions.get_mut(session_id)?;
        session.status.payment_status = GatewayPaymentStatus::Paid;
        session.status.session_status = GatewaySessionStatus::Complete;
        session.status.intent_id = Some(intent_id.clone());
        let intent = StoredIntent {
            amount: session.request.amount,
            metadata: session.request.metadata.clone(),
            paid: true,
        };
        state.intents.insert(intent_id.clone(), intent);
        Some(intent_id)
    }

    /// Simulates the guest completing an in-page payment.
    pub fn pay_intent(&self, intent_id: &str) -> bool {
        match self.write().intents.get_mut(intent_id) {
            Some(intent) => {
                intent.paid = true;
                true
            }
            None => false,
        }
    }

    /// Simulates the hosted page timing out unpaid.
    pub fn expire_session(&self, session_id: &str) -> bool {
        let mut state = self.write();
        match state.sessions.get_mut(session_id) {
            Some(session) => {
                session.status.session_status = GatewaySessionStatus::Expired;
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn refund_count(&self) -> usize {
        self.read().refunds.len()
    }

    /// Metadata recorded on a session.
    pub fn session_metadata(&self, session_id: &str) -> Option<BTreeMap<String, String>> {
        self.read()
            .sessions
            .get(session_id)
            .map(|s| s.request.metadata.clone())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(&self, request: &PaymentRequest) -> Result<PaymentIntent, SagaError> {
        let mut state = self.write();
        if state.fail_on_create {
            return Err(SagaError::gateway("api_error", "intent creation failed"));
        }

        let intent_id = state.next("pi");
        state.intents.insert(
            intent_id.clone(),
            StoredIntent {
                amount: request.amount,
                metadata: request.metadata.clone(),
                paid: false,
            },
        );

        Ok(PaymentIntent {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &PaymentRequest,
    ) -> Result<CheckoutSession, SagaError> {
        let mut state = self.write();
        if state.fail_on_create {
            return Err(SagaError::gateway("api_error", "session creation failed"));
        }

        let session_id = state.next("cs");
        let status = SessionStatus {
            session_id: session_id.clone(),
            payment_status: GatewayPaymentStatus::Unpaid,
            session_status: GatewaySessionStatus::Open,
            intent_id: None,
            amount_total: Some(request.amount),
            customer_email: request.customer_email.clone(),
            metadata: request.metadata.clone(),
        };
        state.sessions.insert(
            session_id.clone(),
            StoredSession {
                request: request.clone(),
                status,
            },
        );

        Ok(CheckoutSession {
            url: Some(format!("https://checkout.example.test/{session_id}")),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            session_id,
        })
    }

    async fn get_session_status(&self, session_id: &str) -> Result<SessionStatus, SagaError> {
        let state = self.read();
        if state.fail_on_status {
            return Err(SagaError::gateway("api_error", "status lookup failed"));
        }
        state
            .sessions
            .get(session_id)
            .map(|s| s.status.clone())
            .ok_or_else(|| {
                SagaError::gateway("resource_missing", format!("No such session: {session_id}"))
            })
    }

    async fn get_intent_status(&self, intent_id: &str) -> Result<IntentStatus, SagaError> {
        let state = self.read();
        if state.fail_on_status {
            return Err(SagaError::gateway("api_error", "status lookup failed"));
        }
        let intent = state.intents.get(intent_id).ok_or_else(|| {
            SagaError::gateway(
                "resource_missing",
                format!("No such payment_intent: {intent_id}"),
            )
        })?;
        Ok(IntentStatus {
            intent_id: intent_id.to_string(),
            payment_status: if intent.paid {
                GatewayPaymentStatus::Paid
            } else {
                GatewayPaymentStatus::Unpaid
            },
            amount: Some(intent.amount),
            metadata: intent.metadata.clone(),
        })
    }

    async fn create_refund(&self, request: &RefundRequest) -> Result<GatewayRefund, SagaError> {
        let delay = self.read().refund_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write();
        if state.fail_on_refund {
            return Err(SagaError::gateway("api_error", "refund failed"));
        }

        if let Some(existing) = state.refunds_by_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let Some(intent) = state.intents.get(&request.intent_id) else {
            return Err(SagaError::gateway(
                "resource_missing",
                format!("No such payment_intent: {}", request.intent_id),
            ));
        };
        if !intent.paid {
            return Err(SagaError::gateway(
                "charge_not_captured",
                format!("Payment intent {} has not been paid", request.intent_id),
            ));
        }
        let charged = intent.amount;

        let already: Money = state
            .refunds
            .iter()
            .filter(|r| r.intent_id == request.intent_id)
            .map(|r| r.amount)
            .sum();
        let remaining = charged - already;
        let amount = request.amount.unwrap_or(remaining);
        if amount > remaining || !amount.is_positive() {
            return Err(SagaError::gateway(
                "charge_already_refunded",
                format!("Refund of {amount} exceeds refundable {remaining}"),
            ));
        }

        let refund = GatewayRefund {
            refund_id: state.next("re"),
            intent_id: request.intent_id.clone(),
            amount,
            status: "succeeded".to_string(),
        };
        state.refunds.push(refund.clone());
        state
            .refunds_by_key
            .insert(request.idempotency_key.clone(), refund.clone());

        Ok(refund)
    }

    async fn list_refunds(&self, intent_id: &str) -> Result<Vec<GatewayRefund>, SagaError> {
        Ok(self
            .read()
            .refunds
            .iter()
            .filter(|r| r.intent_id == intent_id)
            .cloned()
            .collect())
    }
}
