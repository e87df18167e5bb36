//! Guest notifications. Always best-effort.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use booking_store::{BookingId, Money};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BookingConfirmed {
        booking_id: BookingId,
        email: String,
        guest_name: String,
        confirmation_code: String,
    },
    RefundIssued {
        booking_id: BookingId,
        email: String,
        amount: Money,
        currency: String,
    },
}

impl Notification {
    pub fn booking_id(&self) -> BookingId {
        match self {
            Notification::BookingConfirmed { booking_id, .. }
            | Notification::RefundIssued { booking_id, .. } => *booking_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::BookingConfirmed { .. } => "booking_confirmed",
            Notification::RefundIssued { .. } => "refund_issued",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), SagaError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), SagaError> {
        tracing::info!(
            booking_id = %notification.booking_id(),
            kind = notification.kind(),
            "notification sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_send: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_send(&self, fail: bool) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).fail_on_send = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, notification: Notification) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.fail_on_send {
            return Err(SagaError::Notification(format!(
                "mail server rejected {} for {}",
                notification.kind(),
                notification.booking_id()
            )));
        }
        state.sent.push(notification);
        Ok(())
    }
}
