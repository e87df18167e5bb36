//! The booking saga: shared state for the four orchestrators.
//!
//! Each orchestrator lives in its own module as an `impl` block on
//! [`BookingSaga`]. Every step is request-scoped: it loads fresh state from
//! the ledger, calls out with a bounded timeout, and records the result as a
//! status compare-and-swap plus an audit event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use booking_store::{
    BookingId, BookingRecord, BookingStore, FailedPayment, LedgerEvent, LedgerEventKind, Money,
};
use domain::BookingLedger;

use crate::error::{Result, SagaError};
use crate::services::{Notification, Notifier, PaymentGateway, SupplierClient};

/// Tunables for the saga.
#[derive(Debug, Clone)]
pub struct SagaSettings {
    /// Prefix of the idempotency reference sent to the supplier.
    pub tenant_prefix: String,
    /// Quotes below this price are treated as supplier errors.
    pub price_floor: Money,
    pub supplier_timeout: Duration,
    pub gateway_timeout: Duration,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            tenant_prefix: "hotel".to_string(),
            price_floor: Money::from_cents(100),
            supplier_timeout: Duration::from_millis(30_000),
            gateway_timeout: Duration::from_millis(15_000),
            success_url: None,
            cancel_url: None,
        }
    }
}

/// Orchestrates hotel bookings across the supplier, the payment gateway and
/// the local ledger.
pub struct BookingSaga<S: BookingStore> {
    pub(crate) ledger: BookingLedger<S>,
    pub(crate) supplier: Arc<dyn SupplierClient>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) settings: SagaSettings,
}

impl<S> BookingSaga<S>
where
    S: BookingStore + Clone + 'static,
{
    pub fn new(
        store: S,
        supplier: Arc<dyn SupplierClient>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        settings: SagaSettings,
    ) -> Self {
        Self {
            ledger: BookingLedger::new(store),
            supplier,
            gateway,
            notifier,
            settings,
        }
    }

    pub fn ledger(&self) -> &BookingLedger<S> {
        &self.ledger
    }

    pub fn settings(&self) -> &SagaSettings {
        &self.settings
    }

    /// Loads a booking for an operator.
    pub async fn booking(&self, id: BookingId) -> Result<BookingRecord> {
        Ok(self.ledger.load(id).await?)
    }

    /// Loads a booking for a guest holding its verification token.
    ///
    /// A wrong token looks exactly like an unknown booking.
    pub async fn guest_booking(&self, id: BookingId, token: &str) -> Result<BookingRecord> {
        match self.ledger.find(id).await? {
            Some(record) if record.booking.verification_token == token => Ok(record),
            _ => Err(SagaError::NotFound(format!("booking {id}"))),
        }
    }

    /// Returns the audit trail, oldest first.
    pub async fn events(&self, id: BookingId) -> Result<Vec<LedgerEvent>> {
        self.ledger.load(id).await?;
        Ok(self.ledger.events(id).await?)
    }

    pub async fn failed_payments(&self) -> Result<Vec<FailedPayment>> {
        Ok(self.ledger.failed_payments().await?)
    }

    /// Reference that lets the supplier deduplicate commits for a booking.
    pub fn idempotency_ref(&self, id: BookingId) -> String {
        format!("{}-{}", self.settings.tenant_prefix, id)
    }

    /// Runs a gateway call under the gateway timeout.
    pub(crate) async fn call_gateway<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SagaError::gateway(
                "timeout",
                format!(
                    "{operation} timed out after {}ms",
                    self.settings.gateway_timeout.as_millis()
                ),
            )),
        }
    }

    /// Sends a notification in the background.
    ///
    /// A failure is logged and appended to the audit trail; it never
    /// reaches the caller.
    pub(crate) fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        let ledger = self.ledger.clone();

        tokio::spawn(async move {
            let booking_id = notification.booking_id();
            let kind = notification.kind();

            if let Err(err) = notifier.send(notification).await {
                tracing::warn!(%booking_id, kind, error = %err, "notification failed");
                let event = LedgerEvent::builder(booking_id, LedgerEventKind::NotificationFailed)
                    .message(format!("{kind} notification failed: {err}"))
                    .field("error", err.to_string())
                    .build();
                if let Err(err) = ledger.record_event(event).await {
                    tracing::error!(%booking_id, error = %err, "could not record notification failure");
                }
            }
        });
    }
}
