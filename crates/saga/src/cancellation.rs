//! Compensation: supplier cancellation and gateway refunds.
//!
//! The two halves are independent. Each re-reads the booking before acting,
//! so a retried operator request never cancels or refunds twice.

use booking_store::{
    BookingId, BookingRecord, BookingStatus, BookingStore, CancellationPolicySnapshot,
    LedgerEvent, LedgerEventKind, Money, Payment, PaymentStatus,
};
use chrono::Utc;
use domain::{DomainError, RefundRecommendation, recommend_refund};
use serde::{Deserialize, Serialize};

use crate::coordinator::BookingSaga;
use crate::error::{Result, SagaError};
use crate::services::{GatewayRefund, Notification, RefundRequest};

/// Operator refund request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundCommand {
    /// `None` refunds the whole remaining balance.
    #[serde(default)]
    pub amount: Option<Money>,
    /// Required to refund a non-refundable booking.
    #[serde(default)]
    pub override_policy: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What happened to a refund request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Refunded {
        refund_id: String,
        amount: Money,
        full: bool,
        booking_status: BookingStatus,
        payment_status: PaymentStatus,
        recommendation: RefundRecommendation,
    },
    /// Non-refundable booking and no override was given. No money moved.
    PolicyBlocked { recommendation: RefundRecommendation },
    /// The gateway call failed; safe to retry.
    TransientFailure {
        message: String,
        recommendation: RefundRecommendation,
    },
}

impl RefundOutcome {
    pub fn recommendation(&self) -> &RefundRecommendation {
        match self {
            RefundOutcome::Refunded { recommendation, .. }
            | RefundOutcome::PolicyBlocked { recommendation }
            | RefundOutcome::TransientFailure { recommendation, .. } => recommendation,
        }
    }
}

/// Recommendation shown before any money moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPreview {
    pub booking_id: BookingId,
    pub paid: Money,
    pub already_refunded: Money,
    pub balance: Money,
    pub currency: String,
    pub policy: CancellationPolicySnapshot,
    pub recommendation: RefundRecommendation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub booking_id: BookingId,
    pub status: BookingStatus,
    /// Sum of the supplier's fees across payment methods.
    pub fee: Money,
    /// False when the booking was already cancelled and the supplier was not called.
    pub supplier_called: bool,
    pub refund: Option<RefundOutcome>,
    /// Why the chained refund did not run, if it was requested.
    pub refund_skipped: Option<String>,
}

impl<S> BookingSaga<S>
where
    S: BookingStore + Clone + 'static,
{
    /// Cancels the reservation at the supplier and optionally refunds paid-minus-fee.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_supplier(
        &self,
        id: BookingId,
        auto_refund: bool,
        override_policy: bool,
    ) -> Result<CancellationOutcome> {
        let record = self.ledger.load(id).await?;

        let (record, supplier_called) = match record.status() {
            BookingStatus::Cancelled => (record, false),
            BookingStatus::Confirmed => (self.cancel_at_supplier(record).await?, true),
            actual => {
                return Err(SagaError::InvalidState {
                    booking_id: id,
                    actual,
                    expected: vec![BookingStatus::Confirmed],
                });
            }
        };
        let fee = record.hotel.cancellation_fee.unwrap_or_else(Money::zero);

        let mut outcome = CancellationOutcome {
            booking_id: id,
            status: record.status(),
            fee,
            supplier_called,
            refund: None,
            refund_skipped: None,
        };

        if !auto_refund {
            return Ok(outcome);
        }

        let balance = match &record.payment {
            Some(p) if p.status == PaymentStatus::Completed => p.refundable_balance(),
            Some(p) => {
                outcome.refund_skipped = Some(format!("payment is {}", p.status));
                return Ok(outcome);
            }
            None => {
                outcome.refund_skipped = Some("no payment recorded".to_string());
                return Ok(outcome);
            }
        };

        let amount = (balance - fee).non_negative();
        if amount.is_zero() {
            outcome.refund_skipped = Some("supplier fee covers the remaining balance".to_string());
            return Ok(outcome);
        }

        let command = RefundCommand {
            amount: Some(amount),
            override_policy,
            reason: Some("Cancelled at supplier".to_string()),
        };
        match self.refund(id, command).await {
            Ok(refund) => outcome.refund = Some(refund),
            Err(err) => {
                tracing::warn!(booking_id = %id, error = %err, "chained refund did not run");
                outcome.refund_skipped = Some(err.to_string());
            }
        }
        Ok(outcome)
    }

    async fn cancel_at_supplier(&self, record: BookingRecord) -> Result<BookingRecord> {
        let id = record.id();
        let code = record
            .confirmation()
            .map(|c| c.confirmation_code.clone())
            .ok_or_else(|| {
                SagaError::Validation(format!("Booking {id} has no supplier confirmation code."))
            })?;

        let cancelled = match tokio::time::timeout(
            self.settings.supplier_timeout,
            self.supplier.cancel(&code),
        )
        .await
        {
            Ok(Ok(result)) if result.success => result,
            Ok(Ok(_)) => {
                return Err(self
                    .cancel_failed(id, "supplier reported the cancellation as unsuccessful")
                    .await);
            }
            Ok(Err(err)) => return Err(self.cancel_failed(id, &err.to_string()).await),
            Err(_) => return Err(self.cancel_failed(id, "supplier cancel timed out").await),
        };

        let fee = cancelled.total_fee();
        let record = self
            .ledger
            .cancel(
                id,
                fee,
                format!("Cancelled at supplier ({code}); fee {fee} {}", record.booking.currency),
            )
            .await?;
        tracing::info!(booking_id = %id, %fee, "booking cancelled at supplier");
        Ok(record)
    }

    async fn cancel_failed(&self, id: BookingId, message: &str) -> SagaError {
        tracing::warn!(booking_id = %id, error = message, "supplier cancellation failed");
        let event = LedgerEvent::builder(id, LedgerEventKind::SupplierCancelFailed)
            .message(format!("Supplier cancellation failed: {message}"))
            .field("error", message)
            .build();
        if let Err(err) = self.ledger.record_event(event).await {
            tracing::error!(booking_id = %id, error = %err, "could not record cancel failure");
        }
        SagaError::SupplierCancel(message.to_string())
    }

    /// Loads a booking and its payment, checking both may be refunded.
    async fn refundable(&self, id: BookingId) -> Result<(BookingRecord, Payment)> {
        let record = self.ledger.load(id).await?;

        if !matches!(
            record.status(),
            BookingStatus::Confirmed | BookingStatus::Cancelled
        ) {
            return Err(SagaError::InvalidState {
                booking_id: id,
                actual: record.status(),
                expected: vec![BookingStatus::Confirmed, BookingStatus::Cancelled],
            });
        }

        let payment = record
            .payment
            .clone()
            .ok_or(SagaError::Domain(DomainError::PaymentMissing(id)))?;
        match payment.status {
            PaymentStatus::Completed => Ok((record, payment)),
            PaymentStatus::Refunding => Err(SagaError::Domain(DomainError::PaymentConflict(id))),
            actual => Err(SagaError::Domain(DomainError::PaymentState {
                booking_id: id,
                actual,
            })),
        }
    }

    /// Shows the recommended refund without moving money.
    pub async fn refund_preview(&self, id: BookingId) -> Result<RefundPreview> {
        let record = self.ledger.load(id).await?;
        let payment = record
            .payment
            .clone()
            .ok_or(SagaError::Domain(DomainError::PaymentMissing(id)))?;

        let balance = if payment.status == PaymentStatus::Completed {
            payment.refundable_balance()
        } else {
            Money::zero()
        };
        let recommendation =
            recommend_refund(&record.hotel.cancellation_policy, payment.amount, Utc::now())
                .capped_to(balance);

        Ok(RefundPreview {
            booking_id: id,
            paid: payment.amount,
            already_refunded: payment.refunded_amount,
            balance,
            currency: payment.currency,
            policy: record.hotel.cancellation_policy,
            recommendation,
        })
    }

    /// Refunds the gateway holds against the booking's payment intent.
    pub async fn gateway_refunds(&self, id: BookingId) -> Result<Vec<GatewayRefund>> {
        let record = self.ledger.load(id).await?;
        let Some(intent_id) = record.payment.and_then(|p| p.intent_id) else {
            return Ok(Vec::new());
        };
        self.call_gateway("list_refunds", self.gateway.list_refunds(&intent_id))
            .await
    }

    /// Refunds the guest through the gateway.
    ///
    /// The payment is claimed (`Refunding`) before the gateway is called, so
    /// concurrent requests cannot both move money. A refund that exhausts the balance moves the payment to `Refunded` and
    /// a `Confirmed` booking to `Refunded`. Partial refunds leave the booking
    /// status alone.
    #[tracing::instrument(skip(self, command), fields(amount = ?command.amount))]
    pub async fn refund(&self, id: BookingId, command: RefundCommand) -> Result<RefundOutcome> {
        let (record, payment) = self.refundable(id).await?;
        let balance = payment.refundable_balance();

        let recommendation =
            recommend_refund(&record.hotel.cancellation_policy, payment.amount, Utc::now())
                .capped_to(balance);

        if recommendation.blocked && !command.override_policy {
            metrics::counter!("refunds_blocked_total").increment(1);
            tracing::info!(booking_id = %id, "refund blocked by policy");
            self.ledger
                .record_event(
                    LedgerEvent::builder(id, LedgerEventKind::RefundBlocked)
                        .message(recommendation.warning.clone())
                        .build(),
                )
                .await?;
            return Ok(RefundOutcome::PolicyBlocked { recommendation });
        }

        let amount = command.amount.unwrap_or(balance);
        if !amount.is_positive() {
            return Err(SagaError::Validation(
                "Refund amount must be positive.".to_string(),
            ));
        }
        if amount > balance {
            return Err(SagaError::Validation(format!(
                "Refund of {amount} exceeds the refundable balance of {balance}."
            )));
        }

        let intent_id = payment.intent_id.clone().ok_or_else(|| {
            SagaError::Validation("Payment has no gateway payment intent.".to_string())
        })?;

        let claimed = self.ledger.claim_refund(&payment, amount).await?;

        let seq = self
            .ledger
            .events(id)
            .await?
            .iter()
            .filter(|e| e.kind == LedgerEventKind::RefundIssued)
            .count();
        let request = RefundRequest {
            intent_id,
            amount: Some(amount),
            reason: "requested_by_customer".to_string(),
            idempotency_key: format!("refund-{id}-{}-{seq}", amount.cents()),
        };

        let refund = match self
            .call_gateway("create_refund", self.gateway.create_refund(&request))
            .await
        {
            Ok(refund) => refund,
            Err(err) => {
                tracing::warn!(booking_id = %id, error = %err, "gateway refund failed");
                self.ledger
                    .release_refund(&claimed, &format!("refund of {amount}: {err}"))
                    .await?;
                return Ok(RefundOutcome::TransientFailure {
                    message: err.to_string(),
                    recommendation,
                });
            }
        };

        let updated = match self
            .ledger
            .record_refund(&claimed, amount, &refund.refund_id)
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                tracing::error!(
                    booking_id = %id,
                    refund_id = %refund.refund_id,
                    error = %err,
                    "gateway refund issued but not recorded"
                );
                let event = LedgerEvent::builder(id, LedgerEventKind::RefundUnrecorded)
                    .message(format!(
                        "Gateway refund {} of {amount} issued but not recorded: {err}",
                        refund.refund_id
                    ))
                    .field("refund_id", refund.refund_id.clone())
                    .field("amount_cents", amount.cents())
                    .build();
                if let Err(event_err) = self.ledger.record_event(event).await {
                    tracing::error!(
                        booking_id = %id,
                        error = %event_err,
                        "could not record the unrecorded refund"
                    );
                }
                return Err(err.into());
            }
        };
        let full = updated.status == PaymentStatus::Refunded;

        if let Some(reason) = &command.reason {
            self.ledger
                .note(id, LedgerEventKind::OperatorNote, format!("Refund reason: {reason}"))
                .await?;
        }

        let mut booking_status = record.status();
        if full && booking_status == BookingStatus::Confirmed {
            match self
                .ledger
                .transition(
                    id,
                    &[BookingStatus::Confirmed],
                    BookingStatus::Refunded,
                    "Booking refunded in full",
                )
                .await
            {
                Ok(record) => booking_status = record.status(),
                Err(DomainError::InvalidState { actual, .. }) => {
                    tracing::info!(booking_id = %id, %actual, "booking moved before refund status");
                    booking_status = actual;
                }
                Err(err) => return Err(err.into()),
            }
        }

        metrics::counter!("refunds_total").increment(1);
        tracing::info!(booking_id = %id, %amount, full, "refund issued");

        self.notify(Notification::RefundIssued {
            booking_id: id,
            email: record.hotel.guest_email.clone(),
            amount,
            currency: payment.currency.clone(),
        });

        Ok(RefundOutcome::Refunded {
            refund_id: refund.refund_id,
            amount,
            full,
            booking_status,
            payment_status: updated.status,
            recommendation,
        })
    }
}
