//! Reconciliation: converge the ledger with what the gateway says.
//!
//! The guest's status poll and the gateway webhook both end up here. When the
//! gateway reports a payment for a booking that is still waiting, the
//! confirmation runs inline so the guest's success page and the ledger agree.

use std::collections::BTreeMap;

use booking_store::{
    BookingId, BookingRecord, BookingStatus, BookingStore, ConfirmationDetails, FailedPayment,
    LedgerEvent, LedgerEventKind, Money,
};
use chrono::Utc;
use domain::Settlement;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confirmation::{ConfirmSource, ConfirmTarget};
use crate::coordinator::BookingSaga;
use crate::error::{Result, SagaError};
use crate::services::{GatewayPaymentStatus, GatewaySessionStatus};
use crate::webhook::GatewayEvent;

const CONFIRMED_MESSAGE: &str = "Your booking is confirmed.";
const MANUAL_FIX_MESSAGE: &str =
    "Payment received. Your booking is pending a manual fix by our team; no further payment is needed.";
const UNMATCHED_MESSAGE: &str =
    "Payment received, but we could not match it to a booking. Our team has been notified.";

/// Where a booking stands after a status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconciliationState {
    Confirmed {
        confirmation: ConfirmationDetails,
        /// True when this check ran the confirmation because no webhook had.
        repaired: bool,
    },
    /// Paid, but the supplier commit failed. Never a success, never a plain failure.
    PaymentReceivedPendingManualFix,
    AwaitingPayment,
    /// The checkout lapsed unpaid; the booking is `Failed`.
    Expired,
    /// The booking already left the payment flow.
    Closed { status: BookingStatus },
    /// Paid, but no booking matches the session.
    Unmatched,
}

/// Answer to the guest's "is it done?" poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub session_id: String,
    pub booking_id: Option<BookingId>,
    pub booking_status: Option<BookingStatus>,
    pub payment_status: GatewayPaymentStatus,
    pub session_status: GatewaySessionStatus,
    pub message: String,
    #[serde(flatten)]
    pub state: ReconciliationState,
}

/// What a webhook did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Confirmed {
        booking_id: BookingId,
        already_confirmed: bool,
    },
    ConfirmationFailed {
        booking_id: BookingId,
        reason: String,
    },
    AwaitingPayment {
        booking_id: BookingId,
    },
    BookingFailed {
        booking_id: BookingId,
    },
    Closed {
        booking_id: BookingId,
        status: BookingStatus,
    },
    Unmatched {
        reference: String,
    },
    Ignored {
        event_type: String,
    },
}

/// Result of applying a gateway "paid" signal to a booking.
enum PaidResult {
    Confirmed {
        confirmation: ConfirmationDetails,
        repaired: bool,
        already_confirmed: bool,
    },
    ManualFix(String),
    Closed(BookingStatus),
}

impl<S> BookingSaga<S>
where
    S: BookingStore + Clone + 'static,
{
    /// Polls the gateway for a checkout session and repairs a missed webhook.
    #[tracing::instrument(skip(self))]
    pub async fn check_session_status(&self, session_id: &str) -> Result<SessionStatusReport> {
        let status = self
            .call_gateway(
                "get_session_status",
                self.gateway.get_session_status(session_id),
            )
            .await?;

        let record = self.match_booking(session_id, &status.metadata).await?;
        let settlement = Settlement {
            intent_id: status.intent_id.clone(),
            session_id: Some(session_id.to_string()),
            paid_at: None,
        };

        let mut report = SessionStatusReport {
            session_id: session_id.to_string(),
            booking_id: record.as_ref().map(BookingRecord::id),
            booking_status: record.as_ref().map(BookingRecord::status),
            payment_status: status.payment_status,
            session_status: status.session_status,
            message: String::new(),
            state: ReconciliationState::AwaitingPayment,
        };

        let Some(record) = record else {
            if status.is_paid() {
                self.record_unmatched(
                    None,
                    &settlement,
                    status.amount_total,
                    status.metadata.get("currency").cloned(),
                    status.customer_email.clone(),
                    "paid checkout session matches no booking",
                )
                .await?;
                report.message = UNMATCHED_MESSAGE.to_string();
                report.state = ReconciliationState::Unmatched;
            } else if status.is_expired() {
                report.message = "The checkout session expired before payment.".to_string();
                report.state = ReconciliationState::Expired;
            } else {
                report.message = "Waiting for payment.".to_string();
            }
            return Ok(report);
        };
        let booking_id = record.id();

        report.state = if status.is_paid() {
            match self
                .apply_paid(record, settlement, ConfirmSource::StatusPoll)
                .await?
            {
                PaidResult::Confirmed {
                    confirmation,
                    repaired,
                    ..
                } => ReconciliationState::Confirmed {
                    confirmation,
                    repaired,
                },
                PaidResult::ManualFix(reason) => {
                    tracing::warn!(%booking_id, %reason, "paid booking needs a manual fix");
                    ReconciliationState::PaymentReceivedPendingManualFix
                }
                PaidResult::Closed(status) => ReconciliationState::Closed { status },
            }
        } else if status.is_expired() && record.status() == BookingStatus::Pending {
            match self
                .abandon(record, settlement, "checkout session expired unpaid")
                .await?
            {
                BookingStatus::Failed => ReconciliationState::Expired,
                status => ReconciliationState::Closed { status },
            }
        } else if record.status() == BookingStatus::Pending {
            ReconciliationState::AwaitingPayment
        } else {
            ReconciliationState::Closed {
                status: record.status(),
            }
        };

        report.message = match &report.state {
            ReconciliationState::Confirmed { .. } => CONFIRMED_MESSAGE.to_string(),
            ReconciliationState::PaymentReceivedPendingManualFix => MANUAL_FIX_MESSAGE.to_string(),
            ReconciliationState::AwaitingPayment => "Waiting for payment.".to_string(),
            ReconciliationState::Expired => {
                "The checkout session expired before payment.".to_string()
            }
            ReconciliationState::Closed { status } => format!("Booking is {status}."),
            ReconciliationState::Unmatched => UNMATCHED_MESSAGE.to_string(),
        };
        report.booking_status = Some(self.ledger.load(booking_id).await?.status());

        Ok(report)
    }

    /// Applies a gateway webhook event.
    #[tracing::instrument(skip(self, event), fields(kind = event.kind()))]
    pub async fn handle_webhook(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        match event {
            GatewayEvent::CheckoutCompleted {
                session_id,
                intent_id,
                payment_status,
                metadata,
                amount_total,
                customer_email,
            } => {
                let settlement = Settlement {
                    intent_id,
                    session_id: Some(session_id.clone()),
                    paid_at: None,
                };
                let Some(record) = self.match_booking(&session_id, &metadata).await? else {
                    if payment_status.is_paid() {
                        self.record_unmatched(
                            None,
                            &settlement,
                            amount_total,
                            metadata.get("currency").cloned(),
                            customer_email,
                            "completed checkout matches no booking",
                        )
                        .await?;
                    }
                    return Ok(WebhookOutcome::Unmatched {
                        reference: session_id,
                    });
                };

                if !payment_status.is_paid() {
                    return Ok(WebhookOutcome::AwaitingPayment {
                        booking_id: record.id(),
                    });
                }
                self.webhook_paid(record, settlement).await
            }
            GatewayEvent::PaymentSucceeded {
                intent_id,
                metadata,
                amount,
            } => {
                let settlement = Settlement {
                    intent_id: Some(intent_id.clone()),
                    session_id: None,
                    paid_at: None,
                };
                match self.match_booking(&intent_id, &metadata).await? {
                    Some(record) => self.webhook_paid(record, settlement).await,
                    None => {
                        self.record_unmatched(
                            None,
                            &settlement,
                            amount,
                            metadata.get("currency").cloned(),
                            None,
                            "succeeded payment matches no booking",
                        )
                        .await?;
                        Ok(WebhookOutcome::Unmatched {
                            reference: intent_id,
                        })
                    }
                }
            }
            GatewayEvent::PaymentFailed {
                intent_id,
                metadata,
                amount,
                reason,
            } => {
                let settlement = Settlement {
                    intent_id: Some(intent_id.clone()),
                    session_id: None,
                    paid_at: None,
                };
                let Some(record) = self.match_booking(&intent_id, &metadata).await? else {
                    self.record_unmatched(
                        None,
                        &settlement,
                        amount,
                        metadata.get("currency").cloned(),
                        None,
                        &format!("failed payment matches no booking: {reason}"),
                    )
                    .await?;
                    return Ok(WebhookOutcome::Unmatched {
                        reference: intent_id,
                    });
                };
                self.webhook_abandoned(record, settlement, &format!("payment failed: {reason}"))
                    .await
            }
            GatewayEvent::CheckoutExpired {
                session_id,
                metadata,
            } => {
                let settlement = Settlement {
                    intent_id: None,
                    session_id: Some(session_id.clone()),
                    paid_at: None,
                };
                match self.match_booking(&session_id, &metadata).await? {
                    Some(record) => {
                        self.webhook_abandoned(record, settlement, "checkout session expired unpaid")
                            .await
                    }
                    None => Ok(WebhookOutcome::Unmatched {
                        reference: session_id,
                    }),
                }
            }
            GatewayEvent::Ignored { event_type } => {
                tracing::debug!(%event_type, "ignoring webhook event");
                Ok(WebhookOutcome::Ignored { event_type })
            }
        }
    }

    async fn webhook_paid(
        &self,
        record: BookingRecord,
        settlement: Settlement,
    ) -> Result<WebhookOutcome> {
        let booking_id = record.id();
        Ok(
            match self
                .apply_paid(record, settlement, ConfirmSource::Webhook)
                .await?
            {
                PaidResult::Confirmed {
                    already_confirmed, ..
                } => WebhookOutcome::Confirmed {
                    booking_id,
                    already_confirmed,
                },
                PaidResult::ManualFix(reason) => {
                    WebhookOutcome::ConfirmationFailed { booking_id, reason }
                }
                PaidResult::Closed(status) => WebhookOutcome::Closed { booking_id, status },
            },
        )
    }

    async fn webhook_abandoned(
        &self,
        record: BookingRecord,
        settlement: Settlement,
        reason: &str,
    ) -> Result<WebhookOutcome> {
        let booking_id = record.id();
        if record.status() != BookingStatus::Pending {
            tracing::info!(
                %booking_id,
                status = %record.status(),
                reason,
                "payment failure on a booking past payment"
            );
            self.ledger
                .note(
                    booking_id,
                    LedgerEventKind::PaymentFailed,
                    format!("Gateway reported {reason}; booking left as {}", record.status()),
                )
                .await?;
            return Ok(WebhookOutcome::Closed {
                booking_id,
                status: record.status(),
            });
        }
        match self.abandon(record, settlement, reason).await? {
            BookingStatus::Failed => Ok(WebhookOutcome::BookingFailed { booking_id }),
            status => Ok(WebhookOutcome::Closed { booking_id, status }),
        }
    }

    /// Finds the booking behind a gateway reference.
    ///
    /// Tries the stored payment reference first, then the booking id and
    /// hold code copied into the gateway metadata at PreBook.
    async fn match_booking(
        &self,
        reference: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Option<BookingRecord>> {
        if let Some(record) = self.ledger.find_by_payment_reference(reference).await? {
            return Ok(Some(record));
        }
        if let Some(id) = metadata
            .get("booking_id")
            .and_then(|raw| raw.parse::<BookingId>().ok())
            && let Some(record) = self.ledger.find(id).await?
        {
            return Ok(Some(record));
        }
        if let Some(code) = metadata.get("hold_code") {
            return Ok(self.ledger.find_by_hold_code(code).await?);
        }
        Ok(None)
    }

    /// Settles the payment and confirms the booking if it still needs it.
    async fn apply_paid(
        &self,
        record: BookingRecord,
        settlement: Settlement,
        source: ConfirmSource,
    ) -> Result<PaidResult> {
        let booking_id = record.id();

        match record.status() {
            BookingStatus::Confirmed => {
                self.settle(booking_id, settlement).await;
                let confirmation = record.hotel.confirmation.ok_or_else(|| {
                    SagaError::Validation(format!(
                        "booking {booking_id} is confirmed without supplier data"
                    ))
                })?;
                Ok(PaidResult::Confirmed {
                    confirmation,
                    repaired: false,
                    already_confirmed: true,
                })
            }
            status if status.can_confirm() => {
                self.settle(booking_id, settlement).await;
                if source == ConfirmSource::StatusPoll {
                    metrics::counter!("reconciliation_repairs_total").increment(1);
                    tracing::info!(%booking_id, %status, "gateway paid before confirmation; repairing");
                    self.ledger
                        .record_event(
                            LedgerEvent::builder(
                                booking_id,
                                LedgerEventKind::ReconciliationTriggered,
                            )
                            .message(format!(
                                "Status poll saw a paid session while booking was {status}"
                            ))
                            .field("from", status.as_str())
                            .build(),
                        )
                        .await?;
                }

                match self
                    .confirm(ConfirmTarget::BookingId(booking_id), source)
                    .await
                {
                    Ok(outcome) => Ok(PaidResult::Confirmed {
                        confirmation: outcome.confirmation,
                        repaired: source == ConfirmSource::StatusPoll && !outcome.already_confirmed,
                        already_confirmed: outcome.already_confirmed,
                    }),
                    Err(SagaError::SupplierCommit { message, .. }) => {
                        Ok(PaidResult::ManualFix(message))
                    }
                    Err(err @ SagaError::InvalidState { .. }) => {
                        // Lost a race; report whatever the winner left behind.
                        let fresh = self.ledger.load(booking_id).await?;
                        match fresh.status() {
                            BookingStatus::Confirmed => Ok(PaidResult::Confirmed {
                                confirmation: fresh.hotel.confirmation.ok_or(err)?,
                                repaired: false,
                                already_confirmed: true,
                            }),
                            BookingStatus::ConfirmationFailed => {
                                Ok(PaidResult::ManualFix(err.to_string()))
                            }
                            other => Ok(PaidResult::Closed(other)),
                        }
                    }
                    Err(err) => Err(err),
                }
            }
            status => {
                tracing::warn!(%booking_id, %status, "payment received for a closed booking");
                if status == BookingStatus::Failed {
                    let payment = record.payment.as_ref();
                    self.record_unmatched(
                        Some(booking_id),
                        &settlement,
                        payment.map(|p| p.amount),
                        payment.map(|p| p.currency.clone()),
                        Some(record.hotel.guest_email.clone()),
                        &format!("payment received for failed booking {booking_id}"),
                    )
                    .await?;
                }
                Ok(PaidResult::Closed(status))
            }
        }
    }

    async fn settle(&self, booking_id: BookingId, settlement: Settlement) {
        if let Err(err) = self.ledger.settle_payment(booking_id, settlement).await {
            tracing::warn!(%booking_id, error = %err, "could not settle payment");
        }
    }

    /// Moves a `Pending` booking whose checkout never paid to `Failed`.
    ///
    /// The booking swap runs first; the payment is only failed once it has
    /// won. Returns the status the booking ended in.
    async fn abandon(
        &self,
        record: BookingRecord,
        settlement: Settlement,
        reason: &str,
    ) -> Result<BookingStatus> {
        let booking_id = record.id();

        match self
            .ledger
            .transition(
                booking_id,
                &[BookingStatus::Pending],
                BookingStatus::Failed,
                format!("Payment abandoned: {reason}"),
            )
            .await
        {
            Ok(_) => {}
            Err(domain::DomainError::InvalidState { actual, .. }) => {
                tracing::warn!(
                    %booking_id,
                    %actual,
                    reason,
                    "booking left Pending before it could be failed"
                );
                self.ledger
                    .record_event(
                        LedgerEvent::builder(booking_id, LedgerEventKind::ReconciliationConflict)
                            .message(format!(
                                "Gateway reported {reason} but booking is already {actual}"
                            ))
                            .field("reason", reason)
                            .field("status", actual.as_str())
                            .build(),
                    )
                    .await?;
                return Ok(actual);
            }
            Err(err) => return Err(err.into()),
        }

        if !self
            .ledger
            .fail_payment(booking_id, settlement.clone(), reason)
            .await?
        {
            tracing::warn!(%booking_id, reason, "payment was not pending when its booking failed");
        }

        let failed = FailedPayment {
            id: Uuid::new_v4(),
            booking_id: Some(booking_id),
            session_id: settlement.session_id,
            intent_id: settlement.intent_id,
            amount: record.booking.total_price,
            currency: record.booking.currency.clone(),
            guest_email: Some(record.hotel.guest_email.clone()),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        self.ledger.record_failed_payment(failed).await?;
        tracing::info!(%booking_id, reason, "booking failed after payment was abandoned");
        Ok(BookingStatus::Failed)
    }

    /// Records money the ledger cannot attach to a live booking, once per reference.
    async fn record_unmatched(
        &self,
        booking_id: Option<BookingId>,
        settlement: &Settlement,
        amount: Option<Money>,
        currency: Option<String>,
        guest_email: Option<String>,
        reason: &str,
    ) -> Result<()> {
        for reference in [&settlement.session_id, &settlement.intent_id]
            .into_iter()
            .flatten()
        {
            if self.ledger.find_failed_payment(reference).await?.is_some() {
                return Ok(());
            }
        }

        tracing::warn!(
            session_id = ?settlement.session_id,
            intent_id = ?settlement.intent_id,
            reason,
            "recording unmatched payment"
        );
        self.ledger
            .record_failed_payment(FailedPayment {
                id: Uuid::new_v4(),
                booking_id,
                session_id: settlement.session_id.clone(),
                intent_id: settlement.intent_id.clone(),
                amount: amount.unwrap_or_else(Money::zero),
                currency: currency.unwrap_or_default(),
                guest_email,
                reason: reason.to_string(),
                recorded_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
