//! Confirmation: commit the supplier booking exactly once.
//!
//! Webhook, guest poll and operator retry all land here, possibly at the
//! same time. The supplier is only asked to commit once the gateway reports
//! the money received. A booking already `Confirmed` is answered from the
//! ledger with no supplier call. Racing commits carry the same idempotency reference, so
//! the supplier collapses them, and only one status swap can win.

use std::time::Instant;

use booking_store::{
    BookingId, BookingRecord, BookingStatus, BookingStore, ConfirmationDetails, LedgerEvent,
    LedgerEventKind, PaymentStatus,
};
use domain::{DomainError, GuestRoster, Settlement};
use serde::{Deserialize, Serialize};

use crate::coordinator::BookingSaga;
use crate::error::{Result, SagaError};
use crate::services::{CommitRequest, Notification, SupplierBooking};

/// How the caller identifies the booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmTarget {
    BookingId(BookingId),
    HoldCode(String),
}

/// Who asked for the confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmSource {
    Guest,
    Webhook,
    StatusPoll,
    Operator,
}

impl ConfirmSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmSource::Guest => "guest",
            ConfirmSource::Webhook => "webhook",
            ConfirmSource::StatusPoll => "status_poll",
            ConfirmSource::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    pub booking_id: BookingId,
    pub status: BookingStatus,
    pub confirmation: ConfirmationDetails,
    /// True when no supplier call was made because the booking was already confirmed.
    pub already_confirmed: bool,
}

impl From<SupplierBooking> for ConfirmationDetails {
    fn from(b: SupplierBooking) -> Self {
        ConfirmationDetails {
            confirmation_code: b.confirmation_code,
            voucher: b.voucher,
            invoice_ref: b.invoice_ref,
            hotel_contact: b.hotel_contact,
            meal_name: b.meal_name,
            booked_at: b.booked_at,
        }
    }
}

impl<S> BookingSaga<S>
where
    S: BookingStore + Clone + 'static,
{
    pub(crate) async fn resolve(&self, target: &ConfirmTarget) -> Result<BookingRecord> {
        let found = match target {
            ConfirmTarget::BookingId(id) => self.ledger.find(*id).await?,
            ConfirmTarget::HoldCode(code) => self.ledger.find_by_hold_code(code).await?,
        };
        found.ok_or_else(|| match target {
            ConfirmTarget::BookingId(id) => SagaError::NotFound(format!("booking {id}")),
            ConfirmTarget::HoldCode(code) => SagaError::NotFound(format!("hold code {code}")),
        })
    }

    /// Confirms a booking, committing it at the supplier if needed.
    #[tracing::instrument(skip(self, source), fields(source = source.as_str()))]
    pub async fn confirm(
        &self,
        target: ConfirmTarget,
        source: ConfirmSource,
    ) -> Result<ConfirmationOutcome> {
        metrics::counter!("confirmation_attempts_total", "source" => source.as_str())
            .increment(1);

        let record = self.resolve(&target).await?;
        let booking_id = record.id();

        if record.status() == BookingStatus::Confirmed {
            metrics::counter!("confirmation_idempotent_hits_total").increment(1);
            tracing::info!(%booking_id, "booking already confirmed");
            return self.existing_confirmation(record);
        }

        if !record.status().can_confirm() {
            return Err(SagaError::InvalidState {
                booking_id,
                actual: record.status(),
                expected: vec![BookingStatus::Pending, BookingStatus::ConfirmationFailed],
            });
        }

        self.ensure_paid(&record).await?;

        self.ledger
            .record_event(
                LedgerEvent::builder(booking_id, LedgerEventKind::ConfirmationRequested)
                    .message(format!("Confirmation requested by {}", source.as_str()))
                    .field("source", source.as_str())
                    .build(),
            )
            .await?;

        let request = CommitRequest {
            hold_code: record.hotel.pre_book_code.clone(),
            hotel_id: record.hotel.hotel_id.clone(),
            room_id: record.hotel.room_id.clone(),
            meal_id: record.hotel.meal_id.clone(),
            check_in: record.hotel.check_in,
            check_out: record.hotel.check_out,
            guests: GuestRoster::for_stay(
                &record.hotel.guest_name,
                record.hotel.adults,
                record.hotel.children,
            ),
            email: record.hotel.guest_email.clone(),
            phone: record.hotel.guest_phone.clone(),
            idempotency_ref: self.idempotency_ref(booking_id),
        };

        let started = Instant::now();
        let committed =
            tokio::time::timeout(self.settings.supplier_timeout, self.supplier.commit(&request))
                .await;
        metrics::histogram!("supplier_commit_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match committed {
            Ok(Ok(booking)) => self.record_commit(record, booking).await,
            Ok(Err(err)) => {
                let (message, outcome_unknown) = match err {
                    SagaError::SupplierCommit {
                        message,
                        outcome_unknown,
                    } => (message, outcome_unknown),
                    other => (other.to_string(), false),
                };
                self.record_commit_failure(booking_id, message, outcome_unknown)
                    .await
            }
            Err(_) => {
                let message = format!(
                    "supplier commit timed out after {}ms; outcome unknown",
                    self.settings.supplier_timeout.as_millis()
                );
                self.record_commit_failure(booking_id, message, true).await
            }
        }
    }

    /// Operator retry of a booking stuck in `ConfirmationFailed`.
    pub async fn retry_confirmation(&self, id: BookingId) -> Result<ConfirmationOutcome> {
        self.confirm(ConfirmTarget::BookingId(id), ConfirmSource::Operator)
            .await
    }

    /// Operator gives up on a booking the supplier never committed.
    #[tracing::instrument(skip(self))]
    pub async fn mark_failed(&self, id: BookingId, reason: &str) -> Result<BookingRecord> {
        let record = self
            .ledger
            .transition(
                id,
                &[BookingStatus::ConfirmationFailed],
                BookingStatus::Failed,
                format!("Marked failed by operator: {reason}"),
            )
            .await?;
        tracing::info!(booking_id = %id, "booking marked failed");
        Ok(record)
    }

    fn existing_confirmation(&self, record: BookingRecord) -> Result<ConfirmationOutcome> {
        let booking_id = record.id();
        let confirmation = record.hotel.confirmation.ok_or_else(|| {
            SagaError::Domain(DomainError::Validation(format!(
                "booking {booking_id} is confirmed without supplier data"
            )))
        })?;
        Ok(ConfirmationOutcome {
            booking_id,
            status: BookingStatus::Confirmed,
            confirmation,
            already_confirmed: true,
        })
    }

    /// Refuses to commit until the guest's money has arrived.
    ///
    /// A payment still `Pending` in the ledger is checked with the gateway,
    /// through the checkout session or else the payment intent, and settled
    /// once the gateway reports it paid.
    async fn ensure_paid(&self, record: &BookingRecord) -> Result<()> {
        let booking_id = record.id();
        let Some(payment) = record.payment.as_ref() else {
            return Err(payment_not_received());
        };
        match payment.status {
            PaymentStatus::Completed => return Ok(()),
            PaymentStatus::Pending => {}
            actual => return Err(DomainError::PaymentState { booking_id, actual }.into()),
        }

        let settlement = if let Some(session_id) = &payment.session_id {
            let status = self
                .call_gateway(
                    "get_session_status",
                    self.gateway.get_session_status(session_id),
                )
                .await?;
            if !status.is_paid() {
                return Err(payment_not_received());
            }
            Settlement {
                intent_id: status.intent_id.or_else(|| payment.intent_id.clone()),
                session_id: Some(session_id.clone()),
                paid_at: None,
            }
        } else if let Some(intent_id) = &payment.intent_id {
            let status = self
                .call_gateway(
                    "get_intent_status",
                    self.gateway.get_intent_status(intent_id),
                )
                .await?;
            if !status.is_paid() {
                return Err(payment_not_received());
            }
            Settlement {
                intent_id: Some(intent_id.clone()),
                session_id: None,
                paid_at: None,
            }
        } else {
            return Err(payment_not_received());
        };

        if self.ledger.settle_payment(booking_id, settlement).await? {
            tracing::info!(%booking_id, "payment settled from gateway status");
        }
        Ok(())
    }

    async fn record_commit(
        &self,
        record: BookingRecord,
        booking: SupplierBooking,
    ) -> Result<ConfirmationOutcome> {
        let booking_id = record.id();
        let details = ConfirmationDetails::from(booking);

        let confirmed = match self.ledger.confirm(booking_id, details).await {
            Ok(confirmed) => confirmed,
            Err(DomainError::InvalidState {
                actual: BookingStatus::Confirmed,
                ..
            }) => {
                // Another request won the swap.
                metrics::counter!("confirmation_idempotent_hits_total").increment(1);
                return self.existing_confirmation(self.ledger.load(booking_id).await?);
            }
            Err(err) => return Err(err.into()),
        };

        let confirmation = confirmed.hotel.confirmation.clone().ok_or_else(|| {
            SagaError::Domain(DomainError::Validation(format!(
                "booking {booking_id} confirmed without supplier data"
            )))
        })?;

        tracing::info!(
            %booking_id,
            confirmation_code = %confirmation.confirmation_code,
            "booking confirmed"
        );

        self.notify(Notification::BookingConfirmed {
            booking_id,
            email: confirmed.hotel.guest_email.clone(),
            guest_name: confirmed.hotel.guest_name.clone(),
            confirmation_code: confirmation.confirmation_code.clone(),
        });

        Ok(ConfirmationOutcome {
            booking_id,
            status: confirmed.status(),
            confirmation,
            already_confirmed: false,
        })
    }

    async fn record_commit_failure(
        &self,
        booking_id: BookingId,
        message: String,
        outcome_unknown: bool,
    ) -> Result<ConfirmationOutcome> {
        metrics::counter!("confirmation_failed_total").increment(1);
        tracing::error!(%booking_id, error = %message, outcome_unknown, "supplier commit failed");

        match self
            .ledger
            .record_commit_failure(booking_id, &message, outcome_unknown)
            .await
        {
            Ok(_) => Err(SagaError::SupplierCommit {
                message,
                outcome_unknown,
            }),
            Err(DomainError::InvalidState {
                actual: BookingStatus::Confirmed,
                ..
            }) => self.existing_confirmation(self.ledger.load(booking_id).await?),
            Err(err) => Err(err.into()),
        }
    }
}

fn payment_not_received() -> SagaError {
    SagaError::Validation("Payment has not been received yet.".to_string())
}
