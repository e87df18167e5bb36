//! The booking ledger: the only component that changes booking and payment status.
//!
//! Every change is a compare-and-swap against the store. The ledger checks
//! the requested edge against the status graph before touching the store,
//! and re-reads after a lost swap so callers learn the status that won.

use booking_store::{
    Booking, BookingId, BookingRecord, BookingStatus, BookingStore, BookingType,
    CancellationPolicySnapshot, ConfirmationDetails, FailedPayment, HotelBooking, LedgerEvent,
    LedgerEventKind, Money, Payment, PaymentStatus, PaymentTransition, StatusTransition,
};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{DomainError, Result};
use crate::guests::party_size_error;

/// Everything needed to open a pending booking after a successful hold.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub user_id: Option<Uuid>,
    /// Amount the guest will be charged.
    pub total_price: Money,
    pub currency: String,
    pub coupon_discount: Money,
    pub hotel_id: String,
    pub room_id: String,
    pub meal_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub adults: u32,
    pub children: u32,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: Option<String>,
    pub pre_book_code: String,
    pub pre_book_expires_at: DateTime<Utc>,
    pub cancellation_policy: CancellationPolicySnapshot,
}

impl BookingDraft {
    fn validate(&self) -> Result<()> {
        if self.check_out <= self.check_in {
            return Err(DomainError::Validation(
                "check-out must be after check-in".to_string(),
            ));
        }
        if let Some(message) = party_size_error(self.adults, self.children) {
            return Err(DomainError::Validation(message));
        }
        if self.total_price.is_negative() {
            return Err(DomainError::Validation(
                "total price cannot be negative".to_string(),
            ));
        }
        if self.guest_email.trim().is_empty() {
            return Err(DomainError::Validation("guest email is required".to_string()));
        }
        if self.pre_book_code.trim().is_empty() {
            return Err(DomainError::Validation("hold code is required".to_string()));
        }
        Ok(())
    }
}

/// Gateway facts reported when a payment succeeds.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    pub intent_id: Option<String>,
    pub session_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Service for reading and advancing bookings.
#[derive(Clone)]
pub struct BookingLedger<S: BookingStore> {
    store: S,
}

impl<S: BookingStore> BookingLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a `Pending` booking with its supplier leg in one write.
    #[tracing::instrument(skip(self, draft), fields(hold_code = %draft.pre_book_code))]
    pub async fn create_pending(&self, draft: BookingDraft) -> Result<BookingRecord> {
        draft.validate()?;

        let id = BookingId::new();
        let now = Utc::now();

        let booking = Booking {
            id,
            user_id: draft.user_id,
            booking_type: BookingType::Hotel,
            status: BookingStatus::Pending,
            total_price: draft.total_price,
            currency: draft.currency,
            coupon_discount: draft.coupon_discount,
            verification_token: Uuid::new_v4().simple().to_string(),
            created_at: now,
            updated_at: now,
        };

        let hotel = HotelBooking {
            booking_id: id,
            hotel_id: draft.hotel_id,
            room_id: draft.room_id,
            meal_id: draft.meal_id,
            check_in: draft.check_in,
            check_out: draft.check_out,
            adults: draft.adults,
            children: draft.children,
            guest_name: draft.guest_name,
            guest_email: draft.guest_email,
            guest_phone: draft.guest_phone,
            pre_book_code: draft.pre_book_code,
            pre_book_expires_at: draft.pre_book_expires_at,
            cancellation_policy: draft.cancellation_policy,
            confirmation: None,
            cancellation_fee: None,
        };

        let event = LedgerEvent::builder(id, LedgerEventKind::BookingCreated)
            .timestamp(now)
            .message(format!(
                "Hold {} taken for {} {}, expires {}",
                hotel.pre_book_code,
                booking.total_price,
                booking.currency,
                hotel.pre_book_expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ))
            .field("hold_code", hotel.pre_book_code.clone())
            .field("total_cents", booking.total_price.cents())
            .field("currency", booking.currency.clone())
            .build();

        self.store
            .insert_booking(booking.clone(), hotel.clone(), event)
            .await?;

        tracing::info!(booking_id = %id, "pending booking created");

        Ok(BookingRecord {
            booking,
            hotel,
            payment: None,
        })
    }

    pub async fn find(&self, id: BookingId) -> Result<Option<BookingRecord>> {
        Ok(self.store.get_booking(id).await?)
    }

    /// Loads a booking, failing if it does not exist.
    pub async fn load(&self, id: BookingId) -> Result<BookingRecord> {
        self.find(id).await?.ok_or(DomainError::NotFound(id))
    }

    pub async fn find_by_hold_code(&self, code: &str) -> Result<Option<BookingRecord>> {
        Ok(self.store.find_by_pre_book_code(code).await?)
    }

    pub async fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingRecord>> {
        Ok(self.store.find_by_payment_reference(reference).await?)
    }

    /// Moves a booking from one of `from` to `to`, recording `note`.
    pub async fn transition(
        &self,
        id: BookingId,
        from: &[BookingStatus],
        to: BookingStatus,
        note: impl Into<String>,
    ) -> Result<BookingRecord> {
        let event = LedgerEvent::builder(id, LedgerEventKind::StatusChanged)
            .message(note)
            .field("to", to.as_str())
            .build();
        self.apply(id, StatusTransition::new(from, to, event)).await
    }

    /// Applies a status compare-and-swap.
    ///
    /// Fails with [`DomainError::InvalidState`] carrying the fresh status if
    /// the booking was not in one of the expected statuses.
    #[tracing::instrument(skip(self, transition), fields(to = %transition.to))]
    pub async fn apply(&self, id: BookingId, transition: StatusTransition) -> Result<BookingRecord> {
        if let Some(from) = transition
            .expected
            .iter()
            .find(|from| !from.can_transition_to(transition.to))
        {
            return Err(DomainError::IllegalTransition {
                from: *from,
                to: transition.to,
            });
        }

        let expected = transition.expected.clone();
        let to = transition.to;
        let rows = self.store.transition_status(id, transition).await?;
        let record = self.load(id).await?;

        if rows == 0 {
            metrics::counter!("ledger_transition_conflicts_total").increment(1);
            tracing::debug!(booking_id = %id, actual = %record.status(), "status swap lost");
            return Err(DomainError::InvalidState {
                booking_id: id,
                actual: record.status(),
                expected,
            });
        }

        tracing::info!(booking_id = %id, status = %to, "booking status changed");
        Ok(record)
    }

    /// Promotes a booking to `Confirmed` and stores the supplier data.
    pub async fn confirm(
        &self,
        id: BookingId,
        details: ConfirmationDetails,
    ) -> Result<BookingRecord> {
        let event = LedgerEvent::builder(id, LedgerEventKind::SupplierConfirmed)
            .message(format!(
                "Supplier confirmed booking {}",
                details.confirmation_code
            ))
            .field("confirmation_code", details.confirmation_code.clone())
            .build();

        let transition = StatusTransition::new(
            &[BookingStatus::Pending, BookingStatus::ConfirmationFailed],
            BookingStatus::Confirmed,
            event,
        )
        .with_confirmation(details);

        self.apply(id, transition).await
    }

    /// Records a failed supplier commit.
    ///
    /// A `Pending` booking moves to `ConfirmationFailed`; one already there
    /// only gains the audit event.
    pub async fn record_commit_failure(
        &self,
        id: BookingId,
        error: &str,
        outcome_unknown: bool,
    ) -> Result<BookingRecord> {
        let event = LedgerEvent::builder(id, LedgerEventKind::SupplierCommitFailed)
            .message(format!("Supplier commit failed: {error}"))
            .field("error", error)
            .field("outcome_unknown", outcome_unknown)
            .build();

        let transition = StatusTransition::new(
            &[BookingStatus::Pending],
            BookingStatus::ConfirmationFailed,
            event.clone(),
        );

        match self.apply(id, transition).await {
            Err(DomainError::InvalidState {
                actual: BookingStatus::ConfirmationFailed,
                ..
            }) => {
                self.store.append_event(event).await?;
                self.load(id).await
            }
            Err(DomainError::InvalidState { actual, .. }) => Err(DomainError::InvalidState {
                booking_id: id,
                actual,
                expected: vec![BookingStatus::Pending, BookingStatus::ConfirmationFailed],
            }),
            other => other,
        }
    }

    /// Marks a confirmed booking cancelled at the supplier, keeping the fee.
    pub async fn cancel(
        &self,
        id: BookingId,
        fee: Money,
        note: impl Into<String>,
    ) -> Result<BookingRecord> {
        let event = LedgerEvent::builder(id, LedgerEventKind::SupplierCancelled)
            .message(note)
            .field("fee_cents", fee.cents())
            .build();

        let transition =
            StatusTransition::new(&[BookingStatus::Confirmed], BookingStatus::Cancelled, event)
                .with_cancellation_fee(fee);

        self.apply(id, transition).await
    }

    /// Appends an audit event.
    pub async fn record_event(&self, event: LedgerEvent) -> Result<()> {
        Ok(self.store.append_event(event).await?)
    }

    /// Appends an audit event carrying only a message.
    pub async fn note(
        &self,
        id: BookingId,
        kind: LedgerEventKind,
        message: impl Into<String>,
    ) -> Result<()> {
        self.record_event(LedgerEvent::note(id, kind, message)).await
    }

    /// Attaches a payment, or fills in gateway ids on the existing one.
    pub async fn attach_payment(&self, payment: Payment, note: impl Into<String>) -> Result<()> {
        let mut builder =
            LedgerEvent::builder(payment.booking_id, LedgerEventKind::PaymentSessionCreated)
                .message(note);
        if let Some(session_id) = &payment.session_id {
            builder = builder.field("session_id", session_id.clone());
        }
        if let Some(intent_id) = &payment.intent_id {
            builder = builder.field("intent_id", intent_id.clone());
        }
        self.store.attach_payment(payment, builder.build()).await?;
        Ok(())
    }

    /// Loads the booking and makes sure a payment row exists.
    async fn ensure_payment(&self, id: BookingId, settlement: &Settlement) -> Result<Payment> {
        let record = self.load(id).await?;
        if let Some(payment) = record.payment {
            return Ok(payment);
        }

        let mut payment = Payment::pending(
            id,
            record.booking.total_price,
            record.booking.currency.clone(),
        );
        payment.intent_id = settlement.intent_id.clone();
        payment.session_id = settlement.session_id.clone();
        self.attach_payment(payment, "Payment recorded from gateway report")
            .await?;

        self.load(id)
            .await?
            .payment
            .ok_or(DomainError::PaymentMissing(id))
    }

    /// Marks the payment `Completed`.
    ///
    /// Returns false when it was already settled.
    pub async fn settle_payment(&self, id: BookingId, settlement: Settlement) -> Result<bool> {
        let payment = self.ensure_payment(id, &settlement).await?;
        if matches!(
            payment.status,
            PaymentStatus::Completed | PaymentStatus::Refunding | PaymentStatus::Refunded
        ) {
            return Ok(false);
        }

        let event = LedgerEvent::builder(id, LedgerEventKind::PaymentSettled)
            .message(format!("Payment of {} {} received", payment.amount, payment.currency))
            .field("amount_cents", payment.amount.cents())
            .build();
        let mut transition =
            PaymentTransition::new(&[PaymentStatus::Pending], PaymentStatus::Completed, event)
                .paid_at(settlement.paid_at.unwrap_or_else(Utc::now));
        if let Some(intent_id) = settlement.intent_id {
            transition = transition.intent_id(intent_id);
        }

        if self.store.transition_payment(id, transition).await? == 1 {
            return Ok(true);
        }

        let actual = self.current_payment(id).await?.status;
        match actual {
            PaymentStatus::Completed | PaymentStatus::Refunding | PaymentStatus::Refunded => {
                Ok(false)
            }
            _ => Err(DomainError::PaymentState {
                booking_id: id,
                actual,
            }),
        }
    }

    /// Marks a pending payment `Failed`. Returns false if it was not pending.
    pub async fn fail_payment(
        &self,
        id: BookingId,
        settlement: Settlement,
        reason: &str,
    ) -> Result<bool> {
        let payment = self.ensure_payment(id, &settlement).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }

        let event = LedgerEvent::builder(id, LedgerEventKind::PaymentFailed)
            .message(format!("Payment failed: {reason}"))
            .field("reason", reason)
            .build();
        let transition =
            PaymentTransition::new(&[PaymentStatus::Pending], PaymentStatus::Failed, event);

        Ok(self.store.transition_payment(id, transition).await? == 1)
    }

    fn check_refund_amount(seen: &Payment, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(DomainError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        if amount > seen.refundable_balance() {
            return Err(DomainError::Validation(format!(
                "refund of {amount} exceeds remaining balance {}",
                seen.refundable_balance()
            )));
        }
        Ok(())
    }

    /// Claims the payment for a refund of `amount` before the gateway is called.
    ///
    /// Moves a `Completed` payment to `Refunding`, guarded on the refunded
    /// total in `seen`. Fails with [`DomainError::PaymentConflict`] if another
    /// refund holds the claim or landed since `seen` was read.
    pub async fn claim_refund(&self, seen: &Payment, amount: Money) -> Result<Payment> {
        let id = seen.booking_id;
        Self::check_refund_amount(seen, amount)?;

        let event = LedgerEvent::builder(id, LedgerEventKind::RefundRequested)
            .message(format!("Refund of {amount} {} requested", seen.currency))
            .field("amount_cents", amount.cents())
            .build();
        let transition = PaymentTransition::new(
            &[PaymentStatus::Completed],
            PaymentStatus::Refunding,
            event,
        )
        .expect_refunded(seen.refunded_amount);

        if self.store.transition_payment(id, transition).await? == 0 {
            return Err(DomainError::PaymentConflict(id));
        }
        self.current_payment(id).await
    }

    /// Records the gateway refund held by a claim from [`Self::claim_refund`].
    ///
    /// A refund that exhausts the remaining balance moves the payment to
    /// `Refunded`; otherwise it returns to `Completed`.
    pub async fn record_refund(
        &self,
        claimed: &Payment,
        amount: Money,
        refund_id: &str,
    ) -> Result<Payment> {
        let id = claimed.booking_id;
        Self::check_refund_amount(claimed, amount)?;

        let full = amount >= claimed.refundable_balance();
        let to = if full {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::Completed
        };

        let event = LedgerEvent::builder(id, LedgerEventKind::RefundIssued)
            .message(format!(
                "{} refund of {amount} {} issued ({refund_id})",
                if full { "Full" } else { "Partial" },
                claimed.currency
            ))
            .field("refund_id", refund_id)
            .field("amount_cents", amount.cents())
            .field("full", full)
            .build();

        let transition = PaymentTransition::new(&[PaymentStatus::Refunding], to, event)
            .refund(claimed.refunded_amount, amount);

        if self.store.transition_payment(id, transition).await? == 0 {
            return Err(DomainError::PaymentConflict(id));
        }

        self.current_payment(id).await
    }

    /// Gives up a refund claim after the gateway refused the refund.
    pub async fn release_refund(&self, claimed: &Payment, reason: &str) -> Result<()> {
        let id = claimed.booking_id;
        let event = LedgerEvent::builder(id, LedgerEventKind::RefundFailed)
            .message(format!("Refund failed: {reason}"))
            .field("error", reason)
            .build();
        let transition = PaymentTransition::new(
            &[PaymentStatus::Refunding],
            PaymentStatus::Completed,
            event,
        )
        .expect_refunded(claimed.refunded_amount);

        if self.store.transition_payment(id, transition).await? == 0 {
            return Err(DomainError::PaymentConflict(id));
        }
        Ok(())
    }

    async fn current_payment(&self, id: BookingId) -> Result<Payment> {
        self.load(id)
            .await?
            .payment
            .ok_or(DomainError::PaymentMissing(id))
    }

    /// Returns the booking's audit trail, oldest first.
    pub async fn events(&self, id: BookingId) -> Result<Vec<LedgerEvent>> {
        Ok(self.store.events_for_booking(id).await?)
    }

    pub async fn record_failed_payment(&self, failed: FailedPayment) -> Result<()> {
        Ok(self.store.insert_failed_payment(failed).await?)
    }

    pub async fn failed_payments(&self) -> Result<Vec<FailedPayment>> {
        Ok(self.store.list_failed_payments().await?)
    }

    pub async fn find_failed_payment(&self, reference: &str) -> Result<Option<FailedPayment>> {
        Ok(self.store.find_failed_payment(reference).await?)
    }
}
