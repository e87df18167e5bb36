use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Booking, BookingId, BookingRecord, BookingStatus, ConfirmationDetails, FailedPayment,
    HotelBooking, LedgerEvent, Money, Payment, PaymentStatus, Result,
};

/// A compare-and-swap on a booking's status.
///
/// Applied only if the current status is one of `expected`. On success the
/// optional side data and the audit event are written in the same unit of
/// work as the status flip.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub expected: Vec<BookingStatus>,
    pub to: BookingStatus,
    pub confirmation: Option<ConfirmationDetails>,
    pub cancellation_fee: Option<Money>,
    pub event: LedgerEvent,
}

impl StatusTransition {
    pub fn new(expected: &[BookingStatus], to: BookingStatus, event: LedgerEvent) -> Self {
        Self {
            expected: expected.to_vec(),
            to,
            confirmation: None,
            cancellation_fee: None,
            event,
        }
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationDetails) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn with_cancellation_fee(mut self, fee: Money) -> Self {
        self.cancellation_fee = Some(fee);
        self
    }
}

/// A compare-and-swap on a booking's payment.
///
/// Matches when the payment status is one of `expected` and, if
/// `expected_refunded` is set, the refunded total equals it.
#[derive(Debug, Clone)]
pub struct PaymentTransition {
    pub expected: Vec<PaymentStatus>,
    pub expected_refunded: Option<Money>,
    pub to: PaymentStatus,
    pub add_refunded: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub intent_id: Option<String>,
    pub event: LedgerEvent,
}

impl PaymentTransition {
    pub fn new(expected: &[PaymentStatus], to: PaymentStatus, event: LedgerEvent) -> Self {
        Self {
            expected: expected.to_vec(),
            expected_refunded: None,
            to,
            add_refunded: Money::zero(),
            paid_at: None,
            intent_id: None,
            event,
        }
    }

    pub fn paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = Some(paid_at);
        self
    }

    pub fn intent_id(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    /// Only applies while the refunded total is still `already_refunded`.
    pub fn expect_refunded(mut self, already_refunded: Money) -> Self {
        self.expected_refunded = Some(already_refunded);
        self
    }

    /// Records a refund of `amount`, guarded on the refunded total seen by the caller.
    pub fn refund(self, already_refunded: Money, amount: Money) -> Self {
        let mut transition = self.expect_refunded(already_refunded);
        transition.add_refunded = amount;
        transition
    }
}

/// Storage for the booking ledger.
///
/// Implementations must make every method atomic on its own; callers never
/// hold a transaction across calls. Reads always return the latest
/// persisted state.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Inserts a booking, its supplier leg and the creation event in one write.
    async fn insert_booking(
        &self,
        booking: Booking,
        hotel: HotelBooking,
        event: LedgerEvent,
    ) -> Result<()>;

    /// Loads a booking with its supplier leg and payment.
    async fn get_booking(&self, id: BookingId) -> Result<Option<BookingRecord>>;

    /// Looks a booking up by its supplier hold code.
    async fn find_by_pre_book_code(&self, code: &str) -> Result<Option<BookingRecord>>;

    /// Looks a booking up by a gateway checkout-session or payment-intent id.
    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<BookingRecord>>;

    /// Applies a status compare-and-swap. Returns the number of rows changed (0 or 1).
    async fn transition_status(&self, id: BookingId, transition: StatusTransition) -> Result<u64>;

    /// Inserts the payment if none exists; otherwise fills in missing gateway ids.
    async fn attach_payment(&self, payment: Payment, event: LedgerEvent) -> Result<()>;

    /// Applies a payment compare-and-swap. Returns the number of rows changed (0 or 1).
    async fn transition_payment(
        &self,
        booking_id: BookingId,
        transition: PaymentTransition,
    ) -> Result<u64>;

    /// Appends an audit event.
    async fn append_event(&self, event: LedgerEvent) -> Result<()>;

    /// Returns a booking's audit trail, oldest first.
    async fn events_for_booking(&self, id: BookingId) -> Result<Vec<LedgerEvent>>;

    async fn insert_failed_payment(&self, failed: FailedPayment) -> Result<()>;

    /// Returns failed payments, most recent first.
    async fn list_failed_payments(&self) -> Result<Vec<FailedPayment>>;

    /// Finds a failed payment by gateway checkout-session or payment-intent id.
    async fn find_failed_payment(&self, reference: &str) -> Result<Option<FailedPayment>>;
}
