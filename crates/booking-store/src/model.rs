//! Persisted records owned by the booking ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BookingId, BookingStatus, Money, PaymentStatus};

/// Kind of product a booking was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BookingType {
    #[default]
    Hotel,
}

impl BookingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::Hotel => "Hotel",
        }
    }
}

impl std::str::FromStr for BookingType {
    type Err = common::ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Hotel" => Ok(BookingType::Hotel),
            other => Err(common::ParseStatusError {
                kind: "booking type",
                value: other.to_string(),
            }),
        }
    }
}

/// Root aggregate of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    /// None for guest checkout.
    pub user_id: Option<Uuid>,
    pub booking_type: BookingType,
    pub status: BookingStatus,
    /// Amount charged to the guest (after coupon discount).
    pub total_price: Money,
    pub currency: String,
    pub coupon_discount: Money,
    /// One-time token that authorizes guest actions without a login.
    pub verification_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cancellation terms offered to the guest when the hold was taken.
///
/// Written once at PreBook time and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicySnapshot {
    pub is_refundable: bool,
    pub free_cancellation_deadline: Option<DateTime<Utc>>,
    /// Fee charged by the supplier once the deadline has passed.
    pub cancellation_percentage: u8,
    pub max_refundable_amount: Money,
    /// Human-readable summary shown to the guest.
    pub description: String,
}

/// Supplier booking data returned by a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDetails {
    pub confirmation_code: String,
    pub voucher: Option<String>,
    pub invoice_ref: Option<String>,
    pub hotel_contact: Option<String>,
    pub meal_name: Option<String>,
    pub booked_at: DateTime<Utc>,
}

/// Supplier-side leg of a booking (1:1 with [`Booking`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelBooking {
    pub booking_id: BookingId,
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
    /// Supplier hold reference; expires at `pre_book_expires_at`.
    pub pre_book_code: String,
    pub pre_book_expires_at: DateTime<Utc>,
    pub cancellation_policy: CancellationPolicySnapshot,
    /// Set only once the supplier commit succeeded.
    pub confirmation: Option<ConfirmationDetails>,
    pub cancellation_fee: Option<Money>,
}

impl HotelBooking {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

/// Gateway payment attached to a booking (1:1, created lazily).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub booking_id: BookingId,
    pub intent_id: Option<String>,
    pub session_id: Option<String>,
    pub amount: Money,
    pub refunded_amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for a booking.
    pub fn pending(booking_id: BookingId, amount: Money, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            booking_id,
            intent_id: None,
            session_id: None,
            amount,
            refunded_amount: Money::zero(),
            currency: currency.into(),
            status: PaymentStatus::Pending,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount that can still be refunded.
    pub fn refundable_balance(&self) -> Money {
        (self.amount - self.refunded_amount).non_negative()
    }
}

/// Side ledger entry for a payment that never produced a usable booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayment {
    pub id: Uuid,
    pub booking_id: Option<BookingId>,
    pub session_id: Option<String>,
    pub intent_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub guest_email: Option<String>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// A booking loaded together with its supplier leg and payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking: Booking,
    pub hotel: HotelBooking,
    pub payment: Option<Payment>,
}

impl BookingRecord {
    pub fn id(&self) -> BookingId {
        self.booking.id
    }

    pub fn status(&self) -> BookingStatus {
        self.booking.status
    }

    pub fn confirmation(&self) -> Option<&ConfirmationDetails> {
        self.hotel.confirmation.as_ref()
    }
}
