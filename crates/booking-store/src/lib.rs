//! Persistence for the booking ledger.
//!
//! Bookings, their supplier leg, the attached payment and the append-only
//! audit trail are stored behind the [`BookingStore`] trait. Status changes
//! are compare-and-swap updates: callers name the statuses they expect and
//! the store reports how many rows it touched.

pub mod error;
pub mod event;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{BookingId, BookingStatus, Money, PaymentStatus};
pub use error::{Result, StoreError};
pub use event::{EventId, LedgerEvent, LedgerEventBuilder, LedgerEventKind};
pub use memory::InMemoryBookingStore;
pub use model::{
    Booking, BookingRecord, BookingType, CancellationPolicySnapshot, ConfirmationDetails,
    FailedPayment, HotelBooking, Payment,
};
pub use postgres::PostgresBookingStore;
pub use store::{BookingStore, PaymentTransition, StatusTransition};
