use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Booking, BookingId, BookingRecord, FailedPayment, HotelBooking, LedgerEvent, Payment, Result,
    StoreError,
    store::{BookingStore, PaymentTransition, StatusTransition},
};

#[derive(Debug, Default)]
struct InMemoryState {
    bookings: HashMap<BookingId, Booking>,
    hotels: HashMap<BookingId, HotelBooking>,
    payments: HashMap<BookingId, Payment>,
    events: Vec<LedgerEvent>,
    failed_payments: Vec<FailedPayment>,
}

impl InMemoryState {
    fn record(&self, id: BookingId) -> Option<BookingRecord> {
        let booking = self.bookings.get(&id)?.clone();
        let hotel = self.hotels.get(&id)?.clone();
        Some(BookingRecord {
            booking,
            hotel,
            payment: self.payments.get(&id).cloned(),
        })
    }
}

/// In-memory booking store for tests and local runs.
///
/// A single write lock around all tables gives the same compare-and-swap
/// guarantees as the row-level updates of the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryBookingStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bookings stored.
    pub async fn booking_count(&self) -> usize {
        self.state.read().await.bookings.len()
    }

    /// Returns the total number of audit events stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert_booking(
        &self,
        booking: Booking,
        hotel: HotelBooking,
        event: LedgerEvent,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if state.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate(format!("booking {}", booking.id)));
        }
        if state
            .hotels
            .values()
            .any(|h| h.pre_book_code == hotel.pre_book_code)
        {
            return Err(StoreError::Duplicate(format!(
                "pre-book code {}",
                hotel.pre_book_code
            )));
        }

        state.hotels.insert(booking.id, hotel);
        state.bookings.insert(booking.id, booking);
        state.events.push(event);
        Ok(())
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<BookingRecord>> {
        Ok(self.state.read().await.record(id))
    }

    async fn find_by_pre_book_code(&self, code: &str) -> Result<Option<BookingRecord>> {
        let state = self.state.read().await;
        let id = state
            .hotels
            .values()
            .find(|h| h.pre_book_code == code)
            .map(|h| h.booking_id);
        Ok(id.and_then(|id| state.record(id)))
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<BookingRecord>> {
        let state = self.state.read().await;
        let id = state
            .payments
            .values()
            .find(|p| {
                p.session_id.as_deref() == Some(reference)
                    || p.intent_id.as_deref() == Some(reference)
            })
            .map(|p| p.booking_id);
        Ok(id.and_then(|id| state.record(id)))
    }

    async fn transition_status(&self, id: BookingId, transition: StatusTransition) -> Result<u64> {
        let mut state = self.state.write().await;

        let Some(booking) = state.bookings.get_mut(&id) else {
            return Ok(0);
        };
        if !transition.expected.contains(&booking.status) {
            return Ok(0);
        }

        booking.status = transition.to;
        booking.updated_at = transition.event.timestamp;

        if let Some(hotel) = state.hotels.get_mut(&id) {
            if let Some(confirmation) = transition.confirmation {
                hotel.confirmation = Some(confirmation);
            }
            if let Some(fee) = transition.cancellation_fee {
                hotel.cancellation_fee = Some(fee);
            }
        }

        state.events.push(transition.event);
        Ok(1)
    }

    async fn attach_payment(&self, payment: Payment, event: LedgerEvent) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.bookings.contains_key(&payment.booking_id) {
            return Err(StoreError::NotFound(payment.booking_id));
        }

        match state.payments.get_mut(&payment.booking_id) {
            Some(existing) => {
                if existing.intent_id.is_none() {
                    existing.intent_id = payment.intent_id;
                }
                if existing.session_id.is_none() {
                    existing.session_id = payment.session_id;
                }
                existing.updated_at = payment.updated_at;
            }
            None => {
                state.payments.insert(payment.booking_id, payment);
            }
        }

        state.events.push(event);
        Ok(())
    }

    async fn transition_payment(
        &self,
        booking_id: BookingId,
        transition: PaymentTransition,
    ) -> Result<u64> {
        let mut state = self.state.write().await;

        let Some(payment) = state.payments.get_mut(&booking_id) else {
            return Ok(0);
        };
        if !transition.expected.contains(&payment.status) {
            return Ok(0);
        }
        if let Some(expected_refunded) = transition.expected_refunded
            && payment.refunded_amount != expected_refunded
        {
            return Ok(0);
        }

        payment.status = transition.to;
        payment.refunded_amount += transition.add_refunded;
        if transition.paid_at.is_some() {
            payment.paid_at = transition.paid_at;
        }
        if transition.intent_id.is_some() {
            payment.intent_id = transition.intent_id;
        }
        payment.updated_at = transition.event.timestamp;

        state.events.push(transition.event);
        Ok(1)
    }

    async fn append_event(&self, event: LedgerEvent) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.bookings.contains_key(&event.booking_id) {
            return Err(StoreError::NotFound(event.booking_id));
        }
        state.events.push(event);
        Ok(())
    }

    async fn events_for_booking(&self, id: BookingId) -> Result<Vec<LedgerEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.booking_id == id)
            .cloned()
            .collect())
    }

    async fn insert_failed_payment(&self, failed: FailedPayment) -> Result<()> {
        self.state.write().await.failed_payments.push(failed);
        Ok(())
    }

    async fn list_failed_payments(&self) -> Result<Vec<FailedPayment>> {
        let state = self.state.read().await;
        let mut failed = state.failed_payments.clone();
        failed.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(failed)
    }

    async fn find_failed_payment(&self, reference: &str) -> Result<Option<FailedPayment>> {
        let state = self.state.read().await;
        Ok(state
            .failed_payments
            .iter()
            .find(|f| {
                f.session_id.as_deref() == Some(reference)
                    || f.intent_id.as_deref() == Some(reference)
            })
            .cloned())
    }
}
