//! Hotel supplier client trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use booking_store::Money;
use chrono::{DateTime, NaiveDate, Utc};
use domain::{GuestRoster, PolicyTier};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// What the guest wants priced and held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub hotel_id: String,
    pub room_id: String,
    pub meal_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub adults: u32,
    pub children: u32,
    pub currency: String,
}

/// A priced, time-limited hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierQuote {
    pub price: Money,
    pub currency: String,
    pub hold_code: String,
    pub hold_expires_at: DateTime<Utc>,
    pub policies: Vec<PolicyTier>,
    /// Supplier-side error reported inside an otherwise successful response.
    pub error: Option<String>,
}

/// Turns a hold into a reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub hold_code: String,
    pub hotel_id: String,
    pub room_id: String,
    pub meal_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: GuestRoster,
    pub email: String,
    pub phone: Option<String>,
    /// Lets the supplier recognise a retried commit.
    pub idempotency_ref: String,
}

/// Reservation data returned by a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierBooking {
    pub confirmation_code: String,
    pub voucher: Option<String>,
    pub invoice_ref: Option<String>,
    pub hotel_contact: Option<String>,
    pub meal_name: Option<String>,
    pub booked_at: DateTime<Utc>,
}

/// Result of a supplier cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierCancellation {
    pub success: bool,
    /// Fee charged per payment method.
    pub fees: Vec<Money>,
}

impl SupplierCancellation {
    pub fn total_fee(&self) -> Money {
        self.fees.iter().copied().sum()
    }
}

/// Contract with the hotel inventory supplier.
#[async_trait]
pub trait SupplierClient: Send + Sync {
    /// Prices the stay and takes a hold.
    async fn quote(&self, request: &QuoteRequest) -> Result<SupplierQuote, SagaError>;

    /// Commits a held reservation.
    async fn commit(&self, request: &CommitRequest) -> Result<SupplierBooking, SagaError>;

    /// Cancels a committed reservation.
    async fn cancel(&self, confirmation_code: &str) -> Result<SupplierCancellation, SagaError>;
}

#[derive(Debug)]
struct InMemorySupplierState {
    price: Money,
    hold_ttl: chrono::Duration,
    policies: Vec<PolicyTier>,
    quote_error: Option<String>,
    cancellation_fee: Money,
    commit_delay: Option<Duration>,
    fail_on_commit: bool,
    fail_on_cancel: bool,
    next_id: u32,
    commit_calls: u32,
    /// Reservations by idempotency ref.
    reservations: HashMap<String, SupplierBooking>,
    cancelled: Vec<String>,
}

impl Default for InMemorySupplierState {
    fn default() -> Self {
        Self {
            price: Money::from_major(200),
            hold_ttl: chrono::Duration::minutes(15),
            policies: Vec::new(),
            quote_error: None,
            cancellation_fee: Money::zero(),
            commit_delay: None,
            fail_on_commit: false,
            fail_on_cancel: false,
            next_id: 0,
            commit_calls: 0,
            reservations: HashMap::new(),
            cancelled: Vec::new(),
        }
    }
}

/// In-memory supplier for testing and local runs.
///
/// Commits are deduplicated by idempotency ref, the way a real supplier
/// deduplicates retried requests.
#[derive(Debug, Clone, Default)]
pub struct InMemorySupplier {
    state: Arc<RwLock<InMemorySupplierState>>,
}

impl InMemorySupplier {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemorySupplierState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemorySupplierState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Sets the price returned by the next quotes.
    pub fn set_price(&self, price: Money) {
        self.write().price = price;
    }

    /// Sets how long holds last; negative values produce already-expired quotes.
    pub fn set_hold_ttl(&self, ttl: chrono::Duration) {
        self.write().hold_ttl = ttl;
    }

    pub fn set_policies(&self, policies: Vec<PolicyTier>) {
        self.write().policies = policies;
    }

    /// Makes quotes carry a supplier-side error.
    pub fn set_quote_error(&self, error: Option<String>) {
        self.write().quote_error = error;
    }

    pub fn set_cancellation_fee(&self, fee: Money) {
        self.write().cancellation_fee = fee;
    }

    /// Delays every commit; used to exercise timeouts.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.write().commit_delay = delay;
    }

    pub fn set_fail_on_commit(&self, fail: bool) {
        self.write().fail_on_commit = fail;
    }

    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.write().fail_on_cancel = fail;
    }

    /// Number of commit calls received, including failed and duplicate ones.
    pub fn commit_calls(&self) -> u32 {
        self.read().commit_calls
    }

    /// Number of distinct reservations created.
    pub fn reservation_count(&self) -> usize {
        self.read().reservations.len()
    }

    pub fn is_cancelled(&self, confirmation_code: &str) -> bool {
        self.read().cancelled.iter().any(|c| c == confirmation_code)
    }
}

#[async_trait]
impl SupplierClient for InMemorySupplier {
    async fn quote(&self, request: &QuoteRequest) -> Result<SupplierQuote, SagaError> {
        let mut state = self.write();
        state.next_id += 1;

        Ok(SupplierQuote {
            price: state.price,
            currency: request.currency.clone(),
            hold_code: format!("PB-{:05}", state.next_id),
            hold_expires_at: Utc::now() + state.hold_ttl,
            policies: state.policies.clone(),
            error: state.quote_error.clone(),
        })
    }

    async fn commit(&self, request: &CommitRequest) -> Result<SupplierBooking, SagaError> {
        let delay = {
            let mut state = self.write();
            state.commit_calls += 1;
            state.commit_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write();

        if state.fail_on_commit {
            return Err(SagaError::SupplierCommit {
                message: format!("supplier rejected hold {}: ROOM_UNAVAILABLE", request.hold_code),
                outcome_unknown: false,
            });
        }

        if let Some(existing) = state.reservations.get(&request.idempotency_ref) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let booking = SupplierBooking {
            confirmation_code: format!("SH-{:06}", state.next_id),
            voucher: Some(format!("VCH-{:06}", state.next_id)),
            invoice_ref: Some(format!("INV-{:06}", state.next_id)),
            hotel_contact: Some("+34 900 000 000".to_string()),
            meal_name: Some(request.meal_id.clone()),
            booked_at: Utc::now(),
        };
        state
            .reservations
            .insert(request.idempotency_ref.clone(), booking.clone());

        Ok(booking)
    }

    async fn cancel(&self, confirmation_code: &str) -> Result<SupplierCancellation, SagaError> {
        let mut state = self.write();

        if state.fail_on_cancel {
            return Err(SagaError::SupplierCancel(format!(
                "supplier refused to cancel {confirmation_code}"
            )));
        }

        let known = state
            .reservations
            .values()
            .any(|b| b.confirmation_code == confirmation_code);
        if !known {
            return Ok(SupplierCancellation {
                success: false,
                fees: Vec::new(),
            });
        }

        if !state.cancelled.iter().any(|c| c == confirmation_code) {
            state.cancelled.push(confirmation_code.to_string());
        }

        Ok(SupplierCancellation {
            success: true,
            fees: vec![state.cancellation_fee],
        })
    }
}
