//! Domain layer for hotel bookings.
//!
//! This crate provides:
//! - [`BookingLedger`], the status guard every saga step goes through
//! - cancellation-policy snapshots and the refund recommendation rules
//! - guest rosters sent to the supplier on commit

pub mod error;
pub mod guests;
pub mod ledger;
pub mod policy;

pub use error::{DomainError, Result};
pub use guests::{GuestName, GuestRoster, MAX_OCCUPANTS, party_size_error};
pub use ledger::{BookingDraft, BookingLedger, Settlement};
pub use policy::{
    PolicyTier, RecommendationBasis, RefundRecommendation, derive_snapshot, recommend_refund,
};
