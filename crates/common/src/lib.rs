//! Shared vocabulary for the hotel booking saga.
//!
//! Identifiers, money amounts and the two status enums are used by every
//! other crate in the workspace, so they live here without pulling in any
//! persistence or runtime dependencies.

pub mod money;
pub mod status;
pub mod types;

pub use money::Money;
pub use status::{BookingStatus, ParseStatusError, PaymentStatus};
pub use types::BookingId;
