//! Cancellation-policy snapshot derivation and refund recommendation.
//!
//! The snapshot is taken once, at hold time, from the supplier's tier list.
//! Every refund path (operator refund, preview, cancel-then-refund) asks
//! [`recommend_refund`] for the amount and the warning shown to operators.

use booking_store::{CancellationPolicySnapshot, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tier of the supplier's cancellation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTier {
    /// Fee charged when cancelling after `deadline`, as a percentage of the price.
    pub percentage: u8,
    /// From when the fee applies. `None` means it always applies.
    pub deadline: Option<DateTime<Utc>>,
}

impl PolicyTier {
    pub fn new(percentage: u8, deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            percentage: percentage.min(100),
            deadline,
        }
    }
}

/// Builds the immutable snapshot stored with the booking.
///
/// The highest-percentage tier wins. A 100% tier makes the stay
/// non-refundable; an empty list means free cancellation.
pub fn derive_snapshot(tiers: &[PolicyTier], price: Money) -> CancellationPolicySnapshot {
    let Some(tier) = tiers.iter().max_by_key(|t| t.percentage.min(100)) else {
        return CancellationPolicySnapshot {
            is_refundable: true,
            free_cancellation_deadline: None,
            cancellation_percentage: 0,
            max_refundable_amount: price,
            description: "Free cancellation".to_string(),
        };
    };

    let percentage = tier.percentage.min(100);
    if percentage == 100 {
        return CancellationPolicySnapshot {
            is_refundable: false,
            free_cancellation_deadline: None,
            cancellation_percentage: 100,
            max_refundable_amount: Money::zero(),
            description: "Non-refundable: the full price is charged on cancellation".to_string(),
        };
    }

    let description = match (tier.deadline, percentage) {
        (_, 0) => "Free cancellation".to_string(),
        (Some(deadline), p) => format!(
            "Free cancellation until {}; a {p}% fee applies afterwards",
            deadline.format("%Y-%m-%d %H:%M UTC")
        ),
        (None, p) => format!("A {p}% cancellation fee applies"),
    };

    CancellationPolicySnapshot {
        is_refundable: true,
        free_cancellation_deadline: tier.deadline,
        cancellation_percentage: percentage,
        max_refundable_amount: price.less_percentage(percentage),
        description,
    }
}

/// Which rule produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationBasis {
    NonRefundable,
    PastDeadline,
    WithinPolicy,
}

/// Suggested refund for an operator, with the risk spelled out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecommendation {
    pub amount: Money,
    pub warning: String,
    /// True when refunding requires an explicit override.
    pub blocked: bool,
    pub basis: RecommendationBasis,
}

impl RefundRecommendation {
    /// Limits the amount to what is still refundable on the payment.
    pub fn capped_to(mut self, balance: Money) -> Self {
        self.amount = self.amount.min(balance.non_negative());
        self
    }
}

/// Computes the recommended refund for `paid` at `now`.
pub fn recommend_refund(
    snapshot: &CancellationPolicySnapshot,
    paid: Money,
    now: DateTime<Utc>,
) -> RefundRecommendation {
    let percentage = snapshot.cancellation_percentage.min(100);

    if !snapshot.is_refundable || percentage == 100 {
        return RefundRecommendation {
            amount: Money::zero(),
            warning: format!(
                "Non-refundable booking: the supplier keeps 100% of {paid}. \
                 Any refund is paid out of pocket and requires an explicit override."
            ),
            blocked: true,
            basis: RecommendationBasis::NonRefundable,
        };
    }

    let past_deadline = match snapshot.free_cancellation_deadline {
        Some(deadline) => now > deadline,
        None => percentage > 0,
    };

    if past_deadline {
        let amount = paid.less_percentage(percentage);
        let warning = match snapshot.free_cancellation_deadline {
            Some(deadline) => format!(
                "Free cancellation ended {}; the supplier charges a {percentage}% fee. \
                 Recommended refund: {amount} of {paid}.",
                deadline.format("%Y-%m-%d %H:%M UTC")
            ),
            None => format!(
                "The supplier charges a {percentage}% fee. Recommended refund: {amount} of {paid}."
            ),
        };
        return RefundRecommendation {
            amount,
            warning,
            blocked: false,
            basis: RecommendationBasis::PastDeadline,
        };
    }

    let amount = snapshot.max_refundable_amount.min(paid).non_negative();
    let warning = if amount < paid {
        format!("Refund capped by the cancellation policy: {amount} of {paid}.")
    } else {
        format!("Within the cancellation policy: full refund of {paid} recommended.")
    };
    RefundRecommendation {
        amount,
        warning,
        blocked: false,
        basis: RecommendationBasis::WithinPolicy,
    }
}
