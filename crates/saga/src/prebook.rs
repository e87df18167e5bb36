//! PreBook: quote, hold, persist, open a payment.

use std::collections::BTreeMap;

use booking_store::{
    BookingId, BookingStatus, BookingStore, CancellationPolicySnapshot, Money, Payment,
};
use chrono::{DateTime, NaiveDate, Utc};
use domain::{BookingDraft, derive_snapshot, party_size_error};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::BookingSaga;
use crate::error::{Result, SagaError};
use crate::services::{PaymentRequest, QuoteRequest, SupplierQuote};

/// How the guest will pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Hosted checkout page.
    #[default]
    CheckoutSession,
    /// Client-side payment intent.
    Intent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreBookRequest {
    pub hotel_id: String,
    pub room_id: String,
    pub meal_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    pub guest_name: String,
    pub guest_email: String,
    #[serde(default)]
    pub guest_phone: Option<String>,
    /// Price the guest was shown; compared against the supplier's quote.
    #[serde(default)]
    pub quoted_price: Option<Money>,
    pub currency: String,
    #[serde(default)]
    pub coupon_discount: Option<Money>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub payment_mode: PaymentMode,
}

impl PreBookRequest {
    fn validate(&self) -> Result<()> {
        if self.check_out <= self.check_in {
            return Err(SagaError::Validation(
                "Check-out must be after check-in.".to_string(),
            ));
        }
        if let Some(message) = party_size_error(self.adults, self.children) {
            return Err(SagaError::Validation(message));
        }
        if self.guest_name.trim().is_empty() || self.guest_email.trim().is_empty() {
            return Err(SagaError::Validation(
                "Guest name and email are required.".to_string(),
            ));
        }
        if self.coupon_discount.is_some_and(|d| d.is_negative()) {
            return Err(SagaError::Validation(
                "Coupon discount cannot be negative.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the guest goes to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaymentHandle {
    CheckoutSession {
        session_id: String,
        url: Option<String>,
    },
    Intent {
        intent_id: String,
        client_secret: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreBookOutcome {
    pub booking_id: BookingId,
    pub verification_token: String,
    pub hold_code: String,
    /// The hold silently lapses after this; payment must finish before it.
    pub hold_expires_at: DateTime<Utc>,
    pub total_price: Money,
    pub currency: String,
    /// Supplier price differs from the price the guest was shown.
    pub price_changed: bool,
    pub cancellation_policy: CancellationPolicySnapshot,
    pub payment: PaymentHandle,
}

impl<S> BookingSaga<S>
where
    S: BookingStore + Clone + 'static,
{
    /// Takes a supplier hold, opens a `Pending` booking and a payment for it.
    #[tracing::instrument(skip(self, request), fields(hotel_id = %request.hotel_id))]
    pub async fn prebook(&self, request: PreBookRequest) -> Result<PreBookOutcome> {
        metrics::counter!("prebook_total").increment(1);
        request.validate()?;

        let quote_request = QuoteRequest {
            hotel_id: request.hotel_id.clone(),
            room_id: request.room_id.clone(),
            meal_id: request.meal_id.clone(),
            check_in: request.check_in,
            check_out: request.check_out,
            adults: request.adults,
            children: request.children,
            currency: request.currency.clone(),
        };

        let quote = match tokio::time::timeout(
            self.settings.supplier_timeout,
            self.supplier.quote(&quote_request),
        )
        .await
        {
            Ok(Ok(quote)) => quote,
            Ok(Err(err)) => return Err(self.reject_quote(err.to_string())),
            Err(_) => return Err(self.reject_quote("supplier quote timed out".to_string())),
        };
        self.validate_quote(&quote)?;

        let price_changed = request.quoted_price.is_some_and(|q| q != quote.price);
        let coupon = request.coupon_discount.unwrap_or_else(Money::zero);
        let total = quote.price - coupon;
        if total < self.settings.price_floor {
            metrics::counter!("prebook_rejected_total").increment(1);
            return Err(SagaError::Validation(format!(
                "Coupon discount of {coupon} leaves less than the minimum charge of {}.",
                self.settings.price_floor
            )));
        }
        let policy = derive_snapshot(&quote.policies, total);

        let draft = BookingDraft {
            user_id: request.user_id,
            total_price: total,
            currency: quote.currency.clone(),
            coupon_discount: coupon,
            hotel_id: request.hotel_id.clone(),
            room_id: request.room_id.clone(),
            meal_id: request.meal_id.clone(),
            check_in: request.check_in,
            check_out: request.check_out,
            adults: request.adults,
            children: request.children,
            guest_name: request.guest_name.clone(),
            guest_email: request.guest_email.clone(),
            guest_phone: request.guest_phone.clone(),
            pre_book_code: quote.hold_code.clone(),
            pre_book_expires_at: quote.hold_expires_at,
            cancellation_policy: policy,
        };
        let record = self.ledger.create_pending(draft).await?;
        let booking_id = record.id();

        let payment_request = PaymentRequest {
            booking_id,
            amount: total,
            currency: quote.currency.clone(),
            description: format!(
                "Hotel {} from {} to {}",
                request.hotel_id, request.check_in, request.check_out
            ),
            customer_email: Some(request.guest_email.clone()),
            metadata: BTreeMap::from([
                ("booking_id".to_string(), booking_id.to_string()),
                ("hold_code".to_string(), quote.hold_code.clone()),
                ("hotel_id".to_string(), request.hotel_id.clone()),
                ("check_in".to_string(), request.check_in.to_string()),
                ("check_out".to_string(), request.check_out.to_string()),
                ("currency".to_string(), quote.currency.clone()),
                ("tenant".to_string(), self.settings.tenant_prefix.clone()),
            ]),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
        };

        let mut payment = Payment::pending(booking_id, total, quote.currency.clone());
        let opened = match request.payment_mode {
            PaymentMode::CheckoutSession => self
                .call_gateway(
                    "create_checkout_session",
                    self.gateway.create_checkout_session(&payment_request),
                )
                .await
                .map(|session| {
                    payment.session_id = Some(session.session_id.clone());
                    PaymentHandle::CheckoutSession {
                        session_id: session.session_id,
                        url: session.url,
                    }
                }),
            PaymentMode::Intent => self
                .call_gateway("create_intent", self.gateway.create_intent(&payment_request))
                .await
                .map(|intent| {
                    payment.intent_id = Some(intent.intent_id.clone());
                    PaymentHandle::Intent {
                        intent_id: intent.intent_id,
                        client_secret: intent.client_secret,
                    }
                }),
        };

        let handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(%booking_id, error = %err, "payment setup failed");
                self.ledger
                    .transition(
                        booking_id,
                        &[BookingStatus::Pending],
                        BookingStatus::Failed,
                        format!("Payment setup failed: {err}"),
                    )
                    .await?;
                return Err(err);
            }
        };

        self.ledger
            .attach_payment(payment, "Payment opened at gateway")
            .await?;

        tracing::info!(
            %booking_id,
            hold_code = %quote.hold_code,
            expires_at = %quote.hold_expires_at,
            price_changed,
            "prebook completed"
        );

        Ok(PreBookOutcome {
            booking_id,
            verification_token: record.booking.verification_token,
            hold_code: quote.hold_code,
            hold_expires_at: quote.hold_expires_at,
            total_price: total,
            currency: quote.currency,
            price_changed,
            cancellation_policy: record.hotel.cancellation_policy,
            payment: handle,
        })
    }

    fn validate_quote(&self, quote: &SupplierQuote) -> Result<()> {
        if let Some(error) = &quote.error {
            return Err(self.reject_quote(format!("supplier reported error: {error}")));
        }
        if quote.price < self.settings.price_floor {
            return Err(self.reject_quote(format!(
                "quoted price {} is below the floor {}",
                quote.price, self.settings.price_floor
            )));
        }
        if quote.hold_expires_at <= Utc::now() {
            return Err(self.reject_quote(format!(
                "hold {} already expired at {}",
                quote.hold_code, quote.hold_expires_at
            )));
        }
        if quote.hold_code.trim().is_empty() {
            return Err(self.reject_quote("supplier returned no hold code".to_string()));
        }
        Ok(())
    }

    fn reject_quote(&self, reason: String) -> SagaError {
        metrics::counter!("prebook_rejected_total").increment(1);
        tracing::warn!(%reason, "supplier quote rejected");
        SagaError::SupplierQuote(reason)
    }
}
