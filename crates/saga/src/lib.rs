//! Hotel booking saga.
//!
//! A booking moves through four request-scoped steps, each coordinated
//! through status compare-and-swaps on the ledger instead of a shared
//! transaction:
//! 1. PreBook: take a supplier hold and open a payment
//! 2. Confirm: commit the supplier booking once payment has landed
//! 3. Compensate: cancel at the supplier and refund through the gateway
//! 4. Reconcile: repair a missed webhook from the gateway's session status
//!
//! The supplier, the payment gateway and the notifier sit behind traits in
//! [`services`], with in-memory implementations for tests and local runs.

pub mod cancellation;
pub mod confirmation;
pub mod coordinator;
pub mod error;
pub mod prebook;
pub mod reconciliation;
pub mod services;
pub mod webhook;

pub use cancellation::{CancellationOutcome, RefundCommand, RefundOutcome, RefundPreview};
pub use confirmation::{ConfirmSource, ConfirmTarget, ConfirmationOutcome};
pub use coordinator::{BookingSaga, SagaSettings};
pub use error::{Result, SagaError};
pub use prebook::{PaymentHandle, PaymentMode, PreBookOutcome, PreBookRequest};
pub use reconciliation::{ReconciliationState, SessionStatusReport, WebhookOutcome};
pub use services::{
    CheckoutSession, CommitRequest, GatewayPaymentStatus, GatewayRefund, GatewaySessionStatus,
    InMemoryNotifier, InMemoryPaymentGateway, InMemorySupplier, IntentStatus, LoggingNotifier,
    Notification, Notifier, PaymentGateway, PaymentIntent, PaymentRequest, QuoteRequest,
    RefundRequest, SessionStatus, StripeConfig, StripeGateway, SupplierBooking,
    SupplierCancellation, SupplierClient, SupplierQuote,
};
pub use webhook::GatewayEvent;
