//! External collaborators: hotel supplier, payment gateway and notifier.

pub mod gateway;
pub mod notifier;
pub mod stripe;
pub mod supplier;

pub use gateway::{
    CheckoutSession, GatewayPaymentStatus, GatewayRefund, GatewaySessionStatus,
    InMemoryPaymentGateway, IntentStatus, PaymentGateway, PaymentIntent, PaymentRequest,
    RefundRequest, SessionStatus,
};
pub use notifier::{InMemoryNotifier, LoggingNotifier, Notification, Notifier};
pub use stripe::{StripeConfig, StripeGateway};
pub use supplier::{
    CommitRequest, InMemorySupplier, QuoteRequest, SupplierBooking, SupplierCancellation,
    SupplierClient, SupplierQuote,
};
