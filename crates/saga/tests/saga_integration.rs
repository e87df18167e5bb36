//! End-to-end saga flows against the in-memory store and fakes.

use std::sync::Arc;
use std::time::Duration;

use booking_store::{
    BookingId, BookingStatus, InMemoryBookingStore, LedgerEventKind, Money, PaymentStatus,
};
use chrono::{NaiveDate, Utc};
use domain::{PolicyTier, RecommendationBasis};
use saga::{
    BookingSaga, ConfirmSource, ConfirmTarget, GatewayEvent, GatewayPaymentStatus,
    InMemoryNotifier, InMemoryPaymentGateway, InMemorySupplier, PaymentHandle, PaymentMode,
    PreBookOutcome, PreBookRequest, ReconciliationState, RefundCommand, RefundOutcome, SagaError,
    SagaSettings, WebhookOutcome,
};

struct TestHarness {
    saga: BookingSaga<InMemoryBookingStore>,
    store: InMemoryBookingStore,
    supplier: InMemorySupplier,
    gateway: InMemoryPaymentGateway,
    notifier: InMemoryNotifier,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_settings(SagaSettings::default())
    }

    fn with_settings(settings: SagaSettings) -> Self {
        let store = InMemoryBookingStore::new();
        let supplier = InMemorySupplier::new();
        let gateway = InMemoryPaymentGateway::new();
        let notifier = InMemoryNotifier::new();
        let saga = BookingSaga::new(
            store.clone(),
            Arc::new(supplier.clone()),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
            settings,
        );
        Self {
            saga,
            store,
            supplier,
            gateway,
            notifier,
        }
    }

    fn request() -> PreBookRequest {
        PreBookRequest {
            hotel_id: "hotel-42".to_string(),
            room_id: "room-7".to_string(),
            meal_id: "BB".to_string(),
            check_in: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2030, 6, 4).unwrap(),
            adults: 2,
            children: 1,
            guest_name: "Ada Lovelace".to_string(),
            guest_email: "ada@example.com".to_string(),
            guest_phone: None,
            quoted_price: Some(Money::from_major(200)),
            currency: "EUR".to_string(),
            coupon_discount: None,
            user_id: None,
            payment_mode: PaymentMode::CheckoutSession,
        }
    }

    async fn prebook(&self) -> PreBookOutcome {
        self.saga.prebook(Self::request()).await.unwrap()
    }

    fn session_id(outcome: &PreBookOutcome) -> String {
        match &outcome.payment {
            PaymentHandle::CheckoutSession { session_id, .. } => session_id.clone(),
            other => panic!("expected a checkout session, got {other:?}"),
        }
    }

    /// PreBook and pay on the hosted page, without any webhook.
    async fn paid(&self) -> (BookingId, String) {
        let outcome = self.prebook().await;
        let session_id = Self::session_id(&outcome);
        self.gateway.complete_session(&session_id).unwrap();
        (outcome.booking_id, session_id)
    }

    async fn confirmed(&self) -> BookingId {
        let (id, _) = self.paid().await;
        self.saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::Webhook)
            .await
            .unwrap();
        id
    }

    async fn status(&self, id: BookingId) -> BookingStatus {
        self.saga.booking(id).await.unwrap().status()
    }

    async fn payment_status(&self, id: BookingId) -> PaymentStatus {
        self.saga.booking(id).await.unwrap().payment.unwrap().status
    }

    async fn has_event(&self, id: BookingId, kind: LedgerEventKind) -> bool {
        self.saga
            .events(id)
            .await
            .unwrap()
            .iter()
            .any(|e| e.kind == kind)
    }
}

/// Every consecutive change in `observed` must be a legal edge.
fn assert_legal_path(observed: &[BookingStatus]) {
    for pair in observed.windows(2) {
        if pair[0] != pair[1] {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "illegal transition {} -> {}",
                pair[0],
                pair[1]
            );
        }
    }
}

mod prebook {
    use super::*;

    #[tokio::test]
    async fn test_creates_pending_booking_with_checkout_session() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        assert_eq!(outcome.total_price, Money::from_major(200));
        assert!(!outcome.price_changed);
        assert!(!outcome.verification_token.is_empty());
        assert!(outcome.hold_expires_at > Utc::now());

        let record = h.saga.booking(outcome.booking_id).await.unwrap();
        assert_eq!(record.status(), BookingStatus::Pending);
        assert_eq!(record.hotel.pre_book_code, outcome.hold_code);
        let payment = record.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(
            payment.session_id.as_deref(),
            Some(TestHarness::session_id(&outcome).as_str())
        );

        let metadata = h
            .gateway
            .session_metadata(&TestHarness::session_id(&outcome))
            .unwrap();
        assert_eq!(metadata["booking_id"], outcome.booking_id.to_string());
        assert_eq!(metadata["hold_code"], outcome.hold_code);
        assert!(h.has_event(outcome.booking_id, LedgerEventKind::BookingCreated).await);
    }

    #[tokio::test]
    async fn test_expired_hold_is_rejected_before_any_write() {
        let h = TestHarness::new();
        h.supplier.set_hold_ttl(chrono::Duration::minutes(-1));

        let result = h.saga.prebook(TestHarness::request()).await;

        assert!(matches!(result, Err(SagaError::SupplierQuote(_))));
        assert_eq!(h.store.booking_count().await, 0);
        assert_eq!(h.gateway.session_count(), 0);
    }

    #[tokio::test]
    async fn test_price_below_floor_is_a_supplier_error() {
        let h = TestHarness::new();
        h.supplier.set_price(Money::from_cents(20));

        let result = h.saga.prebook(TestHarness::request()).await;

        match result {
            Err(err @ SagaError::SupplierQuote(_)) => {
                assert!(err.to_string().contains("below the floor"));
                assert!(!err.user_message().contains("floor"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(h.store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn test_quote_carrying_supplier_error_is_rejected() {
        let h = TestHarness::new();
        h.supplier
            .set_quote_error(Some("RATE_NOT_AVAILABLE".to_string()));

        let result = h.saga.prebook(TestHarness::request()).await;
        assert!(matches!(result, Err(SagaError::SupplierQuote(_))));
        assert_eq!(h.store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn test_price_change_and_coupon() {
        let h = TestHarness::new();
        h.supplier.set_price(Money::from_major(220));

        let mut request = TestHarness::request();
        request.coupon_discount = Some(Money::from_major(20));
        let outcome = h.saga.prebook(request).await.unwrap();

        assert!(outcome.price_changed);
        assert_eq!(outcome.total_price, Money::from_major(200));
        assert_eq!(
            outcome.cancellation_policy.max_refundable_amount,
            Money::from_major(200)
        );
    }

    #[tokio::test]
    async fn test_coupon_cannot_take_total_below_floor() {
        let h = TestHarness::new();
        let mut request = TestHarness::request();
        request.coupon_discount = Some(Money::from_major(200));

        let result = h.saga.prebook(request).await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(h.store.booking_count().await, 0);
        assert_eq!(h.gateway.session_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_party_is_rejected() {
        let h = TestHarness::new();
        let mut request = TestHarness::request();
        request.adults = u32::MAX;

        let result = h.saga.prebook(request).await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(h.supplier.commit_calls(), 0);
        assert_eq!(h.store.booking_count().await, 0);
    }

    #[tokio::test]
    async fn test_intent_mode_returns_client_secret() {
        let h = TestHarness::new();
        let mut request = TestHarness::request();
        request.payment_mode = PaymentMode::Intent;

        let outcome = h.saga.prebook(request).await.unwrap();

        let PaymentHandle::Intent {
            intent_id,
            client_secret,
        } = &outcome.payment
        else {
            panic!("expected an intent handle");
        };
        assert!(client_secret.starts_with(intent_id.as_str()));
        let record = h.saga.booking(outcome.booking_id).await.unwrap();
        assert_eq!(
            record.payment.unwrap().intent_id.as_deref(),
            Some(intent_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_payment_setup_failure_fails_the_booking() {
        let h = TestHarness::new();
        h.gateway.set_fail_on_create(true);

        let result = h.saga.prebook(TestHarness::request()).await;
        assert!(matches!(result, Err(SagaError::Gateway { .. })));

        assert_eq!(h.store.booking_count().await, 1);
        let record = h
            .saga
            .ledger()
            .find_by_hold_code("PB-00001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status(), BookingStatus::Failed);
    }

    #[tokio::test]
    async fn test_non_refundable_snapshot() {
        let h = TestHarness::new();
        h.supplier.set_policies(vec![PolicyTier::new(100, None)]);

        let outcome = h.prebook().await;

        assert!(!outcome.cancellation_policy.is_refundable);
        assert_eq!(outcome.cancellation_policy.cancellation_percentage, 100);
        assert_eq!(outcome.cancellation_policy.max_refundable_amount, Money::zero());
    }
}

mod confirmation {
    use super::*;

    #[tokio::test]
    async fn test_second_confirm_makes_no_supplier_call() {
        let h = TestHarness::new();
        let (id, _) = h.paid().await;

        let first = h
            .saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::Webhook)
            .await
            .unwrap();
        let second = h
            .saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::StatusPoll)
            .await
            .unwrap();

        assert_eq!(h.supplier.commit_calls(), 1);
        assert!(!first.already_confirmed);
        assert!(second.already_confirmed);
        assert_eq!(first.confirmation, second.confirmation);
        assert_eq!(first.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_collapse_to_one_reservation() {
        let h = TestHarness::new();
        h.supplier
            .set_commit_delay(Some(Duration::from_millis(20)));
        let (id, _) = h.paid().await;

        let attempts = [
            ConfirmSource::Webhook,
            ConfirmSource::StatusPoll,
            ConfirmSource::Operator,
        ]
        .map(|source| h.saga.confirm(ConfirmTarget::BookingId(id), source));
        let results = futures_util::future::join_all(attempts).await;

        let codes: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().confirmation.confirmation_code)
            .collect();
        assert!(codes.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(h.supplier.reservation_count(), 1);
        assert_eq!(h.status(id).await, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_guest_confirm_by_hold_code_settles_payment() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;
        let intent_id = h
            .gateway
            .complete_session(&TestHarness::session_id(&outcome))
            .unwrap();

        let confirmed = h
            .saga
            .confirm(
                ConfirmTarget::HoldCode(outcome.hold_code.clone()),
                ConfirmSource::Guest,
            )
            .await
            .unwrap();

        assert_eq!(confirmed.booking_id, outcome.booking_id);
        let record = h.saga.booking(outcome.booking_id).await.unwrap();
        assert_eq!(record.status(), BookingStatus::Confirmed);
        assert_eq!(
            record.confirmation().unwrap().confirmation_code,
            confirmed.confirmation.confirmation_code
        );
        let payment = record.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.intent_id.as_deref(), Some(intent_id.as_str()));
        assert!(payment.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_guest_cannot_confirm_unpaid_booking() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        let result = h
            .saga
            .confirm(
                ConfirmTarget::BookingId(outcome.booking_id),
                ConfirmSource::Guest,
            )
            .await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(h.supplier.commit_calls(), 0);
        assert_eq!(h.status(outcome.booking_id).await, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_unpaid_intent_is_never_committed() {
        let h = TestHarness::new();
        let mut request = TestHarness::request();
        request.payment_mode = PaymentMode::Intent;
        let outcome = h.saga.prebook(request).await.unwrap();
        let PaymentHandle::Intent { intent_id, .. } = &outcome.payment else {
            panic!("expected an intent handle");
        };

        for source in [ConfirmSource::Guest, ConfirmSource::Operator] {
            let result = h
                .saga
                .confirm(ConfirmTarget::BookingId(outcome.booking_id), source)
                .await;
            assert!(matches!(result, Err(SagaError::Validation(_))));
        }
        assert_eq!(h.supplier.commit_calls(), 0);
        assert_eq!(
            h.payment_status(outcome.booking_id).await,
            PaymentStatus::Pending
        );

        assert!(h.gateway.pay_intent(intent_id));
        let confirmed = h
            .saga
            .confirm(
                ConfirmTarget::HoldCode(outcome.hold_code.clone()),
                ConfirmSource::Guest,
            )
            .await
            .unwrap();

        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(h.supplier.commit_calls(), 1);
        assert_eq!(
            h.payment_status(outcome.booking_id).await,
            PaymentStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_unknown_hold_code() {
        let h = TestHarness::new();
        let result = h
            .saga
            .confirm(
                ConfirmTarget::HoldCode("PB-404".to_string()),
                ConfirmSource::Guest,
            )
            .await;
        assert!(matches!(result, Err(SagaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_commit_failure_then_operator_retry() {
        let h = TestHarness::new();
        let (id, _) = h.paid().await;
        let mut observed = vec![h.status(id).await];

        h.supplier.set_fail_on_commit(true);
        let result = h.saga.retry_confirmation(id).await;
        match result {
            Err(SagaError::SupplierCommit {
                outcome_unknown, ..
            }) => assert!(!outcome_unknown),
            other => panic!("unexpected result: {other:?}"),
        }
        observed.push(h.status(id).await);
        assert_eq!(observed[1], BookingStatus::ConfirmationFailed);
        assert!(h.has_event(id, LedgerEventKind::SupplierCommitFailed).await);

        h.supplier.set_fail_on_commit(false);
        let retried = h.saga.retry_confirmation(id).await.unwrap();
        observed.push(h.status(id).await);

        assert_eq!(retried.status, BookingStatus::Confirmed);
        assert_legal_path(&observed);
    }

    #[tokio::test]
    async fn test_commit_timeout_lands_in_confirmation_failed() {
        let h = TestHarness::with_settings(SagaSettings {
            supplier_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        h.supplier
            .set_commit_delay(Some(Duration::from_millis(500)));
        let (id, _) = h.paid().await;

        let result = h
            .saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::Webhook)
            .await;

        match result {
            Err(SagaError::SupplierCommit {
                outcome_unknown, ..
            }) => assert!(outcome_unknown),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(h.status(id).await, BookingStatus::ConfirmationFailed);
    }

    #[tokio::test]
    async fn test_mark_failed_only_from_confirmation_failed() {
        let h = TestHarness::new();
        let (id, _) = h.paid().await;

        let early = h.saga.mark_failed(id, "guest asked to stop").await;
        assert!(matches!(early, Err(SagaError::InvalidState { .. })));

        h.supplier.set_fail_on_commit(true);
        let _ = h.saga.retry_confirmation(id).await;
        let record = h.saga.mark_failed(id, "hotel overbooked").await.unwrap();

        assert_eq!(record.status(), BookingStatus::Failed);
        let again = h
            .saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::Operator)
            .await;
        assert!(matches!(again, Err(SagaError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_confirmation() {
        let h = TestHarness::new();
        h.notifier.set_fail_on_send(true);
        let (id, _) = h.paid().await;

        let outcome = h
            .saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::Webhook)
            .await
            .unwrap();
        assert_eq!(outcome.status, BookingStatus::Confirmed);

        let mut recorded = false;
        for _ in 0..50 {
            if h.has_event(id, LedgerEventKind::NotificationFailed).await {
                recorded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(recorded, "notification failure was not recorded");
        assert_eq!(h.status(id).await, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_confirmation_notification_is_sent() {
        let h = TestHarness::new();
        h.confirmed().await;

        let mut sent = Vec::new();
        for _ in 0..50 {
            sent = h.notifier.sent();
            if !sent.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), "booking_confirmed");
    }
}

mod refunds {
    use super::*;

    #[tokio::test]
    async fn test_full_refund_without_amount() {
        let h = TestHarness::new();
        let (id, _) = h.paid().await;
        let mut observed = vec![h.status(id).await];

        h.saga
            .confirm(ConfirmTarget::BookingId(id), ConfirmSource::Webhook)
            .await
            .unwrap();
        observed.push(h.status(id).await);

        let outcome = h.saga.refund(id, RefundCommand::default()).await.unwrap();
        observed.push(h.status(id).await);

        match outcome {
            RefundOutcome::Refunded {
                amount,
                full,
                booking_status,
                payment_status,
                ..
            } => {
                assert_eq!(amount, Money::from_major(200));
                assert!(full);
                assert_eq!(booking_status, BookingStatus::Refunded);
                assert_eq!(payment_status, PaymentStatus::Refunded);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            observed,
            [
                BookingStatus::Pending,
                BookingStatus::Confirmed,
                BookingStatus::Refunded
            ]
        );
        assert_legal_path(&observed);
        assert_eq!(h.payment_status(id).await, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_partial_refund_keeps_booking_status() {
        let h = TestHarness::new();
        let id = h.confirmed().await;

        let command = RefundCommand {
            amount: Some(Money::from_major(50)),
            ..Default::default()
        };
        let outcome = h.saga.refund(id, command).await.unwrap();
        assert!(matches!(outcome, RefundOutcome::Refunded { full: false, .. }));

        assert_eq!(h.status(id).await, BookingStatus::Confirmed);
        let payment = h.saga.booking(id).await.unwrap().payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.refunded_amount, Money::from_major(50));

        let rest = h.saga.refund(id, RefundCommand::default()).await.unwrap();
        assert!(matches!(rest, RefundOutcome::Refunded { full: true, .. }));
        assert_eq!(h.status(id).await, BookingStatus::Refunded);
        assert_eq!(h.gateway.refund_count(), 2);

        let listed = h.saga.gateway_refunds(id).await.unwrap();
        let total: Money = listed.iter().map(|r| r.amount).sum();
        assert_eq!(listed.len(), 2);
        assert_eq!(total, Money::from_major(200));
    }

    #[tokio::test]
    async fn test_retried_full_refund_does_not_pay_twice() {
        let h = TestHarness::new();
        let id = h.confirmed().await;

        h.saga.refund(id, RefundCommand::default()).await.unwrap();
        let again = h.saga.refund(id, RefundCommand::default()).await;

        assert!(matches!(again, Err(SagaError::InvalidState { .. })));
        assert_eq!(h.gateway.refund_count(), 1);
    }

    #[tokio::test]
    async fn test_refund_exceeding_balance_is_rejected() {
        let h = TestHarness::new();
        let id = h.confirmed().await;

        let command = RefundCommand {
            amount: Some(Money::from_major(250)),
            ..Default::default()
        };
        let result = h.saga.refund(id, command).await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(h.gateway.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_non_refundable_is_blocked_without_override() {
        let h = TestHarness::new();
        h.supplier.set_policies(vec![PolicyTier::new(100, None)]);
        let id = h.confirmed().await;

        let blocked = h.saga.refund(id, RefundCommand::default()).await.unwrap();
        match &blocked {
            RefundOutcome::PolicyBlocked { recommendation } => {
                assert_eq!(recommendation.amount, Money::zero());
                assert!(recommendation.blocked);
                assert_eq!(recommendation.basis, RecommendationBasis::NonRefundable);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.gateway.refund_count(), 0);
        assert!(h.has_event(id, LedgerEventKind::RefundBlocked).await);

        let command = RefundCommand {
            override_policy: true,
            reason: Some("hotel closed".to_string()),
            ..Default::default()
        };
        let forced = h.saga.refund(id, command).await.unwrap();
        assert!(matches!(forced, RefundOutcome::Refunded { full: true, .. }));
        assert_eq!(forced.recommendation().amount, Money::zero());
        assert_eq!(h.status(id).await, BookingStatus::Refunded);
    }

    #[tokio::test]
    async fn test_preview_past_deadline() {
        let h = TestHarness::new();
        let deadline = Utc::now() - chrono::Duration::days(1);
        h.supplier
            .set_policies(vec![PolicyTier::new(30, Some(deadline))]);
        let id = h.confirmed().await;

        let preview = h.saga.refund_preview(id).await.unwrap();

        assert_eq!(preview.paid, Money::from_major(200));
        assert_eq!(preview.recommendation.amount, Money::from_cents(14_000));
        assert_eq!(preview.recommendation.basis, RecommendationBasis::PastDeadline);
        assert!(!preview.recommendation.blocked);
        assert_eq!(h.gateway.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_is_transient() {
        let h = TestHarness::new();
        let id = h.confirmed().await;
        h.gateway.set_fail_on_refund(true);

        let outcome = h.saga.refund(id, RefundCommand::default()).await.unwrap();

        assert!(matches!(outcome, RefundOutcome::TransientFailure { .. }));
        assert_eq!(h.payment_status(id).await, PaymentStatus::Completed);
        assert_eq!(h.status(id).await, BookingStatus::Confirmed);
        assert!(h.has_event(id, LedgerEventKind::RefundFailed).await);

        h.gateway.set_fail_on_refund(false);
        let retried = h.saga.refund(id, RefundCommand::default()).await.unwrap();
        assert!(matches!(retried, RefundOutcome::Refunded { full: true, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_partial_refunds_move_money_once() {
        let h = TestHarness::new();
        let id = h.confirmed().await;
        h.gateway.set_refund_delay(Duration::from_millis(50));

        let partial = |major| RefundCommand {
            amount: Some(Money::from_major(major)),
            ..Default::default()
        };
        let (first, second) = tokio::join!(
            h.saga.refund(id, partial(50)),
            h.saga.refund(id, partial(60)),
        );

        let results = [first, second];
        let refunded = results
            .iter()
            .filter(|r| matches!(r, Ok(RefundOutcome::Refunded { .. })))
            .count();
        assert_eq!(refunded, 1);
        let rejected = results
            .iter()
            .find_map(|r| r.as_ref().err())
            .expect("one refund should lose the claim");
        assert!(rejected.is_retryable());

        let gateway_refunds = h.saga.gateway_refunds(id).await.unwrap();
        let moved: Money = gateway_refunds.iter().map(|r| r.amount).sum();
        assert_eq!(gateway_refunds.len(), 1);

        let payment = h.saga.booking(id).await.unwrap().payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.refunded_amount, moved);
        assert!(h.has_event(id, LedgerEventKind::RefundRequested).await);
    }

    #[tokio::test]
    async fn test_payment_reads_refunding_while_gateway_call_is_in_flight() {
        let h = TestHarness::new();
        let id = h.confirmed().await;
        h.gateway.set_refund_delay(Duration::from_millis(50));

        let (refund, preview) = tokio::join!(
            h.saga.refund(id, RefundCommand::default()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.payment_status(id).await
            },
        );

        assert!(matches!(refund, Ok(RefundOutcome::Refunded { full: true, .. })));
        assert_eq!(preview, PaymentStatus::Refunding);
        assert_eq!(h.payment_status(id).await, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_refund_requires_completed_payment() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        let result = h
            .saga
            .refund(outcome.booking_id, RefundCommand::default())
            .await;
        assert!(matches!(result, Err(SagaError::InvalidState { .. })));
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_cancel_then_refund_paid_minus_fee() {
        let h = TestHarness::new();
        h.supplier.set_cancellation_fee(Money::from_major(50));
        let id = h.confirmed().await;

        let outcome = h.saga.cancel_supplier(id, true, false).await.unwrap();

        assert_eq!(outcome.status, BookingStatus::Cancelled);
        assert_eq!(outcome.fee, Money::from_major(50));
        assert!(outcome.supplier_called);
        match outcome.refund {
            Some(RefundOutcome::Refunded {
                amount,
                full,
                booking_status,
                ..
            }) => {
                assert_eq!(amount, Money::from_major(150));
                assert!(!full);
                assert_eq!(booking_status, BookingStatus::Cancelled);
            }
            other => panic!("unexpected refund: {other:?}"),
        }

        let record = h.saga.booking(id).await.unwrap();
        assert_eq!(record.hotel.cancellation_fee, Some(Money::from_major(50)));
        assert!(h.supplier.is_cancelled(&record.confirmation().unwrap().confirmation_code));
        let payment = record.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.refunded_amount, Money::from_major(150));
    }

    #[tokio::test]
    async fn test_cancel_is_retriable_without_second_supplier_call() {
        let h = TestHarness::new();
        let id = h.confirmed().await;

        let first = h.saga.cancel_supplier(id, false, false).await.unwrap();
        let second = h.saga.cancel_supplier(id, true, false).await.unwrap();

        assert!(first.supplier_called);
        assert!(!second.supplier_called);
        assert_eq!(second.status, BookingStatus::Cancelled);
        assert!(matches!(
            second.refund,
            Some(RefundOutcome::Refunded { .. })
        ));
    }

    #[tokio::test]
    async fn test_supplier_refusal_keeps_booking_confirmed() {
        let h = TestHarness::new();
        let id = h.confirmed().await;
        h.supplier.set_fail_on_cancel(true);

        let result = h.saga.cancel_supplier(id, true, false).await;

        assert!(matches!(result, Err(SagaError::SupplierCancel(_))));
        assert_eq!(h.status(id).await, BookingStatus::Confirmed);
        assert!(h.has_event(id, LedgerEventKind::SupplierCancelFailed).await);
        assert_eq!(h.gateway.refund_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_booking_is_invalid() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        let result = h
            .saga
            .cancel_supplier(outcome.booking_id, false, false)
            .await;
        assert!(matches!(result, Err(SagaError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_chained_refund_respects_policy_block() {
        let h = TestHarness::new();
        h.supplier.set_policies(vec![PolicyTier::new(100, None)]);
        let id = h.confirmed().await;

        let outcome = h.saga.cancel_supplier(id, true, false).await.unwrap();

        assert_eq!(outcome.status, BookingStatus::Cancelled);
        assert!(matches!(
            outcome.refund,
            Some(RefundOutcome::PolicyBlocked { .. })
        ));
        assert_eq!(h.gateway.refund_count(), 0);
    }
}

mod reconciliation {
    use super::*;

    #[tokio::test]
    async fn test_paid_pending_booking_is_repaired() {
        let h = TestHarness::new();
        let (id, session_id) = h.paid().await;

        let report = h.saga.check_session_status(&session_id).await.unwrap();

        assert!(matches!(
            report.state,
            ReconciliationState::Confirmed { repaired: true, .. }
        ));
        assert_eq!(report.booking_id, Some(id));
        assert_eq!(report.booking_status, Some(BookingStatus::Confirmed));
        assert_eq!(h.payment_status(id).await, PaymentStatus::Completed);
        assert!(h.has_event(id, LedgerEventKind::ReconciliationTriggered).await);

        let again = h.saga.check_session_status(&session_id).await.unwrap();
        assert!(matches!(
            again.state,
            ReconciliationState::Confirmed {
                repaired: false,
                ..
            }
        ));
        assert_eq!(h.supplier.commit_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_repair_is_distinguishable() {
        let ok = TestHarness::new();
        let (_, ok_session) = ok.paid().await;
        let confirmed = ok.saga.check_session_status(&ok_session).await.unwrap();

        let h = TestHarness::new();
        h.supplier.set_fail_on_commit(true);
        let (id, session_id) = h.paid().await;
        let report = h.saga.check_session_status(&session_id).await.unwrap();

        assert_eq!(
            report.state,
            ReconciliationState::PaymentReceivedPendingManualFix
        );
        assert_eq!(report.booking_status, Some(BookingStatus::ConfirmationFailed));
        assert_eq!(h.status(id).await, BookingStatus::ConfirmationFailed);
        assert_ne!(report.message, confirmed.message);
        assert!(!report.message.contains("ROOM_UNAVAILABLE"));

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["state"], "payment_received_pending_manual_fix");
    }

    #[tokio::test]
    async fn test_unpaid_session_waits() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        let report = h
            .saga
            .check_session_status(&TestHarness::session_id(&outcome))
            .await
            .unwrap();

        assert_eq!(report.state, ReconciliationState::AwaitingPayment);
        assert_eq!(report.payment_status, GatewayPaymentStatus::Unpaid);
        assert_eq!(h.supplier.commit_calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_fails_booking() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;
        let session_id = TestHarness::session_id(&outcome);
        h.gateway.expire_session(&session_id);

        let report = h.saga.check_session_status(&session_id).await.unwrap();

        assert_eq!(report.state, ReconciliationState::Expired);
        assert_eq!(h.status(outcome.booking_id).await, BookingStatus::Failed);
        assert_eq!(h.payment_status(outcome.booking_id).await, PaymentStatus::Failed);
        let failed = h.saga.failed_payments().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].booking_id, Some(outcome.booking_id));
    }

    #[tokio::test]
    async fn test_gateway_outage_surfaces_gateway_error() {
        let h = TestHarness::new();
        let (id, session_id) = h.paid().await;
        h.gateway.set_fail_on_status(true);

        let result = h.saga.check_session_status(&session_id).await;

        assert!(matches!(result, Err(SagaError::Gateway { .. })));
        assert_eq!(h.status(id).await, BookingStatus::Pending);
    }
}

mod webhooks {
    use std::collections::BTreeMap;

    use saga::PaymentGateway;

    use super::*;

    #[tokio::test]
    async fn test_checkout_completed_confirms_once() {
        let h = TestHarness::new();
        let (id, session_id) = h.paid().await;
        let status = h.gateway.get_session_status(&session_id).await.unwrap();

        let event = GatewayEvent::CheckoutCompleted {
            session_id: session_id.clone(),
            intent_id: status.intent_id,
            payment_status: GatewayPaymentStatus::Paid,
            metadata: BTreeMap::new(),
            amount_total: Some(Money::from_major(200)),
            customer_email: None,
        };

        let first = h.saga.handle_webhook(event.clone()).await.unwrap();
        let second = h.saga.handle_webhook(event).await.unwrap();

        assert_eq!(
            first,
            WebhookOutcome::Confirmed {
                booking_id: id,
                already_confirmed: false
            }
        );
        assert_eq!(
            second,
            WebhookOutcome::Confirmed {
                booking_id: id,
                already_confirmed: true
            }
        );
        assert_eq!(h.supplier.commit_calls(), 1);
    }

    #[tokio::test]
    async fn test_checkout_needing_no_payment_confirms() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        let result = h
            .saga
            .handle_webhook(GatewayEvent::CheckoutCompleted {
                session_id: TestHarness::session_id(&outcome),
                intent_id: None,
                payment_status: GatewayPaymentStatus::NoPaymentRequired,
                metadata: BTreeMap::new(),
                amount_total: Some(Money::zero()),
                customer_email: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            result,
            WebhookOutcome::Confirmed {
                already_confirmed: false,
                ..
            }
        ));
        assert_eq!(h.status(outcome.booking_id).await, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_payment_failed_fails_pending_booking() {
        let h = TestHarness::new();
        let mut request = TestHarness::request();
        request.payment_mode = PaymentMode::Intent;
        let outcome = h.saga.prebook(request).await.unwrap();
        let PaymentHandle::Intent { intent_id, .. } = outcome.payment else {
            panic!("expected an intent handle");
        };

        let result = h
            .saga
            .handle_webhook(GatewayEvent::PaymentFailed {
                intent_id,
                metadata: BTreeMap::new(),
                amount: Some(Money::from_major(200)),
                reason: "card declined".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            result,
            WebhookOutcome::BookingFailed {
                booking_id: outcome.booking_id
            }
        );
        assert_eq!(h.status(outcome.booking_id).await, BookingStatus::Failed);
        assert_eq!(h.saga.failed_payments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_booking_found_through_metadata() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;
        let metadata = BTreeMap::from([("hold_code".to_string(), outcome.hold_code.clone())]);

        let result = h
            .saga
            .handle_webhook(GatewayEvent::PaymentSucceeded {
                intent_id: "pi_external".to_string(),
                metadata,
                amount: Some(Money::from_major(200)),
            })
            .await
            .unwrap();

        assert!(matches!(result, WebhookOutcome::Confirmed { .. }));
        let payment = h.saga.booking(outcome.booking_id).await.unwrap().payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.intent_id.as_deref(), Some("pi_external"));
    }

    #[tokio::test]
    async fn test_unmatched_payment_is_recorded_once() {
        let h = TestHarness::new();
        let event = GatewayEvent::PaymentSucceeded {
            intent_id: "pi_orphan".to_string(),
            metadata: BTreeMap::new(),
            amount: Some(Money::from_major(99)),
        };

        let first = h.saga.handle_webhook(event.clone()).await.unwrap();
        h.saga.handle_webhook(event).await.unwrap();

        assert_eq!(
            first,
            WebhookOutcome::Unmatched {
                reference: "pi_orphan".to_string()
            }
        );
        let failed = h.saga.failed_payments().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].booking_id, None);
        assert_eq!(failed[0].amount, Money::from_major(99));
    }

    #[tokio::test]
    async fn test_ignored_event() {
        let h = TestHarness::new();
        let result = h
            .saga
            .handle_webhook(GatewayEvent::Ignored {
                event_type: "customer.created".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(result, WebhookOutcome::Ignored { .. }));
    }
}

mod guest_view {
    use super::*;

    #[tokio::test]
    async fn test_wrong_token_looks_like_missing_booking() {
        let h = TestHarness::new();
        let outcome = h.prebook().await;

        let ok = h
            .saga
            .guest_booking(outcome.booking_id, &outcome.verification_token)
            .await;
        let wrong = h.saga.guest_booking(outcome.booking_id, "nope").await;
        let missing = h.saga.guest_booking(BookingId::new(), "nope").await;

        assert!(ok.is_ok());
        assert!(matches!(wrong, Err(SagaError::NotFound(_))));
        assert!(matches!(missing, Err(SagaError::NotFound(_))));
    }
}
