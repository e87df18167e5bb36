//! Integration tests for the booking ledger.
//!
//! These tests drive the ledger against the in-memory store and check that
//! status only ever follows the transition graph.

use booking_store::{
    BookingStatus, ConfirmationDetails, InMemoryBookingStore, LedgerEventKind, Money, Payment,
    PaymentStatus,
};
use chrono::{Duration, NaiveDate, Utc};
use domain::{BookingDraft, BookingLedger, DomainError, PolicyTier, Settlement, derive_snapshot};

fn create_ledger() -> BookingLedger<InMemoryBookingStore> {
    BookingLedger::new(InMemoryBookingStore::new())
}

fn draft(code: &str) -> BookingDraft {
    let price = Money::from_major(200);
    BookingDraft {
        user_id: None,
        total_price: price,
        currency: "EUR".to_string(),
        coupon_discount: Money::zero(),
        hotel_id: "lp1897".to_string(),
        room_id: "room-1".to_string(),
        meal_id: "BB".to_string(),
        check_in: NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
        check_out: NaiveDate::from_ymd_opt(2030, 5, 4).unwrap(),
        adults: 2,
        children: 0,
        guest_name: "Ada Lovelace".to_string(),
        guest_email: "ada@example.com".to_string(),
        guest_phone: None,
        pre_book_code: code.to_string(),
        pre_book_expires_at: Utc::now() + Duration::minutes(15),
        cancellation_policy: derive_snapshot(
            &[PolicyTier::new(30, Some(Utc::now() + Duration::days(10)))],
            price,
        ),
    }
}

fn details(code: &str) -> ConfirmationDetails {
    ConfirmationDetails {
        confirmation_code: code.to_string(),
        voucher: Some("V-1".to_string()),
        invoice_ref: None,
        hotel_contact: None,
        meal_name: None,
        booked_at: Utc::now(),
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn create_confirm_cancel() {
        let ledger = create_ledger();
        let record = ledger.create_pending(draft("PB-1")).await.unwrap();
        let id = record.id();
        assert_eq!(record.status(), BookingStatus::Pending);
        assert_eq!(record.booking.verification_token.len(), 32);

        let confirmed = ledger.confirm(id, details("CONF-1")).await.unwrap();
        assert_eq!(confirmed.status(), BookingStatus::Confirmed);
        assert_eq!(confirmed.confirmation().unwrap().confirmation_code, "CONF-1");

        let cancelled = ledger
            .cancel(id, Money::from_major(60), "Cancelled at supplier")
            .await
            .unwrap();
        assert_eq!(cancelled.status(), BookingStatus::Cancelled);
        assert_eq!(cancelled.hotel.cancellation_fee, Some(Money::from_major(60)));

        let kinds: Vec<_> = ledger
            .events(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEventKind::BookingCreated,
                LedgerEventKind::SupplierConfirmed,
                LedgerEventKind::SupplierCancelled,
            ]
        );
    }

    #[tokio::test]
    async fn invalid_draft_writes_nothing() {
        let ledger = create_ledger();
        let mut bad = draft("PB-BAD");
        bad.check_out = bad.check_in;

        let result = ledger.create_pending(bad).await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(ledger.store().booking_count().await, 0);
    }

    #[tokio::test]
    async fn lookup_by_hold_code() {
        let ledger = create_ledger();
        let record = ledger.create_pending(draft("PB-LOOKUP")).await.unwrap();

        let found = ledger.find_by_hold_code("PB-LOOKUP").await.unwrap().unwrap();
        assert_eq!(found.id(), record.id());
        assert!(ledger.find_by_hold_code("PB-NONE").await.unwrap().is_none());
    }
}

mod status_guard {
    use super::*;

    #[tokio::test]
    async fn second_confirm_is_rejected_with_fresh_status() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-2")).await.unwrap().id();
        ledger.confirm(id, details("CONF-A")).await.unwrap();

        let err = ledger.confirm(id, details("CONF-B")).await.unwrap_err();
        match err {
            DomainError::InvalidState { actual, .. } => {
                assert_eq!(actual, BookingStatus::Confirmed)
            }
            other => panic!("unexpected error: {other}"),
        }

        let record = ledger.load(id).await.unwrap();
        assert_eq!(record.confirmation().unwrap().confirmation_code, "CONF-A");
    }

    #[tokio::test]
    async fn edges_outside_the_graph_are_refused() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-3")).await.unwrap().id();

        let err = ledger
            .transition(id, &[BookingStatus::Cancelled], BookingStatus::Confirmed, "no")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::IllegalTransition { .. }));
        assert_eq!(ledger.load(id).await.unwrap().status(), BookingStatus::Pending);
    }

    #[tokio::test]
    async fn commit_failure_then_retry_confirms() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-4")).await.unwrap().id();

        let failed = ledger
            .record_commit_failure(id, "timeout", true)
            .await
            .unwrap();
        assert_eq!(failed.status(), BookingStatus::ConfirmationFailed);

        // A second failure only adds to the trail.
        let again = ledger
            .record_commit_failure(id, "ROOM_GONE", false)
            .await
            .unwrap();
        assert_eq!(again.status(), BookingStatus::ConfirmationFailed);

        let confirmed = ledger.confirm(id, details("CONF-R")).await.unwrap();
        assert_eq!(confirmed.status(), BookingStatus::Confirmed);

        let failures = ledger
            .events(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == LedgerEventKind::SupplierCommitFailed)
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn commit_failure_on_terminal_booking_is_invalid() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-5")).await.unwrap().id();
        ledger
            .transition(id, &[BookingStatus::Pending], BookingStatus::Failed, "abandoned")
            .await
            .unwrap();

        let err = ledger
            .record_commit_failure(id, "late", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidState {
                actual: BookingStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let ledger = create_ledger();
        let err = ledger
            .confirm(booking_store::BookingId::new(), details("X"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}

mod payments {
    use super::*;

    #[tokio::test]
    async fn settle_is_idempotent() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-6")).await.unwrap().id();

        let mut payment = Payment::pending(id, Money::from_major(200), "EUR");
        payment.session_id = Some("cs_1".to_string());
        ledger.attach_payment(payment, "session created").await.unwrap();

        let settlement = Settlement {
            intent_id: Some("pi_1".to_string()),
            ..Default::default()
        };
        assert!(ledger.settle_payment(id, settlement.clone()).await.unwrap());
        assert!(!ledger.settle_payment(id, settlement).await.unwrap());

        let payment = ledger.load(id).await.unwrap().payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.intent_id.as_deref(), Some("pi_1"));
        assert!(payment.paid_at.is_some());
    }

    #[tokio::test]
    async fn settle_creates_missing_payment() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-7")).await.unwrap().id();

        ledger
            .settle_payment(
                id,
                Settlement {
                    intent_id: Some("pi_late".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let payment = ledger.load(id).await.unwrap().payment.unwrap();
        assert_eq!(payment.amount, Money::from_major(200));
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn partial_then_full_refund() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-8")).await.unwrap().id();
        ledger
            .settle_payment(id, Settlement::default())
            .await
            .unwrap();

        let seen = ledger.load(id).await.unwrap().payment.unwrap();
        let claimed = ledger
            .claim_refund(&seen, Money::from_major(50))
            .await
            .unwrap();
        assert_eq!(claimed.status, PaymentStatus::Refunding);

        let after = ledger
            .record_refund(&claimed, Money::from_major(50), "re_1")
            .await
            .unwrap();
        assert_eq!(after.status, PaymentStatus::Completed);
        assert_eq!(after.refundable_balance(), Money::from_major(150));

        // Stale read loses.
        let err = ledger
            .claim_refund(&seen, Money::from_major(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PaymentConflict(_)));

        let too_much = ledger
            .claim_refund(&after, Money::from_major(151))
            .await
            .unwrap_err();
        assert!(matches!(too_much, DomainError::Validation(_)));

        let claimed = ledger
            .claim_refund(&after, Money::from_major(150))
            .await
            .unwrap();
        let done = ledger
            .record_refund(&claimed, Money::from_major(150), "re_2")
            .await
            .unwrap();
        assert_eq!(done.status, PaymentStatus::Refunded);
        assert_eq!(done.refunded_amount, Money::from_major(200));
    }

    #[tokio::test]
    async fn refund_claim_is_exclusive() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-10")).await.unwrap().id();
        ledger
            .settle_payment(id, Settlement::default())
            .await
            .unwrap();
        let seen = ledger.load(id).await.unwrap().payment.unwrap();

        let claimed = ledger
            .claim_refund(&seen, Money::from_major(50))
            .await
            .unwrap();
        let second = ledger
            .claim_refund(&seen, Money::from_major(60))
            .await
            .unwrap_err();
        assert!(matches!(second, DomainError::PaymentConflict(_)));

        // Settling again never clobbers the claim.
        assert!(!ledger.settle_payment(id, Settlement::default()).await.unwrap());

        ledger.release_refund(&claimed, "gateway down").await.unwrap();
        let released = ledger.load(id).await.unwrap().payment.unwrap();
        assert_eq!(released.status, PaymentStatus::Completed);
        assert_eq!(released.refunded_amount, Money::zero());

        let kinds: Vec<_> = ledger
            .events(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&LedgerEventKind::RefundRequested));
        assert!(kinds.contains(&LedgerEventKind::RefundFailed));

        ledger
            .claim_refund(&released, Money::from_major(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fail_payment_only_from_pending() {
        let ledger = create_ledger();
        let id = ledger.create_pending(draft("PB-9")).await.unwrap().id();

        assert!(
            ledger
                .fail_payment(id, Settlement::default(), "card declined")
                .await
                .unwrap()
        );
        assert!(
            !ledger
                .fail_payment(id, Settlement::default(), "again")
                .await
                .unwrap()
        );
        let payment = ledger.load(id).await.unwrap().payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }
}
