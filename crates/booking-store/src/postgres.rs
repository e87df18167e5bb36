use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Booking, BookingId, BookingRecord, CancellationPolicySnapshot, ConfirmationDetails,
    EventId, FailedPayment, HotelBooking, LedgerEvent, Money, Payment, Result, StoreError,
    store::{BookingStore, PaymentTransition, StatusTransition},
};

const SELECT_RECORD: &str = r#"
    SELECT b.id, b.user_id, b.booking_type, b.status, b.total_price_cents, b.currency,
           b.coupon_discount_cents, b.verification_token, b.created_at, b.updated_at,
           h.hotel_id, h.room_id, h.meal_id, h.check_in, h.check_out, h.adults, h.children,
           h.guest_name, h.guest_email, h.guest_phone, h.pre_book_code, h.pre_book_expires_at,
           h.is_refundable, h.free_cancellation_deadline, h.cancellation_percentage,
           h.max_refundable_cents, h.policy_description, h.confirmation_code, h.voucher,
           h.invoice_ref, h.hotel_contact, h.meal_name, h.supplier_booked_at,
           h.cancellation_fee_cents,
           p.booking_id AS payment_booking_id, p.intent_id, p.session_id,
           p.amount_cents AS payment_amount_cents, p.refunded_cents,
           p.currency AS payment_currency, p.status AS payment_status, p.paid_at,
           p.created_at AS payment_created_at, p.updated_at AS payment_updated_at
    FROM bookings b
    JOIN hotel_bookings h ON h.booking_id = b.id
    LEFT JOIN payments p ON p.booking_id = b.id
"#;

/// PostgreSQL-backed booking store.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_record(&self, clause: &str, bind: Bind<'_>) -> Result<Option<BookingRecord>> {
        let sql = format!("{SELECT_RECORD} WHERE {clause}");
        let query = sqlx::query(&sql);
        let query = match bind {
            Bind::Uuid(id) => query.bind(id),
            Bind::Text(text) => query.bind(text),
        };
        let row = query.fetch_optional(&self.pool).await?;
        row.map(row_to_record).transpose()
    }
}

enum Bind<'a> {
    Uuid(Uuid),
    Text(&'a str),
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T> {
    T::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn column_int(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{column}: {value}")))
}

fn row_to_record(row: PgRow) -> Result<BookingRecord> {
    let id = BookingId::from_uuid(row.try_get::<Uuid, _>("id")?);

    let booking = Booking {
        id,
        user_id: row.try_get("user_id")?,
        booking_type: row.try_get::<String, _>("booking_type")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        total_price: Money::from_cents(row.try_get("total_price_cents")?),
        currency: row.try_get("currency")?,
        coupon_discount: Money::from_cents(row.try_get("coupon_discount_cents")?),
        verification_token: row.try_get("verification_token")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    };

    let confirmation = match row.try_get::<Option<String>, _>("confirmation_code")? {
        Some(confirmation_code) => Some(ConfirmationDetails {
            confirmation_code,
            voucher: row.try_get("voucher")?,
            invoice_ref: row.try_get("invoice_ref")?,
            hotel_contact: row.try_get("hotel_contact")?,
            meal_name: row.try_get("meal_name")?,
            booked_at: row
                .try_get::<Option<DateTime<Utc>>, _>("supplier_booked_at")?
                .unwrap_or(booking.updated_at),
        }),
        None => None,
    };

    let hotel = HotelBooking {
        booking_id: id,
        hotel_id: row.try_get("hotel_id")?,
        room_id: row.try_get("room_id")?,
        meal_id: row.try_get("meal_id")?,
        check_in: row.try_get("check_in")?,
        check_out: row.try_get("check_out")?,
        adults: narrow(row.try_get::<i32, _>("adults")? as i64, "adults")?,
        children: narrow(row.try_get::<i32, _>("children")? as i64, "children")?,
        guest_name: row.try_get("guest_name")?,
        guest_email: row.try_get("guest_email")?,
        guest_phone: row.try_get("guest_phone")?,
        pre_book_code: row.try_get("pre_book_code")?,
        pre_book_expires_at: row.try_get("pre_book_expires_at")?,
        cancellation_policy: CancellationPolicySnapshot {
            is_refundable: row.try_get("is_refundable")?,
            free_cancellation_deadline: row.try_get("free_cancellation_deadline")?,
            cancellation_percentage: narrow(
                row.try_get::<i16, _>("cancellation_percentage")? as i64,
                "cancellation_percentage",
            )?,
            max_refundable_amount: Money::from_cents(row.try_get("max_refundable_cents")?),
            description: row.try_get("policy_description")?,
        },
        confirmation,
        cancellation_fee: row
            .try_get::<Option<i64>, _>("cancellation_fee_cents")?
            .map(Money::from_cents),
    };

    let payment = match row.try_get::<Option<Uuid>, _>("payment_booking_id")? {
        Some(_) => Some(Payment {
            booking_id: id,
            intent_id: row.try_get("intent_id")?,
            session_id: row.try_get("session_id")?,
            amount: Money::from_cents(row.try_get("payment_amount_cents")?),
            refunded_amount: Money::from_cents(row.try_get("refunded_cents")?),
            currency: row.try_get("payment_currency")?,
            status: row.try_get::<String, _>("payment_status")?.parse()?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("payment_created_at")?,
            updated_at: row.try_get("payment_updated_at")?,
        }),
        None => None,
    };

    Ok(BookingRecord {
        booking,
        hotel,
        payment,
    })
}

fn row_to_event(row: PgRow) -> Result<LedgerEvent> {
    Ok(LedgerEvent {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
        kind: row.try_get::<String, _>("event_type")?.parse()?,
        timestamp: row.try_get("timestamp")?,
        payload: row.try_get("payload")?,
    })
}

fn row_to_failed_payment(row: PgRow) -> Result<FailedPayment> {
    Ok(FailedPayment {
        id: row.try_get("id")?,
        booking_id: row
            .try_get::<Option<Uuid>, _>("booking_id")?
            .map(BookingId::from_uuid),
        session_id: row.try_get("session_id")?,
        intent_id: row.try_get("intent_id")?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        currency: row.try_get("currency")?,
        guest_email: row.try_get("guest_email")?,
        reason: row.try_get("reason")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

async fn insert_event<'e, E>(executor: E, event: &LedgerEvent) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO booking_events (id, booking_id, event_type, timestamp, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.event_id.as_uuid())
    .bind(event.booking_id.as_uuid())
    .bind(event.kind.as_str())
    .bind(event.timestamp)
    .bind(&event.payload)
    .execute(executor)
    .await?;
    Ok(())
}

fn map_unique_violation(e: sqlx::Error, what: String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Duplicate(what);
    }
    StoreError::Database(e)
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    async fn insert_booking(
        &self,
        booking: Booking,
        hotel: HotelBooking,
        event: LedgerEvent,
    ) -> Result<()> {
        let adults = column_int(hotel.adults, "adults")?;
        let children = column_int(hotel.children, "children")?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, booking_type, status, total_price_cents, currency,
                                  coupon_discount_cents, verification_token, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(booking.user_id)
        .bind(booking.booking_type.as_str())
        .bind(booking.status.as_str())
        .bind(booking.total_price.cents())
        .bind(&booking.currency)
        .bind(booking.coupon_discount.cents())
        .bind(&booking.verification_token)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, format!("booking {}", booking.id)))?;

        let policy = &hotel.cancellation_policy;
        sqlx::query(
            r#"
            INSERT INTO hotel_bookings (booking_id, hotel_id, room_id, meal_id, check_in, check_out,
                                        adults, children, guest_name, guest_email, guest_phone,
                                        pre_book_code, pre_book_expires_at, is_refundable,
                                        free_cancellation_deadline, cancellation_percentage,
                                        max_refundable_cents, policy_description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(&hotel.hotel_id)
        .bind(&hotel.room_id)
        .bind(&hotel.meal_id)
        .bind(hotel.check_in)
        .bind(hotel.check_out)
        .bind(adults)
        .bind(children)
        .bind(&hotel.guest_name)
        .bind(&hotel.guest_email)
        .bind(&hotel.guest_phone)
        .bind(&hotel.pre_book_code)
        .bind(hotel.pre_book_expires_at)
        .bind(policy.is_refundable)
        .bind(policy.free_cancellation_deadline)
        .bind(policy.cancellation_percentage as i16)
        .bind(policy.max_refundable_amount.cents())
        .bind(&policy.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, format!("pre-book code {}", hotel.pre_book_code)))?;

        insert_event(&mut *tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<BookingRecord>> {
        self.fetch_record("b.id = $1", Bind::Uuid(id.as_uuid()))
            .await
    }

    async fn find_by_pre_book_code(&self, code: &str) -> Result<Option<BookingRecord>> {
        self.fetch_record("h.pre_book_code = $1", Bind::Text(code))
            .await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<BookingRecord>> {
        self.fetch_record(
            "(p.session_id = $1 OR p.intent_id = $1)",
            Bind::Text(reference),
        )
        .await
    }

    async fn transition_status(&self, id: BookingId, transition: StatusTransition) -> Result<u64> {
        let expected: Vec<String> = transition
            .expected
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE bookings SET status = $1, updated_at = $2
            WHERE id = $3 AND status = ANY($4)
            "#,
        )
        .bind(transition.to.as_str())
        .bind(transition.event.timestamp)
        .bind(id.as_uuid())
        .bind(expected)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        if let Some(c) = &transition.confirmation {
            sqlx::query(
                r#"
                UPDATE hotel_bookings
                SET confirmation_code = $1, voucher = $2, invoice_ref = $3, hotel_contact = $4,
                    meal_name = $5, supplier_booked_at = $6
                WHERE booking_id = $7
                "#,
            )
            .bind(&c.confirmation_code)
            .bind(&c.voucher)
            .bind(&c.invoice_ref)
            .bind(&c.hotel_contact)
            .bind(&c.meal_name)
            .bind(c.booked_at)
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(fee) = transition.cancellation_fee {
            sqlx::query("UPDATE hotel_bookings SET cancellation_fee_cents = $1 WHERE booking_id = $2")
                .bind(fee.cents())
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        insert_event(&mut *tx, &transition.event).await?;

        tx.commit().await?;
        Ok(rows)
    }

    async fn attach_payment(&self, payment: Payment, event: LedgerEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO payments (booking_id, intent_id, session_id, amount_cents, refunded_cents,
                                  currency, status, paid_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (booking_id) DO UPDATE SET
                intent_id = COALESCE(payments.intent_id, EXCLUDED.intent_id),
                session_id = COALESCE(payments.session_id, EXCLUDED.session_id),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(payment.booking_id.as_uuid())
        .bind(&payment.intent_id)
        .bind(&payment.session_id)
        .bind(payment.amount.cents())
        .bind(payment.refunded_amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::NotFound(payment.booking_id);
            }
            StoreError::Database(e)
        })?;

        insert_event(&mut *tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn transition_payment(
        &self,
        booking_id: BookingId,
        transition: PaymentTransition,
    ) -> Result<u64> {
        let expected: Vec<String> = transition
            .expected
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1,
                refunded_cents = refunded_cents + $2,
                paid_at = COALESCE($3, paid_at),
                intent_id = COALESCE($4, intent_id),
                updated_at = $5
            WHERE booking_id = $6
              AND status = ANY($7)
              AND ($8::BIGINT IS NULL OR refunded_cents = $8)
            "#,
        )
        .bind(transition.to.as_str())
        .bind(transition.add_refunded.cents())
        .bind(transition.paid_at)
        .bind(&transition.intent_id)
        .bind(transition.event.timestamp)
        .bind(booking_id.as_uuid())
        .bind(expected)
        .bind(transition.expected_refunded.map(|m| m.cents()))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        insert_event(&mut *tx, &transition.event).await?;

        tx.commit().await?;
        Ok(rows)
    }

    async fn append_event(&self, event: LedgerEvent) -> Result<()> {
        insert_event(&self.pool, &event).await.map_err(|e| match e {
            StoreError::Database(sqlx::Error::Database(ref db_err))
                if db_err.is_foreign_key_violation() =>
            {
                StoreError::NotFound(event.booking_id)
            }
            other => other,
        })
    }

    async fn events_for_booking(&self, id: BookingId) -> Result<Vec<LedgerEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, booking_id, event_type, timestamp, payload
            FROM booking_events
            WHERE booking_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn insert_failed_payment(&self, failed: FailedPayment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_payments (id, booking_id, session_id, intent_id, amount_cents,
                                         currency, guest_email, reason, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(failed.id)
        .bind(failed.booking_id.map(|id| id.as_uuid()))
        .bind(&failed.session_id)
        .bind(&failed.intent_id)
        .bind(failed.amount.cents())
        .bind(&failed.currency)
        .bind(&failed.guest_email)
        .bind(&failed.reason)
        .bind(failed.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_failed_payments(&self) -> Result<Vec<FailedPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, booking_id, session_id, intent_id, amount_cents, currency, guest_email,
                   reason, recorded_at
            FROM failed_payments
            ORDER BY recorded_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_failed_payment).collect()
    }

    async fn find_failed_payment(&self, reference: &str) -> Result<Option<FailedPayment>> {
        let row = sqlx::query(
            r#"
            SELECT id, booking_id, session_id, intent_id, amount_cents, currency, guest_email,
                   reason, recorded_at
            FROM failed_payments
            WHERE session_id = $1 OR intent_id = $1
            ORDER BY recorded_at
            LIMIT 1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_failed_payment).transpose()
    }
}
