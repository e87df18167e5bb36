//! Structured audit trail entries.
//!
//! Every saga-relevant action on a booking appends one [`LedgerEvent`].
//! Events are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BookingId;

/// Unique identifier for a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerEventKind {
    BookingCreated,
    PaymentSessionCreated,
    StatusChanged,
    ConfirmationRequested,
    SupplierConfirmed,
    SupplierCommitFailed,
    PaymentSettled,
    PaymentFailed,
    SupplierCancelled,
    SupplierCancelFailed,
    RefundRequested,
    RefundIssued,
    RefundBlocked,
    RefundFailed,
    RefundUnrecorded,
    NotificationFailed,
    ReconciliationTriggered,
    ReconciliationConflict,
    OperatorNote,
}

impl LedgerEventKind {
    pub const ALL: [LedgerEventKind; 19] = [
        LedgerEventKind::BookingCreated,
        LedgerEventKind::PaymentSessionCreated,
        LedgerEventKind::StatusChanged,
        LedgerEventKind::ConfirmationRequested,
        LedgerEventKind::SupplierConfirmed,
        LedgerEventKind::SupplierCommitFailed,
        LedgerEventKind::PaymentSettled,
        LedgerEventKind::PaymentFailed,
        LedgerEventKind::SupplierCancelled,
        LedgerEventKind::SupplierCancelFailed,
        LedgerEventKind::RefundRequested,
        LedgerEventKind::RefundIssued,
        LedgerEventKind::RefundBlocked,
        LedgerEventKind::RefundFailed,
        LedgerEventKind::RefundUnrecorded,
        LedgerEventKind::NotificationFailed,
        LedgerEventKind::ReconciliationTriggered,
        LedgerEventKind::ReconciliationConflict,
        LedgerEventKind::OperatorNote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEventKind::BookingCreated => "BookingCreated",
            LedgerEventKind::PaymentSessionCreated => "PaymentSessionCreated",
            LedgerEventKind::StatusChanged => "StatusChanged",
            LedgerEventKind::ConfirmationRequested => "ConfirmationRequested",
            LedgerEventKind::SupplierConfirmed => "SupplierConfirmed",
            LedgerEventKind::SupplierCommitFailed => "SupplierCommitFailed",
            LedgerEventKind::PaymentSettled => "PaymentSettled",
            LedgerEventKind::PaymentFailed => "PaymentFailed",
            LedgerEventKind::SupplierCancelled => "SupplierCancelled",
            LedgerEventKind::SupplierCancelFailed => "SupplierCancelFailed",
            LedgerEventKind::RefundRequested => "RefundRequested",
            LedgerEventKind::RefundIssued => "RefundIssued",
            LedgerEventKind::RefundBlocked => "RefundBlocked",
            LedgerEventKind::RefundFailed => "RefundFailed",
            LedgerEventKind::RefundUnrecorded => "RefundUnrecorded",
            LedgerEventKind::NotificationFailed => "NotificationFailed",
            LedgerEventKind::ReconciliationTriggered => "ReconciliationTriggered",
            LedgerEventKind::ReconciliationConflict => "ReconciliationConflict",
            LedgerEventKind::OperatorNote => "OperatorNote",
        }
    }
}

impl std::fmt::Display for LedgerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LedgerEventKind {
    type Err = common::ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LedgerEventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| common::ParseStatusError {
                kind: "ledger event",
                value: s.to_string(),
            })
    }
}

/// One line of a booking's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: EventId,
    pub booking_id: BookingId,
    pub kind: LedgerEventKind,
    pub timestamp: DateTime<Utc>,
    /// Always a JSON object; `message` holds the human-readable line.
    pub payload: serde_json::Value,
}

impl LedgerEvent {
    /// Starts building an event for a booking.
    pub fn builder(booking_id: BookingId, kind: LedgerEventKind) -> LedgerEventBuilder {
        LedgerEventBuilder {
            booking_id,
            kind,
            timestamp: None,
            payload: serde_json::Map::new(),
        }
    }

    /// Shorthand for an event carrying only a message.
    pub fn note(booking_id: BookingId, kind: LedgerEventKind, message: impl Into<String>) -> Self {
        Self::builder(booking_id, kind).message(message).build()
    }

    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(|v| v.as_str())
    }

    /// Renders the event as a single timeline line.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.kind,
            self.message().unwrap_or("-")
        )
    }
}

/// Builder for [`LedgerEvent`].
#[derive(Debug)]
pub struct LedgerEventBuilder {
    booking_id: BookingId,
    kind: LedgerEventKind,
    timestamp: Option<DateTime<Utc>>,
    payload: serde_json::Map<String, serde_json::Value>,
}

impl LedgerEventBuilder {
    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.payload
            .insert("message".to_string(), serde_json::Value::String(message.into()));
        self
    }

    /// Adds a structured payload field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> LedgerEvent {
        LedgerEvent {
            event_id: EventId::new(),
            booking_id: self.booking_id,
            kind: self.kind,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: serde_json::Value::Object(self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_message_and_fields() {
        let booking_id = BookingId::new();
        let event = LedgerEvent::builder(booking_id, LedgerEventKind::SupplierCommitFailed)
            .message("supplier rejected commit")
            .field("supplier_error", "ROOM_GONE")
            .field("attempt", 2)
            .build();

        assert_eq!(event.booking_id, booking_id);
        assert_eq!(event.kind, LedgerEventKind::SupplierCommitFailed);
        assert_eq!(event.message(), Some("supplier rejected commit"));
        assert_eq!(event.payload["supplier_error"], "ROOM_GONE");
        assert_eq!(event.payload["attempt"], 2);
    }

    #[test]
    fn render_includes_kind_and_message() {
        let event = LedgerEvent::note(BookingId::new(), LedgerEventKind::OperatorNote, "called guest");
        let line = event.render();
        assert!(line.contains("OperatorNote: called guest"));
    }

    #[test]
    fn kind_parses_its_own_name() {
        for kind in LedgerEventKind::ALL {
            assert_eq!(kind.as_str().parse::<LedgerEventKind>().unwrap(), kind);
        }
    }
}
