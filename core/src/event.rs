//! Wire events carried by the broker.
//!
//! Two message families cross the pipeline: [`CommerceEvent`] — a request
//! to mutate financial state — and [`OutcomeNotification`] — the
//! asynchronous result of processing one, delivered best-effort to a live
//! client. Both are tagged unions on the wire: a JSON object whose `type`
//! field selects the variant, with the remaining field names kept
//! compatible with the legacy storefront clients (`userID`, `orderID`,
//! `albumName`).
//!
//! Decoding is strict about the tag: a payload whose `type` names no known
//! variant yields [`EventError::UnrecognizedEvent`] rather than falling
//! through silently, so the consumer loop can report it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from encoding or decoding wire events.
#[derive(Error, Debug)]
pub enum EventError {
    /// The payload's `type` tag names no known event variant.
    #[error("unrecognized event type: {0}")]
    UnrecognizedEvent(String),

    /// The payload is not valid JSON or is missing required fields.
    #[error("malformed event payload: {0}")]
    Malformed(String),

    /// The event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// An asynchronous request to mutate financial state.
///
/// Produced by the request path, published to the money-operations topic,
/// and consumed (logically once — see the dedup window) by the settlement
/// processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommerceEvent {
    /// Add funds to a user's balance.
    Deposit {
        /// Target user.
        #[serde(rename = "userID")]
        user_id: i64,
        /// Amount to add, in store currency.
        amount: f64,
    },
    /// Settle a user's unpaid order.
    Buy {
        /// Paying user.
        #[serde(rename = "userID")]
        user_id: i64,
        /// The order to settle.
        #[serde(rename = "orderID")]
        order_id: i64,
    },
}

impl CommerceEvent {
    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Encode(e.to_string()))
    }

    /// Deserialize from the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnrecognizedEvent`] for an unknown `type` tag
    /// and [`EventError::Malformed`] for anything else that fails to parse.
    pub fn decode(payload: &[u8]) -> Result<Self, EventError> {
        let value = parse_tagged(payload, &["deposit", "buy"])?;
        serde_json::from_value(value).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

/// The asynchronous result of processing a commerce event (or of an album
/// deletion by the admin flow), routed to the target user's live
/// connection if one exists.
///
/// The success flag is structurally present for the deposit and buy kinds;
/// an album-deletion notice is informational and carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutcomeNotification {
    /// Result of a deposit.
    Deposit {
        /// Target user.
        #[serde(rename = "userID")]
        user_id: i64,
        /// Whether the balance mutation succeeded.
        success: bool,
    },
    /// Result of an order settlement.
    Buy {
        /// Target user.
        #[serde(rename = "userID")]
        user_id: i64,
        /// The order the settlement concerned.
        #[serde(rename = "orderID")]
        order_id: i64,
        /// Whether the order was paid.
        success: bool,
    },
    /// An album the user owned was removed from the catalog.
    AlbumDeleted {
        /// Target user.
        #[serde(rename = "userID")]
        user_id: i64,
        /// Display name of the removed album.
        #[serde(rename = "albumName")]
        album_name: String,
    },
}

impl OutcomeNotification {
    /// The user this notification targets.
    #[must_use]
    pub const fn user_id(&self) -> i64 {
        match self {
            Self::Deposit { user_id, .. }
            | Self::Buy { user_id, .. }
            | Self::AlbumDeleted { user_id, .. } => *user_id,
        }
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Encode(e.to_string()))
    }

    /// Deserialize from the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnrecognizedEvent`] for an unknown `type` tag
    /// and [`EventError::Malformed`] for anything else that fails to parse.
    pub fn decode(payload: &[u8]) -> Result<Self, EventError> {
        let value = parse_tagged(payload, &["deposit", "buy", "albumDeleted"])?;
        serde_json::from_value(value).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

/// Parse a payload far enough to validate its `type` tag against the known
/// set, so unknown tags produce a typed error instead of a generic serde
/// message.
fn parse_tagged(
    payload: &[u8],
    known: &[&str],
) -> Result<serde_json::Value, EventError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| EventError::Malformed(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| EventError::Malformed("missing `type` tag".to_string()))?
        .to_string();
    if known.contains(&tag.as_str()) {
        Ok(value)
    } else {
        Err(EventError::UnrecognizedEvent(tag))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn commerce_event_wire_format_is_stable() {
        let deposit = CommerceEvent::Deposit {
            user_id: 42,
            amount: 10.0,
        };
        let json = String::from_utf8(deposit.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"deposit","userID":42,"amount":10.0}"#);

        let buy = CommerceEvent::Buy {
            user_id: 42,
            order_id: 7,
        };
        let json = String::from_utf8(buy.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"type":"buy","userID":42,"orderID":7}"#);
    }

    #[test]
    fn commerce_event_decodes_legacy_payloads() {
        let event =
            CommerceEvent::decode(br#"{"type":"buy","userID":9,"orderID":12}"#).unwrap();
        assert_eq!(
            event,
            CommerceEvent::Buy {
                user_id: 9,
                order_id: 12
            }
        );
    }

    #[test]
    fn unknown_tag_is_a_typed_error() {
        let err = CommerceEvent::decode(br#"{"type":"delete","userID":1}"#).unwrap_err();
        assert!(matches!(err, EventError::UnrecognizedEvent(tag) if tag == "delete"));
    }

    #[test]
    fn missing_tag_is_malformed() {
        let err = CommerceEvent::decode(br#"{"userID":1,"amount":5.0}"#).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn notification_round_trip() {
        let notification = OutcomeNotification::Buy {
            user_id: 42,
            order_id: 7,
            success: false,
        };
        let bytes = notification.encode().unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"type":"buy","userID":42,"orderID":7,"success":false}"#
        );
        assert_eq!(OutcomeNotification::decode(&bytes).unwrap(), notification);
    }

    #[test]
    fn album_deleted_carries_no_success_flag() {
        let notification = OutcomeNotification::AlbumDeleted {
            user_id: 3,
            album_name: "OK Computer".to_string(),
        };
        let json = String::from_utf8(notification.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"type":"albumDeleted","userID":3,"albumName":"OK Computer"}"#
        );
        assert_eq!(notification.user_id(), 3);
    }

    #[test]
    fn notification_missing_success_is_malformed() {
        let err = OutcomeNotification::decode(br#"{"type":"deposit","userID":1}"#).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }
}
