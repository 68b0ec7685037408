//! # Change Events
//!
//! Typed form of the JSON payload that database triggers publish on the
//! change channel:
//!
//! ```text
//! {"table":"User","schema":"public","operation":"UPDATE","id":"u1","timestamp":1700000000}
//! ```
//!
//! [`ChangeEvent::decode`] is the only way notification text becomes a
//! [`ChangeEvent`]; anything that does not carry all five fields with the
//! right types is rejected with a [`DecodeError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Row-level operation reported by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }
}

/// Errors produced while decoding a notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON or a field is missing / has the wrong type
    #[error("Malformed change notification: {0}")]
    Malformed(String),

    /// Operation string outside INSERT / UPDATE / DELETE
    #[error("Unknown change operation: {0}")]
    UnknownOperation(String),
}

/// A single row change, immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub schema: String,
    pub operation: ChangeOperation,
    /// Primary key of the affected row.
    pub id: String,
    /// Epoch seconds.
    pub timestamp: i64,
}

impl ChangeEvent {
    /// Decode a raw notification payload.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Encode back to the wire format (used by tests and tooling that emit notifications).
    pub fn encode(&self) -> String {
        // Plain strings and integers cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Trigger timestamp as a UTC datetime, if it is in range.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} id={}",
            self.operation, self.schema, self.table, self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn decodes_valid_payload() {
        let event = ChangeEvent::decode(
            r#"{"table":"User","schema":"public","operation":"UPDATE","id":"u1","timestamp":1700000000}"#,
        )
        .unwrap();

        assert_eq!(event.table, "User");
        assert_eq!(event.schema, "public");
        assert_eq!(event.operation, ChangeOperation::Update);
        assert_eq!(event.id, "u1");
        assert_eq!(event.timestamp, 1_700_000_000);
    }

    #[test]
    fn tolerates_extra_fields() {
        let event = ChangeEvent::decode(
            r#"{"table":"Post","schema":"public","operation":"DELETE","id":"9","timestamp":1,"txid":42}"#,
        )
        .unwrap();
        assert_eq!(event.operation, ChangeOperation::Delete);
    }

    #[rstest]
    #[case::not_json("not json")]
    #[case::empty("")]
    #[case::array("[1,2,3]")]
    #[case::null("null")]
    #[case::missing_table(r#"{"schema":"public","operation":"INSERT","id":"1","timestamp":1}"#)]
    #[case::missing_schema(r#"{"table":"User","operation":"INSERT","id":"1","timestamp":1}"#)]
    #[case::missing_id(r#"{"table":"User","schema":"public","operation":"INSERT","timestamp":1}"#)]
    #[case::missing_timestamp(r#"{"table":"User","schema":"public","operation":"INSERT","id":"1"}"#)]
    #[case::numeric_id(r#"{"table":"User","schema":"public","operation":"INSERT","id":1,"timestamp":1}"#)]
    #[case::string_timestamp(r#"{"table":"User","schema":"public","operation":"INSERT","id":"1","timestamp":"1"}"#)]
    #[case::float_timestamp(r#"{"table":"User","schema":"public","operation":"INSERT","id":"1","timestamp":1.5}"#)]
    #[case::unknown_operation(r#"{"table":"User","schema":"public","operation":"TRUNCATE","id":"1","timestamp":1}"#)]
    #[case::lowercase_operation(r#"{"table":"User","schema":"public","operation":"insert","id":"1","timestamp":1}"#)]
    fn rejects_malformed_payload(#[case] payload: &str) {
        let err = ChangeEvent::decode(payload).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn operation_parses_from_wire_text() {
        assert_eq!("INSERT".parse::<ChangeOperation>().unwrap(), ChangeOperation::Insert);
        assert_eq!(
            "MERGE".parse::<ChangeOperation>().unwrap_err(),
            DecodeError::UnknownOperation("MERGE".to_string())
        );
    }

    #[test]
    fn encode_produces_decodable_wire_text() {
        let event = ChangeEvent {
            table: "Session".to_string(),
            schema: "auth".to_string(),
            operation: ChangeOperation::Insert,
            id: "s-1".to_string(),
            timestamp: 1_700_000_123,
        };

        let wire = event.encode();
        assert!(wire.contains(r#""operation":"INSERT""#));
        assert_eq!(ChangeEvent::decode(&wire).unwrap(), event);
    }

    #[test]
    fn occurred_at_converts_epoch_seconds() {
        let event = ChangeEvent {
            table: "User".to_string(),
            schema: "public".to_string(),
            operation: ChangeOperation::Update,
            id: "u1".to_string(),
            timestamp: 0,
        };
        assert_eq!(event.occurred_at().unwrap().timestamp(), 0);
        assert_eq!(event.to_string(), "UPDATE public.User id=u1");
    }
}
