//! Identifier and timestamp helpers.

use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

/// A fresh globally unique id as 32 lowercase hex characters.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current UTC time, ISO-8601 with microsecond precision.
pub fn iso8601_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Lowercase hex encoding.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
