// Custom wire encodings for instants and nullable scalars.
//
// The server speaks a zone-less time format that is implicitly in the
// client's local zone; absent values travel as JSON null. The nullable
// wrappers carry the server's "empty means null" conventions.

use std::fmt;

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::PARAMETER_ANY_VALUE;

/// Date format the server understands and accepts.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Pretty time format for log output.
pub const TIME_FORMAT_PRETTY: &str = "%d.%m.%Y %H:%M:%S";

/// The client's current wall-clock time, in the local zone.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Format a raw instant in the server time format.
pub fn format_server(t: NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

// ── DateTime ─────────────────────────────────────────────────────────

/// An optional instant in the server wire format.
///
/// Unset values decode from JSON null (or an empty string) and encode
/// back to null. An unset instant sorts before every set one, so a
/// collection ordered by `DateTime` keeps date-less elements first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime(Option<NaiveDateTime>);

impl DateTime {
    pub const UNSET: DateTime = DateTime(None);

    pub fn new(t: NaiveDateTime) -> Self {
        DateTime(Some(t))
    }

    /// Parse a server-formatted instant, e.g. `"2022-08-22T14:00:12"`.
    pub fn parse(value: &str) -> Result<Self, chrono::ParseError> {
        NaiveDateTime::parse_from_str(value, TIME_FORMAT).map(|t| DateTime(Some(t)))
    }

    /// The current local time as a set `DateTime`.
    pub fn now() -> Self {
        DateTime(Some(local_now()))
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn get(&self) -> Option<NaiveDateTime> {
        self.0
    }

    /// The instant used for ordering; unset maps to the minimum.
    pub fn sort_key(&self) -> NaiveDateTime {
        self.0.unwrap_or(NaiveDateTime::MIN)
    }

    /// Whether this instant lies before `t`. An unset value behaves
    /// like the minimum instant and therefore always lies before.
    pub fn before(&self, t: NaiveDateTime) -> bool {
        self.sort_key() < t
    }

    /// Seconds from `now` until this instant (negative when past).
    /// Unset values yield the largest negative offset.
    pub fn seconds_until(&self, now: NaiveDateTime) -> f64 {
        match self.0 {
            Some(t) => {
                let delta = t.signed_duration_since(now);
                delta.num_milliseconds() as f64 / 1000.0
            }
            None => f64::MIN,
        }
    }

    /// Server wire format, or the epoch placeholder when unset.
    pub fn format(&self) -> String {
        match self.0 {
            Some(t) => format_server(t),
            None => "0001-01-01T00:00:00".to_string(),
        }
    }

    pub fn format_pretty(&self) -> String {
        match self.0 {
            Some(t) => t.format(TIME_FORMAT_PRETTY).to_string(),
            None => "-".to_string(),
        }
    }
}

impl PartialOrd for DateTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DateTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Unset before set, consistent with the derived equality.
        self.0.cmp(&other.0)
    }
}

impl From<NaiveDateTime> for DateTime {
    fn from(t: NaiveDateTime) -> Self {
        DateTime(Some(t))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_pretty())
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(t) => serializer.serialize_str(&format_server(t)),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") | Some("null") => Ok(DateTime(None)),
            Some(value) => DateTime::parse(value).map_err(|e| {
                de::Error::custom(format!("invalid date time {value:?}: {e}"))
            }),
        }
    }
}

// ── NullString ───────────────────────────────────────────────────────

/// A string that may be absent on the wire.
///
/// JSON null, the empty string and the "any value" placeholder all
/// decode to [`NullString::Null`]; null is written back on encode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NullString {
    #[default]
    Null,
    Value(String),
}

impl NullString {
    /// Wrap a string, mapping the empty string to null like the server
    /// does on every interaction.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            NullString::Null
        } else {
            NullString::Value(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, NullString::Null)
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            NullString::Null => None,
            NullString::Value(s) => Some(s),
        }
    }
}

impl Serialize for NullString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NullString::Null => serializer.serialize_none(),
            NullString::Value(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for NullString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(match raw {
            None => NullString::Null,
            Some(s) if s.is_empty() || s == PARAMETER_ANY_VALUE => NullString::Null,
            Some(s) => NullString::Value(s),
        })
    }
}

// ── NullInt ──────────────────────────────────────────────────────────

/// An integer that may be absent on the wire. JSON null and the number
/// zero decode to null; null is written back on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullInt {
    #[default]
    Null,
    Value(i32),
}

impl NullInt {
    /// Wrap an integer, mapping zero to null like the server does.
    pub fn new(value: i32) -> Self {
        if value == 0 {
            NullInt::Null
        } else {
            NullInt::Value(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, NullInt::Null)
    }

    pub fn get(&self) -> Option<i32> {
        match self {
            NullInt::Null => None,
            NullInt::Value(n) => Some(*n),
        }
    }
}

impl Serialize for NullInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NullInt::Null => serializer.serialize_none(),
            NullInt::Value(n) => serializer.serialize_i32(*n),
        }
    }
}

struct NullIntVisitor;

impl<'de> Visitor<'de> for NullIntVisitor {
    type Value = NullInt;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, a numeric string or null")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<NullInt, E> {
        Ok(NullInt::new(v as i32))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<NullInt, E> {
        Ok(NullInt::new(v as i32))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<NullInt, E> {
        if v.is_empty() || v == "null" {
            return Ok(NullInt::Null);
        }
        v.parse::<i32>()
            .map(NullInt::new)
            .map_err(|e| de::Error::custom(format!("invalid integer {v:?}: {e}")))
    }

    fn visit_none<E: de::Error>(self) -> Result<NullInt, E> {
        Ok(NullInt::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<NullInt, E> {
        Ok(NullInt::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<NullInt, D::Error> {
        deserializer.deserialize_any(NullIntVisitor)
    }
}

impl<'de> Deserialize<'de> for NullInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_option(NullIntVisitor)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
