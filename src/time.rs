//! Timestamp formats used across the store and the oplog.
//!
//! UTC instants are ISO-8601 with millisecond precision and a `Z` suffix;
//! they compare correctly as plain strings, which replay relies on.
//! `due_at` is a naive wall-clock value with no zone.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

pub(crate) const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub(crate) fn now_utc() -> String {
    format_utc(&Utc::now())
}

pub(crate) fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a stored timestamp, falling back to the epoch. Storage only ever
/// holds writer-formatted values; the fallback keeps reads deterministic
/// if a foreign row slips through.
pub(crate) fn parse_utc_lenient(s: &str) -> DateTime<Utc> {
    parse_utc(s).unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn format_naive(dt: &NaiveDateTime) -> String {
    dt.format(NAIVE_FORMAT).to_string()
}

pub(crate) fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, NAIVE_FORMAT).ok()
}

pub(crate) mod utc_millis {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_utc(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_utc(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
    }
}

pub(crate) mod utc_millis_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&format_utc(dt)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(raw) => parse_utc(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}"))),
        }
    }
}

pub(crate) mod naive_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_some(&format_naive(dt)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(raw) => parse_naive(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("bad due date: {raw}"))),
        }
    }
}
