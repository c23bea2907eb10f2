use crate::error::{ErrorKind, Result};
use crate::policy::{CachePolicy, ExpiryMode};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, PrimitiveDateTime, UtcDateTime};

/// Timestamps are written with microseconds and no offset; they are always UTC.
const WRITE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");
const READ_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
/// Some writers drop the fraction entirely when it is zero.
const READ_FORMAT_WHOLE: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

pub(crate) fn format_timestamp(at: UtcDateTime) -> Result<String> {
    Ok(PrimitiveDateTime::new(at.date(), at.time())
        .format(WRITE_FORMAT)
        .or_raise(|| ErrorKind::InvalidTimestamp(at.unix_timestamp().to_string()))?)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<UtcDateTime> {
    let parsed = PrimitiveDateTime::parse(value, READ_FORMAT)
        .or_else(|_| PrimitiveDateTime::parse(value, READ_FORMAT_WHOLE))
        .or_raise(|| ErrorKind::InvalidTimestamp(value.to_string()))?;
    Ok(parsed.as_utc())
}

#[derive(Serialize, Deserialize)]
struct Persisted {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Default, Serialize, Deserialize)]
struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<String>,
}

/// One cached upstream response.
///
/// Persisted as `{"data": ..., "metadata": {"created": ..., "expires": ...}}`.
/// The dirty flag lives only in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    payload: Value,
    created: Option<UtcDateTime>,
    expires: Option<UtcDateTime>,
    dirty: bool,
}

impl CacheEntry {
    /// Decode a persisted entry, deciding its expiry according to `policy`.
    pub fn from_slice(bytes: &[u8], policy: &CachePolicy) -> Result<Self> {
        let persisted: Persisted = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidEntry)?;
        let created = persisted.metadata.created.as_deref().map(parse_timestamp).transpose()?;
        let expires = match policy.expiry {
            ExpiryMode::OnWrite => persisted.metadata.expires.as_deref().map(parse_timestamp).transpose()?,
            ExpiryMode::OnRead => created.map(|created| created + policy.ttl),
        };
        Ok(Self { payload: persisted.data, created, expires, dirty: false })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let persisted = Persisted {
            data: self.payload.clone(),
            metadata: Metadata {
                created: self.created.map(format_timestamp).transpose()?,
                expires: self.expires.map(format_timestamp).transpose()?,
            },
        };
        Ok(serde_json::to_vec(&persisted).or_raise(|| ErrorKind::InvalidEntry)?)
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn created(&self) -> Option<UtcDateTime> {
        self.created
    }

    pub fn expires(&self) -> Option<UtcDateTime> {
        self.expires
    }

    /// Replaced since it was loaded, and not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// No usable payload or no metadata. Treated the same as expired.
    pub fn is_empty(&self) -> bool {
        let no_payload = match &self.payload {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        no_payload || (self.created.is_none() && self.expires.is_none())
    }

    pub fn is_expired(&self, now: UtcDateTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Servable without asking upstream.
    pub fn is_fresh(&self, now: UtcDateTime) -> bool {
        !self.is_empty() && !self.is_expired(now)
    }

    /// Swap in a fresh payload fetched at `now`.
    pub fn replace(&mut self, payload: Value, now: UtcDateTime, ttl: Duration) {
        self.payload = payload;
        self.created = Some(now);
        self.expires = Some(now + ttl);
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
