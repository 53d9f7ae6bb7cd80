//! OAuth token record as persisted between runs.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The current OAuth grant for the marketplace account.
///
/// Replaced wholesale on every exchange or refresh. `expires_at` may be absent
/// on records written by older tooling; [`TokenRecord::derived_expiry`]
/// recomputes it from `created_at + expires_in` when possible.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// The provider returns this as a number; older files stored a string.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Returns the stored expiry, or `created_at + expires_in` when only the
    /// pieces are present.
    #[must_use]
    pub fn derived_expiry(&self) -> Option<DateTime<Utc>> {
        if self.expires_at.is_some() {
            return self.expires_at;
        }
        let created_at = self.created_at?;
        let expires_in = self.expires_in.filter(|secs| *secs > 0)?;
        created_at.checked_add_signed(Duration::seconds(expires_in))
    }

    /// Whether the token expires within `margin` of `now`.
    ///
    /// Records without a usable expiry are reported as fresh: the 401 path
    /// of the request engine is the backstop for those.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.derived_expiry()
            .is_some_and(|expires_at| expires_at - now < margin)
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("user_id", &self.user_id)
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Raw body of a successful token-endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Builds a record stamped at `now`, with `expires_at` computed from
    /// `expires_in` when the provider sent one.
    pub(crate) fn into_record(self, now: DateTime<Utc>) -> TokenRecord {
        let expires_at = self
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| now.checked_add_signed(Duration::seconds(secs)));
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_default(),
            scope: self.scope.unwrap_or_default(),
            user_id: self.user_id,
            expires_in: self.expires_in,
            created_at: Some(now),
            expires_at,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts RFC 3339 timestamps, naive ISO timestamps (taken as UTC), and
/// Unix epoch seconds. Anything else is treated as absent rather than failing
/// the whole record.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(raw)) => parse_timestamp(&raw),
        Some(serde_json::Value::Number(n)) => n.as_f64().and_then(from_epoch_secs),
        _ => None,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
