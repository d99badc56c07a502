//! Authentication audit event types
//!
//! An [`AuthEvent`] serializes to the persisted record shape shared by every
//! backend: `{ "timestamp": ISO-8601, "event": KIND, "email": identity, ...metadata }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Identity recorded when the caller did not supply one
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

const RESERVED_KEYS: [&str; 3] = ["timestamp", "event", "email"];
const SECRET_KEY_FRAGMENTS: [&str; 5] = ["password", "secret", "token", "authorization", "cookie"];
const REDACTED: &str = "[redacted]";

/// A single authentication audit record
///
/// Immutable once appended. Only the retention pruner removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    /// When the event was appended
    pub timestamp: DateTime<Utc>,
    /// What happened
    #[serde(rename = "event")]
    pub kind: AuthEventKind,
    /// Normalized login identifier, or `anonymous`
    #[serde(rename = "email")]
    pub identity: String,
    /// Auxiliary details, flattened into the record
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl AuthEvent {
    /// Create an event for `identity` stamped at `timestamp`
    ///
    /// The identity is normalized with [`normalize_identity`].
    pub fn new(kind: AuthEventKind, identity: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            identity: normalize_identity(identity),
            metadata: Map::new(),
        }
    }

    /// Attach metadata
    ///
    /// Objects are merged key by key; any other value is stored under
    /// `detail`. Keys that collide with record fields are dropped and
    /// secret-looking values are redacted.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => {
                for (key, value) in map {
                    self.insert_field(key, value);
                }
            }
            Value::Null => {}
            other => self.insert_field("detail".to_string(), other),
        }
        self
    }

    /// Attach a single metadata field
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert_field(key.to_string(), value.into());
        self
    }

    fn insert_field(&mut self, key: String, value: Value) {
        if RESERVED_KEYS.contains(&key.as_str()) {
            return;
        }
        let value = if is_secret_key(&key) {
            Value::String(REDACTED.to_string())
        } else {
            redact_nested(value)
        };
        self.metadata.insert(key, value);
    }
}

/// Categories of authentication events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    /// Credentials accepted
    LoginSuccess,
    /// Credentials rejected
    LoginFailed,
    /// Attempt rejected by the throttle
    LoginRateLimited,
}

impl AuthEventKind {
    /// Wire name stored in the `event` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::LoginRateLimited => "LOGIN_RATE_LIMITED",
        }
    }
}

impl std::fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored `event` value that is not a known kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown auth event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for AuthEventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGIN_SUCCESS" => Ok(Self::LoginSuccess),
            "LOGIN_FAILED" => Ok(Self::LoginFailed),
            "LOGIN_RATE_LIMITED" => Ok(Self::LoginRateLimited),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// Canonical form of a login identifier
///
/// Trims surrounding whitespace and lower-cases. An empty identifier maps to
/// [`ANONYMOUS_IDENTITY`].
pub fn normalize_identity(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        ANONYMOUS_IDENTITY.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "code" || SECRET_KEY_FRAGMENTS.iter().any(|fragment| key.contains(fragment))
}

fn redact_nested(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_secret_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_nested(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_nested).collect()),
        other => other,
    }
}
