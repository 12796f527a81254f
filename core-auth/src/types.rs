use crate::codec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The signed-in user as the API returns it.
///
/// The session core only looks at `id`. Everything else is carried as-is,
/// including fields this crate does not know about, so the record survives a
/// round trip through secure storage unchanged.
///
/// # Examples
///
/// ```
/// use core_auth::UserRecord;
///
/// let user: UserRecord =
///     serde_json::from_str(r#"{"id":42,"name":"Mina","email":"mina@example.com"}"#).unwrap();
/// assert_eq!(user.id, "42");
/// assert_eq!(user.display_name.as_deref(), Some("Mina"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(rename = "picture", default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            avatar_ref: None,
            extra: Map::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_avatar_ref(mut self, avatar: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar.into());
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "user id must be a string or number, got {}",
            other
        ))),
    }
}

/// Access token plus optional refresh token.
///
/// Expiry is never stored: [`Credential::expires_at`] decodes it from the
/// access token every time.
///
/// # Security
///
/// `Debug` redacts both tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        codec::expires_at(&self.access_token)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        codec::is_expired(&self.access_token, now)
    }

    /// Same refresh token, new access token (server-side rotation).
    pub fn with_access_token(&self, access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

/// A user record paired with its credential, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub user: UserRecord,
    pub credential: Credential,
}

/// Coarse session status for the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    /// No session.
    Unauthenticated,
    /// Startup validation in progress.
    Restoring,
    /// A user and a credential are installed.
    Authenticated,
    /// Logout has started; every request is rejected.
    LoggingOut,
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Authenticated)
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStatus::Unauthenticated => write!(f, "Unauthenticated"),
            AuthStatus::Restoring => write!(f, "Restoring"),
            AuthStatus::Authenticated => write!(f, "Authenticated"),
            AuthStatus::LoggingOut => write!(f, "Logging out"),
        }
    }
}

/// Result of [`SessionManager::restore_session`](crate::SessionManager::restore_session).
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Authenticated(UserRecord),
    Unauthenticated,
}

impl RestoreOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, RestoreOutcome::Authenticated(_))
    }
}
