//! Session and user identity values issued by the identity provider.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile identity attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Provider-assigned user id.
    pub id: String,
    /// E-mail address, if the provider exposes one.
    pub email: Option<String>,
    /// Display name, usually taken from sign-up metadata.
    pub display_name: Option<String>,
    /// Arbitrary user metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UserIdentity {
    /// Create an identity with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the e-mail address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An authenticated session.
///
/// Sessions are immutable once issued. A refresh produces a new `Session`
/// that replaces the old one as a whole.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    access_token: String,
    expires_at: DateTime<Utc>,
    user: UserIdentity,
}

impl Session {
    /// Create a new session for `user`.
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>, user: UserIdentity) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            user,
        }
    }

    /// Id of the session's user.
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Opaque bearer token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Absolute expiry time.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The session's user identity.
    pub fn user(&self) -> &UserIdentity {
        &self.user
    }
}

// Keeps bearer tokens out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user.id)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_user_identity_builder() {
        let user = UserIdentity::new("u-1")
            .with_email("a@b.com")
            .with_display_name("Ada")
            .with_metadata("name", serde_json::json!("Ada"));

        assert_eq!(user.id, "u-1");
        assert_eq!(user.email.as_deref(), Some("a@b.com"));
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert_eq!(user.metadata["name"], "Ada");
    }

    #[test]
    fn test_session_accessors() {
        let expires = Utc::now() + Duration::hours(1);
        let session = Session::new("tok", expires, UserIdentity::new("u-1"));

        assert_eq!(session.user_id(), "u-1");
        assert_eq!(session.access_token(), "tok");
        assert_eq!(session.expires_at(), expires);
        assert_eq!(session.user().id, "u-1");
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::new("very-secret-token", Utc::now(), UserIdentity::new("u-1"));
        let debug = format!("{:?}", session);
        assert!(!debug.contains("very-secret-token"));
        assert!(debug.contains("u-1"));
    }

    #[test]
    fn test_session_deserialize_without_metadata() {
        let json = r#"{
            "access_token": "tok",
            "expires_at": "2030-01-01T00:00:00Z",
            "user": {"id": "u-9", "email": null, "display_name": null}
        }"#;

        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.user_id(), "u-9");
        assert!(session.user().metadata.is_empty());
    }
}
