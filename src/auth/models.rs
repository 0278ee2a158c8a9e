use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The acting author, as supplied by the identity/session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Unique user identifier from the identity provider.
    pub user_id: String,
    /// User email address.
    #[serde(default)]
    pub email: String,
    /// When the credential stops being valid. `None` never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthenticatedUser {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Fails with [`AppError::Auth`] once the credential has expired.
    pub fn ensure_active(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        match self.expires_at {
            Some(expires_at) if expires_at <= now => {
                Err(AppError::Auth("Session expired".into()))
            }
            _ => Ok(()),
        }
    }

    /// Returns `true` if this user owns a document authored by `author`.
    pub fn owns(&self, author: &str) -> bool {
        self.user_id == author
    }
}
