use crate::auth::models::AuthenticatedUser;
use crate::error::AppError;

/// Name of the cookie carrying the serialized session.
pub const SESSION_COOKIE: &str = "quire_session";

/// Decode the session cookie value into the acting user.
///
/// Expired sessions are rejected here so every handler sees the same
/// `AppError::Auth` for them.
pub fn user_from_session(raw: &str) -> Result<AuthenticatedUser, AppError> {
    let user: AuthenticatedUser = serde_json::from_str(raw)
        .map_err(|e| AppError::Auth(format!("Invalid session: {}", e)))?;
    user.ensure_active(chrono::Utc::now())?;
    Ok(user)
}

/// The `Cookie` header value for `user`, as sent by clients.
pub fn session_cookie_value(user: &AuthenticatedUser) -> Result<String, AppError> {
    serde_json::to_string(user)
        .map_err(|e| AppError::Internal(format!("Failed to serialize session: {}", e)))
}

/// Extracts the acting author from the session cookie.
///
/// Only available when the `server` feature is enabled.
#[cfg(feature = "server")]
impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let jar = axum_extra::extract::CookieJar::from_headers(&parts.headers);
        let cookie = jar
            .get(SESSION_COOKIE)
            .ok_or_else(|| AppError::Auth("Not logged in".into()))?;

        user_from_session(cookie.value())
    }
}
