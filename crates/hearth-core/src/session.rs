//! Session material captured during login and carried across restarts.
//!
//! [`SessionState`] is exclusively owned and mutated by the session manager;
//! the dispatcher only ever observes it through the [`SessionHandle`] seam so
//! that it can trigger re-authentication without depending on the login flow
//! itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, redact::obfuscate_email};

/// Name of the cookie carrying the portal session token.
pub const SESSION_TOKEN_COOKIE: &str = "session-token";

/// Account credentials used to drive the login flow.
///
/// Immutable input. The password is never rendered by `Debug` and the email is
/// obfuscated, so accidental logging cannot leak the account.
#[derive(Clone)]
pub struct Credentials {
    /// Account email address.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Two-letter country code selecting the portal locale, e.g. `us`.
    pub country_code: String,
}

impl Credentials {
    /// Create credentials for the given account.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            country_code: "us".into(),
        }
    }

    /// Set the portal country code.
    #[must_use]
    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into().to_lowercase();
        self
    }

    /// `Accept-Language` value for the configured country.
    pub fn language(&self) -> &'static str {
        match self.country_code.as_str() {
            "us" => "en-US",
            "gb" | "uk" => "en-GB",
            "au" => "en-AU",
            "ca" => "en-CA",
            "de" => "de-DE",
            "fr" => "fr-FR",
            "it" => "it-IT",
            "es" => "es-ES",
            "nl" => "nl-NL",
            "jp" => "ja-JP",
            "br" => "pt-BR",
            _ => "en-US",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &obfuscate_email(&self.email))
            .field("password", &"<redacted>")
            .field("country_code", &self.country_code)
            .finish()
    }
}

/// A single cookie captured from the portal, as persisted in the session blob.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain the cookie was set for, when known.
    pub domain: Option<String>,
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Everything needed to resume an authenticated portal session.
///
/// Serializable to an opaque blob that callers may store and later pass back
/// in to skip interactive login.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    /// Cookies captured from the portal, in insertion order.
    pub cookies: Vec<SessionCookie>,
    /// Serial number of the virtual device registered for this session.
    pub device_serial: Option<String>,
    /// Bearer token for the device-control API.
    pub access_token: Option<String>,
    /// Token used to renew the access token once it expires.
    pub refresh_token: Option<String>,
    /// Device association token issued at registration.
    pub adp_token: Option<String>,
    /// Anti-CSRF token echoed back on state-changing calls.
    pub csrf_token: Option<String>,
    /// Portal-side customer identifier, when known.
    pub customer_id: Option<String>,
    /// Expiry hint for the access token.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this state currently represents an authenticated session.
    authenticated: bool,
}

impl SessionState {
    /// Whether this state represents an authenticated session.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The session token cookie, if present and carried over from the portal.
    pub fn session_token(&self) -> Option<&SessionCookie> {
        self.cookies.iter().find(|c| c.name == SESSION_TOKEN_COOKIE)
    }

    /// Whether the access token expiry hint has passed.
    pub fn access_token_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now(),
            None => self.access_token.is_none(),
        }
    }

    /// Flip this state to authenticated.
    ///
    /// Enforces the invariant that an authenticated session always carries a
    /// session token cookie and a registered device serial; callers that
    /// cannot satisfy it get [`Error::UnrecognizedResponse`].
    pub fn mark_authenticated(&mut self) -> Result<(), Error> {
        if self.session_token().is_none() {
            return Err(Error::UnrecognizedResponse(
                "login finished without a session token cookie".into(),
            ));
        }
        if self.device_serial.is_none() {
            return Err(Error::UnrecognizedResponse(
                "login finished without a registered device".into(),
            ));
        }
        self.authenticated = true;
        Ok(())
    }

    /// Drop all session material, returning to the unauthenticated state.
    pub fn invalidate(&mut self) {
        *self = SessionState::default();
    }

    /// Upsert a cookie, preserving insertion order for existing names.
    pub fn put_cookie(&mut self, cookie: SessionCookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Serialize this state to the opaque persisted blob.
    pub fn to_blob(&self) -> Result<serde_json::Value, SessionBlobError> {
        serde_json::to_value(self).map_err(SessionBlobError)
    }

    /// Reconstruct a state from a previously persisted blob.
    pub fn from_blob(blob: &serde_json::Value) -> Result<Self, SessionBlobError> {
        serde_json::from_value(blob.clone()).map_err(SessionBlobError)
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("cookies", &self.cookies)
            .field("device_serial", &self.device_serial)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("adp_token", &self.adp_token.as_ref().map(|_| "<redacted>"))
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "<redacted>"))
            .field("customer_id", &self.customer_id)
            .field("expires_at", &self.expires_at)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Serialization failure for the persisted session blob.
#[derive(Debug, thiserror::Error)]
#[error("malformed session blob: {0}")]
pub struct SessionBlobError(#[source] serde_json::Error);

impl From<SessionBlobError> for Error {
    fn from(e: SessionBlobError) -> Self {
        Error::UnrecognizedResponse(e.to_string())
    }
}

/// Seam between the dispatcher and the session manager.
///
/// The dispatcher holds only a read reference per request; when a response
/// signals session expiry it invalidates the state and asks for a fresh
/// session through this trait, exactly once per request.
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync {
    /// Return a currently valid session, logging in or refreshing tokens if
    /// needed.
    async fn current(&self) -> Result<SessionState, Error>;

    /// Discard the current session material and authenticate from scratch.
    ///
    /// Returns [`Error::SessionExpired`] when re-authentication is not
    /// possible.
    async fn invalidate_and_relogin(&self) -> Result<SessionState, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated_state() -> SessionState {
        let mut state = SessionState::default();
        state.put_cookie(SessionCookie {
            name: SESSION_TOKEN_COOKIE.into(),
            value: "tok".into(),
            domain: None,
        });
        state.device_serial = Some("SERIAL123".into());
        state.mark_authenticated().expect("state is complete");
        state
    }

    #[test]
    fn mark_authenticated_requires_session_token() {
        let mut state = SessionState::default();
        state.device_serial = Some("SERIAL123".into());
        assert!(state.mark_authenticated().is_err());
        assert!(!state.is_authenticated());
    }

    #[test]
    fn mark_authenticated_requires_device_serial() {
        let mut state = SessionState::default();
        state.put_cookie(SessionCookie {
            name: SESSION_TOKEN_COOKIE.into(),
            value: "tok".into(),
            domain: None,
        });
        assert!(state.mark_authenticated().is_err());
    }

    #[test]
    fn blob_round_trip_preserves_authentication() {
        let state = authenticated_state();
        let blob = state.to_blob().expect("serializable");
        let restored = SessionState::from_blob(&blob).expect("deserializable");

        assert!(restored.is_authenticated());
        assert_eq!(restored.device_serial.as_deref(), Some("SERIAL123"));
        assert_eq!(restored.session_token().map(|c| c.value.as_str()), Some("tok"));
    }

    #[test]
    fn put_cookie_overwrites_by_name() {
        let mut state = SessionState::default();
        state.put_cookie(SessionCookie {
            name: "csrf".into(),
            value: "a".into(),
            domain: None,
        });
        state.put_cookie(SessionCookie {
            name: "csrf".into(),
            value: "b".into(),
            domain: None,
        });
        assert_eq!(state.cookies.len(), 1);
        assert_eq!(state.cookies[0].value, "b");
    }

    #[test]
    fn debug_output_redacts_values() {
        let mut state = authenticated_state();
        state.access_token = Some("super-secret".into());
        let rendered = format!("{state:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("tok\""));
        assert!(rendered.contains(SESSION_TOKEN_COOKIE));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("john.doe@example.com", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("john.doe@example.com"));
    }
}
