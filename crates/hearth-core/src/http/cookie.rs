use std::time::SystemTime;

/// An HTTP cookie captured from the portal.
///
/// The portal is the only writer, so no browser-style security attribute
/// policy is enforced here; expiry is honored so stale session tokens are
/// never replayed.
#[derive(Clone, PartialEq)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Cookie domain
    pub domain: Option<String>,
    /// Cookie expiration timestamp
    pub expires: Option<SystemTime>,
}

impl Cookie {
    /// Creates a new session cookie without domain or expiration.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            expires: None,
        }
    }

    /// Returns true if the cookie has expired (past its expiration timestamp).
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|exp| SystemTime::now() > exp)
    }

    /// Formats cookie as "name=value" for HTTP Cookie header injection.
    pub fn to_cookie_header(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// Parse a `Set-Cookie` response header into a cookie.
    ///
    /// Only the name/value pair and the `Domain` attribute are retained; the
    /// portal's `Path`, `Secure` and `HttpOnly` attributes are irrelevant for
    /// a non-browser client.
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'));
        for attr in parts {
            if let Some((key, val)) = attr.split_once('=') {
                if key.trim().eq_ignore_ascii_case("domain") {
                    cookie.domain = Some(val.trim().to_string());
                }
            }
        }
        Some(cookie)
    }
}

// Cookie values are session material; keep them out of Debug output.
impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("domain", &self.domain)
            .field("expires", &self.expires)
            .finish()
    }
}
