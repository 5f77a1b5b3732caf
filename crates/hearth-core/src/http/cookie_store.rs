use super::Cookie;

/// Abstraction for cookie storage backends.
///
/// Enables multiple implementations (in-memory, file system, platform secure
/// storage) without coupling the transport to a specific storage mechanism.
/// Uses async methods to support I/O-bound operations.
#[async_trait::async_trait]
pub trait CookieStore: Send + Sync {
    /// Retrieves a cookie by name.
    ///
    /// Returns None if cookie not found or expired (implementations should check expiration).
    async fn get_cookie(&self, name: &str) -> Option<Cookie>;

    /// Stores a cookie, replacing any previous cookie with the same name.
    async fn set_cookie(&self, cookie: Cookie);

    /// Removes a cookie by name. Removing an absent cookie is a no-op.
    async fn remove_cookie(&self, name: &str);

    /// Clears all stored cookies.
    async fn clear(&self);

    /// Lists all non-expired cookie names, in insertion order.
    async fn list_cookies(&self) -> Vec<String>;
}
