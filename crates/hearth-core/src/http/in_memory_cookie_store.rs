use tokio::sync::RwLock;

use super::{Cookie, CookieStore};

/// In-memory cookie storage, ordered by first insertion.
///
/// Insertion order is preserved because the session blob records cookies as an
/// ordered set; replaying them in a different order would change the Cookie
/// header across restarts.
#[derive(Default)]
pub struct InMemoryCookieStore {
    cookies: RwLock<Vec<Cookie>>,
}

impl InMemoryCookieStore {
    /// Creates a new empty in-memory cookie store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CookieStore for InMemoryCookieStore {
    async fn get_cookie(&self, name: &str) -> Option<Cookie> {
        let cookies = self.cookies.read().await;
        cookies
            .iter()
            .find(|c| c.name == name && !c.is_expired())
            .cloned()
    }

    async fn set_cookie(&self, cookie: Cookie) {
        let mut cookies = self.cookies.write().await;
        match cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => cookies.push(cookie),
        }
    }

    async fn remove_cookie(&self, name: &str) {
        let mut cookies = self.cookies.write().await;
        cookies.retain(|c| c.name != name);
    }

    async fn clear(&self) {
        let mut cookies = self.cookies.write().await;
        cookies.clear();
    }

    async fn list_cookies(&self) -> Vec<String> {
        let cookies = self.cookies.read().await;
        cookies
            .iter()
            .filter(|c| !c.is_expired())
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_cookie() {
        let store = InMemoryCookieStore::new();
        let cookie = Cookie::new("session", "token123");

        store.set_cookie(cookie.clone()).await;
        let retrieved = store.get_cookie("session").await;

        assert_eq!(retrieved, Some(cookie));
    }

    #[tokio::test]
    async fn test_set_cookie_overwrites_in_place() {
        let store = InMemoryCookieStore::new();
        store.set_cookie(Cookie::new("first", "1")).await;
        store.set_cookie(Cookie::new("second", "2")).await;
        store.set_cookie(Cookie::new("first", "updated")).await;

        assert_eq!(
            store.list_cookies().await,
            vec!["first".to_string(), "second".to_string()]
        );
        assert_eq!(
            store.get_cookie("first").await.map(|c| c.value),
            Some("updated".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_cookie() {
        let store = InMemoryCookieStore::new();
        store.set_cookie(Cookie::new("session", "token123")).await;
        store.remove_cookie("session").await;

        assert_eq!(store.get_cookie("session").await, None);
    }

    #[tokio::test]
    async fn test_clear_cookies() {
        let store = InMemoryCookieStore::new();
        store.set_cookie(Cookie::new("cookie1", "value1")).await;
        store.set_cookie(Cookie::new("cookie2", "value2")).await;

        store.clear().await;

        assert!(store.list_cookies().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_cookie_filtered() {
        use std::time::{Duration, SystemTime};

        let store = InMemoryCookieStore::new();
        let mut cookie = Cookie::new("session", "token");
        cookie.expires = Some(SystemTime::now() - Duration::from_secs(3600));

        store.set_cookie(cookie).await;

        assert_eq!(store.get_cookie("session").await, None);
        assert!(store.list_cookies().await.is_empty());
    }
}
