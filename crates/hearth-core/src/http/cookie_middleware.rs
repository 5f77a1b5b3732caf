use std::sync::Arc;

use super::{Cookie, CookieStore};

/// Middleware that injects stored cookies into requests and captures
/// `Set-Cookie` headers from responses back into the store.
///
/// The store is shared with the session manager, which snapshots it into the
/// persisted session blob; capture must therefore happen here, at the single
/// point every response passes through.
pub struct CookieInjectionMiddleware {
    cookie_store: Arc<dyn CookieStore>,
}

impl CookieInjectionMiddleware {
    /// Creates a new cookie middleware backed by the given store.
    pub fn new(cookie_store: Arc<dyn CookieStore>) -> Self {
        Self { cookie_store }
    }
}

#[async_trait::async_trait]
impl reqwest_middleware::Middleware for CookieInjectionMiddleware {
    async fn handle(
        &self,
        mut req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> Result<reqwest::Response, reqwest_middleware::Error> {
        let mut cookie_values = Vec::new();
        for name in self.cookie_store.list_cookies().await {
            if let Some(cookie) = self.cookie_store.get_cookie(&name).await {
                cookie_values.push(cookie.to_cookie_header());
            }
        }

        if !cookie_values.is_empty() {
            let cookie_header = cookie_values.join("; ");
            match cookie_header.parse() {
                Ok(header_value) => {
                    req.headers_mut().insert(http::header::COOKIE, header_value);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse cookie header: {e}");
                }
            }
        }

        let resp = next.run(req, extensions).await?;

        for header in resp.headers().get_all(http::header::SET_COOKIE) {
            let Ok(raw) = header.to_str() else {
                tracing::warn!("Ignoring non-UTF8 Set-Cookie header");
                continue;
            };
            match Cookie::parse_set_cookie(raw) {
                Some(cookie) => {
                    tracing::debug!(cookie_name = %cookie.name, "captured portal cookie");
                    self.cookie_store.set_cookie(cookie).await;
                }
                None => tracing::warn!("Ignoring unparseable Set-Cookie header"),
            }
        }

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    use super::*;
    use crate::http::InMemoryCookieStore;

    async fn client_with_store() -> (reqwest_middleware::ClientWithMiddleware, Arc<dyn CookieStore>)
    {
        let store: Arc<dyn CookieStore> = Arc::new(InMemoryCookieStore::new());
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
            .with(CookieInjectionMiddleware::new(store.clone()))
            .build();
        (client, store)
    }

    #[tokio::test]
    async fn injects_stored_cookies_into_request() {
        let (client, store) = client_with_store().await;
        store.set_cookie(Cookie::new("session-token", "tok")).await;
        store.set_cookie(Cookie::new("csrf", "xyz")).await;

        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client
            .get(format!("{}/api/devices", server.uri()))
            .send()
            .await
            .expect("request succeeds");

        let requests = server.received_requests().await.expect("recording enabled");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get("Cookie").map(|v| v.to_str().ok()),
            Some(Some("session-token=tok; csrf=xyz"))
        );
    }

    #[tokio::test]
    async fn captures_set_cookie_from_response() {
        let (client, store) = client_with_store().await;

        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "csrf=fresh; Domain=.example.com"),
            )
            .mount(&server)
            .await;

        client
            .get(format!("{}/signin", server.uri()))
            .send()
            .await
            .expect("request succeeds");

        let captured = store.get_cookie("csrf").await.expect("cookie captured");
        assert_eq!(captured.value, "fresh");
        assert_eq!(captured.domain.as_deref(), Some(".example.com"));
    }

    #[tokio::test]
    async fn no_cookie_header_when_store_empty() {
        let (client, _store) = client_with_store().await;

        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client
            .get(format!("{}/signin", server.uri()))
            .send()
            .await
            .expect("request succeeds");

        let requests = server.received_requests().await.expect("recording enabled");
        assert_eq!(requests[0].headers.get("Cookie"), None);
    }
}
