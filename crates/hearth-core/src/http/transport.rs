use std::sync::Arc;

use reqwest::{
    Method, StatusCode,
    header::{self, HeaderValue},
};

use super::{CookieInjectionMiddleware, CookieStore};
use crate::{Error, NetworkError, PortalSettings};

/// Anti-CSRF cookie name; the portal expects its value echoed as a header.
const CSRF_COOKIE: &str = "csrf";

/// Transient connection failures are retried this many times. Connect errors
/// cannot have delivered a request, so replaying them is always safe; anything
/// past the connect phase is never retried here.
const TRANSIENT_RETRIES: u32 = 2;

/// Request body variants supported by the portal.
#[derive(Debug, Clone)]
pub enum Payload {
    /// No body.
    None,
    /// JSON body for API endpoints.
    Json(serde_json::Value),
    /// URL-encoded form body for the HTML login pages.
    Form(Vec<(String, String)>),
}

/// A single request to the portal or the device-control API.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request body.
    pub payload: Payload,
    /// Whether replaying this request cannot change remote state. The
    /// dispatcher refuses to retry a non-idempotent request after an
    /// ambiguous server error.
    pub idempotent: bool,
}

impl PortalRequest {
    /// A GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            payload: Payload::None,
            idempotent: true,
        }
    }

    /// A JSON POST request. Considered non-idempotent unless overridden.
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            payload: Payload::Json(body),
            idempotent: false,
        }
    }

    /// A JSON PUT request. Considered idempotent: PUT sets absolute state.
    pub fn put_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::PUT,
            url: url.into(),
            payload: Payload::Json(body),
            idempotent: true,
        }
    }

    /// A form POST request. Considered non-idempotent unless overridden.
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            payload: Payload::Form(fields),
            idempotent: false,
        }
    }

    /// Override the idempotency marker.
    #[must_use]
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

/// Signal classes a response can carry, derived from the status code.
///
/// The portal exposes no protocol handshake beyond HTTP statuses, so these
/// discriminants are the only machine-readable signals available to the
/// dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSignal {
    /// The call went through.
    Ok,
    /// Rate limit exceeded or the service is shedding load; back off and retry.
    Throttled,
    /// Previously valid cookies/tokens are no longer accepted.
    AuthExpired,
    /// Any other failure; not retryable.
    Failed,
}

/// A response from the portal, after redirects were followed.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    /// Final HTTP status.
    pub status: StatusCode,
    /// URL the request ended up at after redirects. Login steps encode their
    /// outcome in this URL.
    pub final_url: String,
    /// Raw response body.
    pub body: String,
}

impl PortalResponse {
    /// Classify this response for the dispatcher.
    pub fn signal(&self) -> ResponseSignal {
        match self.status {
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE => ResponseSignal::Throttled,
            StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::PROXY_AUTHENTICATION_REQUIRED => ResponseSignal::AuthExpired,
            status if status.is_success() => ResponseSignal::Ok,
            _ => ResponseSignal::Failed,
        }
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, NetworkError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Convert a failed response into the error surfaced to callers.
    pub fn into_failure(self) -> Error {
        NetworkError::ResponseContent {
            status: self.status,
            message: self
                .status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        }
        .into()
    }
}

/// Performs HTTP requests with persistent cookie storage and redirect
/// following. Owned by the session manager; the dispatcher reaches it only
/// through this trait so tests can substitute a scripted transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and return the final response.
    ///
    /// Statuses are not converted into errors here; classification is the
    /// caller's concern via [`PortalResponse::signal`].
    async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, Error>;
}

/// The production [`Transport`]: reqwest with default portal headers, cookie
/// injection/capture middleware, and a small fixed retry budget for connect
/// errors.
pub struct PortalTransport {
    client: reqwest_middleware::ClientWithMiddleware,
    cookie_store: Arc<dyn CookieStore>,
}

impl PortalTransport {
    /// Build a transport over the given cookie store.
    ///
    /// `language` becomes the `Accept-Language` header; the portal localizes
    /// its login markup based on it.
    pub fn new(
        cookie_store: Arc<dyn CookieStore>,
        settings: &PortalSettings,
        language: &str,
    ) -> Self {
        let headers = build_default_headers(settings, language);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("HTTP client build should not fail");

        let client = reqwest_middleware::ClientBuilder::new(http_client)
            .with(CookieInjectionMiddleware::new(cookie_store.clone()))
            .build();

        Self {
            client,
            cookie_store,
        }
    }

    async fn execute(&self, request: &PortalRequest) -> Result<reqwest::Response, Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url);

        if let Some(csrf) = self.cookie_store.get_cookie(CSRF_COOKIE).await {
            builder = builder.header(CSRF_COOKIE, csrf.value);
        }

        builder = match &request.payload {
            Payload::None => builder,
            Payload::Json(body) => builder.json(body),
            Payload::Form(fields) => builder.form(fields),
        };

        let mut attempt = 0;
        loop {
            let result = builder
                .try_clone()
                .ok_or(crate::MissingFieldError("request body"))?
                .send()
                .await;

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if is_connect_error(&e) && attempt < TRANSIENT_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        "connection error, retrying: {e}"
                    );
                }
                Err(e) => return Err(NetworkError::Middleware(e).into()),
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for PortalTransport {
    async fn send(&self, request: &PortalRequest) -> Result<PortalResponse, Error> {
        tracing::debug!(method = %request.method, url = %request.url, "portal request");

        let resp = self.execute(request).await?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(NetworkError::Reqwest)?;

        tracing::debug!(%status, %final_url, "portal response");

        Ok(PortalResponse {
            status,
            final_url,
            body,
        })
    }
}

fn is_connect_error(e: &reqwest_middleware::Error) -> bool {
    match e {
        reqwest_middleware::Error::Reqwest(e) => e.is_connect(),
        reqwest_middleware::Error::Middleware(_) => false,
    }
}

fn build_default_headers(settings: &PortalSettings, language: &str) -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();

    headers.insert(header::ACCEPT_CHARSET, HeaderValue::from_static("utf-8"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_str(language).unwrap_or(HeaderValue::from_static("en-US")),
    );
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(&settings.user_agent)
            .expect("User agent should be a valid header value"),
    );

    headers
}
