//! HTTP plumbing for the portal: cookie storage, cookie injection middleware
//! and the transport that every component issues requests through.

mod cookie;
mod cookie_middleware;
mod cookie_store;
mod in_memory_cookie_store;
mod transport;

pub use cookie::Cookie;
pub use cookie_middleware::CookieInjectionMiddleware;
pub use cookie_store::CookieStore;
pub use in_memory_cookie_store::InMemoryCookieStore;
pub use reqwest::StatusCode;
pub use transport::{
    Payload, PortalRequest, PortalResponse, PortalTransport, ResponseSignal, Transport,
};
