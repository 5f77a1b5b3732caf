#![doc = include_str!("../README.md")]

pub mod dispatcher;
mod error;
pub mod http;
pub mod redact;
pub mod session;
mod settings;

pub use error::{Error, MissingFieldError, NetworkError};
pub use settings::PortalSettings;
