//! Errors that can occur when talking to the device portal.

use reqwest::StatusCode;
use thiserror::Error;

/// Terminal error taxonomy surfaced to callers of this library.
///
/// Throttling and session expiry are absorbed by the dispatcher up to its
/// configured limits; every other kind propagates unchanged. Authentication
/// failures are never silently swallowed.
#[derive(Debug, Error)]
pub enum Error {
    /// The portal rejected the supplied email/password (or OTP code).
    #[error("the portal rejected the supplied credentials")]
    CredentialsRejected,

    /// The flow reached a step that cannot be automated (CAPTCHA, unexpected
    /// MFA). The caller must complete it interactively.
    #[error("manual intervention required: {0}")]
    ManualInterventionRequired(String),

    /// The session is no longer accepted and could not be renewed.
    #[error("the session has expired and could not be renewed")]
    SessionExpired,

    /// The portal kept throttling the request past the retry ceiling.
    #[error("request throttled by the portal, gave up after {attempts} attempts")]
    Throttled {
        /// Number of throttled attempts before giving up.
        attempts: u32,
    },

    /// A network-level failure (connection, protocol, or decode).
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The portal answered with markup or data this client does not recognize.
    #[error("unrecognized response from the portal: {0}")]
    UnrecognizedResponse(String),

    /// The caller cancelled the request while it was queued or in flight.
    #[error("the request was cancelled")]
    Cancelled,

    /// A response was missing a field this client requires.
    #[error(transparent)]
    MissingField(#[from] MissingFieldError),
}

/// Errors from performing network requests.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("received error status from the portal: [{status}] {message}")]
    ResponseContent { status: StatusCode, message: String },
}

/// Missing required field.
#[derive(Debug, Error)]
#[error("the response received was missing a required field: {0}")]
pub struct MissingFieldError(pub &'static str);

/// This macro is used to require that a value is present or return an error otherwise.
/// It is equivalent to using `val.ok_or(Error::MissingField)?`, but easier to use and
/// with a more descriptive error message.
/// Note that this macro will return early from the function if the value is not present.
#[macro_export]
macro_rules! require {
    ($val:expr) => {
        match $val {
            Some(val) => val,
            None => return Err($crate::MissingFieldError(stringify!($val)).into()),
        }
    };
}
