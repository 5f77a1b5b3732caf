//! Explicit login state machine steps.
//!
//! Each portal response is classified into the next step by inspecting the
//! page contents and the post-redirect URL; there are no protocol handshake
//! codes to key off. The classification order matters: challenge markers are
//! checked before success markers so a challenge page that happens to embed
//! dashboard chrome is still treated as a challenge.

use hearth_core::{
    Error, NetworkError,
    http::{PortalResponse, ResponseSignal, StatusCode},
};

use crate::{
    forms::{self, LoginForm},
    handshake,
};

/// One step of the login flow. Terminal steps are [`LoginStep::Done`] and
/// [`LoginStep::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Fetch the sign-in entry page.
    InitialGet,
    /// Submit credentials into the extracted sign-in form.
    CredentialsSubmit(LoginForm),
    /// Submit an out-of-band one-time password into the challenge form.
    OtpChallenge(LoginForm),
    /// The portal interposed a CAPTCHA; this flow cannot be automated.
    CaptchaChallenge,
    /// Exchange the authorization code by registering a virtual device.
    DeviceRegister {
        /// Code from the landing redirect, consumed by the registration call.
        authorization_code: String,
    },
    /// Terminal success; session material captured.
    Done,
    /// Terminal failure.
    Failed(FailureReason),
}

/// Why a login attempt ended in [`LoginStep::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The portal rejected the email/password pair.
    CredentialsRejected,
    /// A challenge this library cannot automate (CAPTCHA, unexpected MFA).
    ManualInterventionRequired(String),
    /// The response matched no known login stage.
    UnexpectedResponse(String),
    /// The portal answered a login step with a hard HTTP failure.
    NetworkError {
        /// Status of the failing response.
        status: StatusCode,
        /// Canonical reason phrase, for diagnostics.
        message: String,
    },
}

impl From<FailureReason> for Error {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::CredentialsRejected => Error::CredentialsRejected,
            FailureReason::ManualInterventionRequired(what) => {
                Error::ManualInterventionRequired(what)
            }
            FailureReason::UnexpectedResponse(what) => Error::UnrecognizedResponse(what),
            FailureReason::NetworkError { status, message } => {
                Error::Network(NetworkError::ResponseContent { status, message })
            }
        }
    }
}

/// Classify the response to a credentials or OTP submission.
///
/// `device_registered` reflects whether the session already has a device
/// serial; a bare dashboard page only counts as success when it does, since
/// an unregistered client still needs the authorization code.
pub fn classify_submission(response: &PortalResponse, device_registered: bool) -> LoginStep {
    if let Some(authorization_code) = handshake::extract_authorization_code(&response.final_url) {
        return LoginStep::DeviceRegister { authorization_code };
    }

    if forms::has_captcha_challenge(&response.body) {
        return LoginStep::CaptchaChallenge;
    }

    if forms::has_otp_challenge(&response.body) {
        return match forms::extract_login_form(&response.body, &response.final_url) {
            Ok(form) => LoginStep::OtpChallenge(form),
            Err(_) => LoginStep::Failed(FailureReason::UnexpectedResponse(
                "otp challenge without a submittable form".into(),
            )),
        };
    }

    if forms::has_dashboard_marker(&response.body) {
        if device_registered {
            return LoginStep::Done;
        }
        return LoginStep::Failed(FailureReason::UnexpectedResponse(
            "authenticated page reached without a registered device".into(),
        ));
    }

    // A re-rendered sign-in form after a credentials submission means the
    // portal bounced the credentials.
    if forms::extract_login_form(&response.body, &response.final_url).is_ok() {
        return LoginStep::Failed(FailureReason::CredentialsRejected);
    }

    if response.signal() == ResponseSignal::Failed {
        return LoginStep::Failed(FailureReason::NetworkError {
            status: response.status,
            message: response
                .status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        });
    }

    LoginStep::Failed(FailureReason::UnexpectedResponse(format!(
        "unrecognized login page at {}",
        response.final_url
    )))
}
