use hearth_core::Error;

/// Supplies the out-of-band one-time password when the portal raises an MFA
/// challenge.
///
/// The code arrives via a channel this library cannot see (authenticator app,
/// SMS), so the caller implements this trait; a login without a provider
/// fails the challenge with [`Error::ManualInterventionRequired`].
#[async_trait::async_trait]
pub trait OtpProvider: Send + Sync {
    /// Produce the current one-time password.
    async fn otp_code(&self) -> Result<String, Error>;
}

/// A fixed one-time password, for flows where the caller collected the code
/// before starting the login.
pub struct StaticOtp(String);

impl StaticOtp {
    /// Wrap an already-collected code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

#[async_trait::async_trait]
impl OtpProvider for StaticOtp {
    async fn otp_code(&self) -> Result<String, Error> {
        Ok(self.0.clone())
    }
}
