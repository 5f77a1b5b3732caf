//! Session lifecycle: interactive login, restore, token refresh, logout.

use std::sync::Arc;

use chrono::Utc;
use hearth_core::{
    Error, NetworkError, PortalSettings, require,
    http::{
        Cookie, CookieStore, InMemoryCookieStore, PortalRequest, PortalResponse,
        PortalTransport, ResponseSignal, Transport,
    },
    redact::{obfuscate_email, scrub_fields},
    session::{
        Credentials, SESSION_TOKEN_COOKIE, SessionCookie, SessionHandle, SessionState,
    },
};
use serde::{Deserialize, Deserializer};
use tokio::sync::RwLock;

use crate::{
    forms::{self, LoginForm},
    handshake::{self, CodeVerifier},
    login_step::{FailureReason, LoginStep},
    otp::OtpProvider,
};

/// Drives the login state machine and exclusively owns the [`SessionState`].
///
/// Everything that mutates session material lives here; the dispatcher and
/// the device client only see it through [`SessionHandle`] and the shared
/// cookie store.
pub struct SessionManager {
    settings: PortalSettings,
    credentials: Credentials,
    otp: Option<Arc<dyn OtpProvider>>,
    transport: Arc<dyn Transport>,
    cookie_store: Arc<dyn CookieStore>,
    state: RwLock<SessionState>,
}

impl SessionManager {
    /// Create a manager talking to the real portal.
    pub fn new(credentials: Credentials, settings: PortalSettings) -> Self {
        let cookie_store: Arc<dyn CookieStore> = Arc::new(InMemoryCookieStore::new());
        let transport: Arc<dyn Transport> = Arc::new(PortalTransport::new(
            cookie_store.clone(),
            &settings,
            credentials.language(),
        ));
        Self::with_transport(credentials, settings, transport, cookie_store)
    }

    /// Create a manager over an existing transport and cookie store.
    pub fn with_transport(
        credentials: Credentials,
        settings: PortalSettings,
        transport: Arc<dyn Transport>,
        cookie_store: Arc<dyn CookieStore>,
    ) -> Self {
        Self {
            settings,
            credentials,
            otp: None,
            transport,
            cookie_store,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Attach an OTP provider for accounts with two-factor login.
    #[must_use]
    pub fn with_otp(mut self, otp: Arc<dyn OtpProvider>) -> Self {
        self.otp = Some(otp);
        self
    }

    /// The transport shared with the dispatcher and device client.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// A copy of the current session state.
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Run the interactive login flow from scratch.
    ///
    /// Steps through the state machine until a terminal step is reached;
    /// every transition is decided by [`crate::login_step::classify_submission`]
    /// over the previous response.
    pub async fn login(&self) -> Result<SessionState, Error> {
        tracing::info!(
            email = %obfuscate_email(&self.credentials.email),
            "starting portal login"
        );

        let verifier = CodeVerifier::generate();
        let serial = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        let client_id = handshake::build_client_id(&serial, &self.settings.device_type);

        for cookie in handshake::build_init_cookies(&self.settings) {
            self.cookie_store.set_cookie(cookie).await;
        }

        let mut otp_attempted = false;
        let mut step = LoginStep::InitialGet;
        loop {
            tracing::debug!(step = step_name(&step), "login step");
            step = match step {
                LoginStep::InitialGet => {
                    let url = handshake::build_signin_url(
                        &self.settings,
                        &verifier,
                        &client_id,
                        self.credentials.language(),
                    )?;
                    let response = self.transport.send(&PortalRequest::get(url)).await?;
                    if response.signal() == ResponseSignal::AuthExpired {
                        return Err(Error::CredentialsRejected);
                    }
                    // The sign-in endpoint occasionally answers 404 while still
                    // rendering the form, so extraction is attempted first.
                    match forms::extract_login_form(&response.body, &response.final_url) {
                        Ok(form) => LoginStep::CredentialsSubmit(form),
                        Err(_) if !response.status.is_success() => {
                            return Err(response.into_failure());
                        }
                        Err(e) => return Err(e),
                    }
                }
                LoginStep::CredentialsSubmit(form) => {
                    let mut fields = form.hidden_fields.clone();
                    fields.push(("email".into(), self.credentials.email.clone()));
                    fields.push(("password".into(), self.credentials.password.clone()));
                    let response = self.submit_form(&form, fields).await?;
                    self.classify(&response).await
                }
                LoginStep::OtpChallenge(form) => {
                    if otp_attempted {
                        return Err(Error::CredentialsRejected);
                    }
                    otp_attempted = true;

                    let Some(otp) = &self.otp else {
                        return Err(Error::ManualInterventionRequired(
                            "account requires a one-time password".into(),
                        ));
                    };
                    let code = otp.otp_code().await?;

                    let mut fields = form.hidden_fields.clone();
                    fields.push(("otpCode".into(), code));
                    fields.push(("mfaSubmit".into(), "Submit".into()));
                    fields.push(("rememberDevice".into(), "false".into()));
                    let response = self.submit_form(&form, fields).await?;
                    self.classify(&response).await
                }
                LoginStep::CaptchaChallenge => LoginStep::Failed(
                    FailureReason::ManualInterventionRequired("captcha challenge".into()),
                ),
                LoginStep::DeviceRegister { authorization_code } => {
                    self.register_device(&serial, &client_id, &verifier, &authorization_code)
                        .await?;
                    LoginStep::Done
                }
                LoginStep::Done => {
                    let mut state = self.state.write().await;
                    self.snapshot_cookies(&mut state).await;
                    state.mark_authenticated()?;
                    tracing::info!(
                        email = %obfuscate_email(&self.credentials.email),
                        "portal login complete"
                    );
                    return Ok(state.clone());
                }
                LoginStep::Failed(reason) => {
                    tracing::warn!(reason = ?reason, "portal login failed");
                    return Err(reason.into());
                }
            };
        }
    }

    /// Resume a session from a previously persisted blob.
    ///
    /// Performs exactly one lightweight validation call. On success the state
    /// is authenticated with no further traffic; on an auth-rejection the
    /// stored material is discarded and [`Error::SessionExpired`] is returned,
    /// so restoring twice from the same blob behaves identically.
    pub async fn restore(&self, blob: &serde_json::Value) -> Result<SessionState, Error> {
        let restored = SessionState::from_blob(blob)?;

        self.cookie_store.clear().await;
        for cookie in &restored.cookies {
            let mut c = Cookie::new(cookie.name.clone(), cookie.value.clone());
            c.domain = cookie.domain.clone();
            self.cookie_store.set_cookie(c).await;
        }
        *self.state.write().await = restored;

        if self.validate_session().await? {
            let mut state = self.state.write().await;
            state.mark_authenticated()?;
            tracing::info!("restored portal session");
            return Ok(state.clone());
        }

        tracing::info!("stored session no longer accepted, discarding");
        self.state.write().await.invalidate();
        self.cookie_store.clear().await;
        Err(Error::SessionExpired)
    }

    /// Exchange the refresh token for a fresh access token.
    pub async fn refresh_tokens(&self) -> Result<SessionState, Error> {
        let refresh_token = self
            .state
            .read()
            .await
            .refresh_token
            .clone()
            .ok_or(Error::SessionExpired)?;

        let fields = vec![
            ("app_name".into(), self.settings.app_name.clone()),
            ("app_version".into(), self.settings.app_version.clone()),
            ("source_token".into(), refresh_token),
            ("source_token_type".into(), "refresh_token".into()),
            ("requested_token_type".into(), "access_token".into()),
        ];
        let response = self
            .transport
            .send(&PortalRequest::post_form(
                format!("{}/auth/token", self.settings.api_url),
                fields,
            ))
            .await?;

        if response.signal() != ResponseSignal::Ok {
            tracing::warn!(status = %response.status, "token refresh rejected");
            return Err(Error::SessionExpired);
        }

        let refreshed: RefreshedTokens =
            serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;

        let mut state = self.state.write().await;
        state.access_token = Some(refreshed.access_token);
        state.expires_at =
            Some(Utc::now() + chrono::Duration::seconds(refreshed.expires_in));
        tracing::debug!("access token refreshed");
        Ok(state.clone())
    }

    /// Serialize the current session, including live cookies, to the opaque
    /// blob callers may store.
    pub async fn persist(&self) -> Result<serde_json::Value, Error> {
        let mut state = self.state.write().await;
        self.snapshot_cookies(&mut state).await;
        Ok(state.to_blob()?)
    }

    /// Drop all session material.
    pub async fn logout(&self) {
        self.state.write().await.invalidate();
        self.cookie_store.clear().await;
        tracing::info!("logged out, session material dropped");
    }

    /// One validation round-trip against the bootstrap endpoint.
    async fn validate_session(&self) -> Result<bool, Error> {
        let response = self
            .transport
            .send(&PortalRequest::get(format!(
                "{}/api/bootstrap?version=0",
                self.settings.api_url
            )))
            .await?;

        match response.signal() {
            ResponseSignal::Ok => {
                let body: BootstrapResponse =
                    serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;
                let authenticated = body
                    .authentication
                    .as_ref()
                    .is_some_and(|a| a.authenticated);
                if let Some(customer_id) =
                    body.authentication.and_then(|a| a.customer_id)
                {
                    self.state.write().await.customer_id = Some(customer_id);
                }
                tracing::debug!(authenticated, "session validation result");
                Ok(authenticated)
            }
            ResponseSignal::AuthExpired => Ok(false),
            _ => Err(response.into_failure()),
        }
    }

    async fn classify(&self, response: &PortalResponse) -> LoginStep {
        let device_registered = self.state.read().await.device_serial.is_some();
        crate::login_step::classify_submission(response, device_registered)
    }

    async fn submit_form(
        &self,
        form: &LoginForm,
        fields: Vec<(String, String)>,
    ) -> Result<PortalResponse, Error> {
        let field_map: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        tracing::debug!(
            action = %form.action,
            fields = %scrub_fields(&serde_json::Value::Object(field_map)),
            "submitting login form"
        );

        let request = if form.method == "GET" {
            let mut url = url::Url::parse(&form.action).map_err(|_| {
                Error::UnrecognizedResponse(format!("invalid form action: {}", form.action))
            })?;
            url.query_pairs_mut().extend_pairs(&fields);
            PortalRequest::get(url.to_string())
        } else {
            PortalRequest::post_form(form.action.clone(), fields)
        };
        let response = self.transport.send(&request).await?;

        if response.signal() == ResponseSignal::AuthExpired {
            return Err(Error::CredentialsRejected);
        }
        Ok(response)
    }

    /// Register this client as a virtual device, exchanging the authorization
    /// code for bearer tokens and website cookies.
    async fn register_device(
        &self,
        serial: &str,
        client_id: &str,
        verifier: &CodeVerifier,
        authorization_code: &str,
    ) -> Result<(), Error> {
        let frc = self
            .cookie_store
            .get_cookie("frc")
            .await
            .map(|c| c.value)
            .unwrap_or_default();

        let body = serde_json::json!({
            "requested_extensions": ["device_info", "customer_info"],
            "registration_data": {
                "domain": "Device",
                "device_type": self.settings.device_type,
                "device_serial": serial,
                "device_name": format!("{} virtual device", self.settings.app_name),
                "app_name": self.settings.app_name,
                "app_version": self.settings.app_version,
                "software_version": self.settings.app_version,
            },
            "auth_data": {
                "client_id": client_id,
                "authorization_code": authorization_code,
                "code_verifier": verifier.as_str(),
                "code_algorithm": "SHA-256",
            },
            "user_context_map": { "frc": frc },
            "requested_token_type": [
                "bearer",
                "website_cookies",
                "store_authentication_cookie",
            ],
        });

        let response = self
            .transport
            .send(&PortalRequest::post_json(
                format!("{}/auth/register", self.settings.api_url),
                body,
            ))
            .await?;

        if !response.status.is_success() {
            let message = response
                .json()
                .ok()
                .and_then(|v| {
                    v.pointer("/response/error/message")
                        .and_then(|m| m.as_str().map(String::from))
                })
                .unwrap_or_else(|| "no error message".into());
            tracing::error!(
                email = %obfuscate_email(&self.credentials.email),
                %message,
                "device registration rejected"
            );
            return Err(Error::CredentialsRejected);
        }

        let envelope: RegisterEnvelope =
            serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;
        let success = require!(envelope.response.success);
        let tokens = success.tokens;

        let mut state = self.state.write().await;
        state.device_serial = Some(
            success
                .extensions
                .as_ref()
                .and_then(|e| e.device_info.as_ref())
                .map(|d| d.device_serial_number.clone())
                .unwrap_or_else(|| serial.to_string()),
        );
        state.customer_id = success
            .extensions
            .and_then(|e| e.customer_info)
            .map(|c| c.user_id);
        state.access_token = Some(tokens.bearer.access_token);
        state.refresh_token = Some(tokens.bearer.refresh_token);
        state.adp_token = tokens.mac_dms.map(|m| m.adp_token);
        state.expires_at =
            Some(Utc::now() + chrono::Duration::seconds(tokens.bearer.expires_in));
        drop(state);

        for cookie in tokens.website_cookies {
            self.cookie_store
                .set_cookie(Cookie::new(cookie.name, cookie.value.replace('"', "")))
                .await;
        }
        if let Some(store_auth) = tokens.store_authentication_cookie {
            self.cookie_store
                .set_cookie(Cookie::new(SESSION_TOKEN_COOKIE, store_auth.cookie))
                .await;
        }

        tracing::info!(device_type = %self.settings.device_type, "virtual device registered");
        Ok(())
    }

    /// Fold the live cookie store into the session state, keeping the CSRF
    /// token mirror up to date.
    async fn snapshot_cookies(&self, state: &mut SessionState) {
        for name in self.cookie_store.list_cookies().await {
            if let Some(cookie) = self.cookie_store.get_cookie(&name).await {
                state.put_cookie(SessionCookie {
                    name: cookie.name,
                    value: cookie.value,
                    domain: cookie.domain,
                });
            }
        }
        state.csrf_token = state
            .cookies
            .iter()
            .find(|c| c.name == "csrf")
            .map(|c| c.value.clone());
    }
}

#[async_trait::async_trait]
impl SessionHandle for SessionManager {
    async fn current(&self) -> Result<SessionState, Error> {
        let state = self.state.read().await.clone();
        if state.is_authenticated() {
            if state.access_token_expired() {
                return self.refresh_tokens().await;
            }
            return Ok(state);
        }
        self.login().await
    }

    async fn invalidate_and_relogin(&self) -> Result<SessionState, Error> {
        self.state.write().await.invalidate();
        self.cookie_store.clear().await;
        self.login().await.map_err(|e| match e {
            // A relogin that bounces means the stored credentials no longer
            // open a session; surface that as expiry to the queued caller.
            Error::CredentialsRejected => Error::SessionExpired,
            other => other,
        })
    }
}

fn step_name(step: &LoginStep) -> &'static str {
    match step {
        LoginStep::InitialGet => "initial-get",
        LoginStep::CredentialsSubmit(_) => "credentials-submit",
        LoginStep::OtpChallenge(_) => "otp-challenge",
        LoginStep::CaptchaChallenge => "captcha-challenge",
        LoginStep::DeviceRegister { .. } => "device-register",
        LoginStep::Done => "done",
        LoginStep::Failed(_) => "failed",
    }
}

#[derive(Deserialize)]
struct RegisterEnvelope {
    response: RegisterBody,
}

#[derive(Deserialize)]
struct RegisterBody {
    #[serde(default)]
    success: Option<RegisterSuccess>,
}

#[derive(Deserialize)]
struct RegisterSuccess {
    tokens: RegisterTokens,
    #[serde(default)]
    extensions: Option<RegisterExtensions>,
}

#[derive(Deserialize)]
struct RegisterTokens {
    bearer: BearerTokens,
    #[serde(default)]
    mac_dms: Option<MacDms>,
    #[serde(default)]
    website_cookies: Vec<WebsiteCookie>,
    #[serde(default)]
    store_authentication_cookie: Option<StoreAuthenticationCookie>,
}

#[derive(Deserialize)]
struct BearerTokens {
    access_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "expires_in_seconds")]
    expires_in: i64,
}

#[derive(Deserialize)]
struct MacDms {
    adp_token: String,
}

#[derive(Deserialize)]
struct WebsiteCookie {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Deserialize)]
struct StoreAuthenticationCookie {
    cookie: String,
}

#[derive(Deserialize)]
struct RegisterExtensions {
    #[serde(default)]
    device_info: Option<RegisteredDeviceInfo>,
    #[serde(default)]
    customer_info: Option<RegisteredCustomerInfo>,
}

#[derive(Deserialize)]
struct RegisteredDeviceInfo {
    device_serial_number: String,
}

#[derive(Deserialize)]
struct RegisteredCustomerInfo {
    user_id: String,
}

#[derive(Deserialize)]
struct RefreshedTokens {
    access_token: String,
    #[serde(deserialize_with = "expires_in_seconds")]
    expires_in: i64,
}

#[derive(Deserialize)]
struct BootstrapResponse {
    #[serde(default)]
    authentication: Option<BootstrapAuthentication>,
}

#[derive(Deserialize)]
struct BootstrapAuthentication {
    #[serde(default)]
    authenticated: bool,
    #[serde(default, rename = "customerId")]
    customer_id: Option<String>,
}

/// The portal serializes `expires_in` as a number or a numeric string
/// depending on the endpoint; accept both.
fn expires_in_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| serde::de::Error::custom("expires_in is not a number"))
}
