//! Pre-login handshake material.
//!
//! The portal's sign-in flow is shaped like an OAuth/OpenID authorization
//! request from a mobile device: the entry URL carries an S256 code challenge
//! and a client id derived from the virtual device serial, and the final
//! registration call proves possession of the matching verifier. A few
//! well-known cookies must also be present before the first GET or the portal
//! escalates straight to a CAPTCHA.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use hearth_core::{Error, PortalSettings, http::Cookie};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Return-to path the portal redirects to with the authorization code.
pub const LANDING_PATH: &str = "/ap/maplanding";
/// Sign-in entry path.
pub const SIGNIN_PATH: &str = "/ap/signin";
/// Query parameter carrying the authorization code on the landing redirect.
pub const AUTHORIZATION_CODE_PARAM: &str = "openid.oa2.authorization_code";

/// Random PKCE-style code verifier, kept for the registration call.
#[derive(Clone)]
pub struct CodeVerifier(String);

impl CodeVerifier {
    /// Generate a fresh 32-byte verifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// The S256 challenge derived from this verifier.
    pub fn challenge(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.0.as_bytes()))
    }

    /// The verifier itself, sent only in the registration payload.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The verifier is proof material; keep it out of Debug output.
impl std::fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CodeVerifier(<redacted>)")
    }
}

/// Client id the portal expects: hex of `<serial>#<device type>`.
pub fn build_client_id(device_serial: &str, device_type: &str) -> String {
    let raw = format!("{device_serial}#{device_type}");
    raw.bytes().fold(String::new(), |mut out, b| {
        out.push_str(&format!("{b:02x}"));
        out
    })
}

/// Build the sign-in entry URL with the device-shaped OpenID parameters.
pub fn build_signin_url(
    settings: &PortalSettings,
    verifier: &CodeVerifier,
    client_id: &str,
    language: &str,
) -> Result<String, Error> {
    let return_to = format!("{}{LANDING_PATH}", settings.portal_url);
    let oauth_ns = format!("{}/ap/ext/oauth/2", settings.portal_url);
    let oauth_client_id = format!("device:{client_id}");
    let challenge = verifier.challenge();
    let language = language.replace('-', "_");

    let params = [
        ("openid.return_to", return_to.as_str()),
        ("openid.mode", "checkid_setup"),
        ("openid.ns", "http://specs.openid.net/auth/2.0"),
        (
            "openid.identity",
            "http://specs.openid.net/auth/2.0/identifier_select",
        ),
        (
            "openid.claimed_id",
            "http://specs.openid.net/auth/2.0/identifier_select",
        ),
        ("openid.ns.oa2", oauth_ns.as_str()),
        ("openid.oa2.client_id", oauth_client_id.as_str()),
        ("openid.oa2.response_type", "code"),
        ("openid.oa2.code_challenge_method", "S256"),
        ("openid.oa2.code_challenge", challenge.as_str()),
        ("openid.oa2.scope", "device_auth_access"),
        ("language", language.as_str()),
        ("accountStatusPolicy", "P1"),
        ("openid.pape.max_auth_age", "0"),
    ];

    let mut url = url::Url::parse(&settings.portal_url).map_err(|e| {
        Error::UnrecognizedResponse(format!(
            "configured portal url {:?} is not a valid base: {e}",
            settings.portal_url
        ))
    })?;
    url.set_path(SIGNIN_PATH);
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.to_string())
}

/// Extract the authorization code from the landing redirect URL, if present.
pub fn extract_authorization_code(final_url: &str) -> Option<String> {
    let url = url::Url::parse(final_url).ok()?;
    if url.path() != LANDING_PATH {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == AUTHORIZATION_CODE_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Cookies the portal expects from a legitimate app client before the first
/// request. Without them most logins are funneled into a CAPTCHA.
pub fn build_init_cookies(settings: &PortalSettings) -> Vec<Cookie> {
    let mut frc_bytes = [0u8; 313];
    rand::thread_rng().fill_bytes(&mut frc_bytes);
    let frc = STANDARD.encode(frc_bytes).trim_end_matches('=').to_string();

    let app_md = serde_json::json!({
        "device_user_dictionary": [],
        "device_registration_data": {
            "software_version": settings.app_version,
        },
        "app_identifier": {
            "app_version": settings.app_version,
            "bundle_id": settings.app_name,
        },
    });
    let app_md = STANDARD
        .encode(app_md.to_string())
        .trim_end_matches('=')
        .to_string();

    vec![
        Cookie::new("app-id", settings.app_name.clone()),
        Cookie::new("frc", frc),
        Cookie::new("app-md", app_md),
    ]
}
