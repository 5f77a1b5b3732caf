//! Canned portal login pages for state-machine tests.
//!
//! Kept deliberately messy (attribute order, casing, extra inputs) so the
//! extraction code is exercised against the kind of markup the portal
//! actually serves, not an idealized fixture.

/// The sign-in entry page with the credentials form.
pub fn signin_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
  <div class="nav"><form name="search" action="/search" method="get">
    <input type="text" name="q">
  </form></div>
  <form name="signIn" method="post" action="/ap/signin">
    <input type="hidden" name="appActionToken" value="action-token-1">
    <input type="hidden" name="workflowState" value="wf-state-1">
    <input type="hidden" name="openid.return_to" value="/ap/maplanding">
    <input type="email" id="ap_email" name="email">
    <input type="password" id="ap_password" name="password">
    <input type="submit" id="signInSubmit">
  </form>
</body>
</html>"#
        .to_string()
}

/// The one-time-password challenge page.
pub fn otp_page() -> String {
    r#"<!DOCTYPE html>
<html>
<body>
  <form name="mfaForm" method="POST" action="/ap/mfa/verify">
    <input type="hidden" name="mfaToken" value="mfa-token-1">
    <input type="hidden" name="workflowState" value="wf-state-2">
    <INPUT id="auth-mfa-otpcode" type="tel" name="otpCode">
    <input type="checkbox" name="rememberDevice">
    <input type="submit" id="auth-signin-button">
  </form>
</body>
</html>"#
        .to_string()
}

/// A CAPTCHA challenge page.
pub fn captcha_page() -> String {
    r#"<!DOCTYPE html>
<html>
<body>
  <form name="signIn" method="post" action="/ap/signin">
    <input type="hidden" name="appActionToken" value="action-token-1">
    <img src="/captcha/image.png" alt="captcha">
    <input id="auth-captcha-guess" type="text" name="guess">
    <input type="email" name="email">
    <input type="password" name="password">
  </form>
</body>
</html>"#
        .to_string()
}

/// An authenticated dashboard page.
pub fn dashboard_page() -> String {
    r#"<!DOCTYPE html>
<html>
<body>
  <div id="dashboard">
    <h1>Your devices</h1>
  </div>
</body>
</html>"#
        .to_string()
}

/// A page matching no known login stage.
pub fn unrecognized_page() -> String {
    "<!DOCTYPE html><html><body><p>We are down for maintenance.</p></body></html>".to_string()
}
