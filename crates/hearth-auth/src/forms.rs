//! HTML form extraction for the login flow.
//!
//! The portal speaks no protocol beyond HTML pages and redirects, so the only
//! way to tell which login stage a response represents is to look at which
//! form it carries. Markup varies slightly between portal releases; matching
//! is therefore always by stable attributes (form name, marker input ids),
//! never by element position.

use std::sync::LazyLock;

use hearth_core::Error;
use regex::Regex;

/// Name attribute of the credentials form on the sign-in page.
const SIGNIN_FORM_NAME: &str = "signIn";
/// Input id marking the one-time-password challenge page.
const OTP_INPUT_ID: &str = "auth-mfa-otpcode";
/// Input id marking the CAPTCHA challenge page.
const CAPTCHA_INPUT_ID: &str = "auth-captcha-guess";
/// Element id marking an already-authenticated dashboard page.
const DASHBOARD_ID: &str = "dashboard";

static FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(<form\b[^>]*>)(.*?)</form>").expect("pattern is valid")
});
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<input\b[^>]*>").expect("pattern is valid"));

/// A login form lifted out of a portal page: where to submit it and the
/// hidden fields that must be echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Form action, possibly relative to the page URL.
    pub action: String,
    /// Form method, uppercased. Defaults to GET when absent, like a browser.
    pub method: String,
    /// Hidden input fields, in document order.
    pub hidden_fields: Vec<(String, String)>,
}

/// Find the sign-in form, falling back to the first form on the page.
///
/// The fallback matters: OTP and error pages reuse the same template but
/// rename the form, and the hidden fields still have to be carried forward.
pub fn extract_login_form(html: &str, page_url: &str) -> Result<LoginForm, Error> {
    let form = find_form(html, Some(SIGNIN_FORM_NAME))
        .or_else(|| find_form(html, None))
        .ok_or_else(|| Error::UnrecognizedResponse("no login form found".into()))?;

    let action = attr(form.tag, "action")
        .ok_or_else(|| Error::UnrecognizedResponse("login form has no action".into()))?;
    let action = resolve_action(&action, page_url)?;
    let method = attr(form.tag, "method")
        .unwrap_or_else(|| "GET".into())
        .to_uppercase();

    let mut hidden_fields = Vec::new();
    for input in INPUT_RE.find_iter(form.body) {
        let tag = input.as_str();
        if !attr(tag, "type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
            continue;
        }
        if let Some(name) = attr(tag, "name") {
            hidden_fields.push((name, attr(tag, "value").unwrap_or_default()));
        }
    }

    Ok(LoginForm {
        action,
        method,
        hidden_fields,
    })
}

/// True if the page carries the one-time-password challenge.
pub fn has_otp_challenge(html: &str) -> bool {
    has_input_with_id(html, OTP_INPUT_ID)
}

/// True if the page carries a CAPTCHA challenge. Detected by the guess input
/// or by a captcha image, whichever the portal variant renders.
pub fn has_captcha_challenge(html: &str) -> bool {
    static CAPTCHA_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)<img\b[^>]*\balt\s*=\s*["']captcha["']"#).expect("pattern is valid")
    });
    has_input_with_id(html, CAPTCHA_INPUT_ID) || CAPTCHA_IMG_RE.is_match(html)
}

/// True if the page is the authenticated dashboard.
pub fn has_dashboard_marker(html: &str) -> bool {
    static DASHBOARD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(
            r#"(?i)<[a-z][a-z0-9]*\b[^>]*\bid\s*=\s*["']{DASHBOARD_ID}["']"#
        ))
        .expect("pattern is valid")
    });
    DASHBOARD_RE.is_match(html)
}

fn has_input_with_id(html: &str, id: &str) -> bool {
    INPUT_RE
        .find_iter(html)
        .any(|input| attr(input.as_str(), "id").is_some_and(|v| v == id))
}

struct RawForm<'a> {
    tag: &'a str,
    body: &'a str,
}

fn find_form<'a>(html: &'a str, name: Option<&str>) -> Option<RawForm<'a>> {
    for captures in FORM_RE.captures_iter(html) {
        let tag = captures.get(1)?.as_str();
        let body = captures.get(2)?.as_str();
        match name {
            Some(wanted) if attr(tag, "name").as_deref() != Some(wanted) => continue,
            _ => return Some(RawForm { tag, body }),
        }
    }
    None
}

/// Pull a single attribute value out of a tag. Quoted values only; the portal
/// always quotes its attributes.
fn attr(tag: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"(?i)\b{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(name)
    ))
    .expect("pattern is valid");
    let captures = re.captures(tag)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

fn resolve_action(action: &str, page_url: &str) -> Result<String, Error> {
    let base = url::Url::parse(page_url)
        .map_err(|_| Error::UnrecognizedResponse(format!("invalid page url: {page_url}")))?;
    let resolved = base
        .join(action)
        .map_err(|_| Error::UnrecognizedResponse(format!("invalid form action: {action}")))?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "https://account.hearthportal.com/ap/signin?foo=bar";

    #[test]
    fn extracts_signin_form_with_hidden_fields() {
        let html = r#"
            <form name="other" action="/nope" method="get"></form>
            <form name="signIn" action="/ap/signin" method="post">
                <input type="hidden" name="appActionToken" value="tok123" />
                <input type="hidden" name="workflowState" value="ws" />
                <input type="text" name="email" />
                <input type="password" name="password" />
            </form>
        "#;

        let form = extract_login_form(html, PAGE_URL).expect("form found");
        assert_eq!(form.action, "https://account.hearthportal.com/ap/signin");
        assert_eq!(form.method, "POST");
        assert_eq!(
            form.hidden_fields,
            vec![
                ("appActionToken".to_string(), "tok123".to_string()),
                ("workflowState".to_string(), "ws".to_string()),
            ]
        );
    }

    #[test]
    fn falls_back_to_first_form_when_signin_form_absent() {
        let html = r#"
            <form name="mfaForm" action="verify" method="POST">
                <input type="hidden" name="mfaToken" value="t" />
                <input id="auth-mfa-otpcode" type="text" name="otpCode" />
            </form>
        "#;

        let form = extract_login_form(html, PAGE_URL).expect("form found");
        assert_eq!(form.action, "https://account.hearthportal.com/ap/verify");
        assert_eq!(form.hidden_fields, vec![("mfaToken".to_string(), "t".to_string())]);
    }

    #[test]
    fn missing_form_is_an_unrecognized_response() {
        let err = extract_login_form("<html><body>maintenance</body></html>", PAGE_URL)
            .expect_err("no form");
        assert!(matches!(err, Error::UnrecognizedResponse(_)));
    }

    #[test]
    fn detects_otp_challenge_by_input_id() {
        let html = r#"<form action="/v"><input id="auth-mfa-otpcode" name="otpCode"></form>"#;
        assert!(has_otp_challenge(html));
        assert!(!has_otp_challenge(r#"<input id="something-else">"#));
    }

    #[test]
    fn detects_captcha_by_input_or_image() {
        assert!(has_captcha_challenge(
            r#"<form><input id="auth-captcha-guess" name="guess"></form>"#
        ));
        assert!(has_captcha_challenge(r#"<img src="/c.png" alt="captcha">"#));
        assert!(!has_captcha_challenge(r#"<img src="/logo.png" alt="logo">"#));
    }

    #[test]
    fn detects_dashboard_marker() {
        assert!(has_dashboard_marker(r#"<div id="dashboard">devices</div>"#));
        assert!(!has_dashboard_marker(r#"<div id="signin-page"></div>"#));
    }

    #[test]
    fn tolerates_attribute_order_and_quoting_variation() {
        let html = r#"
            <FORM method='post' name='signIn' action='/ap/signin'>
                <INPUT value='v1' name='n1' type='HIDDEN'>
            </FORM>
        "#;
        let form = extract_login_form(html, PAGE_URL).expect("form found");
        assert_eq!(form.method, "POST");
        assert_eq!(form.hidden_fields, vec![("n1".to_string(), "v1".to_string())]);
    }
}
