//! Redaction helpers for diagnostics.
//!
//! Captured cookies and tokens must never reach a log sink: only field names
//! may appear. Everything that renders session material for logging goes
//! through this module.

use serde_json::Value;

const REPLACEMENT: &str = "[REDACTED]";

/// JSON keys whose values are scrubbed before logging.
const SENSITIVE_FIELDS: &[&str] = &[
    "access_token",
    "adp_token",
    "authorization_code",
    "cookie",
    "cookies",
    "csrf",
    "customer_id",
    "device_private_key",
    "otpCode",
    "password",
    "refresh_token",
    "session-token",
    "source_token",
    "value",
];

/// Partially obfuscate an email address, keeping one leading character per
/// local-part segment and of the domain name.
pub fn obfuscate_email(email: &str) -> String {
    let Some((user, domain)) = email.split_once('@') else {
        return "[invalid email]".into();
    };
    let Some((domain_name, domain_ext)) = domain.rsplit_once('.') else {
        return "[invalid email]".into();
    };

    fn obfuscate_part(part: &str) -> String {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if part.chars().count() > 1 => {
                let stars = "*".repeat(part.chars().count() - 1);
                format!("{first}{stars}")
            }
            Some(_) => "*".into(),
            None => String::new(),
        }
    }

    let user = user
        .split('.')
        .map(obfuscate_part)
        .collect::<Vec<_>>()
        .join(".");

    format!("{user}@{}.{domain_ext}", obfuscate_part(domain_name))
}

/// Return a deep copy of `value` with all sensitive fields replaced.
///
/// Emails are obfuscated rather than fully hidden so correlated log lines stay
/// attributable to an account.
pub fn scrub_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut scrubbed = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let replacement = if key == "email" {
                    Value::String(obfuscate_email(val.as_str().unwrap_or_default()))
                } else if SENSITIVE_FIELDS.contains(&key.as_str()) {
                    Value::String(REPLACEMENT.into())
                } else {
                    scrub_fields(val)
                };
                scrubbed.insert(key.clone(), replacement);
            }
            Value::Object(scrubbed)
        }
        Value::Array(items) => Value::Array(items.iter().map(scrub_fields).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn obfuscates_email_segments() {
        assert_eq!(obfuscate_email("john.doe@example.com"), "j***.d**@e******.com");
        assert_eq!(obfuscate_email("a@b.io"), "*@*.io");
    }

    #[test]
    fn invalid_email_is_not_echoed() {
        assert_eq!(obfuscate_email("not-an-email"), "[invalid email]");
    }

    #[test]
    fn scrubs_nested_sensitive_fields() {
        let value = json!({
            "email": "john.doe@example.com",
            "password": "hunter2",
            "tokens": {
                "access_token": "abc",
                "expires_in": 3600,
            },
            "cookies": [{"name": "session-token", "value": "secret"}],
        });

        let scrubbed = scrub_fields(&value);
        let rendered = scrubbed.to_string();

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("abc"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("expires_in"));
        assert_eq!(scrubbed["tokens"]["expires_in"], json!(3600));
    }
}
