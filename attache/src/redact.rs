//! Credential redaction and masking.
//!
//! Every log path that may carry user credentials routes through
//! [`redact_credentials`] first. [`mask_email`] is used by the system-prompt
//! integration blurbs, which must never expose a full address.

use once_cell::sync::Lazy;
use regex::Regex;

/// Field names whose values are replaced with `[REDACTED]` wherever they
/// appear in serialized JSON or key=value text.
pub const REDACTED_FIELDS: &[&str] = &[
    "password",
    "appSpecificPassword",
    "clientSecret",
    "refreshToken",
    "botToken",
    "access_token",
    "secret",
    "token",
    "api_key",
];

static JSON_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    let names = REDACTED_FIELDS.join("|");
    // "field": "value"  (value may contain escaped quotes)
    Regex::new(&format!(
        r#""(?P<k>{names})"\s*:\s*"(?:[^"\\]|\\.)*""#
    ))
    .unwrap()
});

static KV_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    let names = REDACTED_FIELDS.join("|");
    // field=value up to whitespace, comma or end
    Regex::new(&format!(r"(?P<k>\b(?:{names}))=[^\s,]+")).unwrap()
});

/// Replaces values of credential-bearing fields with `[REDACTED]`.
/// Handles JSON (`"token": "abc"`) and key=value (`token=abc`) shapes.
pub fn redact_credentials(text: &str) -> String {
    let step = JSON_FIELD_RE.replace_all(text, r#""$k": "[REDACTED]""#);
    KV_FIELD_RE.replace_all(&step, "$k=[REDACTED]").into_owned()
}

/// Masks an email address to first character + `***@domain`.
/// Inputs without `@` are returned unchanged.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        _ => email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_json_fields() {
        let s = r#"{"botToken": "123:abc", "name": "ok"}"#;
        let out = redact_credentials(s);
        assert!(out.contains(r#""botToken": "[REDACTED]""#));
        assert!(out.contains(r#""name": "ok""#));
    }

    #[test]
    fn redacts_kv_fields() {
        let out = redact_credentials("api_key=sk-123 model=gpt");
        assert_eq!(out, "api_key=[REDACTED] model=gpt");
    }

    #[test]
    fn redacts_all_listed_fields() {
        for field in REDACTED_FIELDS {
            let s = format!(r#"{{"{field}": "supersecret"}}"#);
            let out = redact_credentials(&s);
            assert!(
                !out.contains("supersecret"),
                "field {field} leaked: {out}"
            );
        }
    }

    #[test]
    fn mask_email_basic() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "not-an-email");
    }
}
