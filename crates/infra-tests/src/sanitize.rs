//! Redaction of credentials from text that ends up in errors and logs.
//!
//! Engine diagnostics and management-API error bodies are attached to scenario
//! failures verbatim, so they pass through here first.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length for management-API error bodies in error messages.
pub const MAX_ERROR_BODY_LEN: usize = 256;

/// Maximum length for engine diagnostics in error messages.
pub const MAX_DIAGNOSTICS_LEN: usize = 4096;

/// Regex pattern for JWT tokens (header.payload.signature).
#[allow(clippy::expect_used)] // literal pattern
static JWT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]*)?").expect("valid regex")
});

/// Regex pattern for Bearer tokens in text.
#[allow(clippy::expect_used)] // literal pattern
static BEARER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("valid regex")
});

/// Regex pattern for `key=value` / `"key": "value"` pairs with sensitive keys.
#[allow(clippy::expect_used)] // literal pattern
static SENSITIVE_PAIR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)("?(?:admin_password|client_secret|password|access_token)"?\s*[:=]\s*"?)[^"\s,}]+"#,
    )
    .expect("valid regex")
});

/// Redact tokens, sensitive key/value pairs and any literal `secrets`.
#[must_use]
pub fn redact(text: &str, secrets: &[&str]) -> String {
    let mut sanitized = BEARER_PATTERN
        .replace_all(text, "[BEARER_REDACTED]")
        .into_owned();
    sanitized = JWT_PATTERN
        .replace_all(&sanitized, "[JWT_REDACTED]")
        .into_owned();
    sanitized = SENSITIVE_PAIR_PATTERN
        .replace_all(&sanitized, "${1}[REDACTED]")
        .into_owned();

    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        sanitized = sanitized.replace(secret, "[REDACTED]");
    }

    sanitized
}

/// Redact and keep at most `MAX_ERROR_BODY_LEN` leading characters.
#[must_use]
pub fn sanitize_error_body(body: &str) -> String {
    let sanitized = redact(body, &[]);
    match sanitized.char_indices().nth(MAX_ERROR_BODY_LEN) {
        Some((cut, _)) => format!("{}...[truncated]", sanitized.get(..cut).unwrap_or_default()),
        None => sanitized,
    }
}

/// Redact and keep at most `MAX_DIAGNOSTICS_LEN` trailing characters.
///
/// Engines print the failure at the end of their output.
#[must_use]
pub fn sanitize_diagnostics(output: &str, secrets: &[&str]) -> String {
    let sanitized = redact(output, secrets);
    let total = sanitized.chars().count();
    if total <= MAX_DIAGNOSTICS_LEN {
        return sanitized;
    }
    match sanitized.char_indices().nth(total - MAX_DIAGNOSTICS_LEN) {
        Some((cut, _)) => format!("[truncated]...{}", sanitized.get(cut..).unwrap_or_default()),
        None => sanitized,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_redacted() {
        let text = "request failed: Authorization: Bearer abc.def.ghi";
        let out = redact(text, &[]);
        assert!(out.contains("[BEARER_REDACTED]"));
        assert!(!out.contains("abc.def.ghi"));
    }

    #[test]
    fn test_jwt_redacted() {
        let text = "token eyJhbGciOiJSUzI1NiJ9.eyJzdWIiOiIxIn0.c2ln leaked";
        let out = redact(text, &[]);
        assert!(out.contains("[JWT_REDACTED]"));
        assert!(out.ends_with("leaked"));
    }

    #[test]
    fn test_sensitive_pairs_redacted() {
        let text = r#"-var admin_password=TestPassword123! and {"client_secret": "xyz"}"#;
        let out = redact(text, &[]);
        assert!(!out.contains("TestPassword123!"));
        assert!(!out.contains("xyz"));
        assert!(out.contains("admin_password=[REDACTED]"));
    }

    #[test]
    fn test_literal_secrets_redacted() {
        let out = redact("echoed hunter2 back", &["hunter2", ""]);
        assert_eq!(out, "echoed [REDACTED] back");
    }

    #[test]
    fn test_error_body_truncated_from_head() {
        let body = "x".repeat(MAX_ERROR_BODY_LEN + 10);
        let out = sanitize_error_body(&body);
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(out.len(), MAX_ERROR_BODY_LEN + "...[truncated]".len());
    }

    #[test]
    fn test_error_body_truncation_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY_LEN + 1);
        let out = sanitize_error_body(&body);
        assert!(out.starts_with('é'));
        assert!(out.ends_with("...[truncated]"));
    }

    #[test]
    fn test_diagnostics_keep_tail() {
        let output = format!("{}Error: quota exceeded", "noise\n".repeat(2000));
        let out = sanitize_diagnostics(&output, &[]);
        assert!(out.starts_with("[truncated]..."));
        assert!(out.ends_with("Error: quota exceeded"));
    }

    #[test]
    fn test_short_diagnostics_untouched() {
        assert_eq!(sanitize_diagnostics("Error: boom", &[]), "Error: boom");
    }
}
