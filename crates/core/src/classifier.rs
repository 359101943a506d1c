//! Maps raw adapter diagnostics onto the closed `QuoteErrorKind` taxonomy.
//!
//! Rules are checked in order and the first match wins. Credential and
//! challenge rules come before the timeout rule because some backends wrap
//! auth failures in a timeout-shaped message.

use crate::domain::result::{QuoteError, QuoteErrorKind};

const RULES: &[(QuoteErrorKind, &[&str])] = &[
    (
        QuoteErrorKind::CredentialsInvalid,
        &[
            "invalid credentials",
            "login failed",
            "credential",
            "authentication",
            "password",
            "unauthorized",
            "login",
        ],
    ),
    (QuoteErrorKind::CaptchaFailed, &["captcha", "recaptcha", "hcaptcha", "challenge"]),
    (
        QuoteErrorKind::FormChanged,
        &["element not found", "selector", "form changed", "navigation failed", "no such element"],
    ),
    (QuoteErrorKind::Timeout, &["timeout", "timed out"]),
    (
        QuoteErrorKind::PortalUnavailable,
        &["connection", "network", "unavailable", "502", "503", "econnrefused"],
    ),
];

pub fn classify(raw_message: &str) -> QuoteError {
    QuoteError::from_kind(classify_kind(raw_message), raw_message)
}

pub fn classify_kind(raw_message: &str) -> QuoteErrorKind {
    let normalized = raw_message.to_lowercase();
    RULES
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|pattern| normalized.contains(pattern)))
        .map(|(kind, _)| *kind)
        .unwrap_or(QuoteErrorKind::Unknown)
}
