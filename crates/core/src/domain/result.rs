use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::routing::AgentType;

const MAX_MESSAGE_CHARS: usize = 500;

/// Closed failure taxonomy. Recoverability is fixed per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteErrorKind {
    CredentialsInvalid,
    CaptchaFailed,
    FormChanged,
    Timeout,
    PortalUnavailable,
    Unknown,
}

impl QuoteErrorKind {
    pub const ALL: [QuoteErrorKind; 6] = [
        Self::CredentialsInvalid,
        Self::CaptchaFailed,
        Self::FormChanged,
        Self::Timeout,
        Self::PortalUnavailable,
        Self::Unknown,
    ];

    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::FormChanged | Self::Timeout | Self::PortalUnavailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CredentialsInvalid => "CREDENTIALS_INVALID",
            Self::CaptchaFailed => "CAPTCHA_FAILED",
            Self::FormChanged => "FORM_CHANGED",
            Self::Timeout => "TIMEOUT",
            Self::PortalUnavailable => "PORTAL_UNAVAILABLE",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn suggested_action(self) -> &'static str {
        match self {
            Self::CredentialsInvalid => {
                "Verify the saved portal username and password for this carrier."
            }
            Self::CaptchaFailed => "Complete the verification challenge and try again.",
            Self::FormChanged => {
                "The carrier portal layout may have changed. Retry later or quote manually."
            }
            Self::Timeout => "The carrier portal responded too slowly. Try again shortly.",
            Self::PortalUnavailable => {
                "The carrier portal appears to be down. Try again in a few minutes."
            }
            Self::Unknown => "Quote this carrier manually and report the failure.",
        }
    }
}

impl fmt::Display for QuoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure of one execution attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteError {
    kind: QuoteErrorKind,
    message: String,
    suggested_action: Option<String>,
}

impl QuoteError {
    pub fn from_kind(kind: QuoteErrorKind, message: impl Into<String>) -> Self {
        let message = truncate_chars(message.into().trim(), MAX_MESSAGE_CHARS);
        Self { kind, message, suggested_action: Some(kind.suggested_action().to_string()) }
    }

    pub fn kind(&self) -> QuoteErrorKind {
        self.kind
    }

    pub fn recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn suggested_action(&self) -> Option<&str> {
        self.suggested_action.as_deref()
    }
}

impl fmt::Display for QuoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteData {
    pub premium_annual: Option<Decimal>,
    pub premium_monthly: Option<Decimal>,
    #[serde(default)]
    pub coverages: BTreeMap<String, String>,
    #[serde(default)]
    pub deductibles: BTreeMap<String, String>,
    pub reference_id: Option<String>,
    pub raw: Option<serde_json::Value>,
    pub extracted_at: DateTime<Utc>,
}

impl QuoteData {
    /// Fills in the monthly premium from the annual one when the portal only
    /// showed a yearly figure.
    pub fn with_derived_monthly(mut self) -> Self {
        if self.premium_monthly.is_none() {
            self.premium_monthly =
                self.premium_annual.map(|annual| (annual / Decimal::from(12)).round_dp(2));
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum QuoteOutcome {
    Success(QuoteData),
    Failure(QuoteError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteResult {
    pub outcome: QuoteOutcome,
    pub agent_type: AgentType,
    pub elapsed: Duration,
}

impl QuoteResult {
    pub fn success(agent_type: AgentType, data: QuoteData, elapsed: Duration) -> Self {
        Self { outcome: QuoteOutcome::Success(data), agent_type, elapsed }
    }

    pub fn failure(agent_type: AgentType, error: QuoteError, elapsed: Duration) -> Self {
        Self { outcome: QuoteOutcome::Failure(error), agent_type, elapsed }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, QuoteOutcome::Success(_))
    }

    pub fn data(&self) -> Option<&QuoteData> {
        match &self.outcome {
            QuoteOutcome::Success(data) => Some(data),
            QuoteOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&QuoteError> {
        match &self.outcome {
            QuoteOutcome::Success(_) => None,
            QuoteOutcome::Failure(error) => Some(error),
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}
