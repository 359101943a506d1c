use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const REDACTED: &str = "[redacted]";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(format!("job-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry key for a carrier. Always stored trimmed and lower-cased so
/// `Progressive` and `progressive` resolve to the same routing entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CarrierCode(String);

impl CarrierCode {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CarrierCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for CarrierCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<CarrierCode> for String {
    fn from(value: CarrierCode) -> Self {
        value.0
    }
}

impl fmt::Display for CarrierCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decrypted portal login. Owned by the caller for the duration of one job.
#[derive(Clone)]
pub struct PortalCredentials {
    pub username: String,
    pub password: SecretString,
    pub mfa_code: Option<SecretString>,
}

impl PortalCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: SecretString::from(password.into()), mfa_code: None }
    }

    pub fn with_mfa_code(mut self, code: impl Into<String>) -> Self {
        self.mfa_code = Some(SecretString::from(code.into()));
        self
    }

    /// Replaces every credential value found in `text` with a placeholder.
    pub fn redact(&self, text: &str) -> String {
        let mut output = text.to_string();
        let mut secrets = vec![self.password.expose_secret(), self.username.as_str()];
        if let Some(code) = &self.mfa_code {
            secrets.push(code.expose_secret());
        }

        for secret in secrets {
            let secret = secret.trim();
            if secret.is_empty() {
                continue;
            }
            // Very short values only match as whole words so ordinary words survive.
            output = if secret.len() < 3 {
                redact_whole_words(&output, secret)
            } else {
                output.replace(secret, REDACTED)
            };
        }
        output
    }
}

fn redact_whole_words(text: &str, needle: &str) -> String {
    let is_word = |ch: Option<char>| ch.is_some_and(char::is_alphanumeric);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, _) in text.match_indices(needle) {
        let end = start + needle.len();
        if is_word(text[..start].chars().next_back()) || is_word(text[end..].chars().next()) {
            continue;
        }
        output.push_str(&text[cursor..start]);
        output.push_str(REDACTED);
        cursor = end;
    }
    output.push_str(&text[cursor..]);
    output
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("username", &REDACTED)
            .field("password", &REDACTED)
            .field("has_mfa_code", &self.mfa_code.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current_step: String,
    pub progress_pct: u8,
    pub screenshot: Option<String>,
}

impl ProgressUpdate {
    pub fn new(current_step: impl Into<String>, progress_pct: u8) -> Self {
        Self { current_step: current_step.into(), progress_pct: progress_pct.min(100), screenshot: None }
    }

    pub fn with_screenshot(mut self, screenshot: Option<String>) -> Self {
        self.screenshot = screenshot;
        self
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub kind: String,
    pub prompt: String,
    pub screenshot: Option<String>,
}

/// Human-in-the-loop hook. `None` means the prompt could not be resolved.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    async fn resolve(&self, challenge: Challenge) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, update: ProgressUpdate) {
        info!(
            event_name = "quote.progress",
            step = %update.current_step,
            progress_pct = update.progress_pct,
            has_screenshot = update.screenshot.is_some(),
            "quote execution progress"
        );
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeclineChallenges;

#[async_trait]
impl ChallengeResolver for DeclineChallenges {
    async fn resolve(&self, _challenge: Challenge) -> Option<String> {
        None
    }
}

/// Input for one execution attempt. Built fresh by the caller per job and
/// only ever borrowed by adapters.
pub struct QuoteExecutionParams {
    pub job_id: JobId,
    pub carrier_code: CarrierCode,
    pub client_data: serde_json::Value,
    pub credentials: PortalCredentials,
    pub recipe: Option<serde_json::Value>,
    pub progress: Arc<dyn ProgressSink>,
    pub challenges: Arc<dyn ChallengeResolver>,
}

impl QuoteExecutionParams {
    pub fn new(
        job_id: JobId,
        carrier_code: impl Into<CarrierCode>,
        client_data: serde_json::Value,
        credentials: PortalCredentials,
    ) -> Self {
        Self {
            job_id,
            carrier_code: carrier_code.into(),
            client_data,
            credentials,
            recipe: None,
            progress: Arc::new(TracingProgressSink),
            challenges: Arc::new(DeclineChallenges),
        }
    }

    pub fn with_recipe(mut self, recipe: serde_json::Value) -> Self {
        self.recipe = Some(recipe);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_challenges(mut self, challenges: Arc<dyn ChallengeResolver>) -> Self {
        self.challenges = challenges;
        self
    }

    pub fn report(&self, step: impl Into<String>, progress_pct: u8) {
        self.progress.report(ProgressUpdate::new(step, progress_pct));
    }
}

impl fmt::Debug for QuoteExecutionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuoteExecutionParams")
            .field("job_id", &self.job_id)
            .field("carrier_code", &self.carrier_code)
            .field("credentials", &self.credentials)
            .field("has_recipe", &self.recipe.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{CarrierCode, PortalCredentials, ProgressUpdate};

    #[test]
    fn carrier_code_is_normalized() {
        assert_eq!(CarrierCode::new("  Progressive "), CarrierCode::new("progressive"));
        assert_eq!(CarrierCode::from("TRAVELERS").as_str(), "travelers");
    }

    #[test]
    fn redact_strips_password_username_and_mfa_code() {
        let credentials = PortalCredentials::new("agent.smith", "hunter2-secret").with_mfa_code("481516");
        let text = "login failed for agent.smith using hunter2-secret (mfa 481516)";

        let redacted = credentials.redact(text);

        assert!(!redacted.contains("agent.smith"));
        assert!(!redacted.contains("hunter2-secret"));
        assert!(!redacted.contains("481516"));
        assert!(redacted.starts_with("login failed for [redacted]"));
    }

    #[test]
    fn short_credentials_are_redacted_as_whole_words() {
        let credentials = PortalCredentials::new("jo", "7x");
        let text = "login failed for jo: password 7x rejected on the journey page";

        assert_eq!(
            credentials.redact(text),
            "login failed for [redacted]: password [redacted] rejected on the journey page"
        );
    }

    #[test]
    fn credentials_debug_does_not_leak_password() {
        let credentials = PortalCredentials::new("agent-login", "super-secret-password");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("super-secret-password"));
        assert!(!debug.contains("agent-login"));
    }

    #[test]
    fn progress_is_clamped_to_one_hundred() {
        assert_eq!(ProgressUpdate::new("done", 250).progress_pct, 100);
    }
}
