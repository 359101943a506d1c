//! JSON-lines protocol spoken with the browser automation runner.
//!
//! One input object goes to stdin; stdout carries a stream of events ending in
//! a single `result`. Lines that are not protocol events are ignored.

use autoquote_core::domain::params::QuoteExecutionParams;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInput<'a> {
    pub session_id: &'a str,
    pub carrier_code: &'a str,
    pub credentials: RunnerCredentials<'a>,
    pub client_data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub mfa_code: Option<&'a str>,
}

impl<'a> RunnerInput<'a> {
    pub fn from_params(params: &'a QuoteExecutionParams) -> Self {
        let credentials = &params.credentials;
        Self {
            session_id: params.job_id.as_str(),
            carrier_code: params.carrier_code.as_str(),
            credentials: RunnerCredentials {
                username: &credentials.username,
                password: credentials.password.expose_secret(),
                mfa_code: credentials.mfa_code.as_ref().map(|code| code.expose_secret()),
            },
            client_data: &params.client_data,
            recipe: params.recipe.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    Progress {
        step: String,
        #[serde(default)]
        progress: f64,
        #[serde(default)]
        screenshot: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Challenge {
        #[serde(default = "default_challenge_kind")]
        kind: String,
        #[serde(default)]
        prompt: String,
        #[serde(default)]
        screenshot: Option<String>,
    },
    Result {
        success: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerReply<'a> {
    ChallengeResponse { token: &'a str },
}

fn default_challenge_kind() -> String {
    "captcha".to_string()
}

/// `None` for blank lines and anything that is not a protocol event.
pub fn parse_event(line: &str) -> Option<RunnerEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub fn progress_percent(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use autoquote_core::domain::params::{JobId, PortalCredentials, QuoteExecutionParams};
    use serde_json::json;

    use super::{parse_event, progress_percent, RunnerEvent, RunnerInput, RunnerReply};

    #[test]
    fn parses_each_event_type() {
        let progress = parse_event(r#"{"type":"progress","step":"Filling quote form","progress":50,"timestamp":"2026-01-01T00:00:00"}"#);
        assert!(matches!(progress, Some(RunnerEvent::Progress { ref step, progress, .. }) if step == "Filling quote form" && progress == 50.0));

        let challenge = parse_event(r#"{"type":"challenge","kind":"mfa","prompt":"Enter the code"}"#);
        assert!(matches!(challenge, Some(RunnerEvent::Challenge { ref kind, .. }) if kind == "mfa"));

        let result = parse_event(r#"{"type":"result","success":false,"error":"timeout: page load"}"#);
        assert_eq!(
            result,
            Some(RunnerEvent::Result {
                success: false,
                data: None,
                error: Some("timeout: page load".to_string())
            })
        );
    }

    #[test]
    fn non_protocol_lines_are_skipped() {
        assert_eq!(parse_event("INFO     [agent] step 3"), None);
        assert_eq!(parse_event(""), None);
        assert_eq!(parse_event(r#"{"type":"telemetry","value":1}"#), None);
        assert_eq!(parse_event("{not json"), None);
    }

    #[test]
    fn input_uses_runner_field_names() {
        let params = QuoteExecutionParams::new(
            JobId("job-42".to_string()),
            "progressive",
            json!({ "personal": { "firstName": "Dana" } }),
            PortalCredentials::new("agent-dana", "pw-123").with_mfa_code("999111"),
        );

        let encoded = serde_json::to_value(RunnerInput::from_params(&params)).expect("encode input");

        assert_eq!(encoded["sessionId"], "job-42");
        assert_eq!(encoded["carrierCode"], "progressive");
        assert_eq!(encoded["credentials"]["mfaCode"], "999111");
        assert_eq!(encoded["clientData"]["personal"]["firstName"], "Dana");
        assert!(encoded.get("recipe").is_none());
    }

    #[test]
    fn challenge_reply_is_tagged() {
        let reply = serde_json::to_string(&RunnerReply::ChallengeResponse { token: "tok-1" })
            .expect("encode reply");
        assert_eq!(reply, r#"{"type":"challenge_response","token":"tok-1"}"#);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_percent(-4.0), 0);
        assert_eq!(progress_percent(49.6), 50);
        assert_eq!(progress_percent(400.0), 100);
    }
}
