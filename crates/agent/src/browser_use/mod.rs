//! LLM-driven browser automation running as a Python subprocess.

pub mod protocol;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use autoquote_core::agent::{AgentBuilder, QuoteAgent};
use autoquote_core::carriers::{CarrierDirectory, CarrierProfile};
use autoquote_core::classifier::classify;
use autoquote_core::config::BrowserUseConfig;
use autoquote_core::domain::params::{Challenge, PortalCredentials, ProgressUpdate, QuoteExecutionParams};
use autoquote_core::domain::result::{QuoteData, QuoteError, QuoteErrorKind, QuoteResult};
use autoquote_core::domain::routing::AgentType;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extraction::quote_data_from_value;
use protocol::{parse_event, progress_percent, RunnerEvent, RunnerInput, RunnerReply};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Clone, Debug)]
pub struct BrowserUseSettings {
    pub python_bin: String,
    pub runner_script: PathBuf,
    pub headless: bool,
    pub interactive_challenges: bool,
    pub model: String,
    pub anthropic_api_key: Option<SecretString>,
}

impl From<&BrowserUseConfig> for BrowserUseSettings {
    fn from(config: &BrowserUseConfig) -> Self {
        Self {
            python_bin: config.python_bin.clone(),
            runner_script: config.runner_script.clone(),
            headless: config.headless,
            interactive_challenges: config.interactive_challenges,
            model: config.model.clone(),
            anthropic_api_key: config.anthropic_api_key.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum RunnerError {
    #[error("could not start browser automation runner `{program}`: {source}")]
    Spawn { program: String, source: std::io::Error },
    #[error("runner i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("runner protocol error: {0}")]
    Protocol(String),
    #[error("{0}")]
    Reported(String),
    #[error("runner exited with {status} before reporting a result{stderr}")]
    Exited { status: String, stderr: String },
    #[error("captcha challenge unresolved")]
    ChallengeUnresolved,
    #[error("quote automation cancelled")]
    Cancelled,
}

impl RunnerError {
    fn into_quote_error(self, credentials: &PortalCredentials) -> QuoteError {
        let message = credentials.redact(&self.to_string());
        match self {
            Self::Reported(_) | Self::Exited { .. } | Self::ChallengeUnresolved => classify(&message),
            Self::Spawn { .. } | Self::Io(_) | Self::Protocol(_) | Self::Cancelled => {
                QuoteError::from_kind(QuoteErrorKind::Unknown, message)
            }
        }
    }
}

pub struct BrowserUseAgent {
    settings: Arc<BrowserUseSettings>,
    carriers: Arc<CarrierDirectory>,
    cancel: CancellationToken,
}

impl BrowserUseAgent {
    pub fn new(settings: Arc<BrowserUseSettings>, carriers: Arc<CarrierDirectory>) -> Self {
        Self { settings, carriers, cancel: CancellationToken::new() }
    }

    fn command(&self, params: &QuoteExecutionParams, profile: &CarrierProfile) -> Command {
        let mut command = Command::new(&self.settings.python_bin);
        command
            .arg(&self.settings.runner_script)
            .arg("--carrier")
            .arg(params.carrier_code.as_str())
            .arg("--portal-url")
            .arg(&profile.portal_url);
        if !self.settings.headless {
            command.arg("--visible");
        }
        if self.settings.interactive_challenges {
            command.arg("--interactive-challenges");
        }

        command.env("BROWSER_USE_MODEL", &self.settings.model);
        if let Some(api_key) = &self.settings.anthropic_api_key {
            command.env("ANTHROPIC_API_KEY", api_key.expose_secret());
        }

        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        command
    }

    async fn run(
        &self,
        params: &QuoteExecutionParams,
        profile: &CarrierProfile,
    ) -> Result<QuoteData, RunnerError> {
        params.report("Starting browser automation", 1);

        let mut child = self.command(params, profile).spawn().map_err(|source| {
            RunnerError::Spawn { program: self.settings.python_bin.clone(), source }
        })?;
        let mut input = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Protocol("failed to capture runner stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Protocol("failed to capture runner stdout".into()))?;
        let stderr_tail = child.stderr.take().map(|stderr| tokio::spawn(tail_lines(stderr)));

        info!(
            event_name = "quote.browser_use.spawned",
            job_id = %params.job_id,
            carrier_code = %params.carrier_code,
            pid = child.id(),
            "browser automation runner started"
        );

        // The runner may exit before reading its input; the exit status is
        // the more useful diagnostic, so a failed write is only logged.
        if let Err(error) = write_line(&mut input, &RunnerInput::from_params(params)).await {
            debug!(job_id = %params.job_id, error = %error, "runner did not accept its input");
        }
        // Runners read stdin to EOF unless they opted into challenge answers.
        let mut replies = self.settings.interactive_challenges.then_some(input);

        let mut stdout = BufReader::new(stdout);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = child.start_kill();
                    return Err(RunnerError::Cancelled);
                }
                read = stdout.read_until(b'\n', &mut buffer) => read?,
            };
            if read == 0 {
                break;
            }

            let line = String::from_utf8_lossy(&buffer);
            let Some(event) = parse_event(&line) else {
                debug!(
                    job_id = %params.job_id,
                    line = %params.credentials.redact(&line),
                    "skipping non-protocol runner output"
                );
                continue;
            };

            match event {
                RunnerEvent::Progress { step, progress, screenshot, .. } => {
                    params.progress.report(
                        ProgressUpdate::new(step, progress_percent(progress)).with_screenshot(screenshot),
                    );
                }
                RunnerEvent::Challenge { kind, prompt, screenshot } => {
                    info!(
                        event_name = "quote.challenge.raised",
                        job_id = %params.job_id,
                        kind = %kind,
                        "runner is waiting on a human challenge"
                    );
                    let Some(stdin) = replies.as_mut() else {
                        warn!(
                            job_id = %params.job_id,
                            "runner raised a challenge without the interactive channel"
                        );
                        let _ = child.start_kill();
                        return Err(RunnerError::ChallengeUnresolved);
                    };
                    let challenge = Challenge { kind, prompt, screenshot };
                    let token = tokio::select! {
                        _ = self.cancel.cancelled() => {
                            let _ = child.start_kill();
                            return Err(RunnerError::Cancelled);
                        }
                        token = params.challenges.resolve(challenge) => token,
                    };
                    let Some(token) = token else {
                        let _ = child.start_kill();
                        return Err(RunnerError::ChallengeUnresolved);
                    };
                    if let Err(error) =
                        write_line(stdin, &RunnerReply::ChallengeResponse { token: &token }).await
                    {
                        warn!(job_id = %params.job_id, error = %error, "could not deliver challenge response");
                    }
                }
                RunnerEvent::Result { success: true, data, .. } => {
                    let data = data.ok_or_else(|| {
                        RunnerError::Protocol("runner reported success without quote data".into())
                    })?;
                    return Ok(quote_data_from_value(&data));
                }
                RunnerEvent::Result { success: false, error, .. } => {
                    return Err(RunnerError::Reported(
                        error.unwrap_or_else(|| "runner reported failure without a message".into()),
                    ));
                }
            }
        }

        drop(replies);
        let status = child.wait().await?;
        let stderr = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = if stderr.is_empty() { stderr } else { format!("; stderr: {stderr}") };
        Err(RunnerError::Exited { status: status.to_string(), stderr })
    }
}

#[async_trait]
impl QuoteAgent for BrowserUseAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::BrowserUse
    }

    async fn execute_quote(&self, params: &QuoteExecutionParams) -> QuoteResult {
        let started = Instant::now();
        let outcome = match self.carriers.get(&params.carrier_code) {
            Some(profile) => {
                self.run(params, profile).await.map_err(|error| error.into_quote_error(&params.credentials))
            }
            None => Err(QuoteError::from_kind(
                QuoteErrorKind::Unknown,
                format!("unsupported carrier `{}` for browser automation", params.carrier_code),
            )),
        };

        match outcome {
            Ok(data) => {
                params.report("Quote extraction complete", 100);
                QuoteResult::success(AgentType::BrowserUse, data, started.elapsed())
            }
            Err(error) => {
                warn!(
                    event_name = "quote.browser_use.failed",
                    job_id = %params.job_id,
                    carrier_code = %params.carrier_code,
                    error_kind = %error.kind(),
                    "browser automation attempt failed"
                );
                QuoteResult::failure(AgentType::BrowserUse, error, started.elapsed())
            }
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct BrowserUseBuilder {
    settings: Arc<BrowserUseSettings>,
    carriers: Arc<CarrierDirectory>,
}

impl BrowserUseBuilder {
    pub fn new(settings: BrowserUseSettings, carriers: Arc<CarrierDirectory>) -> Self {
        Self { settings: Arc::new(settings), carriers }
    }
}

impl AgentBuilder for BrowserUseBuilder {
    fn build(&self) -> Arc<dyn QuoteAgent> {
        Arc::new(BrowserUseAgent::new(self.settings.clone(), self.carriers.clone()))
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

async fn tail_lines<R>(reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    while let Ok(read) = reader.read_until(b'\n', &mut buffer).await {
        if read == 0 {
            break;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&buffer).trim_end().to_string());
        buffer.clear();
    }
    Vec::from(tail).join("\n")
}
