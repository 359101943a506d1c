//! Vision-based RPA service reached over REST: submit a task, then poll it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autoquote_core::agent::{AgentBuilder, QuoteAgent};
use autoquote_core::carriers::{CarrierDirectory, CarrierProfile};
use autoquote_core::classifier::classify;
use autoquote_core::config::SkyvernConfig;
use autoquote_core::domain::params::{Challenge, PortalCredentials, ProgressUpdate, QuoteExecutionParams};
use autoquote_core::domain::result::{QuoteData, QuoteError, QuoteErrorKind, QuoteResult};
use autoquote_core::domain::routing::AgentType;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::extraction::quote_data_from_value;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Debug)]
pub struct SkyvernSettings {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl From<&SkyvernConfig> for SkyvernSettings {
    fn from(config: &SkyvernConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

impl SkyvernSettings {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Error)]
enum SkyvernError {
    #[error("skyvern api key is not configured")]
    NotConfigured,
    #[error("skyvern request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("skyvern api returned HTTP {status}")]
    Status { status: u16 },
    #[error("unexpected skyvern response: {0}")]
    Decode(String),
    #[error("{0}")]
    TaskFailed(String),
    #[error("skyvern task timed out")]
    TimedOut,
    #[error("skyvern task completed without extracted quote data")]
    MissingData,
    #[error("captcha challenge unresolved")]
    ChallengeUnresolved,
    #[error("quote automation cancelled")]
    Cancelled,
}

impl SkyvernError {
    fn into_quote_error(self, credentials: &PortalCredentials) -> QuoteError {
        let message = credentials.redact(&self.to_string());
        let kind = match &self {
            Self::Transport(_) => QuoteErrorKind::PortalUnavailable,
            Self::Status { status } if *status >= 500 => QuoteErrorKind::PortalUnavailable,
            Self::TimedOut => QuoteErrorKind::Timeout,
            Self::TaskFailed(_) | Self::ChallengeUnresolved => return classify(&message),
            Self::NotConfigured
            | Self::Status { .. }
            | Self::Decode(_)
            | Self::MissingData
            | Self::Cancelled => QuoteErrorKind::Unknown,
        };
        QuoteError::from_kind(kind, message)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    task_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaskStatus {
    Created,
    Queued,
    Running,
    WaitingForInput,
    Completed,
    Failed,
    Terminated,
    TimedOut,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    status: TaskStatus,
    #[serde(default)]
    steps_completed: Option<u32>,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    extracted_information: Option<Value>,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    challenge: Option<TaskChallenge>,
    #[serde(default)]
    screenshot_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskChallenge {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    screenshot_url: Option<String>,
}

pub struct SkyvernAgent {
    client: Client,
    settings: Arc<SkyvernSettings>,
    carriers: Arc<CarrierDirectory>,
    cancel: CancellationToken,
    /// Remote task still running on the service, if any.
    live_task: Mutex<Option<String>>,
    background: TaskTracker,
}

impl SkyvernAgent {
    pub fn new(
        client: Client,
        settings: Arc<SkyvernSettings>,
        carriers: Arc<CarrierDirectory>,
        background: TaskTracker,
    ) -> Self {
        Self {
            client,
            settings,
            carriers,
            cancel: CancellationToken::new(),
            live_task: Mutex::new(None),
            background,
        }
    }

    fn live_task(&self) -> MutexGuard<'_, Option<String>> {
        match self.live_task.lock() {
            Ok(task) => task,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stops the remote task if it is still live. Runs at most once per task.
    fn abandon_task(&self) {
        let task_id = self.live_task().take();
        if let Some(task_id) = task_id {
            self.cancel_remote(task_id);
        }
    }

    fn api_key(&self) -> Result<&SecretString, SkyvernError> {
        self.settings.api_key.as_ref().ok_or(SkyvernError::NotConfigured)
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, SkyvernError> {
        let response = request
            .header(API_KEY_HEADER, self.api_key()?.expose_secret())
            .send()
            .await
            .map_err(SkyvernError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SkyvernError::Status { status: status.as_u16() });
        }
        Ok(response)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SkyvernError> {
        self.dispatch(request)
            .await?
            .json::<T>()
            .await
            .map_err(|error| SkyvernError::Decode(error.to_string()))
    }

    async fn create_task(
        &self,
        params: &QuoteExecutionParams,
        profile: &CarrierProfile,
    ) -> Result<String, SkyvernError> {
        let credentials = &params.credentials;
        let body = json!({
            "url": profile.portal_url,
            "navigation_goal": format!(
                "Log in to the {} agent portal with the credentials in the payload, start a new \
                 quote for the client described in the payload, complete every required page \
                 and stop on the quote summary page.",
                profile.display_name
            ),
            "data_extraction_goal": "Extract premiumAnnual, premiumMonthly, coverages, \
                 deductibles and referenceId from the quote summary page.",
            "navigation_payload": {
                "session_id": params.job_id.as_str(),
                "carrier_code": params.carrier_code.as_str(),
                "client_data": params.client_data,
                "credentials": {
                    "username": credentials.username,
                    "password": credentials.password.expose_secret(),
                    "mfa_code": credentials.mfa_code.as_ref().map(|code| code.expose_secret()),
                },
                "recipe": params.recipe,
            },
        });

        let created: CreatedTask =
            self.send(self.client.post(self.settings.endpoint("tasks")).json(&body)).await?;
        Ok(created.task_id)
    }

    async fn fetch_task(&self, task_id: &str) -> Result<TaskState, SkyvernError> {
        self.send(self.client.get(self.settings.endpoint(&format!("tasks/{task_id}")))).await
    }

    async fn answer_challenge(&self, task_id: &str, token: &str) -> Result<(), SkyvernError> {
        let url = self.settings.endpoint(&format!("tasks/{task_id}/challenge"));
        self.dispatch(self.client.post(url).json(&json!({ "token": token }))).await.map(|_| ())
    }

    /// Best effort: the request runs on the shared background tracker so
    /// `cancel` callers never wait on the network.
    fn cancel_remote(&self, task_id: String) {
        let Ok(api_key) = self.api_key() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(task_id = %task_id, "no runtime to send skyvern task cancel on");
            return;
        };
        let request = self
            .client
            .post(self.settings.endpoint(&format!("tasks/{task_id}/cancel")))
            .header(API_KEY_HEADER, api_key.expose_secret());
        self.background.spawn_on(
            async move {
                match request.send().await {
                    Ok(response) => {
                        info!(
                            event_name = "quote.skyvern.task_cancelled",
                            task_id = %task_id,
                            status = %response.status(),
                            "skyvern task cancel sent"
                        )
                    }
                    Err(error) => warn!(task_id = %task_id, error = %error, "skyvern task cancel failed"),
                }
            },
            &runtime,
        );
    }

    async fn pause(&self) -> Result<(), SkyvernError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SkyvernError::Cancelled),
            _ = tokio::time::sleep(self.settings.poll_interval) => Ok(()),
        }
    }

    async fn run(
        &self,
        params: &QuoteExecutionParams,
        profile: &CarrierProfile,
    ) -> Result<QuoteData, SkyvernError> {
        self.api_key()?;
        params.report("Submitting task to Skyvern", 1);

        let task_id = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SkyvernError::Cancelled),
            created = self.create_task(params, profile) => created?,
        };
        *self.live_task() = Some(task_id.clone());
        if self.cancel.is_cancelled() {
            return Err(SkyvernError::Cancelled);
        }
        info!(
            event_name = "quote.skyvern.task_created",
            job_id = %params.job_id,
            carrier_code = %params.carrier_code,
            task_id = %task_id,
            "skyvern task submitted"
        );

        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SkyvernError::Cancelled),
                task = self.fetch_task(&task_id) => task?,
            };

            match task.status {
                TaskStatus::Created | TaskStatus::Queued => {
                    params.report("Waiting for Skyvern worker", 5);
                }
                TaskStatus::Running => {
                    let step = task.current_step.unwrap_or_else(|| "Working in carrier portal".to_string());
                    params.progress.report(
                        ProgressUpdate::new(step, running_progress(task.steps_completed))
                            .with_screenshot(task.screenshot_url),
                    );
                }
                TaskStatus::WaitingForInput => {
                    if let Some(challenge) = task.challenge {
                        let challenge = Challenge {
                            kind: challenge.kind.unwrap_or_else(|| "captcha".to_string()),
                            prompt: challenge.prompt.unwrap_or_default(),
                            screenshot: challenge.screenshot_url,
                        };
                        info!(
                            event_name = "quote.challenge.raised",
                            job_id = %params.job_id,
                            kind = %challenge.kind,
                            task_id = %task_id,
                            "skyvern task is waiting on a human challenge"
                        );
                        let token = tokio::select! {
                            _ = self.cancel.cancelled() => return Err(SkyvernError::Cancelled),
                            token = params.challenges.resolve(challenge) => token,
                        };
                        let Some(token) = token else {
                            return Err(SkyvernError::ChallengeUnresolved);
                        };
                        self.answer_challenge(&task_id, &token).await?;
                    }
                }
                TaskStatus::Completed => {
                    self.live_task().take();
                    let extracted = task.extracted_information.ok_or(SkyvernError::MissingData)?;
                    return Ok(quote_data_from_value(&extracted));
                }
                TaskStatus::Failed | TaskStatus::Terminated => {
                    self.live_task().take();
                    return Err(SkyvernError::TaskFailed(
                        task.failure_reason.unwrap_or_else(|| "skyvern task failed without a reason".to_string()),
                    ));
                }
                TaskStatus::TimedOut => {
                    self.live_task().take();
                    return Err(SkyvernError::TimedOut);
                }
                TaskStatus::Unrecognized => {
                    debug!(task_id = %task_id, "ignoring unrecognized skyvern task status");
                }
            }

            self.pause().await?;
        }
    }
}

fn running_progress(steps_completed: Option<u32>) -> u8 {
    let steps = steps_completed.unwrap_or(0).min(17) as u8;
    10 + steps * 5
}

#[async_trait]
impl QuoteAgent for SkyvernAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Skyvern
    }

    async fn execute_quote(&self, params: &QuoteExecutionParams) -> QuoteResult {
        let started = Instant::now();
        let outcome = match self.carriers.get(&params.carrier_code) {
            Some(profile) => {
                let outcome = self.run(params, profile).await;
                // Any early exit leaves the remote task running otherwise.
                self.abandon_task();
                outcome.map_err(|error| error.into_quote_error(&params.credentials))
            }
            None => Err(QuoteError::from_kind(
                QuoteErrorKind::Unknown,
                format!("unsupported carrier `{}` for skyvern", params.carrier_code),
            )),
        };

        match outcome {
            Ok(data) => {
                params.report("Quote extraction complete", 100);
                QuoteResult::success(AgentType::Skyvern, data, started.elapsed())
            }
            Err(error) => {
                warn!(
                    event_name = "quote.skyvern.failed",
                    job_id = %params.job_id,
                    carrier_code = %params.carrier_code,
                    error_kind = %error.kind(),
                    "skyvern attempt failed"
                );
                QuoteResult::failure(AgentType::Skyvern, error, started.elapsed())
            }
        }
    }

    /// Also stops the remote task directly, since the caller may already
    /// have dropped the `execute_quote` future.
    fn cancel(&self) {
        self.cancel.cancel();
        self.abandon_task();
    }
}

#[derive(Clone)]
pub struct SkyvernBuilder {
    client: Client,
    settings: Arc<SkyvernSettings>,
    carriers: Arc<CarrierDirectory>,
    background: TaskTracker,
}

impl SkyvernBuilder {
    pub fn new(settings: SkyvernSettings, carriers: Arc<CarrierDirectory>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, settings: Arc::new(settings), carriers, background: TaskTracker::new() })
    }

    /// Remote cancel requests still in flight for agents built here.
    pub fn background(&self) -> TaskTracker {
        self.background.clone()
    }
}

impl AgentBuilder for SkyvernBuilder {
    fn build(&self) -> Arc<dyn QuoteAgent> {
        Arc::new(SkyvernAgent::new(
            self.client.clone(),
            self.settings.clone(),
            self.carriers.clone(),
            self.background.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use autoquote_core::agent::AgentBuilder;
    use autoquote_core::carriers::CarrierDirectory;
    use autoquote_core::domain::params::{
        Challenge, ChallengeResolver, JobId, PortalCredentials, ProgressSink, ProgressUpdate,
        QuoteExecutionParams,
    };
    use autoquote_core::domain::result::QuoteErrorKind;
    use autoquote_core::domain::routing::AgentType;
    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{running_progress, SkyvernBuilder, SkyvernSettings};

    #[derive(Default)]
    struct RecordingProgress {
        updates: Mutex<Vec<ProgressUpdate>>,
    }

    impl ProgressSink for RecordingProgress {
        fn report(&self, update: ProgressUpdate) {
            self.updates.lock().expect("progress lock").push(update);
        }
    }

    struct FixedAnswer(Option<&'static str>);

    #[async_trait]
    impl ChallengeResolver for FixedAnswer {
        async fn resolve(&self, _challenge: Challenge) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn builder(base_url: &str) -> SkyvernBuilder {
        SkyvernBuilder::new(
            SkyvernSettings {
                base_url: base_url.to_string(),
                api_key: Some("sk-test".to_string().into()),
                poll_interval: Duration::from_millis(10),
                request_timeout: Duration::from_secs(5),
            },
            Arc::new(CarrierDirectory::default()),
        )
        .expect("http client")
    }

    fn params() -> QuoteExecutionParams {
        QuoteExecutionParams::new(
            JobId("job-sky-1".to_string()),
            "travelers",
            json!({ "personal": { "firstName": "Dana" } }),
            PortalCredentials::new("agent-dana", "pw-hunter22"),
        )
    }

    async fn mount_created(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks"))
            .and(header("x-api-key", "sk-test"))
            .and(body_partial_json(json!({ "url": "https://agent.travelers.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task_id": "tsk_1" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn completed_task_yields_quote_data() {
        let server = MockServer::start().await;
        mount_created(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "queued" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "running", "steps_completed": 3, "current_step": "Filling vehicle page"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "extracted_information": {
                    "premium_annual": 1200.0,
                    "coverages": { "dwelling": "350000" },
                    "reference_id": "TRV-1"
                }
            })))
            .mount(&server)
            .await;
        let progress = Arc::new(RecordingProgress::default());

        let result =
            builder(&server.uri()).build().execute_quote(&params().with_progress(progress.clone())).await;

        assert!(result.is_success(), "unexpected failure: {:?}", result.error());
        assert_eq!(result.agent_type, AgentType::Skyvern);
        let data = result.data().expect("quote data");
        assert_eq!(data.premium_monthly, Some(Decimal::new(10_000, 2)));
        assert_eq!(data.reference_id.as_deref(), Some("TRV-1"));

        let steps: Vec<String> = progress
            .updates
            .lock()
            .expect("progress lock")
            .iter()
            .map(|update| update.current_step.clone())
            .collect();
        assert!(steps.contains(&"Filling vehicle page".to_string()));
    }

    #[tokio::test]
    async fn failed_task_reason_is_classified() {
        let server = MockServer::start().await;
        mount_created(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "failed", "failure_reason": "Element not found: #garaging-zip"
            })))
            .mount(&server)
            .await;

        let result = builder(&server.uri()).build().execute_quote(&params()).await;

        let error = result.error().expect("failure");
        assert_eq!(error.kind(), QuoteErrorKind::FormChanged);
        assert!(error.recoverable());
    }

    #[tokio::test]
    async fn server_errors_are_portal_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = builder(&server.uri()).build().execute_quote(&params()).await;

        assert_eq!(result.error().map(|e| e.kind()), Some(QuoteErrorKind::PortalUnavailable));
    }

    #[tokio::test]
    async fn client_errors_are_unknown_not_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = builder(&server.uri()).build().execute_quote(&params()).await;

        let error = result.error().expect("failure");
        assert_eq!(error.kind(), QuoteErrorKind::Unknown);
        assert!(error.message().contains("401"));
    }

    #[tokio::test]
    async fn unreachable_service_is_portal_unavailable() {
        let result = builder("http://127.0.0.1:9").build().execute_quote(&params()).await;

        let error = result.error().expect("failure");
        assert_eq!(error.kind(), QuoteErrorKind::PortalUnavailable);
        assert!(error.recoverable());
    }

    #[tokio::test]
    async fn timed_out_task_is_a_timeout() {
        let server = MockServer::start().await;
        mount_created(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "timed_out" })))
            .mount(&server)
            .await;

        let result = builder(&server.uri()).build().execute_quote(&params()).await;

        assert_eq!(result.error().map(|e| e.kind()), Some(QuoteErrorKind::Timeout));
    }

    #[tokio::test]
    async fn challenge_token_is_posted_back() {
        let server = MockServer::start().await;
        mount_created(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "waiting_for_input",
                "challenge": { "kind": "captcha", "prompt": "Solve the puzzle" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks/tsk_1/challenge"))
            .and(body_partial_json(json!({ "token": "tok-9" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accepted": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed", "extracted_information": { "premiumAnnual": 960 }
            })))
            .mount(&server)
            .await;

        let params = params().with_challenges(Arc::new(FixedAnswer(Some("tok-9"))));
        let result = builder(&server.uri()).build().execute_quote(&params).await;

        assert!(result.is_success(), "unexpected failure: {:?}", result.error());
    }

    #[tokio::test]
    async fn unresolved_challenge_fails_as_captcha() {
        let server = MockServer::start().await;
        mount_created(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "waiting_for_input",
                "challenge": { "kind": "captcha" }
            })))
            .mount(&server)
            .await;

        let result = builder(&server.uri()).build().execute_quote(&params()).await;

        assert_eq!(result.error().map(|e| e.kind()), Some(QuoteErrorKind::CaptchaFailed));
    }

    #[tokio::test]
    async fn cancel_stops_polling_and_cancels_remote_task() {
        let server = MockServer::start().await;
        mount_created(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/tsk_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "running" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks/tsk_1/cancel"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let agent = builder(&server.uri()).build();
        let canceller = agent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), agent.execute_quote(&params()))
            .await
            .expect("cancel should end polling");
        assert!(!result.is_success());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let requests = server.received_requests().await.unwrap_or_default();
        assert!(requests.iter().any(|request| request.url.path() == "/api/v1/tasks/tsk_1/cancel"));
    }

    #[test]
    fn running_progress_stays_below_completion() {
        assert_eq!(running_progress(None), 10);
        assert_eq!(running_progress(Some(2)), 20);
        assert_eq!(running_progress(Some(500)), 95);
    }
}
