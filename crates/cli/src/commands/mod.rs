pub mod config;
pub mod doctor;
pub mod migrate;
pub mod report;
pub mod route;
pub mod run;

use autoquote_core::config::{AppConfig, LoadOptions};
use autoquote_db::{connect_with_settings, migrations, DbPool};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Classified command failure: `error_class` goes into the envelope and
/// `exit_code` becomes the process status.
#[derive(Debug)]
pub struct Failure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl Failure {
    pub fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, self.exit_code)
    }
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::failure_with_data(command, error_class, message, exit_code, None)
    }

    pub fn failure_with_data(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config() -> Result<AppConfig, Failure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        Failure::new("config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn current_thread_runtime() -> Result<tokio::runtime::Runtime, Failure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        Failure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    })
}

/// Connects with the configured pool settings and applies pending
/// migrations so read commands work against a fresh database.
pub(crate) async fn open_database(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;

    migrations::run_pending(&pool)
        .await
        .map_err(|error| Failure::new("migration", error.to_string(), 5))?;

    Ok(pool)
}
