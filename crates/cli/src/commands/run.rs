use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use autoquote_core::domain::params::{JobId, PortalCredentials, QuoteExecutionParams};
use autoquote_core::domain::result::QuoteResult;
use autoquote_core::domain::routing::AgentType;
use autoquote_core::errors::FactoryError;
use autoquote_core::factory::{AgentFactory, ExecutionOptions, ThreadRngSampler};
use autoquote_db::{AssignmentWriter, SqlAssignmentRepository};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::commands::{current_thread_runtime, load_config, open_database, CommandResult, Failure};
use crate::logging;

pub const EXIT_QUOTE_FAILED: u8 = 7;
pub const EXIT_CANCELLED: u8 = 130;

const CLEANUP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub carrier: String,
    pub input: PathBuf,
    pub agent: Option<String>,
    pub job_id: Option<String>,
}

#[derive(Debug, PartialEq)]
struct JobInput {
    client_data: Value,
    recipe: Option<Value>,
}

pub fn run(args: RunArgs) -> CommandResult {
    match execute(args) {
        Ok(result) => result,
        Err(failure) => failure.into_result("run"),
    }
}

fn execute(args: RunArgs) -> Result<CommandResult, Failure> {
    let config = load_config()?;
    logging::init(&config);

    let forced_agent = args
        .agent
        .as_deref()
        .map(str::parse::<AgentType>)
        .transpose()
        .map_err(|error| Failure::new("invalid_argument", error.to_string(), 6))?;
    let job = load_job(&args.input)
        .map_err(|error| Failure::new("invalid_input", format!("{error:#}"), 6))?;
    let credentials = credentials_from_env()?;
    let backends = autoquote_agent::backends_from_config(&config)
        .map_err(|error| Failure::new("agent_init", error.to_string(), 3))?;

    let job_id = args.job_id.map(JobId).unwrap_or_else(JobId::generate);
    let mut params = QuoteExecutionParams::new(job_id, args.carrier, job.client_data, credentials);
    if let Some(recipe) = job.recipe {
        params = params.with_recipe(recipe);
    }

    let runtime = current_thread_runtime()?;
    runtime.block_on(async move {
        let pool = open_database(&config).await?;
        let repository = Arc::new(SqlAssignmentRepository::new(pool.clone()));
        let (writer, drain) =
            AssignmentWriter::spawn(repository, config.execution.assignment_buffer);
        let factory = AgentFactory::new(
            config.routing_table(),
            backends.builders.clone(),
            Arc::new(ThreadRngSampler),
            Arc::new(writer),
            config.factory_settings(),
        );

        let cancellation = CancellationToken::new();
        let interrupt = tokio::spawn({
            let cancellation = cancellation.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(event_name = "quote.run.interrupted", "interrupt received, cancelling job");
                    cancellation.cancel();
                }
            }
        });

        let mut options = ExecutionOptions::default().with_cancellation(cancellation);
        if let Some(agent_type) = forced_agent {
            options = options.with_forced_agent(agent_type);
        }

        let outcome = factory.execute_with_fallback(&params, options).await;
        interrupt.abort();
        // Remote cancels of timed-out or interrupted attempts must leave
        // before the runtime goes away.
        backends.settle(CLEANUP_GRACE).await;

        // The writer's drain task ends once the factory's handle is gone.
        drop(factory);
        if let Err(error) = drain.await {
            warn!(
                event_name = "quote.assignment.drain_failed",
                job_id = %params.job_id,
                error = %error,
                "assignment writer did not shut down cleanly"
            );
        }
        pool.close().await;

        Ok::<CommandResult, Failure>(render(&params.job_id, outcome))
    })
}

fn render(job_id: &JobId, outcome: Result<QuoteResult, FactoryError>) -> CommandResult {
    match outcome {
        Ok(result) => {
            let data = serde_json::to_value(&result).ok();
            match result.error() {
                None => CommandResult::success_with_data(
                    "run",
                    format!("quote {job_id} completed by {}", result.agent_type),
                    data,
                ),
                Some(error) => CommandResult::failure_with_data(
                    "run",
                    &error.kind().as_str().to_ascii_lowercase(),
                    format!("quote {job_id} failed on {}: {}", result.agent_type, error.message()),
                    EXIT_QUOTE_FAILED,
                    data,
                ),
            }
        }
        Err(error) => CommandResult::failure(
            "run",
            error.error_class(),
            format!("{error}. {}", error.user_message()),
            EXIT_CANCELLED,
        ),
    }
}

/// Accepts either `{ "clientData": {...}, "recipe": {...} }` or a bare
/// client data object.
fn load_job(path: &Path) -> anyhow::Result<JobInput> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read job input `{}`", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("job input `{}` is not valid JSON", path.display()))?;
    let Value::Object(mut fields) = value else {
        bail!("job input `{}` must be a JSON object", path.display());
    };

    let client_data = fields.remove("clientData").or_else(|| fields.remove("client_data"));
    Ok(match client_data {
        Some(client_data) => JobInput { client_data, recipe: fields.remove("recipe") },
        None => JobInput { client_data: Value::Object(fields), recipe: None },
    })
}

fn credentials_from_env() -> Result<PortalCredentials, Failure> {
    let username = required_env("AUTOQUOTE_PORTAL_USERNAME")?;
    let password = required_env("AUTOQUOTE_PORTAL_PASSWORD")?;
    let credentials = PortalCredentials::new(username, password);

    Ok(match optional_env("AUTOQUOTE_PORTAL_MFA_CODE") {
        Some(code) => credentials.with_mfa_code(code),
        None => credentials,
    })
}

fn required_env(key: &str) -> Result<String, Failure> {
    optional_env(key)
        .ok_or_else(|| Failure::new("credentials", format!("{key} must be set to run a job"), 6))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::{load_job, JobInput};

    #[test]
    fn wrapped_input_keeps_recipe() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("job.json");
        fs::write(
            &path,
            r#"{"clientData":{"personal":{"firstName":"Dana"}},"recipe":{"steps":["login"]}}"#,
        )
        .expect("write job");

        let job = load_job(&path).expect("load job");
        assert_eq!(
            job,
            JobInput {
                client_data: json!({ "personal": { "firstName": "Dana" } }),
                recipe: Some(json!({ "steps": ["login"] })),
            }
        );
    }

    #[test]
    fn bare_object_is_client_data() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("job.json");
        fs::write(&path, r#"{"vehicles":[{"vin":"1HGCM82633A004352"}]}"#).expect("write job");

        let job = load_job(&path).expect("load job");
        assert_eq!(job.client_data["vehicles"][0]["vin"], "1HGCM82633A004352");
        assert_eq!(job.recipe, None);
    }

    #[test]
    fn non_object_input_is_rejected_with_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("job.json");
        fs::write(&path, "[1, 2, 3]").expect("write job");

        let error = load_job(&path).expect_err("array input should fail");
        assert!(error.to_string().contains("must be a JSON object"));
    }
}
