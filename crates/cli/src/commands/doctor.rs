use autoquote_core::config::{AppConfig, LoadOptions};
use autoquote_core::domain::routing::AgentType;
use autoquote_db::connect_with_settings;
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["runner_interpreter", "runner_script", "skyvern_readiness", "database_connectivity"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_runner_interpreter(&config));
            checks.push(check_runner_script(&config));
            checks.push(check_skyvern_readiness(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in DEPENDENT_CHECKS {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    // Skipped checks do not fail the report on their own.
    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn browser_use_routed(config: &AppConfig) -> bool {
    config.routing_table().referenced_agents().contains(&AgentType::BrowserUse)
}

fn check_runner_interpreter(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "runner_interpreter";
    if !browser_use_routed(config) {
        return DoctorCheck::skipped(NAME, "browser_use is not referenced by routing");
    }

    match which::which(&config.browser_use.python_bin) {
        Ok(path) => DoctorCheck::pass(NAME, format!("found `{}`", path.display())),
        Err(error) => DoctorCheck::fail(
            NAME,
            format!("`{}` not found on PATH: {error}", config.browser_use.python_bin),
        ),
    }
}

fn check_runner_script(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "runner_script";
    if !browser_use_routed(config) {
        return DoctorCheck::skipped(NAME, "browser_use is not referenced by routing");
    }

    let script = &config.browser_use.runner_script;
    if script.is_file() {
        DoctorCheck::pass(NAME, format!("runner script present at `{}`", script.display()))
    } else {
        DoctorCheck::fail(NAME, format!("runner script missing at `{}`", script.display()))
    }
}

fn check_skyvern_readiness(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "skyvern_readiness";
    if !config.routing_table().referenced_agents().contains(&AgentType::Skyvern) {
        return DoctorCheck::skipped(NAME, "skyvern is not referenced by routing");
    }

    match &config.skyvern.api_key {
        Some(key) if !key.expose_secret().trim().is_empty() => DoctorCheck::pass(
            NAME,
            format!("api key configured for `{}`", config.skyvern.base_url),
        ),
        _ => DoctorCheck::fail(NAME, "skyvern.api_key is not set"),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    const NAME: &str = "database_connectivity";
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(NAME, format!("failed to initialize async runtime: {error}"));
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::pass(NAME, format!("connected using `{}`", config.database.url)),
        Err(error) => DoctorCheck::fail(NAME, error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
