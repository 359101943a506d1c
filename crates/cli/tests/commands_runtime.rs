use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use autoquote_cli::commands::{config, doctor, migrate, report, route, run};
use serde_json::Value;
use tempfile::TempDir;

const SKYVERN_KEY: (&str, &str) = ("AUTOQUOTE_SKYVERN_API_KEY", "sk-test");

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[SKYVERN_KEY, ("AUTOQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied 1 pending migration(s)");
    });
}

#[test]
fn migrate_returns_config_failure_without_skyvern_key() {
    with_env(&[("AUTOQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("skyvern.api_key"));
    });
}

#[test]
fn config_output_redacts_secrets_and_names_sources() {
    with_env(&[("AUTOQUOTE_SKYVERN_API_KEY", "sk-very-secret")], || {
        let output = config::run();

        assert!(output.contains("- skyvern.api_key = <redacted> (source: env (AUTOQUOTE_SKYVERN_API_KEY))"));
        assert!(output.contains("- routing.default.primary_agent = browser_use (source: default)"));
        assert!(!output.contains("sk-very-secret"));
    });
}

#[test]
fn doctor_json_reports_each_check() {
    let workspace = TempDir::new().expect("temp dir");
    let script = write_runner(workspace.path(), SUCCESS_RUNNER);
    let database_url = sqlite_url(workspace.path());

    with_env(
        &[
            SKYVERN_KEY,
            ("AUTOQUOTE_DATABASE_URL", &database_url),
            ("AUTOQUOTE_BROWSER_USE_PYTHON_BIN", "sh"),
            ("AUTOQUOTE_BROWSER_USE_RUNNER_SCRIPT", &script),
        ],
        || {
            let report: Value =
                serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");

            let names: Vec<&str> = report["checks"]
                .as_array()
                .expect("checks array")
                .iter()
                .filter_map(|check| check["name"].as_str())
                .collect();
            assert_eq!(
                names,
                vec![
                    "config_validation",
                    "runner_interpreter",
                    "runner_script",
                    "skyvern_readiness",
                    "database_connectivity",
                ]
            );
            assert_eq!(report["overall_status"], "pass");
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[("AUTOQUOTE_ROUTING_AB_TEST_SPLIT", "150")], || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");

        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][4]["status"], "skipped");
    });
}

#[test]
fn route_without_split_always_picks_primary() {
    with_env(&[SKYVERN_KEY], || {
        let result = route::run("Progressive", 50, Some(7));
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let data = &payload["data"];
        assert_eq!(data["carrier"], "progressive");
        assert_eq!(data["agents"]["browser_use"], 50);
        assert!(data["agents"].get("skyvern").is_none());
        assert_eq!(data["groups"]["none"], 50);
    });
}

#[test]
fn route_with_seeded_split_is_reproducible() {
    with_env(&[SKYVERN_KEY, ("AUTOQUOTE_ROUTING_AB_TEST_SPLIT", "50")], || {
        let first = parse_payload(&route::run("progressive", 400, Some(42)).output);
        let second = parse_payload(&route::run("progressive", 400, Some(42)).output);

        assert_eq!(first["data"]["agents"], second["data"]["agents"]);

        let treatment = first["data"]["groups"]["treatment"].as_u64().unwrap_or_default();
        let control = first["data"]["groups"]["control"].as_u64().unwrap_or_default();
        assert_eq!(treatment + control, 400);
        assert!(treatment > 0 && control > 0, "both cohorts should be drawn");
        assert_eq!(first["data"]["agents"]["skyvern"].as_u64(), Some(treatment));
    });
}

#[test]
fn run_requires_portal_credentials() {
    let workspace = TempDir::new().expect("temp dir");
    let input = write_job(workspace.path());

    with_env(&[SKYVERN_KEY, ("AUTOQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = run::run(run_args(&input, None));
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "credentials");
        assert!(payload["message"].as_str().unwrap_or_default().contains("AUTOQUOTE_PORTAL_USERNAME"));
    });
}

#[test]
fn run_rejects_unknown_agent() {
    let workspace = TempDir::new().expect("temp dir");
    let input = write_job(workspace.path());

    with_env(&[SKYVERN_KEY, ("AUTOQUOTE_PORTAL_USERNAME", "agent-dana"), ("AUTOQUOTE_PORTAL_PASSWORD", "pw")], || {
        let result = run::run(run_args(&input, Some("selenium")));
        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
    });
}

#[test]
fn run_executes_job_and_report_reads_the_assignment() {
    let workspace = TempDir::new().expect("temp dir");
    let script = write_runner(workspace.path(), SUCCESS_RUNNER);
    let input = write_job(workspace.path());
    let database_url = sqlite_url(workspace.path());

    with_env(
        &[
            ("AUTOQUOTE_DATABASE_URL", &database_url),
            ("AUTOQUOTE_BROWSER_USE_PYTHON_BIN", "sh"),
            ("AUTOQUOTE_BROWSER_USE_RUNNER_SCRIPT", &script),
            ("AUTOQUOTE_ROUTING_FALLBACK_AGENT", "none"),
            ("AUTOQUOTE_PORTAL_USERNAME", "agent-dana"),
            ("AUTOQUOTE_PORTAL_PASSWORD", "pw-123"),
            ("AUTOQUOTE_LOG_LEVEL", "error"),
        ],
        || {
            let mut args = run_args(&input, None);
            args.job_id = Some("job-cli-1".to_string());
            let result = run::run(args);
            assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "ok");
            assert_eq!(payload["data"]["agent_type"], "browser_use");
            assert_eq!(payload["data"]["outcome"]["status"], "success");
            assert_eq!(payload["data"]["outcome"]["detail"]["reference_id"], "PGR-1");

            let report = parse_payload(&report::run(Some("progressive")).output);
            assert_eq!(report["status"], "ok");
            let cohorts = report["data"]["cohorts"].as_array().expect("cohorts");
            assert_eq!(cohorts.len(), 1);
            assert_eq!(cohorts[0]["primary_agent"], "browser_use");
            assert_eq!(cohorts[0]["total"], 1);
            assert_eq!(cohorts[0]["succeeded"], 1);
        },
    );
}

#[test]
fn run_reports_classified_failure() {
    let workspace = TempDir::new().expect("temp dir");
    let script = write_runner(workspace.path(), CREDENTIALS_RUNNER);
    let input = write_job(workspace.path());
    let database_url = sqlite_url(workspace.path());

    with_env(
        &[
            ("AUTOQUOTE_DATABASE_URL", &database_url),
            ("AUTOQUOTE_BROWSER_USE_PYTHON_BIN", "sh"),
            ("AUTOQUOTE_BROWSER_USE_RUNNER_SCRIPT", &script),
            ("AUTOQUOTE_ROUTING_FALLBACK_AGENT", "none"),
            ("AUTOQUOTE_PORTAL_USERNAME", "agent-dana"),
            ("AUTOQUOTE_PORTAL_PASSWORD", "pw-123"),
            ("AUTOQUOTE_LOG_LEVEL", "error"),
        ],
        || {
            let result = run::run(run_args(&input, None));
            assert_eq!(result.exit_code, run::EXIT_QUOTE_FAILED);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "credentials_invalid");
            assert_eq!(payload["data"]["outcome"]["detail"]["kind"], "CREDENTIALS_INVALID");
        },
    );
}

#[test]
fn report_on_empty_log_is_ok() {
    let workspace = TempDir::new().expect("temp dir");
    let database_url = sqlite_url(workspace.path());

    with_env(&[SKYVERN_KEY, ("AUTOQUOTE_DATABASE_URL", &database_url)], || {
        let result = report::run(None);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["message"], "no assignments recorded for all carriers");
        assert_eq!(payload["data"]["cohorts"], Value::Array(Vec::new()));
    });
}

const SUCCESS_RUNNER: &str = r#"input=$(cat)
echo '{"type":"progress","step":"Logging into portal","progress":35}'
echo '{"type":"result","success":true,"data":{"premiumAnnual":1200,"referenceId":"PGR-1"}}'
"#;

const CREDENTIALS_RUNNER: &str = r#"input=$(cat)
echo '{"type":"result","success":false,"error":"login failed: invalid password"}'
"#;

fn write_runner(dir: &Path, body: &str) -> String {
    let path = dir.join("runner.sh");
    fs::write(&path, body).expect("write runner script");
    path.display().to_string()
}

fn write_job(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("job.json");
    fs::write(&path, r#"{"clientData":{"personal":{"firstName":"Dana","lastName":"Reyes"}}}"#)
        .expect("write job input");
    path
}

fn sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("autoquote.db").display())
}

fn run_args(input: &Path, agent: Option<&str>) -> run::RunArgs {
    run::RunArgs {
        carrier: "progressive".to_string(),
        input: input.to_path_buf(),
        agent: agent.map(str::to_string),
        job_id: None,
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "AUTOQUOTE_DATABASE_URL",
        "AUTOQUOTE_DATABASE_MAX_CONNECTIONS",
        "AUTOQUOTE_DATABASE_TIMEOUT_SECS",
        "AUTOQUOTE_LOGGING_LEVEL",
        "AUTOQUOTE_LOGGING_FORMAT",
        "AUTOQUOTE_LOG_LEVEL",
        "AUTOQUOTE_LOG_FORMAT",
        "AUTOQUOTE_EXECUTION_TIMEOUT_SECS",
        "AUTOQUOTE_EXECUTION_ASSIGNMENT_BUFFER",
        "AUTOQUOTE_BROWSER_USE_PYTHON_BIN",
        "AUTOQUOTE_BROWSER_USE_RUNNER_SCRIPT",
        "AUTOQUOTE_BROWSER_USE_HEADLESS",
        "AUTOQUOTE_BROWSER_USE_INTERACTIVE_CHALLENGES",
        "AUTOQUOTE_BROWSER_USE_MODEL",
        "AUTOQUOTE_BROWSER_USE_ANTHROPIC_API_KEY",
        "ANTHROPIC_API_KEY",
        "AUTOQUOTE_SKYVERN_BASE_URL",
        "AUTOQUOTE_SKYVERN_API_KEY",
        "AUTOQUOTE_SKYVERN_POLL_INTERVAL_MS",
        "AUTOQUOTE_SKYVERN_REQUEST_TIMEOUT_SECS",
        "AUTOQUOTE_ROUTING_PRIMARY_AGENT",
        "AUTOQUOTE_ROUTING_FALLBACK_AGENT",
        "AUTOQUOTE_ROUTING_AB_TEST_SPLIT",
        "AUTOQUOTE_PORTAL_USERNAME",
        "AUTOQUOTE_PORTAL_PASSWORD",
        "AUTOQUOTE_PORTAL_MFA_CODE",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
