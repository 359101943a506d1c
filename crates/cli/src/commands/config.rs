use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use autoquote_core::config::{AppConfig, LoadOptions, RouteSettings};
use secrecy::SecretString;
use toml::Value;

struct ConfigSource {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let path = detect_config_path();
    let source = ConfigSource { doc: load_config_file_doc(path.as_deref()), path };

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: &str, env_keys: &[&str]| {
        lines.push(render_line(key, value, field_source(key, env_keys, &source)));
    };

    push("database.url", &config.database.url, &["AUTOQUOTE_DATABASE_URL"]);
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        &["AUTOQUOTE_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        &["AUTOQUOTE_DATABASE_TIMEOUT_SECS"],
    );

    push(
        "logging.level",
        &config.logging.level,
        &["AUTOQUOTE_LOGGING_LEVEL", "AUTOQUOTE_LOG_LEVEL"],
    );
    push(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["AUTOQUOTE_LOGGING_FORMAT", "AUTOQUOTE_LOG_FORMAT"],
    );

    push(
        "execution.timeout_secs",
        &config.execution.timeout_secs.to_string(),
        &["AUTOQUOTE_EXECUTION_TIMEOUT_SECS"],
    );
    push(
        "execution.assignment_buffer",
        &config.execution.assignment_buffer.to_string(),
        &["AUTOQUOTE_EXECUTION_ASSIGNMENT_BUFFER"],
    );

    push(
        "browser_use.python_bin",
        &config.browser_use.python_bin,
        &["AUTOQUOTE_BROWSER_USE_PYTHON_BIN"],
    );
    push(
        "browser_use.runner_script",
        &config.browser_use.runner_script.display().to_string(),
        &["AUTOQUOTE_BROWSER_USE_RUNNER_SCRIPT"],
    );
    push(
        "browser_use.headless",
        &config.browser_use.headless.to_string(),
        &["AUTOQUOTE_BROWSER_USE_HEADLESS"],
    );
    push(
        "browser_use.interactive_challenges",
        &config.browser_use.interactive_challenges.to_string(),
        &["AUTOQUOTE_BROWSER_USE_INTERACTIVE_CHALLENGES"],
    );
    push("browser_use.model", &config.browser_use.model, &["AUTOQUOTE_BROWSER_USE_MODEL"]);
    push(
        "browser_use.anthropic_api_key",
        redact_secret(config.browser_use.anthropic_api_key.as_ref()),
        &["AUTOQUOTE_BROWSER_USE_ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"],
    );

    push("skyvern.base_url", &config.skyvern.base_url, &["AUTOQUOTE_SKYVERN_BASE_URL"]);
    push(
        "skyvern.api_key",
        redact_secret(config.skyvern.api_key.as_ref()),
        &["AUTOQUOTE_SKYVERN_API_KEY"],
    );
    push(
        "skyvern.poll_interval_ms",
        &config.skyvern.poll_interval_ms.to_string(),
        &["AUTOQUOTE_SKYVERN_POLL_INTERVAL_MS"],
    );
    push(
        "skyvern.request_timeout_secs",
        &config.skyvern.request_timeout_secs.to_string(),
        &["AUTOQUOTE_SKYVERN_REQUEST_TIMEOUT_SECS"],
    );

    push(
        "routing.default.primary_agent",
        config.routing.default.primary_agent.as_str(),
        &["AUTOQUOTE_ROUTING_PRIMARY_AGENT"],
    );
    push(
        "routing.default.fallback_agent",
        fallback_label(&config.routing.default),
        &["AUTOQUOTE_ROUTING_FALLBACK_AGENT"],
    );
    push(
        "routing.default.ab_test_split",
        &config.routing.default.ab_test_split.to_string(),
        &["AUTOQUOTE_ROUTING_AB_TEST_SPLIT"],
    );
    for (carrier, route) in &config.routing.carriers {
        push(&format!("routing.carriers.{carrier}"), &render_route(route), &[]);
    }

    for (code, profile) in &config.carriers {
        push(
            &format!("carriers.{code}"),
            &format!("{} <{}>", profile.display_name, profile.portal_url),
            &[],
        );
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["autoquote.toml", "config/autoquote.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], source: &ConfigSource) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = &source.doc {
        if contains_path(doc, key_path) {
            let file_path = source
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn render_route(route: &RouteSettings) -> String {
    format!(
        "primary={} fallback={} ab_test_split={}",
        route.primary_agent,
        fallback_label(route),
        route.ab_test_split
    )
}

fn fallback_label(route: &RouteSettings) -> &'static str {
    route.fallback_agent.map(|agent| agent.as_str()).unwrap_or("none")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}
