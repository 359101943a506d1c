use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::carriers::{CarrierDirectory, CarrierProfile};
use crate::domain::params::CarrierCode;
use crate::domain::routing::{AbTestSplit, AgentConfig, AgentType, RoutingTable};
use crate::factory::FactorySettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub execution: ExecutionConfig,
    pub browser_use: BrowserUseConfig,
    pub skyvern: SkyvernConfig,
    pub routing: RoutingConfig,
    pub carriers: BTreeMap<CarrierCode, CarrierProfile>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub assignment_buffer: usize,
}

#[derive(Clone, Debug)]
pub struct BrowserUseConfig {
    pub python_bin: String,
    pub runner_script: PathBuf,
    pub headless: bool,
    /// Keep the runner's stdin open for challenge answers. The runner must
    /// accept `--interactive-challenges` and must not read stdin to EOF.
    pub interactive_challenges: bool,
    pub model: String,
    pub anthropic_api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct SkyvernConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

/// Routing policy as configured. The split stays a raw number until
/// validation so an out-of-range value can be reported against its key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteSettings {
    pub primary_agent: AgentType,
    pub fallback_agent: Option<AgentType>,
    pub ab_test_split: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingConfig {
    pub default: RouteSettings,
    pub carriers: BTreeMap<CarrierCode, RouteSettings>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub execution_timeout_secs: Option<u64>,
    pub runner_script: Option<PathBuf>,
    pub skyvern_base_url: Option<String>,
    pub skyvern_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            primary_agent: AgentType::BrowserUse,
            fallback_agent: Some(AgentType::Skyvern),
            ab_test_split: 0,
        }
    }
}

impl RouteSettings {
    fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            primary_agent: self.primary_agent,
            fallback_agent: self.fallback_agent,
            ab_test_split: AbTestSplit::clamped(self.ab_test_split),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://autoquote.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            execution: ExecutionConfig { timeout_secs: 300, assignment_buffer: 256 },
            browser_use: BrowserUseConfig {
                python_bin: "python3".to_string(),
                runner_script: PathBuf::from("scripts/browser_use_runner.py"),
                headless: true,
                interactive_challenges: false,
                model: "claude-sonnet-4-5".to_string(),
                anthropic_api_key: None,
            },
            skyvern: SkyvernConfig {
                base_url: "http://localhost:8000".to_string(),
                api_key: None,
                poll_interval_ms: 2_000,
                request_timeout_secs: 30,
            },
            routing: RoutingConfig { default: RouteSettings::default(), carriers: BTreeMap::new() },
            carriers: CarrierDirectory::default()
                .iter()
                .map(|(code, profile)| (code.clone(), profile.clone()))
                .collect(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("autoquote.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn routing_table(&self) -> RoutingTable {
        self.routing.carriers.iter().fold(
            RoutingTable::new(self.routing.default.to_agent_config()),
            |table, (carrier, route)| table.with_carrier(carrier.clone(), route.to_agent_config()),
        )
    }

    pub fn carrier_directory(&self) -> CarrierDirectory {
        self.carriers.iter().fold(CarrierDirectory::empty(), |directory, (code, profile)| {
            directory.with_carrier(code.clone(), profile.clone())
        })
    }

    pub fn factory_settings(&self) -> FactorySettings {
        FactorySettings { execution_timeout: Duration::from_secs(self.execution.timeout_secs) }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(execution) = patch.execution {
            if let Some(timeout_secs) = execution.timeout_secs {
                self.execution.timeout_secs = timeout_secs;
            }
            if let Some(assignment_buffer) = execution.assignment_buffer {
                self.execution.assignment_buffer = assignment_buffer;
            }
        }

        if let Some(browser_use) = patch.browser_use {
            if let Some(python_bin) = browser_use.python_bin {
                self.browser_use.python_bin = python_bin;
            }
            if let Some(runner_script) = browser_use.runner_script {
                self.browser_use.runner_script = runner_script;
            }
            if let Some(headless) = browser_use.headless {
                self.browser_use.headless = headless;
            }
            if let Some(interactive_challenges) = browser_use.interactive_challenges {
                self.browser_use.interactive_challenges = interactive_challenges;
            }
            if let Some(model) = browser_use.model {
                self.browser_use.model = model;
            }
            if let Some(anthropic_api_key_value) = browser_use.anthropic_api_key {
                self.browser_use.anthropic_api_key = Some(secret_value(anthropic_api_key_value));
            }
        }

        if let Some(skyvern) = patch.skyvern {
            if let Some(base_url) = skyvern.base_url {
                self.skyvern.base_url = base_url;
            }
            if let Some(skyvern_api_key_value) = skyvern.api_key {
                self.skyvern.api_key = Some(secret_value(skyvern_api_key_value));
            }
            if let Some(poll_interval_ms) = skyvern.poll_interval_ms {
                self.skyvern.poll_interval_ms = poll_interval_ms;
            }
            if let Some(request_timeout_secs) = skyvern.request_timeout_secs {
                self.skyvern.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(default) = routing.default {
                self.routing.default = default.merge_into(&self.routing.default, "routing.default")?;
            }
            for (carrier, route) in routing.carriers {
                let key = format!("routing.carriers.{carrier}");
                let carrier = CarrierCode::new(carrier);
                let base =
                    self.routing.carriers.get(&carrier).unwrap_or(&self.routing.default).clone();
                let merged = route.merge_into(&base, &key)?;
                self.routing.carriers.insert(carrier, merged);
            }
        }

        for (code, carrier) in patch.carriers {
            let code = CarrierCode::new(code);
            let display_name = carrier.display_name.unwrap_or_else(|| code.to_string());
            self.carriers.insert(code, CarrierProfile { display_name, portal_url: carrier.portal_url });
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AUTOQUOTE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("AUTOQUOTE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("AUTOQUOTE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("AUTOQUOTE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("AUTOQUOTE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("AUTOQUOTE_LOGGING_LEVEL").or_else(|| read_env("AUTOQUOTE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AUTOQUOTE_LOGGING_FORMAT").or_else(|| read_env("AUTOQUOTE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("AUTOQUOTE_EXECUTION_TIMEOUT_SECS") {
            self.execution.timeout_secs = parse_u64("AUTOQUOTE_EXECUTION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AUTOQUOTE_EXECUTION_ASSIGNMENT_BUFFER") {
            self.execution.assignment_buffer =
                parse_usize("AUTOQUOTE_EXECUTION_ASSIGNMENT_BUFFER", &value)?;
        }

        if let Some(value) = read_env("AUTOQUOTE_BROWSER_USE_PYTHON_BIN") {
            self.browser_use.python_bin = value;
        }
        if let Some(value) = read_env("AUTOQUOTE_BROWSER_USE_RUNNER_SCRIPT") {
            self.browser_use.runner_script = PathBuf::from(value);
        }
        if let Some(value) = read_env("AUTOQUOTE_BROWSER_USE_HEADLESS") {
            self.browser_use.headless = parse_bool("AUTOQUOTE_BROWSER_USE_HEADLESS", &value)?;
        }
        if let Some(value) = read_env("AUTOQUOTE_BROWSER_USE_INTERACTIVE_CHALLENGES") {
            self.browser_use.interactive_challenges =
                parse_bool("AUTOQUOTE_BROWSER_USE_INTERACTIVE_CHALLENGES", &value)?;
        }
        if let Some(value) = read_env("AUTOQUOTE_BROWSER_USE_MODEL") {
            self.browser_use.model = value;
        }
        let anthropic_key = read_env("AUTOQUOTE_BROWSER_USE_ANTHROPIC_API_KEY")
            .or_else(|| read_env("ANTHROPIC_API_KEY"));
        if let Some(value) = anthropic_key {
            self.browser_use.anthropic_api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("AUTOQUOTE_SKYVERN_BASE_URL") {
            self.skyvern.base_url = value;
        }
        if let Some(value) = read_env("AUTOQUOTE_SKYVERN_API_KEY") {
            self.skyvern.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AUTOQUOTE_SKYVERN_POLL_INTERVAL_MS") {
            self.skyvern.poll_interval_ms =
                parse_u64("AUTOQUOTE_SKYVERN_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("AUTOQUOTE_SKYVERN_REQUEST_TIMEOUT_SECS") {
            self.skyvern.request_timeout_secs =
                parse_u64("AUTOQUOTE_SKYVERN_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AUTOQUOTE_ROUTING_PRIMARY_AGENT") {
            self.routing.default.primary_agent =
                parse_agent("AUTOQUOTE_ROUTING_PRIMARY_AGENT", &value)?;
        }
        if let Some(value) = read_env("AUTOQUOTE_ROUTING_FALLBACK_AGENT") {
            self.routing.default.fallback_agent = if value.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_agent("AUTOQUOTE_ROUTING_FALLBACK_AGENT", &value)?)
            };
        }
        if let Some(value) = read_env("AUTOQUOTE_ROUTING_AB_TEST_SPLIT") {
            self.routing.default.ab_test_split =
                parse_u16("AUTOQUOTE_ROUTING_AB_TEST_SPLIT", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(timeout_secs) = overrides.execution_timeout_secs {
            self.execution.timeout_secs = timeout_secs;
        }
        if let Some(runner_script) = overrides.runner_script {
            self.browser_use.runner_script = runner_script;
        }
        if let Some(base_url) = overrides.skyvern_base_url {
            self.skyvern.base_url = base_url;
        }
        if let Some(skyvern_api_key) = overrides.skyvern_api_key {
            self.skyvern.api_key = Some(secret_value(skyvern_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_execution(&self.execution)?;
        validate_browser_use(&self.browser_use)?;
        validate_routing(&self.routing)?;
        let skyvern_routed = self.routing_table().referenced_agents().contains(&AgentType::Skyvern);
        validate_skyvern(&self.skyvern, skyvern_routed)?;
        validate_carriers(&self.carriers)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("autoquote.toml"), PathBuf::from("config/autoquote.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if execution.timeout_secs == 0 || execution.timeout_secs > 3_600 {
        return Err(ConfigError::Validation(
            "execution.timeout_secs must be in range 1..=3600".to_string(),
        ));
    }

    if execution.assignment_buffer == 0 {
        return Err(ConfigError::Validation(
            "execution.assignment_buffer must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_browser_use(browser_use: &BrowserUseConfig) -> Result<(), ConfigError> {
    if browser_use.python_bin.trim().is_empty() {
        return Err(ConfigError::Validation("browser_use.python_bin must not be empty".to_string()));
    }

    if browser_use.runner_script.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "browser_use.runner_script must not be empty".to_string(),
        ));
    }

    if browser_use.model.trim().is_empty() {
        return Err(ConfigError::Validation("browser_use.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_skyvern(skyvern: &SkyvernConfig, referenced: bool) -> Result<(), ConfigError> {
    if !skyvern.base_url.starts_with("http://") && !skyvern.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "skyvern.base_url must start with http:// or https://".to_string(),
        ));
    }

    if skyvern.poll_interval_ms < 100 {
        return Err(ConfigError::Validation(
            "skyvern.poll_interval_ms must be at least 100".to_string(),
        ));
    }

    if skyvern.request_timeout_secs == 0 || skyvern.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "skyvern.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if referenced {
        let missing = skyvern
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "skyvern.api_key is required while routing references the skyvern agent (set AUTOQUOTE_SKYVERN_API_KEY)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    validate_route("routing.default", &routing.default)?;
    for (carrier, route) in &routing.carriers {
        validate_route(&format!("routing.carriers.{carrier}"), route)?;
    }
    Ok(())
}

fn validate_route(key: &str, route: &RouteSettings) -> Result<(), ConfigError> {
    if AbTestSplit::new(route.ab_test_split).is_err() {
        return Err(ConfigError::Validation(format!(
            "{key}.ab_test_split must be in range 0..=100, got {}",
            route.ab_test_split
        )));
    }
    Ok(())
}

fn validate_carriers(carriers: &BTreeMap<CarrierCode, CarrierProfile>) -> Result<(), ConfigError> {
    for (code, profile) in carriers {
        let url = profile.portal_url.as_str();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "carriers.{code}.portal_url must start with http:// or https://"
            )));
        }
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_env(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_env(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_env(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_env(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_env(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_env(key, value))
}

fn parse_agent(key: &str, value: &str) -> Result<AgentType, ConfigError> {
    value.parse::<AgentType>().map_err(|_| invalid_env(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    execution: Option<ExecutionPatch>,
    browser_use: Option<BrowserUsePatch>,
    skyvern: Option<SkyvernPatch>,
    routing: Option<RoutingPatch>,
    #[serde(default)]
    carriers: BTreeMap<String, CarrierPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPatch {
    timeout_secs: Option<u64>,
    assignment_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct BrowserUsePatch {
    python_bin: Option<String>,
    runner_script: Option<PathBuf>,
    headless: Option<bool>,
    interactive_challenges: Option<bool>,
    model: Option<String>,
    anthropic_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SkyvernPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    poll_interval_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    default: Option<RoutePatch>,
    #[serde(default)]
    carriers: BTreeMap<String, RoutePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutePatch {
    primary_agent: Option<String>,
    fallback_agent: Option<String>,
    ab_test_split: Option<u16>,
}

impl RoutePatch {
    fn merge_into(self, base: &RouteSettings, key: &str) -> Result<RouteSettings, ConfigError> {
        let mut route = base.clone();
        if let Some(primary) = self.primary_agent {
            route.primary_agent = primary.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "{key}.primary_agent `{primary}` is not one of browser_use|skyvern"
                ))
            })?;
        }
        if let Some(fallback) = self.fallback_agent {
            route.fallback_agent = if fallback.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(fallback.parse().map_err(|_| {
                    ConfigError::Validation(format!(
                        "{key}.fallback_agent `{fallback}` is not one of browser_use|skyvern|none"
                    ))
                })?)
            };
        }
        if let Some(split) = self.ab_test_split {
            route.ab_test_split = split;
        }
        Ok(route)
    }
}

#[derive(Debug, Deserialize)]
struct CarrierPatch {
    display_name: Option<String>,
    portal_url: String,
}
