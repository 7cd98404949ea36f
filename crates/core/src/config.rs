use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::skill::{SkillDefinition, SkillId};

pub const DEFAULT_CONFIG_FILE: &str = "skillrelay.toml";
const MIN_CORRELATION_SECRET_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub correlation: CorrelationConfig,
    pub router: RouterConfig,
    pub skills: Vec<SkillConfig>,
    /// Intent name to trigger phrases for the keyword recognizer.
    pub intents: BTreeMap<String, Vec<String>>,
    /// Interruption name (`cancel`, `help`, `repeat`, `start_over`) to trigger phrases.
    pub interruptions: BTreeMap<String, Vec<String>>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Base URL skills post their replies to. Sent as `serviceUrl` on skill calls.
    pub public_url: String,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// This service's own app identity: the audience inbound tokens must carry. The scope
    /// a skill's routing key is checked against is that skill's `app_id`, not this one.
    pub app_id: String,
    /// App identities admitted on inbound calls. Empty disables authentication.
    pub allowed_callers: Vec<String>,
    /// Empty selects the public cloud identity provider.
    pub channel_service: String,
    pub openid_metadata_url: Option<String>,
    pub signing_key_cache_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct CorrelationConfig {
    pub secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub skill_timeout_secs: u64,
    pub proactive_workers: usize,
    pub proactive_queue_capacity: usize,
    pub skill_mode: bool,
    pub suppress_completion_message: bool,
}

/// One `[[skills]]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillConfig {
    pub id: String,
    pub app_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub trigger_intents: Vec<String>,
    #[serde(default)]
    pub required_auth_connections: Vec<String>,
}

impl SkillConfig {
    pub fn to_definition(&self) -> SkillDefinition {
        SkillDefinition {
            id: SkillId(self.id.trim().to_owned()),
            app_identity: self.app_id.clone(),
            endpoint: self.endpoint.clone(),
            trigger_intents: self.trigger_intents.iter().cloned().collect(),
            required_auth_connections: self.required_auth_connections.iter().cloned().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub allowed_callers: Option<Vec<String>>,
    pub correlation_secret: Option<String>,
    pub skill_mode: Option<bool>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://skillrelay.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3978,
                graceful_shutdown_secs: 15,
                public_url: "http://localhost:3978".to_string(),
            },
            auth: AuthConfig {
                app_id: String::new(),
                allowed_callers: Vec::new(),
                channel_service: String::new(),
                openid_metadata_url: None,
                signing_key_cache_secs: 24 * 60 * 60,
            },
            correlation: CorrelationConfig::default(),
            router: RouterConfig {
                skill_timeout_secs: 30,
                proactive_workers: 4,
                proactive_queue_capacity: 256,
                skill_mode: false,
                suppress_completion_message: false,
            },
            skills: Vec::new(),
            intents: BTreeMap::new(),
            interruptions: default_interruptions(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn default_interruptions() -> BTreeMap<String, Vec<String>> {
    [
        ("cancel", vec!["cancel", "stop", "never mind"]),
        ("help", vec!["help"]),
        ("repeat", vec!["repeat", "say that again"]),
        ("start_over", vec!["start over", "restart"]),
    ]
    .into_iter()
    .map(|(name, phrases)| {
        (name.to_string(), phrases.into_iter().map(str::to_string).collect::<Vec<_>>())
    })
    .collect()
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
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn auth_enabled(&self) -> bool {
        !self.auth.allowed_callers.is_empty()
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
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

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(public_url) = server.public_url {
                self.server.public_url = public_url;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(app_id) = auth.app_id {
                self.auth.app_id = app_id;
            }
            if let Some(allowed_callers) = auth.allowed_callers {
                self.auth.allowed_callers = allowed_callers;
            }
            if let Some(channel_service) = auth.channel_service {
                self.auth.channel_service = channel_service;
            }
            if let Some(openid_metadata_url) = auth.openid_metadata_url {
                self.auth.openid_metadata_url = Some(openid_metadata_url);
            }
            if let Some(signing_key_cache_secs) = auth.signing_key_cache_secs {
                self.auth.signing_key_cache_secs = signing_key_cache_secs;
            }
        }

        if let Some(correlation) = patch.correlation {
            if let Some(secret) = correlation.secret {
                self.correlation.secret = Some(secret_value(secret));
            }
        }

        if let Some(router) = patch.router {
            if let Some(skill_timeout_secs) = router.skill_timeout_secs {
                self.router.skill_timeout_secs = skill_timeout_secs;
            }
            if let Some(proactive_workers) = router.proactive_workers {
                self.router.proactive_workers = proactive_workers;
            }
            if let Some(proactive_queue_capacity) = router.proactive_queue_capacity {
                self.router.proactive_queue_capacity = proactive_queue_capacity;
            }
            if let Some(skill_mode) = router.skill_mode {
                self.router.skill_mode = skill_mode;
            }
            if let Some(suppress) = router.suppress_completion_message {
                self.router.suppress_completion_message = suppress;
            }
        }

        if let Some(skills) = patch.skills {
            self.skills = skills;
        }
        if let Some(intents) = patch.intents {
            self.intents = intents;
        }
        if let Some(interruptions) = patch.interruptions {
            self.interruptions.extend(interruptions);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SKILLRELAY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SKILLRELAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("SKILLRELAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SKILLRELAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("SKILLRELAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SKILLRELAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SKILLRELAY_SERVER_PORT") {
            self.server.port = parse_env("SKILLRELAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SKILLRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("SKILLRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SKILLRELAY_SERVER_PUBLIC_URL") {
            self.server.public_url = value;
        }

        if let Some(value) = read_env("SKILLRELAY_AUTH_APP_ID") {
            self.auth.app_id = value;
        }
        if let Some(value) = read_env("SKILLRELAY_AUTH_ALLOWED_CALLERS") {
            self.auth.allowed_callers = split_list(&value);
        }
        if let Some(value) = read_env("SKILLRELAY_AUTH_CHANNEL_SERVICE") {
            self.auth.channel_service = value;
        }
        if let Some(value) = read_env("SKILLRELAY_AUTH_OPENID_METADATA_URL") {
            self.auth.openid_metadata_url = Some(value);
        }
        if let Some(value) = read_env("SKILLRELAY_AUTH_SIGNING_KEY_CACHE_SECS") {
            self.auth.signing_key_cache_secs =
                parse_env("SKILLRELAY_AUTH_SIGNING_KEY_CACHE_SECS", &value)?;
        }

        if let Some(value) = read_env("SKILLRELAY_CORRELATION_SECRET") {
            self.correlation.secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("SKILLRELAY_ROUTER_SKILL_TIMEOUT_SECS") {
            self.router.skill_timeout_secs =
                parse_env("SKILLRELAY_ROUTER_SKILL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SKILLRELAY_ROUTER_PROACTIVE_WORKERS") {
            self.router.proactive_workers =
                parse_env("SKILLRELAY_ROUTER_PROACTIVE_WORKERS", &value)?;
        }
        if let Some(value) = read_env("SKILLRELAY_ROUTER_PROACTIVE_QUEUE_CAPACITY") {
            self.router.proactive_queue_capacity =
                parse_env("SKILLRELAY_ROUTER_PROACTIVE_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("SKILLRELAY_ROUTER_SKILL_MODE") {
            self.router.skill_mode = parse_env("SKILLRELAY_ROUTER_SKILL_MODE", &value)?;
        }
        if let Some(value) = read_env("SKILLRELAY_ROUTER_SUPPRESS_COMPLETION_MESSAGE") {
            self.router.suppress_completion_message =
                parse_env("SKILLRELAY_ROUTER_SUPPRESS_COMPLETION_MESSAGE", &value)?;
        }

        let log_level =
            read_env("SKILLRELAY_LOGGING_LEVEL").or_else(|| read_env("SKILLRELAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SKILLRELAY_LOGGING_FORMAT").or_else(|| read_env("SKILLRELAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
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
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(allowed_callers) = overrides.allowed_callers {
            self.auth.allowed_callers = allowed_callers;
        }
        if let Some(secret) = overrides.correlation_secret {
            self.correlation.secret = Some(secret_value(secret));
        }
        if let Some(skill_mode) = overrides.skill_mode {
            self.router.skill_mode = skill_mode;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_correlation(&self.correlation)?;
        validate_router(&self.router)?;
        validate_skills(&self.skills)?;
        validate_interruptions(&self.interruptions)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    let public_url = server.public_url.trim();
    if !(public_url.starts_with("http://") || public_url.starts_with("https://")) {
        return Err(ConfigError::Validation(
            "server.public_url must be an http(s) URL".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    if auth.allowed_callers.iter().any(|caller| caller.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "auth.allowed_callers must not contain empty entries; leave the list empty to disable authentication"
                .to_string(),
        ));
    }

    if let Some(url) = &auth.openid_metadata_url {
        if !is_http_url(url) {
            return Err(ConfigError::Validation(
                "auth.openid_metadata_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if auth.signing_key_cache_secs == 0 {
        return Err(ConfigError::Validation(
            "auth.signing_key_cache_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_correlation(correlation: &CorrelationConfig) -> Result<(), ConfigError> {
    if let Some(secret) = &correlation.secret {
        if secret.expose_secret().len() < MIN_CORRELATION_SECRET_LEN {
            return Err(ConfigError::Validation(format!(
                "correlation.secret must be at least {MIN_CORRELATION_SECRET_LEN} bytes; generate one with `openssl rand -hex 32`"
            )));
        }
    }
    Ok(())
}

fn validate_router(router: &RouterConfig) -> Result<(), ConfigError> {
    if router.skill_timeout_secs == 0 || router.skill_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "router.skill_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if router.proactive_workers == 0 {
        return Err(ConfigError::Validation(
            "router.proactive_workers must be greater than zero".to_string(),
        ));
    }
    if router.proactive_queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "router.proactive_queue_capacity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_skills(skills: &[SkillConfig]) -> Result<(), ConfigError> {
    for (index, skill) in skills.iter().enumerate() {
        if skill.id.trim().is_empty() {
            return Err(ConfigError::Validation(format!("skills[{index}].id is required")));
        }
        if skill.app_id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "skills[{index}].app_id is required for skill `{}`",
                skill.id
            )));
        }
        if !is_http_url(&skill.endpoint) {
            return Err(ConfigError::Validation(format!(
                "skills[{index}].endpoint for skill `{}` must start with http:// or https://",
                skill.id
            )));
        }
    }
    Ok(())
}

fn validate_interruptions(
    interruptions: &BTreeMap<String, Vec<String>>,
) -> Result<(), ConfigError> {
    match interruptions
        .keys()
        .find(|name| crate::routing::Interruption::parse(name).is_none())
    {
        Some(name) => Err(ConfigError::Validation(format!(
            "interruptions.{name} is not a known interruption (expected cancel|help|repeat|start_over)"
        ))),
        None => Ok(()),
    }
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    correlation: Option<CorrelationPatch>,
    router: Option<RouterPatch>,
    skills: Option<Vec<SkillConfig>>,
    intents: Option<BTreeMap<String, Vec<String>>>,
    interruptions: Option<BTreeMap<String, Vec<String>>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    public_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    app_id: Option<String>,
    allowed_callers: Option<Vec<String>>,
    channel_service: Option<String>,
    openid_metadata_url: Option<String>,
    signing_key_cache_secs: Option<u64>,
}

#[derive(Default, Deserialize)]
struct CorrelationPatch {
    secret: Option<String>,
}

impl std::fmt::Debug for CorrelationPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationPatch")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RouterPatch {
    skill_timeout_secs: Option<u64>,
    proactive_workers: Option<usize>,
    proactive_queue_capacity: Option<usize>,
    skill_mode: Option<bool>,
    suppress_completion_message: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
