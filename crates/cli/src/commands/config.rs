use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use skillrelay_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: LoadOptions) -> String {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in effective_values(&config) {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, Option<&'static str>)> {
    vec![
        ("database.url", config.database.url.clone(), Some("SKILLRELAY_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("SKILLRELAY_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("SKILLRELAY_DATABASE_TIMEOUT_SECS"),
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("SKILLRELAY_SERVER_BIND_ADDRESS"),
        ),
        ("server.port", config.server.port.to_string(), Some("SKILLRELAY_SERVER_PORT")),
        (
            "server.public_url",
            config.server.public_url.clone(),
            Some("SKILLRELAY_SERVER_PUBLIC_URL"),
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            Some("SKILLRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        ("auth.app_id", or_unset(&config.auth.app_id), Some("SKILLRELAY_AUTH_APP_ID")),
        (
            "auth.allowed_callers",
            render_callers(&config.auth.allowed_callers),
            Some("SKILLRELAY_AUTH_ALLOWED_CALLERS"),
        ),
        (
            "auth.channel_service",
            or_unset(&config.auth.channel_service),
            Some("SKILLRELAY_AUTH_CHANNEL_SERVICE"),
        ),
        (
            "auth.openid_metadata_url",
            config.auth.openid_metadata_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("SKILLRELAY_AUTH_OPENID_METADATA_URL"),
        ),
        (
            "auth.signing_key_cache_secs",
            config.auth.signing_key_cache_secs.to_string(),
            Some("SKILLRELAY_AUTH_SIGNING_KEY_CACHE_SECS"),
        ),
        (
            "correlation.secret",
            redact_secret(config.correlation.secret.as_ref().map(|secret| secret.expose_secret())),
            Some("SKILLRELAY_CORRELATION_SECRET"),
        ),
        (
            "router.skill_timeout_secs",
            config.router.skill_timeout_secs.to_string(),
            Some("SKILLRELAY_ROUTER_SKILL_TIMEOUT_SECS"),
        ),
        (
            "router.proactive_workers",
            config.router.proactive_workers.to_string(),
            Some("SKILLRELAY_ROUTER_PROACTIVE_WORKERS"),
        ),
        (
            "router.proactive_queue_capacity",
            config.router.proactive_queue_capacity.to_string(),
            Some("SKILLRELAY_ROUTER_PROACTIVE_QUEUE_CAPACITY"),
        ),
        (
            "router.skill_mode",
            config.router.skill_mode.to_string(),
            Some("SKILLRELAY_ROUTER_SKILL_MODE"),
        ),
        (
            "router.suppress_completion_message",
            config.router.suppress_completion_message.to_string(),
            Some("SKILLRELAY_ROUTER_SUPPRESS_COMPLETION_MESSAGE"),
        ),
        ("skills", format!("{} registered", config.skills.len()), None),
        ("intents", format!("{} defined", config.intents.len()), None),
        ("logging.level", config.logging.level.clone(), Some("SKILLRELAY_LOGGING_LEVEL")),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("SKILLRELAY_LOGGING_FORMAT"),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
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

fn render_callers(callers: &[String]) -> String {
    if callers.is_empty() {
        return "<empty: authentication disabled>".to_string();
    }
    format!("[{}]", callers.join(", "))
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        "<unset>".to_string()
    } else {
        value.to_string()
    }
}

/// Keeps only the length so operators can tell two secrets apart without seeing either.
fn redact_secret(secret: Option<&str>) -> String {
    match secret.map(str::trim) {
        None | Some("") => "<unset: ephemeral per process>".to_string(),
        Some(secret) => format!("<redacted: {} bytes>", secret.len()),
    }
}
