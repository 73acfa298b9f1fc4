//! Logging setup and the server lifecycle events.

use std::env;
use std::net::SocketAddr;
use std::path::Path;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::InsightConfig;
use crate::server::API_ROUTES;

pub const LOG_LEVEL_VAR: &str = "ATTRITION_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "ATTRITION_LOG_FORMAT";
pub const LOG_TARGET_VAR: &str = "ATTRITION_LOG_TARGET";

const COMPONENT: &str = "attrition_server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Unset, blank or unrecognized values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: lookup(LOG_LEVEL_VAR)
                .map(|level| level.trim().to_string())
                .filter(|level| !level.is_empty())
                .unwrap_or(defaults.level),
            format: lookup(LOG_FORMAT_VAR)
                .as_deref()
                .and_then(LogFormat::parse)
                .unwrap_or(defaults.format),
            include_target: lookup(LOG_TARGET_VAR)
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(defaults.include_target),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    LoggingConfig::from_lookup(|key| env::var(key).ok())
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())?
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = COMPONENT,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_artifacts_loaded(pipeline_path: &Path, model_path: &Path, feature_width: usize) {
    info!(
        component = COMPONENT,
        event = "app.artifacts.loaded",
        pipeline_path = %pipeline_path.display(),
        model_path = %model_path.display(),
        feature_width
    );
}

/// Never logs the API key itself.
pub fn log_insights_mode(config: &InsightConfig) {
    info!(
        component = COMPONENT,
        event = "app.insights.mode",
        enabled = config.api_key.is_some(),
        model = %config.model,
        base_url = %config.base_url,
        timeout_ms = config.timeout_ms
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = COMPONENT,
        event = "app.bind",
        bind_addr = %bound_addr,
        routes = %API_ROUTES.join(",")
    );
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
fn env_lock() -> &'static Mutex<()> {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

/// Serializes tests that touch process env and restores prior values.
#[cfg(test)]
pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
    let _guard = env_lock().lock().expect("env lock should not be poisoned");
    let previous: Vec<(&str, Option<String>)> =
        vars.iter().map(|(key, _)| (*key, env::var(key).ok())).collect();

    let apply = |key: &str, value: Option<&str>| match value {
        Some(v) => env::set_var(key, v),
        None => env::remove_var(key),
    };
    for (key, value) in vars {
        apply(*key, *value);
    }
    let output = f();
    for (key, value) in &previous {
        apply(*key, value.as_deref());
    }

    output
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> LoggingConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        LoggingConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(config_from(&[]), LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = config_from(&[
            (LOG_LEVEL_VAR, " attrition_insight=debug "),
            (LOG_FORMAT_VAR, "JSON"),
            (LOG_TARGET_VAR, "off"),
        ]);

        assert_eq!(cfg.level, "attrition_insight=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn blank_or_unrecognized_values_keep_defaults() {
        let cfg = config_from(&[
            (LOG_LEVEL_VAR, "   "),
            (LOG_FORMAT_VAR, "yaml"),
            (LOG_TARGET_VAR, "maybe"),
        ]);

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn process_env_feeds_the_config() {
        let cfg = with_env_vars(
            &[
                (LOG_LEVEL_VAR, Some("trace")),
                (LOG_FORMAT_VAR, None),
                (LOG_TARGET_VAR, Some("0")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "trace");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(!cfg.include_target);
    }
}
