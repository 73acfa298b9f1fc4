//! Environment-driven configuration for the binaries.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_PIPELINE_PATH: &str = "artifacts/preprocessor_pipeline.json";
pub const DEFAULT_MODEL_PATH: &str = "model/attrition_model.json";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "deepseek-chat";
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub pipeline_path: PathBuf,
    pub model_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            pipeline_path: PathBuf::from(DEFAULT_PIPELINE_PATH),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout_ms: DEFAULT_LLM_TIMEOUT_MS,
        }
    }
}

pub fn server_config_from_env() -> ServerConfig {
    let mut config = ServerConfig::default();

    if let Some(addr) = non_empty_var("ATTRITION_ADDR").and_then(|raw| raw.parse().ok()) {
        config.addr = addr;
    }
    if let Some(path) = non_empty_var("ATTRITION_PIPELINE_PATH") {
        config.pipeline_path = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var("ATTRITION_MODEL_PATH") {
        config.model_path = PathBuf::from(path);
    }

    config
}

pub fn insight_config_from_env() -> InsightConfig {
    let mut config = InsightConfig {
        api_key: non_empty_var("ATTRITION_LLM_API_KEY")
            .or_else(|| non_empty_var("DEEPSEEK_API_KEY")),
        ..InsightConfig::default()
    };

    if let Some(base_url) = non_empty_var("ATTRITION_LLM_BASE_URL") {
        config.base_url = base_url;
    }
    if let Some(model) = non_empty_var("ATTRITION_LLM_MODEL") {
        config.model = model;
    }
    if let Some(timeout_ms) =
        non_empty_var("ATTRITION_LLM_TIMEOUT_MS").and_then(|raw| raw.parse::<u64>().ok())
    {
        if timeout_ms > 0 {
            config.timeout_ms = timeout_ms;
        }
    }

    config
}

fn non_empty_var(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::with_env_vars;

    #[test]
    fn server_defaults_when_env_missing() {
        let cfg = with_env_vars(
            &[
                ("ATTRITION_ADDR", None),
                ("ATTRITION_PIPELINE_PATH", None),
                ("ATTRITION_MODEL_PATH", None),
            ],
            server_config_from_env,
        );
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.addr.to_string(), DEFAULT_ADDR);
    }

    #[test]
    fn server_reads_overrides_and_ignores_bad_addr() {
        let cfg = with_env_vars(
            &[
                ("ATTRITION_ADDR", Some("not-an-addr")),
                ("ATTRITION_PIPELINE_PATH", Some("/tmp/p.json")),
                ("ATTRITION_MODEL_PATH", Some("  ")),
            ],
            server_config_from_env,
        );
        assert_eq!(cfg.addr, ServerConfig::default().addr);
        assert_eq!(cfg.pipeline_path, PathBuf::from("/tmp/p.json"));
        assert_eq!(cfg.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
    }

    #[test]
    fn insight_key_falls_back_to_vendor_variable() {
        let cfg = with_env_vars(
            &[
                ("ATTRITION_LLM_API_KEY", None),
                ("DEEPSEEK_API_KEY", Some("sk-test")),
                ("ATTRITION_LLM_BASE_URL", None),
                ("ATTRITION_LLM_MODEL", Some("other-model")),
                ("ATTRITION_LLM_TIMEOUT_MS", Some("0")),
            ],
            insight_config_from_env,
        );
        assert_eq!(cfg.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.base_url, DEFAULT_LLM_BASE_URL);
        assert_eq!(cfg.model, "other-model");
        assert_eq!(cfg.timeout_ms, DEFAULT_LLM_TIMEOUT_MS);
    }

    #[test]
    fn explicit_key_wins() {
        let cfg = with_env_vars(
            &[
                ("ATTRITION_LLM_API_KEY", Some("primary")),
                ("DEEPSEEK_API_KEY", Some("secondary")),
                ("ATTRITION_LLM_TIMEOUT_MS", Some("1500")),
            ],
            insight_config_from_env,
        );
        assert_eq!(cfg.api_key.as_deref(), Some("primary"));
        assert_eq!(cfg.timeout_ms, 1500);
    }
}
