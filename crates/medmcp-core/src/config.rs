use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use medmcp_provider::{ProviderConfig, ProviderType};
use medmcp_schema::ProviderTag;
use serde::{Deserialize, Serialize};

/// Consulted when the configured provider key resolves to an empty string.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Longest accepted idle TTL: 30 days.
pub const MAX_IDLE_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "medmcp".to_string(),
            env: "dev".to_string(),
        }
    }
}

fn default_max_sessions() -> usize {
    1000
}

fn default_idle_ttl_seconds() -> i64 {
    2 * 60 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions untouched for longer than this are evicted on access.
    #[serde(default = "default_idle_ttl_seconds")]
    pub idle_ttl_seconds: i64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_ttl_seconds: default_idle_ttl_seconds(),
        }
    }
}

fn default_ai_timeout_ms() -> u64 {
    15_000
}

fn default_low_confidence_threshold() -> f64 {
    0.6
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_event_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_ai_timeout_ms")]
    pub ai_timeout_ms: u64,
    /// Degraded recommendations never report a confidence above this.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub default_provider: ProviderTag,
}

impl OrchestratorConfig {
    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai_timeout_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ai_timeout_ms: default_ai_timeout_ms(),
            low_confidence_threshold: default_low_confidence_threshold(),
            max_concurrent_calls: default_max_concurrent_calls(),
            event_capacity: default_event_capacity(),
            default_provider: ProviderTag::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_provider_config() -> ProviderConfig {
    ProviderConfig::new("gemini", ProviderType::Gemini)
        .with_api_key(format!("${{{}}}", API_KEY_ENV))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default = "default_provider_config")]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sessions: SessionStoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            provider: default_provider_config(),
            sessions: SessionStoreConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl McpConfig {
    /// Defaults with `${VAR}` placeholders resolved, for running without a
    /// config file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        resolve_config_env(&mut config);
        config
    }
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(root: &Path) -> Result<McpConfig> {
    let mut config: McpConfig = read_yaml_file(&root.join("main.yaml"))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &McpConfig) -> Result<()> {
    if config.sessions.max_sessions == 0 {
        return Err(anyhow!("sessions.max_sessions must be at least 1"));
    }
    if !(1..=MAX_IDLE_TTL_SECONDS).contains(&config.sessions.idle_ttl_seconds) {
        return Err(anyhow!(
            "sessions.idle_ttl_seconds must be within 1..={MAX_IDLE_TTL_SECONDS}, got {}",
            config.sessions.idle_ttl_seconds
        ));
    }
    if config.orchestrator.ai_timeout_ms == 0 {
        return Err(anyhow!("orchestrator.ai_timeout_ms must be positive"));
    }
    if !(0.0..=1.0).contains(&config.orchestrator.low_confidence_threshold) {
        return Err(anyhow!(
            "orchestrator.low_confidence_threshold must be within 0.0..=1.0, got {}",
            config.orchestrator.low_confidence_threshold
        ));
    }
    if config.orchestrator.max_concurrent_calls == 0 {
        return Err(anyhow!("orchestrator.max_concurrent_calls must be at least 1"));
    }
    if config.orchestrator.event_capacity == 0 {
        return Err(anyhow!("orchestrator.event_capacity must be at least 1"));
    }
    if config.provider.model.trim().is_empty() {
        return Err(anyhow!("provider.model must not be empty"));
    }
    if config.provider.max_tokens == Some(0) {
        return Err(anyhow!("provider.max_tokens must be at least 1"));
    }
    if let Some(temperature) = config.provider.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(anyhow!(
                "provider.temperature must be within 0.0..=2.0, got {temperature}"
            ));
        }
    }
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut McpConfig) {
    config.app.name = resolve_env_var(&config.app.name);
    config.app.env = resolve_env_var(&config.app.env);
    config.server.bind = resolve_env_var(&config.server.bind);

    let provider = &mut config.provider;
    provider.id = resolve_env_var(&provider.id);
    provider.model = resolve_env_var(&provider.model);
    if let Some(base_url) = &mut provider.base_url {
        *base_url = resolve_env_var(base_url);
    }
    let key = provider
        .api_key
        .as_deref()
        .map(resolve_env_var)
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()));
    provider.api_key = key;
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn fixture_config_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    #[test]
    fn load_config_from_workspace_fixtures() {
        let config = load_config(&fixture_config_root()).unwrap();
        assert_eq!(config.app.name, "medmcp");
        assert_eq!(config.provider.id, "gemini");
        assert_eq!(config.provider.provider_type, ProviderType::Gemini);
        assert_eq!(config.orchestrator.ai_timeout_ms, 15_000);
        assert_eq!(config.sessions.max_sessions, 500);
        assert_eq!(config.provider.max_tokens, Some(2048));
        assert_eq!(config.provider.temperature, Some(0.3));
    }

    #[test]
    fn load_config_minimal_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.yaml"), "app:\n  name: clinic\n  env: test\n").unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.app.name, "clinic");
        assert_eq!(config.sessions.idle_ttl_seconds, 7200);
        assert_eq!(config.orchestrator.low_confidence_threshold, 0.6);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn load_config_missing_file_reports_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn validate_config_rejects_out_of_range_threshold() {
        let mut config = McpConfig::default();
        config.orchestrator.low_confidence_threshold = 60.0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("low_confidence_threshold"));
    }

    #[test]
    fn validate_config_rejects_zero_capacity() {
        let mut config = McpConfig::default();
        config.sessions.max_sessions = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validate_config_checks_generation_settings() {
        let mut config = McpConfig::default();
        config.provider.temperature = Some(3.5);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("provider.temperature"));

        config.provider.temperature = Some(0.3);
        config.provider.max_tokens = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validate_config_bounds_idle_ttl() {
        let mut config = McpConfig::default();
        config.sessions.idle_ttl_seconds = i64::MAX / 100;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("idle_ttl_seconds"));

        config.sessions.idle_ttl_seconds = 0;
        assert!(validate_config(&config).is_err());

        config.sessions.idle_ttl_seconds = MAX_IDLE_TTL_SECONDS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn resolve_env_var_replaces_env_placeholder() {
        let expected = std::env::var("PATH").unwrap();
        assert_eq!(resolve_env_var("${PATH}"), expected);
    }

    #[test]
    fn resolve_env_var_returns_raw_when_not_placeholder() {
        assert_eq!(resolve_env_var("plain-value"), "plain-value");
    }

    #[test]
    fn resolve_env_var_unclosed_bracket() {
        assert_eq!(resolve_env_var("prefix_${UNCLOSED"), "prefix_${UNCLOSED");
    }

    #[test]
    fn resolve_env_var_missing_env_returns_empty() {
        let result = resolve_env_var("val=${MEDMCP_NONEXISTENT_VAR_XYZ}");
        assert_eq!(result, "val=");
    }

    #[test]
    fn blank_api_key_resolves_to_none_without_env() {
        let mut config = McpConfig::default();
        config.provider.api_key = Some("${MEDMCP_NONEXISTENT_KEY_XYZ}".into());
        resolve_config_env(&mut config);
        // Falls back to GEMINI_API_KEY, which may or may not be set here.
        assert_eq!(
            config.provider.api_key,
            std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty())
        );
    }
}
