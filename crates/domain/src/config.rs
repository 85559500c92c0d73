//! Configuration loaded from `~/.codemie/config.toml`, overridden by the
//! `CODEMIE_*` environment variables.
//!
//! Split by concern, each sub-config defaulting fully via `serde(default)`,
//! following the aggregating-`Config`-of-sub-configs shape used throughout
//! the wider agent-orchestration ecosystem this crate draws its idiom from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn d_true() -> bool {
    true
}

fn d_data_root() -> String {
    dirs::home_dir()
        .map(|h| h.join(".codemie").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".codemie".into())
}

fn d_proxy_upstream_timeout_secs() -> u64 {
    300
}

fn d_collector_debounce_ms() -> u64 {
    5_000
}

fn d_grace_period_ms() -> u64 {
    2_000
}

fn d_correlator_initial_delay_ms() -> u64 {
    500
}

fn d_correlator_max_delay_ms() -> u64 {
    32_000
}

fn d_correlator_max_attempts() -> u32 {
    8
}

fn d_delta_store_rotation_bytes() -> u64 {
    10 * 1024 * 1024
}

fn d_delta_store_max_rotations() -> u32 {
    3
}

fn d_analytics_cap_bytes() -> usize {
    100 * 1024
}

fn d_error_excluded_tools() -> Vec<String> {
    vec!["shell".into(), "bash".into(), "exec".into()]
}

fn d_transmission_max_attempts() -> u32 {
    3
}

fn d_transmission_retry_base_ms() -> u64 {
    500
}

/// Where an assistant's traffic is authenticated: directly with an API key,
/// or via the SSO proxy path (Proxy Server + credential cache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Direct,
    Sso,
}

/// Where the proxy should write its two injected env vars when it starts an
/// SSO-authenticated session for the child (spec §4.10 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoEnvOverrides {
    pub base_url: String,
    pub api_key: String,
}

impl Default for SsoEnvOverrides {
    fn default() -> Self {
        Self {
            base_url: "CODEMIE_BASE_URL".into(),
            api_key: "CODEMIE_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    pub sso_env_overrides: SsoEnvOverrides,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: String::new(),
            api_key_env: "CODEMIE_API_KEY".into(),
            model: String::new(),
            timeout_ms: 300_000,
            integration_id: None,
            profile_name: None,
            sso_env_overrides: SsoEnvOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub bind_host: String,
    #[serde(default = "d_proxy_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    pub blocked_path_patterns: Vec<String>,
    pub header_injection: HeaderInjectionConfig,
    #[serde(default = "d_analytics_cap_bytes")]
    pub analytics_cap_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            upstream_timeout_secs: d_proxy_upstream_timeout_secs(),
            blocked_path_patterns: vec!["/api/event_logging/batch".into()],
            header_injection: HeaderInjectionConfig::default(),
            analytics_cap_bytes: d_analytics_cap_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderInjectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub dry_run: bool,
    pub collector_endpoint: String,
    #[serde(default = "d_collector_debounce_ms")]
    pub collector_debounce_ms: u64,
    #[serde(default = "d_delta_store_rotation_bytes")]
    pub delta_store_rotation_bytes: u64,
    #[serde(default = "d_delta_store_max_rotations")]
    pub delta_store_max_rotations: u32,
    #[serde(default = "d_correlator_initial_delay_ms")]
    pub correlator_initial_delay_ms: u64,
    #[serde(default = "d_correlator_max_delay_ms")]
    pub correlator_max_delay_ms: u64,
    #[serde(default = "d_correlator_max_attempts")]
    pub correlator_max_attempts: u32,
    #[serde(default = "d_transmission_max_attempts")]
    pub transmission_max_attempts: u32,
    #[serde(default = "d_transmission_retry_base_ms")]
    pub transmission_retry_base_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
            collector_endpoint: "/v1/metrics".into(),
            collector_debounce_ms: d_collector_debounce_ms(),
            delta_store_rotation_bytes: d_delta_store_rotation_bytes(),
            delta_store_max_rotations: d_delta_store_max_rotations(),
            correlator_initial_delay_ms: d_correlator_initial_delay_ms(),
            correlator_max_delay_ms: d_correlator_max_delay_ms(),
            correlator_max_attempts: d_correlator_max_attempts(),
            transmission_max_attempts: d_transmission_max_attempts(),
            transmission_retry_base_ms: d_transmission_retry_base_ms(),
        }
    }
}

/// Per-assistant configuration: which dialect parses its logs, and which
/// tool errors are excluded from the Aggregator's `errors` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub dialect: String,
    #[serde(default = "d_error_excluded_tools")]
    pub error_excluded_tools: Vec<String>,
    /// Overrides the dialect's default guess at where the assistant writes
    /// its own native session log tree. Empty means "ask the parser".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_base_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dialect: String::new(),
            error_excluded_tools: d_error_excluded_tools(),
            sessions_base_dir: None,
            agent_version: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_root: String,
    pub provider: ProviderConfig,
    pub proxy: ProxyConfig,
    pub metrics: MetricsConfig,
    #[serde(default = "d_grace_period_ms")]
    pub grace_period_ms: u64,
    pub agents: HashMap<String, AgentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: d_data_root(),
            provider: ProviderConfig::default(),
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
            grace_period_ms: d_grace_period_ms(),
            agents: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults if the file does not
    /// exist. Malformed TOML is a `Configuration` error.
    pub fn load_from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| crate::error::Error::Configuration(format!("{}: {e}", path.display())))
    }

    /// Apply the `CODEMIE_*` environment toggles enumerated in the external
    /// interfaces section, in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODEMIE_METRICS_DISABLED") {
            if v == "1" {
                self.metrics.enabled = false;
            }
        }
        if let Ok(v) = std::env::var("CODEMIE_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Ok(v) = std::env::var("CODEMIE_API_KEY") {
            self.provider.api_key_env = v;
        }
        if let Ok(v) = std::env::var("CODEMIE_MODEL") {
            self.provider.model = v;
        }
        if let Ok(v) = std::env::var("CODEMIE_PROVIDER") {
            self.provider.kind = match v.as_str() {
                "sso" => ProviderKind::Sso,
                _ => ProviderKind::Direct,
            };
        }
        if let Ok(v) = std::env::var("CODEMIE_TIMEOUT") {
            if let Ok(ms) = v.parse::<u64>() {
                self.provider.timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CODEMIE_INTEGRATION_ID") {
            self.provider.integration_id = Some(v);
        }
        if let Ok(v) = std::env::var("CODEMIE_PROFILE_NAME") {
            self.provider.profile_name = Some(v);
        }
        if let Ok(v) = std::env::var("CODEMIE_DATA_ROOT") {
            self.data_root = v;
        }
    }

    /// Human-readable validation issues; empty means the config is usable.
    /// Errors (vs. warnings) make the CLI's `doctor`/`run` paths exit
    /// non-zero before spawn, per the Configuration-error taxonomy (§7).
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if matches!(self.provider.kind, ProviderKind::Sso) && self.provider.base_url.is_empty() {
            issues.push("provider.base_url is required when provider.kind = sso".into());
        }
        if self.metrics.enabled && self.metrics.collector_endpoint.is_empty() {
            issues.push("metrics.collector_endpoint must not be empty when metrics are enabled".into());
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_host_is_localhost() {
        let config = Config::default();
        assert_eq!(config.proxy.bind_host, "127.0.0.1");
    }

    #[test]
    fn explicit_proxy_host_parses() {
        let toml_str = r#"
[proxy]
bind_host = "0.0.0.0"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.proxy.bind_host, "0.0.0.0");
    }

    #[test]
    fn sso_provider_without_base_url_fails_validation() {
        let mut config = Config::default();
        config.provider.kind = ProviderKind::Sso;
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_file(std::path::Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.data_root, Config::default().data_root);
    }
}
