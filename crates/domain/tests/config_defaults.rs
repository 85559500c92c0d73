use cm_domain::config::{Config, ProviderKind};

#[test]
fn default_proxy_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.proxy.bind_host, "127.0.0.1");
}

#[test]
fn explicit_zero_host_parses() {
    let toml_str = r#"
[proxy]
bind_host = "0.0.0.0"
upstream_timeout_secs = 120
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.proxy.bind_host, "0.0.0.0");
    assert_eq!(config.proxy.upstream_timeout_secs, 120);
}

#[test]
fn default_provider_kind_is_direct() {
    let config = Config::default();
    assert_eq!(config.provider.kind, ProviderKind::Direct);
}

#[test]
fn correlator_schedule_matches_spec_defaults() {
    let config = Config::default();
    assert_eq!(config.metrics.correlator_initial_delay_ms, 500);
    assert_eq!(config.metrics.correlator_max_delay_ms, 32_000);
    assert_eq!(config.metrics.correlator_max_attempts, 8);
}
