//! `cm config validate`/`cm config show`.

use cm_domain::config::Config;

/// Parse and validate the config, printing any issues. Returns `true` when
/// valid (empty issue list).
pub fn validate(config: &Config, config_path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config OK ({})", config_path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    println!("\n{} issue(s) in {}", issues.len(), config_path.display());
    false
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => eprintln!("failed to serialize config: {e}"),
    }
}
