use clap::{Parser, Subcommand};

/// codemie-core — wraps an AI coding assistant with a local metrics
/// pipeline and reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "cm", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the wrapped assistant (default when no subcommand is given).
    Run {
        /// Agent name, matching a key under `[agents]` in the config file.
        #[arg(long, default_value = "claude-code")]
        agent: String,
        /// Program to spawn as the assistant process.
        program: String,
        /// Arguments forwarded to the assistant process.
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Resolve the config file path: `CODEMIE_CONFIG_PATH`, else
/// `~/.codemie/config.toml`.
pub fn config_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("CODEMIE_CONFIG_PATH") {
        return std::path::PathBuf::from(path);
    }
    dirs::home_dir().map(|h| h.join(".codemie").join("config.toml")).unwrap_or_else(|| std::path::PathBuf::from("config.toml"))
}

/// Load the config from `config_path()`, apply the `CODEMIE_*` env
/// overrides, and return it alongside the path it was (or would have been)
/// read from.
pub fn load_config() -> anyhow::Result<(cm_domain::config::Config, std::path::PathBuf)> {
    let path = config_path();
    let mut config = cm_domain::config::Config::load_from_file(&path)?;
    config.apply_env_overrides();
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_under_home() {
        std::env::remove_var("CODEMIE_CONFIG_PATH");
        let path = config_path();
        assert!(path.ends_with(".codemie/config.toml"));
    }

    #[test]
    fn config_path_honors_env_override() {
        std::env::set_var("CODEMIE_CONFIG_PATH", "/tmp/custom-config.toml");
        assert_eq!(config_path(), std::path::PathBuf::from("/tmp/custom-config.toml"));
        std::env::remove_var("CODEMIE_CONFIG_PATH");
    }
}
