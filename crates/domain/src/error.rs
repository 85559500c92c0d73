/// Shared error type used across every `cm-*` crate.
///
/// Variants follow the error taxonomy of kinds, not type names: each one
/// corresponds to a stage of the orchestrator pipeline and carries enough
/// context for the lifecycle controller to decide whether the failure is
/// fatal to the child process or merely advisory to the metrics pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("spawn: {0}")]
    Spawn(String),

    #[error("proxy: {0}")]
    Proxy(String),

    #[error("correlation: {0}")]
    Correlation(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("transmission: {0}")]
    Transmission(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
