use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutonomicError {
    #[error("Subsystem '{0}' probe failed: {1}")]
    ProbeFailed(String, String),

    #[error("Subsystem '{0}' heal failed: {1}")]
    HealFailed(String, String),

    #[error("Cycle '{0}' failed: {1}")]
    CycleFailed(String, String),

    #[error("Step '{0}' failed: {1}")]
    StepFailed(String, String),

    #[error("Shell command exited with status {0}: {1}")]
    ShellFailed(i32, String),

    #[error("HTTP call failed: {0}")]
    HttpFailed(String),

    #[error("Health check target '{0}' is not registered")]
    UnknownHealthTarget(String),

    #[error("Health check for '{0}' reported unhealthy")]
    HealthCheckFailed(String),

    #[error("Playbook '{0}' not found")]
    PlaybookNotFound(String),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AutonomicResult<T> = Result<T, AutonomicError>;

impl From<reqwest::Error> for AutonomicError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AutonomicError::HttpFailed(format!("timeout: {}", err))
        } else {
            AutonomicError::HttpFailed(err.to_string())
        }
    }
}
