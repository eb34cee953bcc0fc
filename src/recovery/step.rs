//! Step handlers
//!
//! The executor runs `log` and `wait` steps itself. The side-effecting kinds
//! (`shell`, `api_call`, `config_update`, `health_check`) go through a
//! [`StepHandler`], so hosts decide whether they are performed or only
//! described.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AutonomicError, AutonomicResult};
use crate::heartbeat::hooks::Subsystem;

/// Binds side-effecting playbook steps to real actions
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run_shell(&self, command: &str, timeout: Duration) -> AutonomicResult<()>;

    async fn call_api(
        &self,
        method: &str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> AutonomicResult<()>;

    async fn update_config(&self, key: &str, value: &serde_json::Value) -> AutonomicResult<()>;

    async fn health_check(&self, target: &str) -> AutonomicResult<()>;
}

/// Describes every action through tracing and reports success
#[derive(Debug, Default, Clone)]
pub struct DryRunStepHandler;

#[async_trait]
impl StepHandler for DryRunStepHandler {
    async fn run_shell(&self, command: &str, timeout: Duration) -> AutonomicResult<()> {
        tracing::info!(
            "[dry-run] would run shell command '{}' (timeout {}s)",
            command,
            timeout.as_secs()
        );
        Ok(())
    }

    async fn call_api(
        &self,
        method: &str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> AutonomicResult<()> {
        match body {
            Some(body) => tracing::info!("[dry-run] would call {} {} with {}", method, url, body),
            None => tracing::info!("[dry-run] would call {} {}", method, url),
        }
        Ok(())
    }

    async fn update_config(&self, key: &str, value: &serde_json::Value) -> AutonomicResult<()> {
        tracing::info!("[dry-run] would set config {} = {}", key, value);
        Ok(())
    }

    async fn health_check(&self, target: &str) -> AutonomicResult<()> {
        tracing::info!("[dry-run] would health-check '{}'", target);
        Ok(())
    }
}

/// Runtime configuration overrides written by `config_update` steps
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl RuntimeOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: serde_json::Value) -> Option<serde_json::Value> {
        self.values.write().insert(key.to_string(), value)
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.values.read().clone()
    }
}

/// Performs steps for real: `sh -c` for shell, reqwest for HTTP, an
/// in-memory override map for config, and registered subsystems for health checks
pub struct SystemStepHandler {
    http: reqwest::Client,
    overrides: RuntimeOverrides,
    probes: HashMap<String, Arc<dyn Subsystem>>,
}

impl SystemStepHandler {
    pub fn new(http_timeout: Duration) -> AutonomicResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| AutonomicError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            overrides: RuntimeOverrides::new(),
            probes: HashMap::new(),
        })
    }

    /// Share an override map with the host
    pub fn with_overrides(mut self, overrides: RuntimeOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Make a subsystem reachable as a `health_check` target under its name
    pub fn with_probe(mut self, subsystem: Arc<dyn Subsystem>) -> Self {
        self.probes.insert(subsystem.name().to_string(), subsystem);
        self
    }

    pub fn overrides(&self) -> &RuntimeOverrides {
        &self.overrides
    }
}

#[async_trait]
impl StepHandler for SystemStepHandler {
    async fn run_shell(&self, command: &str, timeout: Duration) -> AutonomicResult<()> {
        tracing::info!("Running shell step: {}", command);
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| AutonomicError::Timeout(timeout.as_secs()))??;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(AutonomicError::ShellFailed(
                output.status.code().unwrap_or(-1),
                stderr,
            ))
        }
    }

    async fn call_api(
        &self,
        method: &str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> AutonomicResult<()> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| AutonomicError::HttpFailed(format!("invalid method '{}'", method)))?;

        tracing::info!("Calling {} {}", method, url);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }

    async fn update_config(&self, key: &str, value: &serde_json::Value) -> AutonomicResult<()> {
        let previous = self.overrides.set(key, value.clone());
        tracing::info!(
            "Config override {} = {} (was {})",
            key,
            value,
            previous
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unset".to_string())
        );
        Ok(())
    }

    async fn health_check(&self, target: &str) -> AutonomicResult<()> {
        let probe = self
            .probes
            .get(target)
            .ok_or_else(|| AutonomicError::UnknownHealthTarget(target.to_string()))?;

        if probe.check().await? {
            Ok(())
        } else {
            Err(AutonomicError::HealthCheckFailed(target.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::hooks::HealStrategy;

    struct FixedProbe {
        name: &'static str,
        healthy: bool,
    }

    #[async_trait]
    impl Subsystem for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }

        fn heal_strategy(&self) -> HealStrategy {
            HealStrategy::Reconnect
        }

        async fn check(&self) -> AutonomicResult<bool> {
            Ok(self.healthy)
        }

        async fn heal(&self) -> AutonomicResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_dry_run_always_succeeds() {
        let handler = DryRunStepHandler;
        assert!(handler
            .run_shell("rm -rf /definitely-not", Duration::from_secs(1))
            .await
            .is_ok());
        assert!(handler.call_api("POST", "http://invalid", None).await.is_ok());
        assert!(handler.health_check("anything").await.is_ok());
    }

    #[tokio::test]
    async fn test_config_update_writes_override() {
        let overrides = RuntimeOverrides::new();
        let handler = SystemStepHandler::new(Duration::from_secs(1))
            .unwrap()
            .with_overrides(overrides.clone());

        handler
            .update_config("llm.fallback_enabled", &serde_json::json!(true))
            .await
            .unwrap();
        assert_eq!(
            overrides.get("llm.fallback_enabled"),
            Some(serde_json::json!(true))
        );
    }

    #[tokio::test]
    async fn test_health_check_uses_probes() {
        let handler = SystemStepHandler::new(Duration::from_secs(1))
            .unwrap()
            .with_probe(Arc::new(FixedProbe {
                name: "memory",
                healthy: true,
            }))
            .with_probe(Arc::new(FixedProbe {
                name: "llm",
                healthy: false,
            }));

        assert!(handler.health_check("memory").await.is_ok());
        assert!(matches!(
            handler.health_check("llm").await,
            Err(AutonomicError::HealthCheckFailed(_))
        ));
        assert!(matches!(
            handler.health_check("disk").await,
            Err(AutonomicError::UnknownHealthTarget(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_exit_status() {
        let handler = SystemStepHandler::new(Duration::from_secs(1)).unwrap();
        assert!(handler
            .run_shell("true", Duration::from_secs(5))
            .await
            .is_ok());

        let err = handler
            .run_shell("echo boom >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            AutonomicError::ShellFailed(code, stderr) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_http_method() {
        let handler = SystemStepHandler::new(Duration::from_secs(1)).unwrap();
        let err = handler
            .call_api("NOT A METHOD", "http://127.0.0.1:1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AutonomicError::HttpFailed(_)));
    }
}
