use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autonomic::{
    recovery::RuntimeOverrides, AutonomicConfig, AutonomicError, AutonomicResult, AutonomousCycle,
    CycleKind, Diagnostics, DryRunStepHandler, HealStrategy, Heartbeat, StepHandler, Subsystem,
    SystemStepHandler, TracingTelemetry,
};

#[derive(Parser, Debug)]
#[command(name = "autonomic")]
#[command(about = "Heartbeat and self-healing supervisor", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the beat interval in seconds
    #[arg(long)]
    interval_secs: Option<f64>,

    /// Log playbook side effects instead of running them
    #[arg(long)]
    dry_run: bool,

    /// HTTP liveness probe to supervise (e.g., --probe api=http://127.0.0.1:8080/health)
    #[arg(long = "probe")]
    probes: Vec<String>,
}

/// Subsystem probed with an HTTP GET; a 2xx response means alive
struct HttpProbe {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    fn parse(spec: &str, client: reqwest::Client) -> anyhow::Result<Self> {
        let (name, url) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid probe '{}', expected name=url", spec))?;
        Ok(Self {
            name: name.trim().to_string(),
            url: url.trim().to_string(),
            client,
        })
    }
}

#[async_trait]
impl Subsystem for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn heal_strategy(&self) -> HealStrategy {
        HealStrategy::Reconnect
    }

    async fn check(&self) -> AutonomicResult<bool> {
        match self.client.get(&self.url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
            Err(e) => Err(AutonomicError::ProbeFailed(self.name.clone(), e.to_string())),
        }
    }

    async fn heal(&self) -> AutonomicResult<bool> {
        // Nothing to rebuild for a remote endpoint; succeed once it answers again
        self.check().await
    }
}

/// Logs recurring failure patterns with prevention advice
struct PatternReview(Arc<Diagnostics>);

#[async_trait]
impl AutonomousCycle for PatternReview {
    async fn run(&self) -> AutonomicResult<String> {
        let suggestions = self.0.suggestions();
        for (pattern, advice) in &suggestions {
            tracing::warn!(
                "Recurring failure {}/{} ({}x): {}",
                pattern.component,
                pattern.error_type,
                pattern.count,
                advice
            );
        }
        Ok(format!("{} recurring patterns", suggestions.len()))
    }
}

/// Logs the overall ledger status
struct LedgerReview(Arc<Diagnostics>);

#[async_trait]
impl AutonomousCycle for LedgerReview {
    async fn run(&self) -> AutonomicResult<String> {
        let summary = self.0.ledger_summary().await;
        let stats = self.0.recovery_stats().await;
        Ok(format!(
            "status {}, {}/{} active signals, {} recoveries ({} failed)",
            summary.status,
            summary.active_signals,
            summary.total_signals,
            stats.total_actions,
            stats.failed
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AutonomicConfig::from_file(path)?,
        None => AutonomicConfig::default(),
    };
    if let Some(interval) = args.interval_secs {
        config.heartbeat.interval_secs = interval;
    }
    if args.dry_run {
        config.recovery.dry_run = true;
    }
    config.validate()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.clone().into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.recovery.http_timeout_secs))
        .build()?;
    let probes: Vec<Arc<dyn Subsystem>> = args
        .probes
        .iter()
        .map(|spec| HttpProbe::parse(spec, client.clone()).map(|p| Arc::new(p) as Arc<dyn Subsystem>))
        .collect::<anyhow::Result<_>>()?;

    let handler: Arc<dyn StepHandler> = if config.recovery.dry_run {
        tracing::info!("Recovery running in dry-run mode");
        Arc::new(DryRunStepHandler)
    } else {
        let mut system = SystemStepHandler::new(Duration::from_secs(
            config.recovery.http_timeout_secs,
        ))?
        .with_overrides(RuntimeOverrides::new());
        for probe in &probes {
            system = system.with_probe(probe.clone());
        }
        Arc::new(system)
    };

    let diagnostics = Arc::new(Diagnostics::from_config(&config, handler));
    tracing::info!(
        "Loaded {} playbooks",
        diagnostics.playbook_states().await.len()
    );

    let mut heartbeat = Heartbeat::new(config.heartbeat.clone())
        .with_diagnostics(diagnostics.clone())
        .with_telemetry(Arc::new(TracingTelemetry))
        .with_cycle(CycleKind::Reflection, Arc::new(LedgerReview(diagnostics.clone())))
        .with_cycle(CycleKind::Consolidation, Arc::new(PatternReview(diagnostics.clone())));
    for probe in probes {
        heartbeat = heartbeat.with_subsystem(probe);
    }

    heartbeat.start();
    shutdown_signal().await?;

    tracing::info!("Shutdown signal received, stopping heartbeat...");
    heartbeat.stop().await;
    let status = heartbeat.status();
    tracing::info!(
        "Shutdown complete after {} beats ({} emergency heals)",
        status.beat_count,
        status.emergency_heals
    );
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
