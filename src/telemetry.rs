//! Telemetry for the heartbeat
//!
//! Beat reports go out as tracing events; status snapshots can be rendered
//! in Prometheus text exposition format.

use async_trait::async_trait;

use crate::error::AutonomicResult;
use crate::heartbeat::{BeatReport, HeartbeatStatus, TelemetrySink};
use crate::recovery::RecoveryStats;

/// Publishes each beat report as a structured tracing event
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn publish(&self, report: &BeatReport) -> AutonomicResult<()> {
        let unhealthy: Vec<&str> = report
            .subsystems
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name.as_str())
            .collect();

        if report.all_healthy {
            tracing::info!(
                target: "autonomic::telemetry",
                beat = report.beat,
                subsystems = report.subsystems.len(),
                "heartbeat"
            );
        } else {
            tracing::warn!(
                target: "autonomic::telemetry",
                beat = report.beat,
                subsystems = report.subsystems.len(),
                unhealthy = %unhealthy.join(","),
                consecutive_failures = report.consecutive_failures,
                "heartbeat"
            );
        }
        Ok(())
    }
}

fn push_metric(output: &mut String, name: &str, help: &str, kind: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    output.push_str(&format!("{} {}\n\n", name, value));
}

/// Escape a label value for the text exposition format
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Render heartbeat and recovery state as Prometheus text
pub fn render_prometheus(status: &HeartbeatStatus, stats: Option<&RecoveryStats>) -> String {
    let mut output = String::new();

    push_metric(
        &mut output,
        "autonomic_heartbeat_beats_total",
        "Total number of heartbeats run",
        "counter",
        status.beat_count,
    );
    push_metric(
        &mut output,
        "autonomic_heartbeat_running",
        "Whether the heartbeat loop is running",
        "gauge",
        u8::from(status.running),
    );
    push_metric(
        &mut output,
        "autonomic_heartbeat_healthy",
        "Whether the last beat is recent enough",
        "gauge",
        u8::from(status.healthy),
    );
    push_metric(
        &mut output,
        "autonomic_heartbeat_consecutive_failures",
        "Current run of failed beats",
        "gauge",
        status.consecutive_failures,
    );
    push_metric(
        &mut output,
        "autonomic_heartbeat_emergency_heals_total",
        "Emergency self-heal passes triggered by repeated beat failures",
        "counter",
        status.emergency_heals,
    );
    push_metric(
        &mut output,
        "autonomic_heartbeat_interval_seconds",
        "Configured beat interval in seconds",
        "gauge",
        format!("{:.3}", status.interval_secs),
    );
    if let Some(last_beat) = status.last_beat {
        push_metric(
            &mut output,
            "autonomic_heartbeat_last_beat_timestamp_seconds",
            "Unix time of the last beat",
            "gauge",
            last_beat.timestamp(),
        );
    }

    if let Some(report) = &status.last_report {
        output.push_str("# HELP autonomic_subsystem_up Subsystem liveness at the last beat\n");
        output.push_str("# TYPE autonomic_subsystem_up gauge\n");
        for (name, healthy) in &report.subsystems {
            output.push_str(&format!(
                "autonomic_subsystem_up{{subsystem=\"{}\"}} {}\n",
                escape_label(name),
                u8::from(*healthy)
            ));
        }
        output.push('\n');
    }

    if let Some(stats) = stats {
        output.push_str("# HELP autonomic_recovery_actions_total Playbook executions by outcome\n");
        output.push_str("# TYPE autonomic_recovery_actions_total counter\n");
        output.push_str(&format!(
            "autonomic_recovery_actions_total{{outcome=\"success\"}} {}\n",
            stats.successful
        ));
        output.push_str(&format!(
            "autonomic_recovery_actions_total{{outcome=\"failure\"}} {}\n\n",
            stats.failed
        ));
        push_metric(
            &mut output,
            "autonomic_recovery_disabled_playbooks",
            "Playbooks disabled after reaching their retry cap",
            "gauge",
            stats.disabled_playbooks.len(),
        );
    }

    output
}
