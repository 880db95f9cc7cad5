//! Report rendering.
//!
//! Text output is meant for a terminal and uses color when it is enabled.
//! JSON output is one object per line, one line per pod.

use std::fmt::Write as _;

use colored::Colorize;
use serde::Serialize;

use crate::classify::Health;
use crate::model::ForensicBundle;
use crate::rules::Diagnosis;

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Everything reported for one pod
#[derive(Debug, Clone, Serialize)]
pub struct PodReport {
    pub pod: String,
    pub namespace: String,
    pub health: Health,
    /// Present only for unhealthy pods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    /// Evidence behind the diagnosis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<ForensicBundle>,
}

impl PodReport {
    pub fn is_healthy(&self) -> bool {
        self.health.healthy
    }
}

/// Render one report in the requested format.
pub fn render(report: &PodReport, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => serde_json::to_string(report),
    }
}

pub fn render_text(report: &PodReport) -> String {
    let mut out = String::new();

    if report.health.healthy {
        let _ = writeln!(out, "- {} {}", "[HEALTHY]".green(), report.pod);
        return out;
    }

    let _ = writeln!(
        out,
        "- {} {} - Reason: {}",
        "[UNHEALTHY]".red().bold(),
        report.pod,
        report.health.reason
    );

    if let Some(bundle) = &report.bundle {
        out.push_str("\n  Recent Events:\n");
        let mut events: Vec<_> = bundle.all_events().collect();
        events.sort_by_key(|e| e.last_seen);
        if bundle.pod_events.is_none() && bundle.node_events.is_none() {
            out.push_str("    Could not retrieve events.\n");
        } else if events.is_empty() {
            out.push_str("    No recent events found.\n");
        }
        for event in events {
            let _ = writeln!(out, "    {}", event.summary_line());
        }

        out.push_str("\n  Logs from Crashed Containers:\n");
        match &bundle.log_tail {
            Some(logs) => {
                let _ = writeln!(out, "    --- Logs for container '{}' ---", logs.container);
                for line in logs.text.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
            None => out.push_str("    No logs from terminated containers found.\n"),
        }

        if let Some(node) = &bundle.node {
            let _ = writeln!(out, "\n  Node: {} (Ready: {})", node.name, node.ready());
            for pressure in node.active_pressures() {
                let _ = writeln!(out, "    {} is True", pressure.condition_type.yellow());
            }
        }
    }

    if let Some(diagnosis) = &report.diagnosis {
        out.push_str("\n  ==================== DIAGNOSIS ====================\n");
        let _ = writeln!(out, "  Cause:          {}", diagnosis.cause.to_string().bold());
        let _ = writeln!(out, "  Diagnosis:      {}", diagnosis.explanation);
        let _ = writeln!(out, "  Recommendation: {}", diagnosis.recommendation);
        let _ = writeln!(out, "  Source:         {}", diagnosis.source);
        out.push_str("  ===================================================\n");
    }

    out
}

/// One-line tally printed after the per-pod reports in text mode.
pub fn summary_line(reports: &[PodReport]) -> String {
    let unhealthy = reports.iter().filter(|r| !r.is_healthy()).count();
    let line = format!(
        "{} pods analyzed: {} healthy, {} unhealthy",
        reports.len(),
        reports.len() - unhealthy,
        unhealthy
    );
    if unhealthy == 0 {
        line.green().to_string()
    } else {
        line.red().to_string()
    }
}
