//! pod-doctor CLI
//!
//! Diagnoses unhealthy pods selected by `app`/`country`/`fleet` labels.
//! Exit status: 0 when every selected pod is healthy, 2 when any pod is
//! unhealthy or the run was interrupted, 1 on a fatal error.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pod_doctor::report::{render, summary_line};
use pod_doctor::{Doctor, DoctorConfig, KubeCluster, LabelQuery, OutputFormat, DEFAULT_NAMESPACE};

/// Read-only diagnostics for unhealthy Kubernetes pods
#[derive(Parser)]
#[command(name = "pod-doctor")]
#[command(about = "Find unhealthy pods and explain why they are failing")]
#[command(version)]
struct Cli {
    /// Namespace to search
    #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Value of the `app` label
    #[arg(long)]
    app: String,

    /// Value of the `country` label
    #[arg(long)]
    country: String,

    /// Value of the `fleet` label
    #[arg(long)]
    fleet: Option<String>,

    /// Path to a TOML config file
    #[arg(long, env = "POD_DOCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Cluster the active kubeconfig context must point at
    #[arg(long)]
    expected_cluster: Option<String>,

    /// Kubeconfig path
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Never call the reasoning service
    #[arg(long)]
    no_escalation: bool,

    /// Output format (text or json)
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("pod_doctor=debug,info")
        } else {
            EnvFilter::new("pod_doctor=info,warn")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = load_config(&cli)?;
    let query = LabelQuery::new(&cli.app, &cli.country, cli.fleet.as_deref())?;

    let cluster = KubeCluster::connect(&config)
        .await
        .context("Failed to connect to the cluster")?;
    let doctor = Doctor::from_config(Arc::new(cluster), &config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning in-flight diagnoses");
            on_signal.cancel();
        }
    });

    let outcome = doctor.run(&cli.namespace, &query, cancel).await?;

    let mut stdout = std::io::stdout().lock();
    if outcome.reports.is_empty() && !outcome.cancelled {
        if cli.format == OutputFormat::Text {
            writeln!(stdout, "No matching pods found.")?;
        }
        return Ok(ExitCode::SUCCESS);
    }
    for report in &outcome.reports {
        let rendered = render(report, cli.format).context("Failed to render report")?;
        if cli.format == OutputFormat::Text {
            write!(stdout, "{rendered}")?;
        } else {
            writeln!(stdout, "{rendered}")?;
        }
    }
    if cli.format == OutputFormat::Text {
        writeln!(stdout, "\n{}", summary_line(&outcome.reports))?;
        if outcome.cancelled {
            writeln!(
                stdout,
                "{}",
                format!("{} unhealthy pods were not diagnosed (interrupted)", outcome.abandoned)
                    .yellow()
            )?;
        }
    }

    info!(
        reports = outcome.reports.len(),
        abandoned = outcome.abandoned,
        "Run complete"
    );
    Ok(if outcome.all_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// File, then environment, then flags. Validated before returning.
fn load_config(cli: &Cli) -> Result<DoctorConfig> {
    let mut config = DoctorConfig::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(cluster) = &cli.expected_cluster {
        config.expected_cluster.clone_from(cluster);
    }
    if let Some(path) = &cli.kubeconfig {
        config.kubeconfig = Some(path.clone());
    }
    if cli.no_escalation {
        config.escalation.enabled = false;
    }
    config.validate()?;
    Ok(config)
}
