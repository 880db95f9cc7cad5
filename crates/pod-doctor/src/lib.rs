//! Read-only diagnostics for unhealthy Kubernetes pods.
//!
//! Given a namespace and a label query, this crate classifies every matching
//! pod as healthy or unhealthy, collects forensic evidence for the unhealthy
//! ones and explains the most likely root cause.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pod_doctor::{DoctorConfig, Doctor, KubeCluster, LabelQuery};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), pod_doctor::DoctorError> {
//! let mut config = DoctorConfig::load(None)?;
//! config.apply_env();
//! config.validate()?;
//!
//! let cluster = KubeCluster::connect(&config).await?;
//! let doctor = Doctor::from_config(Arc::new(cluster), &config)?;
//! let query = LabelQuery::new("checkout", "de", None)?;
//!
//! let outcome = doctor.run("shop", &query, CancellationToken::new()).await?;
//! for report in &outcome.reports {
//!     println!("{}", pod_doctor::report::render_text(report));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`select`] lists pods through a [`ClusterReader`]
//! - [`classify`] decides health from a status snapshot
//! - [`Aggregator`] gathers events, logs and node state into a [`ForensicBundle`]
//! - [`RuleEngine`] matches known failure patterns in priority order
//! - [`Escalator`] asks a [`Reasoner`] when no rule matched
//!
//! Nothing in this crate writes to the cluster. The kube-backed reader is
//! only constructed after the active kubeconfig context is confirmed to
//! point at the expected cluster.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod cluster;
pub mod config;
pub mod error;
pub mod escalate;
pub mod gather;
pub mod model;
pub mod pipeline;
pub mod reasoner;
pub mod report;
pub mod rules;
pub mod selector;

#[cfg(test)]
mod testing;

pub use classify::{classify, Health};
pub use cluster::{ClusterReader, KubeCluster, LogGeneration};
pub use config::{DoctorConfig, EscalationConfig};
pub use error::{ClusterError, DoctorError, ReasonerError};
pub use escalate::Escalator;
pub use gather::{Aggregator, GatherSettings};
pub use model::ForensicBundle;
pub use pipeline::{Doctor, RunOutcome};
pub use reasoner::{AnthropicReasoner, Reasoner};
pub use report::{OutputFormat, PodReport};
pub use rules::{Cause, Diagnosis, RuleEngine, Source, Verdict};
pub use selector::{select, LabelQuery, DEFAULT_NAMESPACE};
