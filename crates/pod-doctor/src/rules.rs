//! Rule-based diagnosis engine.
//!
//! Rules are an ordered list evaluated by a single first-match loop. Earlier
//! categories always win over later ones, however many later rules would
//! also match:
//! 1. Container state (OOMKilled, image pull failures)
//! 2. Infrastructure events (scheduling, mounts, node loss)
//! 3. Application errors in the crashed container's log tail
//!
//! When nothing matches the engine says so explicitly with [`Verdict::NoMatch`].
//! Evaluation is pure: no cluster calls, no state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::model::ForensicBundle;

/// Short classification label for a diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "signal", rename_all = "kebab-case")]
pub enum Cause {
    OutOfMemory,
    ImagePullFailure,
    /// Infrastructure problem, keyed by the event keyword that matched
    Infrastructure(String),
    /// Application error, keyed by the log keyword that matched
    ApplicationError(String),
    /// Cause named by the reasoning service
    Escalated,
    Undetermined,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::ImagePullFailure => f.write_str("image pull failure"),
            Self::Infrastructure(keyword) => write!(f, "infrastructure({keyword})"),
            Self::ApplicationError(keyword) => write!(f, "application-error({keyword})"),
            Self::Escalated => f.write_str("escalated analysis"),
            Self::Undetermined => f.write_str("undetermined"),
        }
    }
}

/// Where a diagnosis came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Rule,
    Escalated,
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rule => "rule",
            Self::Escalated => "escalated",
            Self::Fallback => "fallback",
        })
    }
}

/// Root-cause diagnosis for one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub cause: Cause,
    pub explanation: String,
    pub recommendation: String,
    pub source: Source,
}

impl Diagnosis {
    pub fn from_rule(
        cause: Cause,
        explanation: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            cause,
            explanation: explanation.into(),
            recommendation: recommendation.into(),
            source: Source::Rule,
        }
    }
}

/// Result of running the rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match(Diagnosis),
    NoMatch,
}

/// Priority band of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleCategory {
    ContainerState,
    Infrastructure,
    ApplicationError,
}

/// One entry in the ordered rule list
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub category: RuleCategory,
    evaluate: fn(&ForensicBundle) -> Option<Diagnosis>,
}

impl Rule {
    pub const fn new(
        name: &'static str,
        category: RuleCategory,
        evaluate: fn(&ForensicBundle) -> Option<Diagnosis>,
    ) -> Self {
        Self {
            name,
            category,
            evaluate,
        }
    }

    pub fn evaluate(&self, bundle: &ForensicBundle) -> Option<Diagnosis> {
        (self.evaluate)(bundle)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// A keyword and what it means when found
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub keyword: &'static str,
    pub explanation: &'static str,
    pub recommendation: &'static str,
}

/// Infrastructure keywords, in priority order
pub const INFRASTRUCTURE_SIGNATURES: &[Signature] = &[
    Signature {
        keyword: "FailedScheduling",
        explanation: "The pod could not be scheduled onto a node.",
        recommendation: "This is often due to insufficient resources (CPU, memory) or node taints. Check `kubectl describe node`.",
    },
    Signature {
        keyword: "FailedMount",
        explanation: "The pod failed to mount a required volume.",
        recommendation: "Verify that the volume exists in the namespace and is correctly named in the pod definition.",
    },
    Signature {
        keyword: "NodeNotReady",
        explanation: "The node hosting the pod is not ready.",
        recommendation: "Check the node's kubelet, container runtime and pressure conditions; the pod may need to be rescheduled.",
    },
    Signature {
        keyword: "NodeLost",
        explanation: "The node hosting the pod stopped reporting to the control plane.",
        recommendation: "Investigate the node's health and network connectivity; workloads on it will be evicted once it is declared lost.",
    },
];

/// Application log keywords, in priority order
pub const APPLICATION_SIGNATURES: &[Signature] = &[
    Signature {
        keyword: "connection refused",
        explanation: "The application is crashing because it cannot connect to another service.",
        recommendation: "Verify that the upstream service (e.g., database, API) is running and accessible.",
    },
    Signature {
        keyword: "file not found",
        explanation: "The application is crashing because a required file is missing.",
        recommendation: "Check that all necessary configuration files or scripts are correctly mounted.",
    },
    Signature {
        keyword: "no such file or directory",
        explanation: "The application is crashing because a required file is missing.",
        recommendation: "Check that all necessary configuration files or scripts are correctly mounted.",
    },
    Signature {
        keyword: "permission denied",
        explanation: "The application is crashing due to a file system permission error.",
        recommendation: "Check the user/group the container is running as and ensure it has correct permissions.",
    },
];

const IMAGE_PULL_REASONS: &[&str] = &["ImagePullBackOff", "ErrImagePull"];

/// Case-insensitive substring match.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn oom_killed(bundle: &ForensicBundle) -> Option<Diagnosis> {
    let cs = bundle.pod.containers().iter().find(|cs| {
        cs.state.reason() == Some("OOMKilled")
            || cs
                .last_termination
                .as_ref()
                .and_then(|t| t.reason.as_deref())
                == Some("OOMKilled")
    })?;
    Some(Diagnosis::from_rule(
        Cause::OutOfMemory,
        format!(
            "Container '{}' was terminated because it exceeded its memory limit.",
            cs.name
        ),
        "Increase the memory limit for this pod in your deployment's resource requests/limits.",
    ))
}

fn image_pull_failure(bundle: &ForensicBundle) -> Option<Diagnosis> {
    let cs = bundle.pod.containers().iter().find(|cs| {
        cs.state
            .waiting_reason()
            .is_some_and(|r| IMAGE_PULL_REASONS.contains(&r))
    })?;
    let explanation = match &cs.image {
        Some(image) => format!(
            "Kubernetes failed to pull the image '{image}' for container '{}'.",
            cs.name
        ),
        None => format!(
            "Kubernetes failed to pull the container image for container '{}'.",
            cs.name
        ),
    };
    Some(Diagnosis::from_rule(
        Cause::ImagePullFailure,
        explanation,
        "Check that the image name and tag are correct and that the cluster has credentials to pull from the registry.",
    ))
}

fn infrastructure_events(bundle: &ForensicBundle) -> Option<Diagnosis> {
    INFRASTRUCTURE_SIGNATURES.iter().find_map(|sig| {
        let event = bundle.all_events().find(|e| {
            contains_ignore_case(&e.reason, sig.keyword)
                || contains_ignore_case(&e.message, sig.keyword)
        })?;
        debug!(keyword = sig.keyword, object = %event.involved_object.name, "Infrastructure event matched");
        Some(Diagnosis::from_rule(
            Cause::Infrastructure(sig.keyword.to_string()),
            format!("{} Event: {}", sig.explanation, event.message),
            sig.recommendation,
        ))
    })
}

fn application_log_errors(bundle: &ForensicBundle) -> Option<Diagnosis> {
    let logs = bundle.log_tail.as_ref()?;
    let text = logs.text.to_lowercase();
    APPLICATION_SIGNATURES
        .iter()
        .find(|sig| text.contains(sig.keyword))
        .map(|sig| {
            Diagnosis::from_rule(
                Cause::ApplicationError(sig.keyword.to_string()),
                format!(
                    "{} Found \"{}\" in the logs of container '{}'.",
                    sig.explanation, sig.keyword, logs.container
                ),
                sig.recommendation,
            )
        })
}

/// The built-in rule list, highest priority first
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new("oom-killed", RuleCategory::ContainerState, oom_killed),
        Rule::new(
            "image-pull-failure",
            RuleCategory::ContainerState,
            image_pull_failure,
        ),
        Rule::new(
            "infrastructure-events",
            RuleCategory::Infrastructure,
            infrastructure_events,
        ),
        Rule::new(
            "application-log-errors",
            RuleCategory::ApplicationError,
            application_log_errors,
        ),
    ]
}

/// Ordered first-match rule engine
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Engine over a custom list. The list order is the priority order.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn diagnose(&self, bundle: &ForensicBundle) -> Verdict {
        for rule in &self.rules {
            if let Some(diagnosis) = rule.evaluate(bundle) {
                debug!(pod = %bundle.pod.name, rule = rule.name, cause = %diagnosis.cause, "Rule matched");
                return Verdict::Match(diagnosis);
            }
        }
        debug!(pod = %bundle.pod.name, "No rule matched");
        Verdict::NoMatch
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
