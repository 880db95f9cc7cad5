//! Escalation to the reasoning service for failures no rule explains.
//!
//! Only ever called with a bundle the rule engine could not match. The
//! prompt is built from that one bundle and is bounded in size. Every
//! failure path ends in a fallback diagnosis, never an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{EscalationConfig, ENV_API_KEY};
use crate::error::{DoctorError, ReasonerError};
use crate::model::{ContainerState, ContainerStatus, Event, ForensicBundle, Node};
use crate::reasoner::{AnthropicReasoner, Reasoner};
use crate::rules::{Cause, Diagnosis, Source};

/// Explanation used whenever escalation produces nothing usable
pub const FALLBACK_EXPLANATION: &str =
    "unable to determine specific cause; manual investigation required.";

const CRASHLOOP_RECOMMENDATION: &str = "Examine the previous container logs closely to identify the root cause of the stack trace or error message.";
const GENERIC_RECOMMENDATION: &str =
    "Review the pod events and container statuses for more specific clues.";
const ESCALATED_RECOMMENDATION: &str =
    "Verify the analysis against the pod events and logs before acting on it.";

/// Appended when the prompt had to be cut to fit `max_prompt_chars`
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Hands unmatched bundles to a [`Reasoner`].
pub struct Escalator {
    reasoner: Option<Arc<dyn Reasoner>>,
    config: EscalationConfig,
}

impl Escalator {
    pub fn new(reasoner: Arc<dyn Reasoner>, config: EscalationConfig) -> Self {
        Self {
            reasoner: Some(reasoner),
            config,
        }
    }

    /// Escalator that always falls back without calling anything.
    pub fn disabled(config: EscalationConfig) -> Self {
        Self {
            reasoner: None,
            config,
        }
    }

    /// Build from configuration, wiring the Anthropic client when enabled.
    pub fn from_config(config: &EscalationConfig) -> Result<Self, DoctorError> {
        if !config.enabled {
            info!("Escalation disabled, unmatched pods get the fallback diagnosis");
            return Ok(Self::disabled(config.clone()));
        }
        let api_key = config
            .api_key
            .clone()
            .ok_or(DoctorError::MissingCredentials(ENV_API_KEY))?;
        Ok(Self::new(
            Arc::new(AnthropicReasoner::new(api_key).with_max_tokens(config.max_tokens)),
            config.clone(),
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.reasoner.is_some()
    }

    /// Diagnose `bundle` through the reasoning service.
    pub async fn escalate(&self, bundle: &ForensicBundle) -> Diagnosis {
        let Some(reasoner) = &self.reasoner else {
            return fallback(bundle);
        };

        let prompt = build_prompt(bundle, &self.config);
        let attempts = self.config.max_attempts.max(1);
        let timeout = self.config.timeout();

        for attempt in 1..=attempts {
            debug!(
                pod = %bundle.pod.name,
                service = reasoner.name(),
                attempt,
                "Escalating to reasoning service"
            );

            let result = match tokio::time::timeout(
                timeout,
                reasoner.ask(&self.config.model, &prompt),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ReasonerError::Timeout(timeout)),
            };

            match result {
                Ok(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        warn!(pod = %bundle.pod.name, "Reasoning service returned an empty answer");
                        break;
                    }
                    info!(pod = %bundle.pod.name, attempt, "Escalated diagnosis received");
                    return Diagnosis {
                        cause: Cause::Escalated,
                        explanation: text.to_string(),
                        recommendation: ESCALATED_RECOMMENDATION.to_string(),
                        source: Source::Escalated,
                    };
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(pod = %bundle.pod.name, attempt, error = %e, "Escalation failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                Err(e) => {
                    warn!(pod = %bundle.pod.name, attempt, error = %e, "Escalation failed");
                    break;
                }
            }
        }

        fallback(bundle)
    }
}

/// Diagnosis for when nothing could be determined.
pub fn fallback(bundle: &ForensicBundle) -> Diagnosis {
    let crashlooping = bundle
        .pod
        .containers()
        .iter()
        .any(|cs| cs.state.waiting_reason() == Some("CrashLoopBackOff"));
    let recommendation = if crashlooping {
        CRASHLOOP_RECOMMENDATION
    } else {
        GENERIC_RECOMMENDATION
    };
    Diagnosis {
        cause: Cause::Undetermined,
        explanation: FALLBACK_EXPLANATION.to_string(),
        recommendation: recommendation.to_string(),
        source: Source::Fallback,
    }
}

/// Render the diagnostic prompt for one bundle, bounded by `limits`.
pub fn build_prompt(bundle: &ForensicBundle, limits: &EscalationConfig) -> String {
    let pod = &bundle.pod;
    let mut prompt = String::new();

    prompt.push_str("A Kubernetes pod is unhealthy and no known failure pattern matched.\n\n");
    prompt.push_str(&format!("Pod: {}/{}\n", pod.namespace, pod.name));
    prompt.push_str(&format!(
        "Phase: {}\n",
        pod.phase.map_or("unknown", |p| p.as_str())
    ));
    prompt.push_str(&format!(
        "Node: {}\n",
        pod.node_name.as_deref().unwrap_or("<unscheduled>")
    ));

    prompt.push_str("\nContainers:\n");
    if pod.containers().is_empty() {
        prompt.push_str("(no container statuses reported)\n");
    }
    for cs in pod.containers() {
        prompt.push_str(&container_line(cs));
        prompt.push('\n');
    }

    let mut events: Vec<&Event> = bundle.all_events().collect();
    events.sort_by_key(|e| e.last_seen);
    let skip = events.len().saturating_sub(limits.max_events);
    prompt.push_str(&format!(
        "\nRecent events (most recent {}):\n",
        events.len() - skip
    ));
    if events.is_empty() {
        prompt.push_str("(none collected)\n");
    }
    for event in &events[skip..] {
        prompt.push_str(&event.summary_line());
        prompt.push('\n');
    }

    match &bundle.log_tail {
        Some(logs) => {
            let generation = if logs.previous { "previous" } else { "current" };
            prompt.push_str(&format!(
                "\nLog tail of container '{}' ({generation} instance):\n",
                logs.container
            ));
            prompt.push_str(tail_chars(&logs.text, limits.max_log_chars));
            prompt.push('\n');
        }
        None => prompt.push_str("\nLog tail: (not collected)\n"),
    }

    match &bundle.node {
        Some(node) => {
            prompt.push_str("\nNode summary:\n");
            prompt.push_str(&node_summary(node));
        }
        None => prompt.push_str("\nNode summary: (not collected)\n"),
    }

    prompt.push_str("\nWhat is the most likely root cause, and what should the operator check next?");

    if prompt.len() > limits.max_prompt_chars {
        let keep = limits
            .max_prompt_chars
            .saturating_sub(TRUNCATION_MARKER.len());
        let cut = head_chars(&prompt, keep).len();
        prompt.truncate(cut);
        prompt.push_str(TRUNCATION_MARKER);
    }
    prompt
}

fn container_line(cs: &ContainerStatus) -> String {
    let state = match &cs.state {
        ContainerState::Running { .. } => "running".to_string(),
        ContainerState::Waiting { reason } => {
            format!("waiting({})", reason.as_deref().unwrap_or("-"))
        }
        ContainerState::Terminated(t) => format!(
            "terminated({}, exit {})",
            t.reason.as_deref().unwrap_or("-"),
            t.exit_code
        ),
    };
    let mut line = format!(
        "- {} image={} ready={} restarts={} state={}",
        cs.name,
        cs.image.as_deref().unwrap_or("-"),
        cs.ready,
        cs.restart_count,
        state
    );
    if let Some(t) = &cs.last_termination {
        line.push_str(&format!(
            " last_termination={}(exit {})",
            t.reason.as_deref().unwrap_or("-"),
            t.exit_code
        ));
    }
    line
}

fn node_summary(node: &Node) -> String {
    let mut summary = format!("- name: {}\n- ready: {}\n", node.name, node.ready());
    let pressures: Vec<&str> = node
        .active_pressures()
        .iter()
        .map(|c| c.condition_type.as_str())
        .collect();
    if !pressures.is_empty() {
        summary.push_str(&format!("- pressure: {}\n", pressures.join(", ")));
    }
    if !node.allocatable.is_empty() {
        let allocatable: Vec<String> = node
            .allocatable
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        summary.push_str(&format!("- allocatable: {}\n", allocatable.join(", ")));
    }
    if !node.taints.is_empty() {
        let taints: Vec<String> = node.taints.iter().map(ToString::to_string).collect();
        summary.push_str(&format!("- taints: {}\n", taints.join(", ")));
    }
    summary
}

/// Longest suffix of `s` with at most `max` bytes, on a char boundary.
fn tail_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Longest prefix of `s` with at most `max` bytes, on a char boundary.
fn head_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
