//! Simplified Kubernetes types used by the diagnosis pipeline.
//!
//! These are built fresh from API objects on every run and never mutated
//! afterwards. Conversions from `k8s-openapi` live in [`crate::cluster::k8s`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    /// Parse the API's phase string. Unrecognised values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(Self::Pending),
            "Running" => Some(Self::Running),
            "Succeeded" => Some(Self::Succeeded),
            "Failed" => Some(Self::Failed),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simplified Pod representation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// `None` when the status is missing or reports an unrecognised phase
    pub phase: Option<Phase>,
    pub labels: BTreeMap<String, String>,
    /// Node the pod is scheduled on, if any
    pub node_name: Option<String>,
    /// `None` when the API returned no container statuses at all
    pub container_statuses: Option<Vec<ContainerStatus>>,
}

impl Pod {
    /// Container statuses, empty when absent.
    pub fn containers(&self) -> &[ContainerStatus] {
        self.container_statuses.as_deref().unwrap_or_default()
    }
}

/// Container status within a pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub image: Option<String>,
    pub ready: bool,
    pub restart_count: i32,
    pub state: ContainerState,
    /// How the previous generation of this container ended
    pub last_termination: Option<Termination>,
}

/// Current container state. Exactly one variant holds at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerState {
    Waiting { reason: Option<String> },
    Running { started_at: Option<DateTime<Utc>> },
    Terminated(Termination),
}

impl Default for ContainerState {
    fn default() -> Self {
        Self::Waiting { reason: None }
    }
}

impl ContainerState {
    /// Reason code of a waiting or terminated state.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Waiting { reason } => reason.as_deref(),
            Self::Terminated(t) => t.reason.as_deref(),
            Self::Running { .. } => None,
        }
    }

    pub fn waiting_reason(&self) -> Option<&str> {
        match self {
            Self::Waiting { reason } => reason.as_deref(),
            _ => None,
        }
    }
}

/// A finished container run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    pub exit_code: i32,
    pub reason: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Reference to the object an event is about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

/// Kubernetes event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub involved_object: ObjectRef,
    /// "Normal" or "Warning"
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub count: i32,
}

impl Event {
    /// Render as `- <ts> [<type>] <reason>: <message>`.
    pub fn summary_line(&self) -> String {
        let ts = self
            .last_seen
            .map_or_else(|| "<unknown time>".to_string(), |t| t.to_rfc3339());
        format!(
            "- {} [{}] {}: {}",
            ts, self.event_type, self.reason, self.message
        )
    }
}

/// Sort events oldest first by last-seen time. Events without a timestamp go first.
pub fn sort_by_last_seen(events: &mut [Event]) {
    events.sort_by_key(|e| e.last_seen);
}

/// Condition status as reported by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        })
    }
}

/// Node condition from `status.conditions[]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    /// "Ready", "MemoryPressure", "DiskPressure", "PIDPressure", ...
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: Option<String>,
}

/// Node taint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: Option<String>,
    pub effect: String,
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}:{}", self.key, value, self.effect),
            None => write!(f, "{}:{}", self.key, self.effect),
        }
    }
}

/// Simplified Node representation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub conditions: Vec<NodeCondition>,
    /// Resource name to quantity, kept as the API's opaque strings
    pub allocatable: BTreeMap<String, String>,
    pub capacity: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

impl Node {
    /// Status of the Ready condition, `Unknown` if not reported.
    pub fn ready(&self) -> ConditionStatus {
        self.condition("Ready")
            .map_or(ConditionStatus::Unknown, |c| c.status)
    }

    pub fn condition(&self, condition_type: &str) -> Option<&NodeCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Pressure conditions currently `True`.
    pub fn active_pressures(&self) -> Vec<&NodeCondition> {
        self.conditions
            .iter()
            .filter(|c| c.condition_type != "Ready" && c.status == ConditionStatus::True)
            .collect()
    }
}

/// Log tail collected from a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTail {
    pub container: String,
    /// True when read from the previous (crashed) generation
    pub previous: bool,
    pub text: String,
}

/// Evidence collected for one unhealthy pod.
///
/// Every optional field is independently absent when its collection failed
/// or does not apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicBundle {
    pub pod: Pod,
    pub pod_events: Option<Vec<Event>>,
    pub log_tail: Option<LogTail>,
    pub node: Option<Node>,
    pub node_events: Option<Vec<Event>>,
}

impl ForensicBundle {
    /// Bundle with nothing collected beyond the pod itself.
    pub fn bare(pod: Pod) -> Self {
        Self {
            pod,
            pod_events: None,
            log_tail: None,
            node: None,
            node_events: None,
        }
    }

    /// Pod events followed by node events.
    pub fn all_events(&self) -> impl Iterator<Item = &Event> {
        self.pod_events
            .iter()
            .flatten()
            .chain(self.node_events.iter().flatten())
    }
}
