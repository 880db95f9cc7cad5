//! In-memory fakes and fixtures shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::cluster::{ClusterReader, LogGeneration};
use crate::error::{ClusterError, ReasonerError};
use crate::model::{
    ConditionStatus, ContainerState, ContainerStatus, Event, Node, NodeCondition, ObjectRef,
    Phase, Pod, Termination,
};
use crate::reasoner::Reasoner;

/// Long enough that any configured timeout fires first.
const HANG: Duration = Duration::from_secs(3600);

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_790_000_000 + secs, 0).unwrap()
}

pub fn running_pod(name: &str) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: "shop".to_string(),
        phase: Some(Phase::Running),
        labels: [("app", "checkout"), ("country", "de")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        node_name: Some("worker-1".to_string()),
        container_statuses: Some(vec![ContainerStatus {
            name: "app".to_string(),
            image: Some("registry.example.com/checkout:1.4".to_string()),
            ready: true,
            restart_count: 0,
            state: ContainerState::Running {
                started_at: Some(at(0)),
            },
            last_termination: None,
        }]),
    }
}

pub fn crashlooping_pod(name: &str) -> Pod {
    let mut pod = running_pod(name);
    if let Some(statuses) = pod.container_statuses.as_mut() {
        statuses[0] = ContainerStatus {
            ready: false,
            restart_count: 6,
            state: ContainerState::Waiting {
                reason: Some("CrashLoopBackOff".to_string()),
            },
            last_termination: Some(Termination {
                exit_code: 1,
                reason: Some("Error".to_string()),
                finished_at: Some(at(120)),
            }),
            ..statuses[0].clone()
        };
    }
    pod
}

pub fn pod_event(pod: &str, reason: &str, message: &str, secs: i64) -> Event {
    Event {
        involved_object: ObjectRef {
            kind: "Pod".to_string(),
            name: pod.to_string(),
            namespace: Some("shop".to_string()),
        },
        event_type: "Warning".to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_seen: Some(at(secs)),
        count: 1,
    }
}

pub fn node_event(node: &str, reason: &str, message: &str, secs: i64) -> Event {
    Event {
        involved_object: ObjectRef {
            kind: "Node".to_string(),
            name: node.to_string(),
            namespace: None,
        },
        ..pod_event(node, reason, message, secs)
    }
}

pub fn ready_node(name: &str) -> Node {
    Node {
        name: name.to_string(),
        conditions: vec![NodeCondition {
            condition_type: "Ready".to_string(),
            status: ConditionStatus::True,
            reason: Some("KubeletReady".to_string()),
        }],
        allocatable: [("cpu", "3920m"), ("memory", "15Gi")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        capacity: [("cpu", "4"), ("memory", "16Gi")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        taints: vec![],
    }
}

/// Reads the fake can be told to fail or hang
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    PodEvents,
    Logs,
    Node,
    NodeEvents,
}

/// Scripted in-memory cluster
#[derive(Default)]
pub struct FakeCluster {
    pods: Vec<Pod>,
    list_error: Mutex<Option<ClusterError>>,
    pod_events: HashMap<String, Vec<Event>>,
    logs: HashMap<(String, String, bool), String>,
    log_delays: HashMap<String, Duration>,
    nodes: HashMap<String, Node>,
    node_events: HashMap<String, Vec<Event>>,
    failing: HashSet<Op>,
    hanging: HashSet<Op>,
    calls: Mutex<Vec<String>>,
    last_selector: Mutex<Option<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    pub fn failing_list(self, err: ClusterError) -> Self {
        *self.list_error.lock().unwrap() = Some(err);
        self
    }

    pub fn with_pod_events(mut self, pod: &str, events: Vec<Event>) -> Self {
        self.pod_events.insert(pod.to_string(), events);
        self
    }

    pub fn with_logs(mut self, pod: &str, container: &str, previous: bool, text: &str) -> Self {
        self.logs.insert(
            (pod.to_string(), container.to_string(), previous),
            text.to_string(),
        );
        self
    }

    /// Log reads for `pod` take `delay` before answering.
    pub fn with_log_delay(mut self, pod: &str, delay: Duration) -> Self {
        self.log_delays.insert(pod.to_string(), delay);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.name.clone(), node);
        self
    }

    pub fn with_node_events(mut self, node: &str, events: Vec<Event>) -> Self {
        self.node_events.insert(node.to_string(), events);
        self
    }

    pub fn failing(mut self, op: Op) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn hanging(mut self, op: Op) -> Self {
        self.hanging.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_selector(&self) -> Option<String> {
        self.last_selector.lock().unwrap().clone()
    }

    async fn enter(&self, op: Op, call: String) -> Result<(), ClusterError> {
        self.calls.lock().unwrap().push(call);
        if self.hanging.contains(&op) {
            tokio::time::sleep(HANG).await;
        }
        if self.failing.contains(&op) {
            return Err(ClusterError::NotFound {
                kind: "fake",
                name: format!("{op:?}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterReader for FakeCluster {
    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        *self.last_selector.lock().unwrap() = Some(selector.to_string());
        if self.hanging.contains(&Op::List) {
            tokio::time::sleep(HANG).await;
        }
        if let Some(err) = self.list_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.pods.clone())
    }

    async fn pod_events(&self, _namespace: &str, pod: &str) -> Result<Vec<Event>, ClusterError> {
        self.enter(Op::PodEvents, format!("pod_events:{pod}")).await?;
        Ok(self.pod_events.get(pod).cloned().unwrap_or_default())
    }

    async fn container_logs(
        &self,
        _namespace: &str,
        pod: &str,
        container: &str,
        generation: LogGeneration,
        _tail_lines: i64,
    ) -> Result<String, ClusterError> {
        let previous = generation == LogGeneration::Previous;
        self.enter(Op::Logs, format!("logs:{pod}/{container}/previous={previous}"))
            .await?;
        if let Some(delay) = self.log_delays.get(pod) {
            tokio::time::sleep(*delay).await;
        }
        self.logs
            .get(&(pod.to_string(), container.to_string(), previous))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "log",
                name: container.to_string(),
            })
    }

    async fn node(&self, name: &str) -> Result<Node, ClusterError> {
        self.enter(Op::Node, format!("node:{name}")).await?;
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "node",
                name: name.to_string(),
            })
    }

    async fn node_events(&self, name: &str) -> Result<Vec<Event>, ClusterError> {
        self.enter(Op::NodeEvents, format!("node_events:{name}")).await?;
        Ok(self.node_events.get(name).cloned().unwrap_or_default())
    }
}

/// One scripted reasoning service answer
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    RateLimited,
    Unauthorized,
    Hang,
}

/// Reasoner that replays scripted answers and records prompts
#[derive(Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn ask(&self, _model: &str, prompt: &str) -> Result<String, ReasonerError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::RateLimited) => Err(ReasonerError::RateLimited),
            Some(Reply::Unauthorized) => Err(ReasonerError::Api {
                status: 401,
                message: "invalid x-api-key".to_string(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(HANG).await;
                Err(ReasonerError::Malformed("unreachable".to_string()))
            }
            None => Err(ReasonerError::Malformed("no scripted reply".to_string())),
        }
    }
}
