//! Kubernetes-backed [`ClusterReader`] and the cluster safety gate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ContainerState as KubeContainerState, ContainerStatus as KubeContainerStatus,
    Event as KubeEvent, Node as KubeNode, Pod as KubePod,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use super::{ClusterReader, LogGeneration};
use crate::config::DoctorConfig;
use crate::error::{ClusterError, DoctorError};
use crate::model::{
    ConditionStatus, ContainerState, ContainerStatus, Event, Node, NodeCondition, ObjectRef,
    Phase, Pod, Taint, Termination,
};

/// Context selected by the safety gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveContext {
    pub context: String,
    pub cluster: String,
}

/// Resolve the kubeconfig's current context and the cluster it points at.
pub fn active_context(kubeconfig: &Kubeconfig) -> Result<ActiveContext, DoctorError> {
    let name = kubeconfig
        .current_context
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(DoctorError::NoActiveContext)?;

    let cluster = kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == name)
        .and_then(|named| named.context.as_ref())
        .map(|ctx| ctx.cluster.clone())
        .ok_or_else(|| DoctorError::UnknownContext(name.to_string()))?;

    Ok(ActiveContext {
        context: name.to_string(),
        cluster,
    })
}

/// Refuse to continue unless the active context targets `expected`.
pub fn verify_cluster(kubeconfig: &Kubeconfig, expected: &str) -> Result<ActiveContext, DoctorError> {
    let active = active_context(kubeconfig)?;
    if active.cluster != expected {
        return Err(DoctorError::WrongCluster {
            expected: expected.to_string(),
            actual: active.cluster,
        });
    }
    Ok(active)
}

/// Read-only cluster access through the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing client. Performs no safety checks.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Load the kubeconfig, pass the safety gate, then build a client
    /// pinned to the verified context.
    pub async fn connect(config: &DoctorConfig) -> Result<Self, DoctorError> {
        let kubeconfig = match config.kubeconfig_path() {
            Some(path) => {
                if !path.exists() {
                    return Err(DoctorError::KubeconfigMissing { path });
                }
                Kubeconfig::read_from(&path)?
            }
            None => Kubeconfig::read()?,
        };

        let active = verify_cluster(&kubeconfig, &config.expected_cluster)?;
        info!(
            context = %active.context,
            cluster = %active.cluster,
            "Validated connection to expected cluster"
        );

        let options = KubeConfigOptions {
            context: Some(active.context),
            ..KubeConfigOptions::default()
        };
        let mut client_config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
        client_config.read_timeout = Some(config.fetch_timeout());
        client_config.connect_timeout = Some(config.fetch_timeout());

        Ok(Self::new(Client::try_from(client_config)?))
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let pods: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(selector);
        let list = pods.list(&lp).await?;
        debug!(namespace, selector, count = list.items.len(), "Listed pods");
        Ok(list.items.iter().map(convert_pod).collect())
    }

    async fn pod_events(&self, namespace: &str, pod: &str) -> Result<Vec<Event>, ClusterError> {
        let events: Api<KubeEvent> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().fields(&format!(
            "involvedObject.name={pod},involvedObject.namespace={namespace}"
        ));
        let list = events.list(&lp).await?;
        Ok(list.items.iter().map(convert_event).collect())
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        generation: LogGeneration,
        tail_lines: i64,
    ) -> Result<String, ClusterError> {
        let pods: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            previous: generation == LogGeneration::Previous,
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        pods.logs(pod, &params)
            .await
            .map_err(|e| ClusterError::from_kube("pod", pod, e))
    }

    async fn node(&self, name: &str) -> Result<Node, ClusterError> {
        let nodes: Api<KubeNode> = Api::all(self.client.clone());
        let node = nodes
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube("node", name, e))?;
        Ok(convert_node(&node))
    }

    async fn node_events(&self, name: &str) -> Result<Vec<Event>, ClusterError> {
        let events: Api<KubeEvent> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!(
            "involvedObject.kind=Node,involvedObject.name={name}"
        ));
        let list = events.list(&lp).await?;
        Ok(list.items.iter().map(convert_event).collect())
    }
}

/// Convert an API pod into the pipeline's [`Pod`].
pub fn convert_pod(pod: &KubePod) -> Pod {
    let status = pod.status.as_ref();
    Pod {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.as_deref())
            .and_then(Phase::parse),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        node_name: pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .filter(|n| !n.is_empty()),
        container_statuses: status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|list| list.iter().map(convert_container_status).collect()),
    }
}

fn convert_container_status(cs: &KubeContainerStatus) -> ContainerStatus {
    ContainerStatus {
        name: cs.name.clone(),
        image: Some(cs.image.clone()).filter(|i| !i.is_empty()),
        ready: cs.ready,
        restart_count: cs.restart_count,
        state: cs
            .state
            .as_ref()
            .map(convert_container_state)
            .unwrap_or_default(),
        last_termination: cs
            .last_state
            .as_ref()
            .and_then(|s| s.terminated.as_ref())
            .map(|t| Termination {
                exit_code: t.exit_code,
                reason: t.reason.clone(),
                finished_at: t.finished_at.as_ref().map(|ts| ts.0),
            }),
    }
}

/// The API allows several fields at once; terminated wins over waiting over running.
fn convert_container_state(state: &KubeContainerState) -> ContainerState {
    if let Some(t) = &state.terminated {
        return ContainerState::Terminated(Termination {
            exit_code: t.exit_code,
            reason: t.reason.clone(),
            finished_at: t.finished_at.as_ref().map(|ts| ts.0),
        });
    }
    if let Some(w) = &state.waiting {
        return ContainerState::Waiting {
            reason: w.reason.clone(),
        };
    }
    if let Some(r) = &state.running {
        return ContainerState::Running {
            started_at: r.started_at.as_ref().map(|ts| ts.0),
        };
    }
    ContainerState::default()
}

fn convert_event(event: &KubeEvent) -> Event {
    let involved = &event.involved_object;
    Event {
        involved_object: ObjectRef {
            kind: involved.kind.clone().unwrap_or_default(),
            name: involved.name.clone().unwrap_or_default(),
            namespace: involved.namespace.clone(),
        },
        event_type: event.type_.clone().unwrap_or_else(|| "Normal".to_string()),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        last_seen: event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0))
            .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0)),
        count: event.count.unwrap_or(1),
    }
}

/// Convert an API node into the pipeline's [`Node`].
pub fn convert_node(node: &KubeNode) -> Node {
    let status = node.status.as_ref();

    Node {
        name: node.metadata.name.clone().unwrap_or_default(),
        conditions: status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .map(|c| NodeCondition {
                        condition_type: c.type_.clone(),
                        status: ConditionStatus::parse(&c.status),
                        reason: c.reason.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        allocatable: quantities(status.and_then(|s| s.allocatable.as_ref())),
        capacity: quantities(status.and_then(|s| s.capacity.as_ref())),
        taints: node
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_ref())
            .map(|taints| {
                taints
                    .iter()
                    .map(|t| Taint {
                        key: t.key.clone(),
                        value: t.value.clone(),
                        effect: t.effect.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn quantities(map: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    map.map(|m| m.iter().map(|(k, q)| (k.clone(), q.0.clone())).collect())
        .unwrap_or_default()
}
