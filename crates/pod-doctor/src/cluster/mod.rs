//! Read-only access to the cluster.
//!
//! [`ClusterReader`] is the seam between the diagnosis pipeline and the
//! Kubernetes API. It exposes reads only.

pub mod k8s;

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::model::{Event, Node, Pod};

pub use self::k8s::KubeCluster;

/// Which generation of a container to read logs from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogGeneration {
    /// The running (or last) instance
    Current,
    /// The instance before the most recent restart
    Previous,
}

/// Read operations the pipeline needs from the cluster.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// List pods in `namespace` matching a label selector.
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError>;

    /// Events whose involved object is the named pod.
    async fn pod_events(&self, namespace: &str, pod: &str) -> Result<Vec<Event>, ClusterError>;

    /// Last `tail_lines` lines of a container's log.
    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        generation: LogGeneration,
        tail_lines: i64,
    ) -> Result<String, ClusterError>;

    /// Describe a node by name.
    async fn node(&self, name: &str) -> Result<Node, ClusterError>;

    /// Events whose involved object is the named node.
    async fn node_events(&self, name: &str) -> Result<Vec<Event>, ClusterError>;
}
