//! Forensic aggregator.
//!
//! Collects four independent pieces of evidence for an unhealthy pod and
//! assembles them into a [`ForensicBundle`]:
//! - events about the pod
//! - the log tail of the most recently crashed container
//! - the hosting node's description
//! - events about the hosting node
//!
//! The reads run concurrently, each under its own timeout. A failed read
//! leaves its field empty; it never fails the bundle.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cluster::{ClusterReader, LogGeneration};
use crate::error::ClusterError;
use crate::model::{sort_by_last_seen, ContainerState, Event, ForensicBundle, LogTail, Node, Pod};

/// Aggregator settings
#[derive(Debug, Clone, Copy)]
pub struct GatherSettings {
    pub fetch_timeout: Duration,
    pub log_tail_lines: i64,
}

impl Default for GatherSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            log_tail_lines: 50,
        }
    }
}

/// Which container's log to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub container: String,
    pub generation: LogGeneration,
}

/// Pick the crash to look at.
///
/// Prefers the previous generation of the container whose last termination
/// finished most recently. A container terminated in place (no restart yet)
/// only has a current generation. `None` when nothing ever terminated.
pub fn log_target(pod: &Pod) -> Option<LogTarget> {
    let previous = pod
        .containers()
        .iter()
        .filter_map(|cs| cs.last_termination.as_ref().map(|t| (cs, t.finished_at)))
        .max_by_key(|(_, finished_at)| *finished_at)
        .map(|(cs, _)| LogTarget {
            container: cs.name.clone(),
            generation: LogGeneration::Previous,
        });
    if previous.is_some() {
        return previous;
    }

    pod.containers()
        .iter()
        .filter_map(|cs| match &cs.state {
            ContainerState::Terminated(t) => Some((cs, t.finished_at)),
            _ => None,
        })
        .max_by_key(|(_, finished_at)| *finished_at)
        .map(|(cs, _)| LogTarget {
            container: cs.name.clone(),
            generation: LogGeneration::Current,
        })
}

/// Builds forensic bundles from a [`ClusterReader`].
pub struct Aggregator<'a> {
    reader: &'a dyn ClusterReader,
    settings: GatherSettings,
}

impl<'a> Aggregator<'a> {
    pub fn new(reader: &'a dyn ClusterReader, settings: GatherSettings) -> Self {
        Self { reader, settings }
    }

    /// Gather everything available for `pod`. Waits for every read to
    /// finish or time out before returning.
    pub async fn gather(&self, pod: &Pod) -> ForensicBundle {
        let (pod_events, log_tail, node, node_events) = tokio::join!(
            self.pod_events(pod),
            self.log_tail(pod),
            self.node(pod),
            self.node_events(pod),
        );

        debug!(
            pod = %pod.name,
            pod_events = pod_events.is_some(),
            log_tail = log_tail.is_some(),
            node = node.is_some(),
            node_events = node_events.is_some(),
            "Forensic bundle assembled"
        );

        ForensicBundle {
            pod: pod.clone(),
            pod_events,
            log_tail,
            node,
            node_events,
        }
    }

    async fn pod_events(&self, pod: &Pod) -> Option<Vec<Event>> {
        let mut events = self
            .fetch(
                "pod events",
                &pod.name,
                self.reader.pod_events(&pod.namespace, &pod.name),
            )
            .await?;
        sort_by_last_seen(&mut events);
        Some(events)
    }

    async fn log_tail(&self, pod: &Pod) -> Option<LogTail> {
        let Some(target) = log_target(pod) else {
            debug!(pod = %pod.name, "No terminated container, skipping logs");
            return None;
        };
        let text = self
            .fetch(
                "container logs",
                &pod.name,
                self.reader.container_logs(
                    &pod.namespace,
                    &pod.name,
                    &target.container,
                    target.generation,
                    self.settings.log_tail_lines,
                ),
            )
            .await?;
        Some(LogTail {
            container: target.container,
            previous: target.generation == LogGeneration::Previous,
            text,
        })
    }

    async fn node(&self, pod: &Pod) -> Option<Node> {
        let node_name = pod.node_name.as_deref()?;
        self.fetch("node", &pod.name, self.reader.node(node_name))
            .await
    }

    async fn node_events(&self, pod: &Pod) -> Option<Vec<Event>> {
        let node_name = pod.node_name.as_deref()?;
        let mut events = self
            .fetch("node events", &pod.name, self.reader.node_events(node_name))
            .await?;
        sort_by_last_seen(&mut events);
        Some(events)
    }

    /// Run one read under the fetch timeout, degrading any failure to `None`.
    async fn fetch<T>(
        &self,
        what: &'static str,
        pod: &str,
        read: impl Future<Output = Result<T, ClusterError>>,
    ) -> Option<T> {
        let result = match tokio::time::timeout(self.settings.fetch_timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout(self.settings.fetch_timeout)),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(pod = %pod, collection = what, error = %e, "Could not collect evidence");
                None
            }
        }
    }
}
