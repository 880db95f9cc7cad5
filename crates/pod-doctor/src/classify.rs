//! Health classifier.
//!
//! Pure function of a pod status snapshot. Checks run in order and the first
//! failing one decides the reason:
//! 1. Phase Pending, Failed or Unknown
//! 2. A container waiting with CrashLoopBackOff, ImagePullBackOff or Error
//! 3. A container not ready
//!
//! Snapshots that cannot be judged are reported unhealthy rather than skipped.

use serde::{Deserialize, Serialize};

use crate::model::{Phase, Pod};

/// Reason used when the status snapshot is incomplete
pub const MALFORMED_REASON: &str = "unknown/malformed state";

/// Waiting reasons that mark a container as failing
const FAILING_WAIT_REASONS: &[&str] = &["CrashLoopBackOff", "ImagePullBackOff", "Error"];

/// Health verdict for one pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub healthy: bool,
    pub reason: String,
}

impl Health {
    fn healthy() -> Self {
        Self {
            healthy: true,
            reason: "Healthy".to_string(),
        }
    }

    fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: reason.into(),
        }
    }
}

pub fn classify(pod: &Pod) -> Health {
    let Some(phase) = pod.phase else {
        return Health::unhealthy(MALFORMED_REASON);
    };

    if matches!(phase, Phase::Pending | Phase::Failed | Phase::Unknown) {
        return Health::unhealthy(format!("pod phase = {phase}"));
    }

    let containers = match pod.container_statuses.as_deref() {
        Some(list) if !list.is_empty() => list,
        _ => return Health::unhealthy(MALFORMED_REASON),
    };

    for cs in containers {
        if let Some(reason) = cs.state.waiting_reason() {
            if FAILING_WAIT_REASONS.contains(&reason) {
                return Health::unhealthy(format!("container '{}' waiting: {reason}", cs.name));
            }
        }
    }

    if let Some(cs) = containers.iter().find(|cs| !cs.ready) {
        return Health::unhealthy(format!("container '{}' not ready", cs.name));
    }

    Health::healthy()
}
