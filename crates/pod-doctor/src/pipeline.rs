//! End-to-end diagnostic run.
//!
//! Selects pods, classifies each one, then investigates the unhealthy ones
//! concurrently: gather evidence, run the rules, escalate only when no rule
//! matched. Reports come back in selection order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::{classify, Health};
use crate::cluster::ClusterReader;
use crate::config::DoctorConfig;
use crate::error::DoctorError;
use crate::escalate::Escalator;
use crate::gather::{Aggregator, GatherSettings};
use crate::model::{ForensicBundle, Pod};
use crate::report::PodReport;
use crate::rules::{Diagnosis, RuleEngine, Verdict};
use crate::selector::{select, LabelQuery};

const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Result of one run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Completed reports, in selection order
    pub reports: Vec<PodReport>,
    /// True when the run was interrupted
    pub cancelled: bool,
    /// Unhealthy pods whose investigation never finished
    pub abandoned: usize,
}

impl RunOutcome {
    /// True only for a run that finished and found nothing wrong.
    pub fn all_healthy(&self) -> bool {
        !self.cancelled && self.abandoned == 0 && self.reports.iter().all(PodReport::is_healthy)
    }
}

/// Wires the cluster reader, rule engine and escalator together.
pub struct Doctor {
    reader: Arc<dyn ClusterReader>,
    engine: RuleEngine,
    escalator: Escalator,
    settings: GatherSettings,
    max_concurrency: usize,
}

impl Doctor {
    pub fn new(reader: Arc<dyn ClusterReader>, engine: RuleEngine, escalator: Escalator) -> Self {
        Self {
            reader,
            engine,
            escalator,
            settings: GatherSettings::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Build from a validated configuration.
    pub fn from_config(
        reader: Arc<dyn ClusterReader>,
        config: &DoctorConfig,
    ) -> Result<Self, DoctorError> {
        let escalator = Escalator::from_config(&config.escalation)?;
        Ok(Self::new(reader, RuleEngine::new(), escalator)
            .with_gather_settings(GatherSettings {
                fetch_timeout: config.fetch_timeout(),
                log_tail_lines: config.log_tail_lines,
            })
            .with_max_concurrency(config.max_concurrency))
    }

    #[must_use]
    pub fn with_gather_settings(mut self, settings: GatherSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Diagnose every pod matching `query` in `namespace`.
    ///
    /// Only a failed or timed out selection is an error. Cancelling `cancel`
    /// abandons the selection or the investigations still in flight;
    /// everything finished so far is kept.
    pub async fn run(
        &self,
        namespace: &str,
        query: &LabelQuery,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, DoctorError> {
        let listing = select(
            self.reader.as_ref(),
            namespace,
            query,
            self.settings.fetch_timeout,
        );
        let pods = tokio::select! {
            biased;
            pods = listing => pods?,
            () = cancel.cancelled() => {
                warn!("Run cancelled during pod selection");
                return Ok(RunOutcome {
                    reports: Vec::new(),
                    cancelled: true,
                    abandoned: 0,
                });
            }
        };
        if pods.is_empty() {
            info!(namespace, "No matching pods found");
        }

        let verdicts: Vec<(Pod, Health)> = pods
            .into_iter()
            .map(|pod| {
                let health = classify(&pod);
                (pod, health)
            })
            .collect();

        let mut slots: Vec<Option<PodReport>> = verdicts
            .iter()
            .map(|(pod, health)| health.healthy.then(|| report(pod, health.clone(), None)))
            .collect();

        let unhealthy: Vec<usize> = verdicts
            .iter()
            .enumerate()
            .filter(|(_, (_, health))| !health.healthy)
            .map(|(i, _)| i)
            .collect();
        info!(
            total = verdicts.len(),
            unhealthy = unhealthy.len(),
            "Pods classified"
        );

        let mut passes = stream::iter(unhealthy.into_iter().map(|i| {
            let pod = &verdicts[i].0;
            async move { (i, self.investigate(pod).await) }
        }))
        .buffer_unordered(self.max_concurrency);

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = passes.next() => match next {
                    Some((i, (bundle, diagnosis))) => {
                        let (pod, health) = &verdicts[i];
                        slots[i] = Some(report(pod, health.clone(), Some((bundle, diagnosis))));
                    }
                    None => break,
                },
            }
        }
        drop(passes);

        let abandoned = slots.iter().filter(|s| s.is_none()).count();
        if cancelled {
            warn!(abandoned, "Run cancelled, reporting completed passes only");
        }

        Ok(RunOutcome {
            reports: slots.into_iter().flatten().collect(),
            cancelled,
            abandoned,
        })
    }

    /// Gather evidence for one unhealthy pod and diagnose it.
    pub async fn investigate(&self, pod: &Pod) -> (ForensicBundle, Diagnosis) {
        let bundle = Aggregator::new(self.reader.as_ref(), self.settings)
            .gather(pod)
            .await;
        let diagnosis = match self.engine.diagnose(&bundle) {
            Verdict::Match(diagnosis) => diagnosis,
            Verdict::NoMatch => self.escalator.escalate(&bundle).await,
        };
        info!(pod = %pod.name, cause = %diagnosis.cause, source = %diagnosis.source, "Pod diagnosed");
        (bundle, diagnosis)
    }
}

fn report(pod: &Pod, health: Health, findings: Option<(ForensicBundle, Diagnosis)>) -> PodReport {
    let (bundle, diagnosis) = match findings {
        Some((bundle, diagnosis)) => (Some(bundle), Some(diagnosis)),
        None => (None, None),
    };
    PodReport {
        pod: pod.name.clone(),
        namespace: pod.namespace.clone(),
        health,
        diagnosis,
        bundle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::EscalationConfig;
    use crate::error::ClusterError;
    use crate::rules::{Cause, Source};
    use crate::testing::{
        crashlooping_pod, running_pod, FakeCluster, Op, Reply, ScriptedReasoner,
    };

    fn query() -> LabelQuery {
        LabelQuery::new("checkout", "de", None).unwrap()
    }

    fn cluster() -> FakeCluster {
        FakeCluster::new()
            .with_pod(crashlooping_pod("checkout-c"))
            .with_pod(running_pod("checkout-a"))
            .with_pod(crashlooping_pod("checkout-b"))
            .with_logs("checkout-b", "app", true, "FATAL: connection refused")
            .with_logs("checkout-c", "app", true, "panic: unexpected state")
    }

    fn doctor(cluster: FakeCluster, reasoner: &Arc<ScriptedReasoner>) -> Doctor {
        let config = EscalationConfig {
            api_key: Some("test-key".to_string()),
            ..EscalationConfig::default()
        };
        Doctor::new(
            Arc::new(cluster),
            RuleEngine::new(),
            Escalator::new(reasoner.clone(), config),
        )
    }

    #[tokio::test]
    async fn test_escalates_only_unmatched_pods() {
        let reasoner = Arc::new(ScriptedReasoner::new([Reply::Text(
            "State machine bug after the 1.4 upgrade".to_string(),
        )]));
        let doctor = doctor(cluster(), &reasoner);

        let outcome = doctor.run("shop", &query(), CancellationToken::new()).await.unwrap();

        let names: Vec<_> = outcome.reports.iter().map(|r| r.pod.as_str()).collect();
        assert_eq!(names, ["checkout-a", "checkout-b", "checkout-c"]);
        assert!(outcome.reports[0].diagnosis.is_none());

        let b = outcome.reports[1].diagnosis.as_ref().unwrap();
        assert_eq!(b.source, Source::Rule);
        assert_eq!(b.cause, Cause::ApplicationError("connection refused".to_string()));

        let c = outcome.reports[2].diagnosis.as_ref().unwrap();
        assert_eq!(c.source, Source::Escalated);
        assert_eq!(reasoner.calls(), 1);
        assert!(reasoner.prompts()[0].contains("checkout-c"));
        assert!(!outcome.all_healthy());
    }

    #[tokio::test]
    async fn test_healthy_pods_are_not_investigated() {
        let cluster = Arc::new(FakeCluster::new().with_pod(running_pod("checkout-a")));
        let reasoner = Arc::new(ScriptedReasoner::default());
        let doctor = Doctor::new(
            cluster.clone(),
            RuleEngine::new(),
            Escalator::new(reasoner.clone(), EscalationConfig::default()),
        );

        let outcome = doctor.run("shop", &query(), CancellationToken::new()).await.unwrap();

        assert!(outcome.all_healthy());
        assert!(cluster.calls().is_empty());
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn test_runs_are_idempotent() {
        let doctor = Doctor::new(
            Arc::new(cluster()),
            RuleEngine::new(),
            Escalator::disabled(EscalationConfig::default()),
        )
        .with_max_concurrency(2);

        let first = doctor.run("shop", &query(), CancellationToken::new()).await.unwrap();
        let second = doctor.run("shop", &query(), CancellationToken::new()).await.unwrap();

        let render = |outcome: &RunOutcome| serde_json::to_string(&outcome.reports).unwrap();
        assert_eq!(render(&first), render(&second));
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_completed_reports() {
        let reasoner = Arc::new(ScriptedReasoner::default());
        let doctor = doctor(cluster(), &reasoner);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = doctor.run("shop", &query(), cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.abandoned, 2);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].pod, "checkout-a");
        assert!(!outcome.all_healthy());
    }

    #[tokio::test]
    async fn test_selection_failure_is_fatal() {
        let cluster = FakeCluster::new().failing_list(ClusterError::Timeout(Duration::from_secs(10)));
        let reasoner = Arc::new(ScriptedReasoner::default());
        let doctor = doctor(cluster, &reasoner);

        let err = doctor
            .run("shop", &query(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DoctorError::Selection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_selection_times_out() {
        let reasoner = Arc::new(ScriptedReasoner::default());
        let doctor = doctor(cluster().hanging(Op::List), &reasoner).with_gather_settings(
            GatherSettings {
                fetch_timeout: Duration::from_secs(10),
                ..GatherSettings::default()
            },
        );

        let err = doctor
            .run("shop", &query(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DoctorError::Selection {
                source: ClusterError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_selection_returns_promptly() {
        let reasoner = Arc::new(ScriptedReasoner::default());
        let cluster = Arc::new(cluster().hanging(Op::List));
        let doctor = Doctor::new(
            cluster.clone(),
            RuleEngine::new(),
            Escalator::new(reasoner.clone(), EscalationConfig::default()),
        )
        .with_gather_settings(GatherSettings {
            fetch_timeout: Duration::from_secs(10),
            ..GatherSettings::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = doctor.run("shop", &query(), cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.reports.is_empty());
        assert_eq!(outcome.abandoned, 0);
        assert!(!outcome.all_healthy());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(cluster.calls().is_empty());
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_run_keeps_finished_diagnoses() {
        let cluster = FakeCluster::new()
            .with_pod(crashlooping_pod("checkout-fast"))
            .with_pod(crashlooping_pod("checkout-slow"))
            .with_logs("checkout-fast", "app", true, "FATAL: connection refused")
            .with_logs("checkout-slow", "app", true, "FATAL: connection refused")
            .with_log_delay("checkout-slow", Duration::from_secs(8));
        let reasoner = Arc::new(ScriptedReasoner::default());
        let doctor = doctor(cluster, &reasoner);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let outcome = doctor.run("shop", &query(), cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.abandoned, 1);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].pod, "checkout-fast");
        let diagnosis = outcome.reports[0].diagnosis.as_ref().unwrap();
        assert_eq!(diagnosis.source, Source::Rule);
        assert_eq!(
            diagnosis.cause,
            Cause::ApplicationError("connection refused".to_string())
        );
        assert_eq!(reasoner.calls(), 0);
    }
}
