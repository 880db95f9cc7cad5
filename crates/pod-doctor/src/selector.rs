//! Turns the operator's label query into the set of candidate pods.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use crate::cluster::ClusterReader;
use crate::error::{ClusterError, DoctorError};
use crate::model::Pod;

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resolved label query: `app` and `country` are required, `fleet` optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelQuery {
    labels: BTreeMap<String, String>,
}

impl LabelQuery {
    pub fn new(app: &str, country: &str, fleet: Option<&str>) -> Result<Self, DoctorError> {
        let app = app.trim();
        let country = country.trim();
        if app.is_empty() {
            return Err(DoctorError::MissingLabel("app"));
        }
        if country.is_empty() {
            return Err(DoctorError::MissingLabel("country"));
        }

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), app.to_string());
        labels.insert("country".to_string(), country.to_string());
        if let Some(fleet) = fleet.map(str::trim).filter(|f| !f.is_empty()) {
            labels.insert("fleet".to_string(), fleet.to_string());
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Equality-based selector string, e.g. `app=checkout,country=de`.
    pub fn selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// List the pods matching `query`, sorted by name. A listing that takes
/// longer than `timeout` fails like any other listing error.
pub async fn select(
    reader: &dyn ClusterReader,
    namespace: &str,
    query: &LabelQuery,
    timeout: Duration,
) -> Result<Vec<Pod>, DoctorError> {
    let selector = query.selector();
    info!(namespace, selector = %selector, "Searching for pods");

    let mut pods = tokio::time::timeout(timeout, reader.list_pods(namespace, &selector))
        .await
        .unwrap_or(Err(ClusterError::Timeout(timeout)))
        .map_err(|source| DoctorError::Selection {
            selector: selector.clone(),
            source,
        })?;
    pods.sort_by(|a, b| a.name.cmp(&b.name));

    info!(count = pods.len(), "Found matching pods");
    Ok(pods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{running_pod, FakeCluster, Op};

    const LIST_TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_selector_required_labels() {
        let query = LabelQuery::new("checkout", "de", None).unwrap();
        assert_eq!(query.selector(), "app=checkout,country=de");
    }

    #[test]
    fn test_selector_with_fleet() {
        let query = LabelQuery::new("checkout", "de", Some("blue")).unwrap();
        assert_eq!(query.selector(), "app=checkout,country=de,fleet=blue");
    }

    #[test]
    fn test_blank_fleet_is_ignored() {
        let query = LabelQuery::new("checkout", "de", Some("  ")).unwrap();
        assert!(!query.labels().contains_key("fleet"));
    }

    #[test]
    fn test_missing_required_label() {
        assert!(matches!(
            LabelQuery::new("", "de", None),
            Err(DoctorError::MissingLabel("app"))
        ));
        assert!(matches!(
            LabelQuery::new("checkout", " ", None),
            Err(DoctorError::MissingLabel("country"))
        ));
    }

    #[tokio::test]
    async fn test_select_sorts_by_name() {
        let cluster = FakeCluster::new()
            .with_pod(running_pod("checkout-b"))
            .with_pod(running_pod("checkout-a"));
        let query = LabelQuery::new("checkout", "de", None).unwrap();

        let pods = select(&cluster, "shop", &query, LIST_TIMEOUT).await.unwrap();
        let names: Vec<_> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["checkout-a", "checkout-b"]);
        assert_eq!(
            cluster.last_selector().as_deref(),
            Some("app=checkout,country=de")
        );
    }

    #[tokio::test]
    async fn test_select_listing_failure_is_fatal() {
        let cluster = FakeCluster::new().failing_list(ClusterError::NotFound {
            kind: "namespace",
            name: "shop".to_string(),
        });
        let query = LabelQuery::new("checkout", "de", None).unwrap();

        let err = select(&cluster, "shop", &query, LIST_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, DoctorError::Selection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_hung_listing_times_out() {
        let cluster = FakeCluster::new()
            .with_pod(running_pod("checkout-a"))
            .hanging(Op::List);
        let query = LabelQuery::new("checkout", "de", None).unwrap();

        let err = select(&cluster, "shop", &query, LIST_TIMEOUT).await.unwrap_err();
        match err {
            DoctorError::Selection { selector, source } => {
                assert_eq!(selector, "app=checkout,country=de");
                assert!(matches!(source, ClusterError::Timeout(t) if t == LIST_TIMEOUT));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
