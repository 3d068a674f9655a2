use crate::cluster::{Cluster, TopologyError};
use crate::datasource::Connector;
use crate::metrics::{ClusterMetrics, CycleMetrics};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, instrument};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Published { primary: String, replicas: Vec<String> },
    Failed { reason: String, error: String },
}

/// Result of the most recent cycle, as reported by `/health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CycleStatus {
    /// Unix seconds.
    pub finished_at: u64,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
}

impl CycleStatus {
    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Published { .. })
    }
}

/// Runs collection cycles and publishes their results.
pub struct ClusterCollector<C: Connector> {
    cluster: Cluster<C>,
    metrics: Arc<ClusterMetrics>,
    cycles: CycleMetrics,
    last: ArcSwapOption<CycleStatus>,
}

impl<C: Connector> ClusterCollector<C> {
    #[must_use]
    pub fn new(cluster: Cluster<C>, metrics: Arc<ClusterMetrics>, cycles: CycleMetrics) -> Self {
        Self {
            cluster,
            metrics,
            cycles,
            last: ArcSwapOption::empty(),
        }
    }

    #[must_use]
    pub const fn cluster(&self) -> &Cluster<C> {
        &self.cluster
    }

    #[must_use]
    pub const fn cycle_metrics(&self) -> &CycleMetrics {
        &self.cycles
    }

    #[must_use]
    pub fn metrics(&self) -> &ClusterMetrics {
        &self.metrics
    }

    /// `None` until the first cycle completes.
    #[must_use]
    pub fn last_cycle(&self) -> Option<Arc<CycleStatus>> {
        self.last.load_full()
    }

    /// Probe the cluster once. A valid topology is published to the metrics;
    /// an invalid one leaves the previous values in place.
    ///
    /// # Errors
    ///
    /// Returns the [`TopologyError`] of the cycle, already logged.
    #[instrument(skip(self), level = "info", fields(cluster = %self.cluster.name()))]
    pub async fn run_cycle(&self) -> Result<(), TopologyError> {
        let timer = self.cycles.start_cycle();

        self.metrics
            .update_runtime_info(crate::built_info::PKG_NAME, crate::built_info::PKG_VERSION);

        match self.cluster.collect().await {
            Ok(topology) => {
                self.metrics.update_cluster_state(&topology);
                info!(
                    primary = %topology.primary.host,
                    replicas = topology.replicas.len(),
                    "cycle published"
                );
                self.store(CycleOutcome::Published {
                    primary: topology.primary.host,
                    replicas: topology.replicas.into_keys().collect(),
                });
                timer.success();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "cycle failed");
                self.store(CycleOutcome::Failed {
                    reason: e.reason().to_string(),
                    error: e.to_string(),
                });
                timer.error(e.reason());
                Err(e)
            }
        }
    }

    fn store(&self, outcome: CycleOutcome) {
        let finished_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        self.last.store(Some(Arc::new(CycleStatus {
            finished_at,
            outcome,
        })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::IS_IN_RECOVERY_QUERY;
    use crate::datasource::testing::{Reply, ScriptedConnector};
    use crate::datasource::{DataSource, DataSourceOptions};
    use prometheus::{Encoder, Registry, TextEncoder};

    struct Fixture {
        collector: ClusterCollector<ScriptedConnector>,
        registry: Registry,
    }

    fn fixture(connector: &ScriptedConnector, hosts: &[&str]) -> Fixture {
        let metrics = Arc::new(ClusterMetrics::new("main"));
        let cycles = CycleMetrics::new();
        let registry = Registry::new();
        assert!(metrics.register(&registry).is_ok());
        assert!(cycles.register(&registry).is_ok());

        let db = DataSource::new(
            connector.clone(),
            hosts.iter().copied(),
            DataSourceOptions::default(),
            Arc::clone(&metrics),
        );
        let cluster = Cluster::new("main", Arc::new(db));

        Fixture {
            collector: ClusterCollector::new(cluster, metrics, cycles),
            registry,
        }
    }

    fn render(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        assert!(TextEncoder::new().encode(&registry.gather(), &mut buffer).is_ok());
        String::from_utf8(buffer).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_cycle_publishes_lag() {
        let connector = ScriptedConnector::new();
        connector
            .primary("db1", "0/189B2E78")
            .replica("db2", "0/90000A1", "0/90000A0");
        let f = fixture(&connector, &["db1", "db2"]);

        assert!(f.collector.run_cycle().await.is_ok());

        let text = render(&f.registry);
        assert!(text.contains(
            r#"pgrc_receive_lag_bytes{cluster_name="main",host="db2",in_rec="true",master_host="db1"} 261828055"#
        ));
        assert!(text.contains(
            r#"pgrc_replay_lag_bytes{cluster_name="main",host="db2",in_rec="true",master_host="db1"} 1"#
        ));
        assert!(text.contains(r#"pgrc_build_info{cluster_name="main",name="pgrc_exporter""#));
        assert!(text.contains("pgrc_exporter_last_cycle_success 1"));

        let status = f.collector.last_cycle();
        assert_eq!(
            status.map(|s| s.outcome.clone()),
            Some(CycleOutcome::Published {
                primary: "db1".to_string(),
                replicas: vec!["db2".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_values() {
        let connector = ScriptedConnector::new();
        connector
            .primary("db1", "0/3000000")
            .replica("db2", "0/2000000", "0/2000000");
        let f = fixture(&connector, &["db1", "db2"]);

        assert!(f.collector.run_cycle().await.is_ok());

        // the replica goes away: only a primary is left
        connector.on_query("db2", IS_IN_RECOVERY_QUERY, vec![Reply::fail("gone")]);
        let result = f.collector.run_cycle().await;

        assert_eq!(
            result,
            Err(TopologyError::NoReplicationTopology {
                primaries: 1,
                replicas: 0
            })
        );

        let text = render(&f.registry);
        assert!(text.contains(
            r#"pgrc_receive_lag_bytes{cluster_name="main",host="db2",in_rec="true",master_host="db1"} 16777216"#
        ));
        assert!(text.contains(
            r#"pgrc_exporter_cycle_errors_total{reason="no_replication_topology"} 1"#
        ));
        assert!(text.contains("pgrc_exporter_last_cycle_success 0"));
        assert_eq!(f.collector.cycle_metrics().cycles(), 2);

        let Some(status) = f.collector.last_cycle() else {
            unreachable!("a cycle has completed");
        };
        assert!(!status.is_published());
    }

    #[tokio::test]
    async fn test_role_change_drops_stale_series() {
        let connector = ScriptedConnector::new();
        connector
            .primary("db1", "0/10")
            .replica("db2", "0/10", "0/10");
        let f = fixture(&connector, &["db1", "db2"]);
        assert!(f.collector.run_cycle().await.is_ok());

        // switchover
        connector
            .replica("db1", "0/20", "0/20")
            .primary("db2", "0/20");
        assert!(f.collector.run_cycle().await.is_ok());

        let text = render(&f.registry);
        assert!(text.contains(r#"pgrc_cluster_node_info{cluster_name="main",host="db1",in_rec="true"} 1"#));
        assert!(text.contains(r#"pgrc_cluster_node_info{cluster_name="main",host="db2",in_rec="false"} 1"#));
        assert!(!text.contains(r#"host="db1",in_rec="false""#));
        assert!(!text.contains(r#"master_host="db1""#));
    }

    #[test]
    fn test_status_serialization() {
        let status = CycleStatus {
            finished_at: 1_700_000_000,
            outcome: CycleOutcome::Failed {
                reason: "multiple_primaries".to_string(),
                error: "too many primaries".to_string(),
            },
        };

        let json = serde_json::to_value(&status).unwrap_or_default();

        assert_eq!(json.get("outcome").and_then(serde_json::Value::as_str), Some("failed"));
        assert_eq!(json.get("reason").and_then(serde_json::Value::as_str), Some("multiple_primaries"));
        assert_eq!(json.get("finished_at").and_then(serde_json::Value::as_u64), Some(1_700_000_000));
    }
}
