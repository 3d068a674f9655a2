//! Prometheus metrics for the replication cluster.
//!
//! Metric and label names follow the `pgrc` scheme so existing dashboards
//! keep working.

mod cycle;

pub use cycle::{CycleMetrics, CycleTimer};

use crate::cluster::{ClusterTopology, PrimaryState, ReplicaState, SlaveLag, compute_lag};
use anyhow::Result;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry, proto::MetricFamily};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const NAMESPACE: &str = "pgrc";

const PROGRAM_NAME_LABEL: &str = "name";
const PROGRAM_VERSION_LABEL: &str = "version";
const CLUSTER_NAME_LABEL: &str = "cluster_name";
const IN_RECOVERY_LABEL: &str = "in_rec";
const SUCCESS_LABEL: &str = "success";
const HOST_LABEL: &str = "host";
const MASTER_HOST_LABEL: &str = "master_host";
const QUERY_LABEL: &str = "query";

const PRIMARY: &str = "false";
const REPLICA: &str = "true";

/// Observations for one cluster: topology, WAL positions, lag and the
/// per-host connection/query accounting.
///
/// A topology is published under a write lock and [`ClusterMetrics::gather`]
/// reads under the shared one, so a scrape never sees half a cycle.
#[derive(Clone)]
pub struct ClusterMetrics {
    cluster_name: String,
    publishing: Arc<RwLock<()>>,
    build_info: GaugeVec,
    node_info: GaugeVec,
    ping_seconds: GaugeVec,
    reconnects_count_total: IntCounterVec,
    queries_count_total: IntCounterVec,
    last_query_seconds: GaugeVec,
    current_wal_lsn_bytes: GaugeVec,
    last_wal_receive_lsn_bytes: GaugeVec,
    last_wal_replay_lsn_bytes: GaugeVec,
    receive_lag_bytes: GaugeVec,
    replay_lag_bytes: GaugeVec,
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
}

impl ClusterMetrics {
    /// Create the metric families for `cluster_name`.
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should not occur with static names).
    #[must_use]
    #[allow(clippy::expect_used, clippy::too_many_lines)]
    pub fn new(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            publishing: Arc::new(RwLock::new(())),
            build_info: gauge_vec(
                "build_info",
                "Program build info",
                &[PROGRAM_NAME_LABEL, PROGRAM_VERSION_LABEL, CLUSTER_NAME_LABEL],
            )
            .expect("pgrc_build_info"),
            node_info: gauge_vec(
                "cluster_node_info",
                "Cluster node info",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, IN_RECOVERY_LABEL],
            )
            .expect("pgrc_cluster_node_info"),
            ping_seconds: gauge_vec(
                "ping_seconds",
                "Cluster node last ping seconds",
                &[CLUSTER_NAME_LABEL, HOST_LABEL],
            )
            .expect("pgrc_ping_seconds"),
            reconnects_count_total: counter_vec(
                "reconnects_count_total",
                "Cluster node reconnects total count",
                &[CLUSTER_NAME_LABEL, HOST_LABEL],
            )
            .expect("pgrc_reconnects_count_total"),
            queries_count_total: counter_vec(
                "queries_count_total",
                "All queries total count",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, QUERY_LABEL, SUCCESS_LABEL],
            )
            .expect("pgrc_queries_count_total"),
            last_query_seconds: gauge_vec(
                "last_query_seconds",
                "Cluster node last query seconds",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, QUERY_LABEL],
            )
            .expect("pgrc_last_query_seconds"),
            current_wal_lsn_bytes: gauge_vec(
                "current_wal_lsn_bytes",
                "The current write-ahead log write location: SELECT pg_current_wal_lsn()",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, IN_RECOVERY_LABEL],
            )
            .expect("pgrc_current_wal_lsn_bytes"),
            last_wal_receive_lsn_bytes: gauge_vec(
                "last_wal_receive_lsn_bytes",
                "The last write-ahead log location that has been received and synced to disk by streaming replication: SELECT pg_last_wal_receive_lsn()",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, IN_RECOVERY_LABEL],
            )
            .expect("pgrc_last_wal_receive_lsn_bytes"),
            last_wal_replay_lsn_bytes: gauge_vec(
                "last_wal_replay_lsn_bytes",
                "The last write-ahead log location that has been replayed during recovery: SELECT pg_last_wal_replay_lsn()",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, IN_RECOVERY_LABEL],
            )
            .expect("pgrc_last_wal_replay_lsn_bytes"),
            receive_lag_bytes: gauge_vec(
                "receive_lag_bytes",
                "Cluster node receive lag bytes: pg_current_wal_lsn() - pg_last_wal_receive_lsn()",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, IN_RECOVERY_LABEL, MASTER_HOST_LABEL],
            )
            .expect("pgrc_receive_lag_bytes"),
            replay_lag_bytes: gauge_vec(
                "replay_lag_bytes",
                "Cluster node replay lag bytes: pg_last_wal_receive_lsn() - pg_last_wal_replay_lsn()",
                &[CLUSTER_NAME_LABEL, HOST_LABEL, IN_RECOVERY_LABEL, MASTER_HOST_LABEL],
            )
            .expect("pgrc_replay_lag_bytes"),
        }
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Register all metric families with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.build_info.clone()))?;
        registry.register(Box::new(self.node_info.clone()))?;
        registry.register(Box::new(self.ping_seconds.clone()))?;
        registry.register(Box::new(self.reconnects_count_total.clone()))?;
        registry.register(Box::new(self.queries_count_total.clone()))?;
        registry.register(Box::new(self.last_query_seconds.clone()))?;
        registry.register(Box::new(self.current_wal_lsn_bytes.clone()))?;
        registry.register(Box::new(self.last_wal_receive_lsn_bytes.clone()))?;
        registry.register(Box::new(self.last_wal_replay_lsn_bytes.clone()))?;
        registry.register(Box::new(self.receive_lag_bytes.clone()))?;
        registry.register(Box::new(self.replay_lag_bytes.clone()))?;
        Ok(())
    }

    pub fn update_runtime_info(&self, name: &str, version: &str) {
        self.build_info.reset();
        self.build_info
            .with_label_values(&[name, version, self.cluster_name.as_str()])
            .set(1.0);
    }

    pub fn update_query_stats(&self, host: &str, query: &str, elapsed: Duration, success: bool) {
        let cluster = self.cluster_name.as_str();
        if success {
            self.last_query_seconds
                .with_label_values(&[cluster, host, query])
                .set(elapsed.as_secs_f64());
        }
        self.queries_count_total
            .with_label_values(&[cluster, host, query, if success { "true" } else { "false" }])
            .inc();
    }

    pub fn update_ping(&self, host: &str, elapsed: Duration) {
        self.ping_seconds
            .with_label_values(&[self.cluster_name.as_str(), host])
            .set(elapsed.as_secs_f64());
    }

    /// Drop the ping series of a host that no longer answers.
    pub fn clear_ping(&self, host: &str) {
        // absent series is fine
        let _ = self
            .ping_seconds
            .remove_label_values(&[self.cluster_name.as_str(), host]);
    }

    pub fn inc_reconnects(&self, host: &str) {
        self.reconnects_count_total
            .with_label_values(&[self.cluster_name.as_str(), host])
            .inc();
    }

    #[must_use]
    pub fn reconnects(&self, host: &str) -> u64 {
        self.reconnects_count_total
            .with_label_values(&[self.cluster_name.as_str(), host])
            .get()
    }

    #[must_use]
    pub fn queries(&self, host: &str, query: &str, success: bool) -> u64 {
        self.queries_count_total
            .with_label_values(&[
                self.cluster_name.as_str(),
                host,
                query,
                if success { "true" } else { "false" },
            ])
            .get()
    }

    /// Snapshot of `registry`, never taken while a topology is being
    /// published.
    #[must_use]
    pub fn gather(&self, registry: &Registry) -> Vec<MetricFamily> {
        let _published = self.publishing.read().unwrap_or_else(PoisonError::into_inner);
        registry.gather()
    }

    /// Publish a freshly classified topology with the lag of every replica.
    /// Series left over from earlier cycles are dropped first so a node that
    /// switched roles or vanished does not keep reporting.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_cluster_state(&self, topology: &ClusterTopology) {
        let _publishing = self.publishing.write().unwrap_or_else(PoisonError::into_inner);

        self.node_info.reset();
        self.current_wal_lsn_bytes.reset();
        self.last_wal_receive_lsn_bytes.reset();
        self.last_wal_replay_lsn_bytes.reset();
        self.receive_lag_bytes.reset();
        self.replay_lag_bytes.reset();

        let cluster = self.cluster_name.as_str();
        let primary = &topology.primary;

        self.node_info
            .with_label_values(&[cluster, primary.host.as_str(), PRIMARY])
            .set(1.0);
        self.current_wal_lsn_bytes
            .with_label_values(&[cluster, primary.host.as_str(), PRIMARY])
            .set(primary.current_wal_lsn.as_u64() as f64);

        for (host, replica) in &topology.replicas {
            self.node_info
                .with_label_values(&[cluster, host.as_str(), REPLICA])
                .set(1.0);
            self.last_wal_receive_lsn_bytes
                .with_label_values(&[cluster, host.as_str(), REPLICA])
                .set(replica.last_receive_lsn.as_u64() as f64);
            self.last_wal_replay_lsn_bytes
                .with_label_values(&[cluster, host.as_str(), REPLICA])
                .set(replica.last_replay_lsn.as_u64() as f64);

            self.update_slave_lag(primary, replica, compute_lag(primary, replica));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_slave_lag(&self, primary: &PrimaryState, replica: &ReplicaState, lag: SlaveLag) {
        let labels = [
            self.cluster_name.as_str(),
            replica.host.as_str(),
            REPLICA,
            primary.host.as_str(),
        ];
        self.receive_lag_bytes
            .with_label_values(&labels)
            .set(lag.receive_lag as f64);
        self.replay_lag_bytes
            .with_label_values(&labels)
            .set(lag.replay_lag as f64);
    }
}
