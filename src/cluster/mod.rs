//! Topology discovery and replication lag.
//!
//! Each cycle probes every node, classifies the healthy ones into a single
//! primary and a set of replicas, and rejects anything else. Lag is measured
//! in WAL bytes.

pub mod lsn;
pub mod node;

pub use lsn::{Lsn, MalformedPosition};
pub use node::{Node, NodeState, PrimaryState, ProbeError, ReplicaState};

use crate::datasource::{Connector, DataSource};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("too many primaries, known {known}, pretending: {pretender}")]
    MultiplePrimaries { known: String, pretender: String },

    #[error("this is not a replication cluster, primaries: {primaries}, replicas: {replicas}")]
    NoReplicationTopology { primaries: usize, replicas: usize },
}

impl TopologyError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MultiplePrimaries { .. } => "multiple_primaries",
            Self::NoReplicationTopology { .. } => "no_replication_topology",
        }
    }
}

/// Exactly one primary and at least one replica, keyed by host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTopology {
    pub primary: PrimaryState,
    pub replicas: BTreeMap<String, ReplicaState>,
}

/// Bytes a replica trails by. Both values are clamped at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlaveLag {
    /// primary current location - replica received location
    pub receive_lag: u64,
    /// replica received location - replica replayed location
    pub replay_lag: u64,
}

/// Lag of `replica` behind `primary`.
///
/// The positions come from separate queries, so a replica may appear ahead
/// of what was read from the primary, or to have replayed past what it
/// received; such skew reads as zero lag.
#[must_use]
pub fn compute_lag(primary: &PrimaryState, replica: &ReplicaState) -> SlaveLag {
    let lag = SlaveLag {
        receive_lag: primary.current_wal_lsn.bytes_since(replica.last_receive_lsn),
        replay_lag: replica.last_receive_lsn.bytes_since(replica.last_replay_lsn),
    };

    debug!(
        replica = %replica.host,
        primary.current_wal_lsn = %primary.current_wal_lsn,
        replica.last_receive_lsn = %replica.last_receive_lsn,
        replica.last_replay_lsn = %replica.last_replay_lsn,
        receive_lag = lag.receive_lag,
        replay_lag = lag.replay_lag,
        "calculated lag"
    );

    lag
}

/// Classify probe results. Failed probes are skipped.
///
/// # Errors
///
/// Returns [`TopologyError`] when the healthy nodes are not exactly one
/// primary plus at least one replica.
pub fn classify<I>(results: I) -> Result<ClusterTopology, TopologyError>
where
    I: IntoIterator<Item = Result<NodeState, ProbeError>>,
{
    let mut primary: Option<PrimaryState> = None;
    let mut replicas = BTreeMap::new();

    for result in results {
        match result {
            Err(e) => warn!(host = %e.host, error = %e, "node excluded from this cycle"),
            Ok(NodeState::Replica(replica)) => {
                replicas.insert(replica.host.clone(), replica);
            }
            Ok(NodeState::Primary(candidate)) => {
                if let Some(known) = &primary {
                    return Err(TopologyError::MultiplePrimaries {
                        known: known.host.clone(),
                        pretender: candidate.host,
                    });
                }
                primary = Some(candidate);
            }
        }
    }

    match primary {
        Some(primary) if !replicas.is_empty() => Ok(ClusterTopology { primary, replicas }),
        primary => Err(TopologyError::NoReplicationTopology {
            primaries: usize::from(primary.is_some()),
            replicas: replicas.len(),
        }),
    }
}

pub struct Cluster<C: Connector> {
    name: String,
    nodes: Vec<Node>,
    db: Arc<DataSource<C>>,
}

impl<C: Connector> Cluster<C> {
    /// One node per host known to `db`, in host order.
    #[must_use]
    pub fn new(name: &str, db: Arc<DataSource<C>>) -> Self {
        let nodes = db.hosts().into_iter().map(Node::new).collect();
        Self {
            name: name.to_string(),
            nodes,
            db,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub const fn data_source(&self) -> &Arc<DataSource<C>> {
        &self.db
    }

    /// Probe all nodes concurrently and classify the results.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] when the cycle's topology is invalid.
    #[instrument(skip(self), level = "info", err, fields(cluster = %self.name))]
    pub async fn collect(&self) -> Result<ClusterTopology, TopologyError> {
        let probes = self.nodes.iter().map(|node| node.probe(&self.db));
        let results = join_all(probes).await;

        let topology = classify(results)?;

        debug!(
            primary = %topology.primary.host,
            current_wal_lsn = %topology.primary.current_wal_lsn,
            replicas = topology.replicas.len(),
            "classified cluster"
        );

        Ok(topology)
    }
}
