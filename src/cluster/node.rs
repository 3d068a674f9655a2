//! Role and WAL position probing of a single node.
//!
//! See <https://www.postgresql.org/docs/current/functions-admin.html> for the
//! recovery information functions used here.

use super::lsn::{Lsn, MalformedPosition};
use crate::datasource::{Connector, DataSource, DataSourceError};
use thiserror::Error;
use tracing::{debug, instrument};

// The texts are the `query` label of the query metrics; dashboards key on them.
pub const IS_IN_RECOVERY_QUERY: &str = "SELECT pg_is_in_recovery()";
pub const CURRENT_WAL_LSN_QUERY: &str = "SELECT COALESCE(pg_current_wal_lsn(),'0/0')";
pub const LAST_WAL_RECEIVE_LSN_QUERY: &str = "SELECT COALESCE(pg_last_wal_receive_lsn(),'0/0')";
pub const LAST_WAL_REPLAY_LSN_QUERY: &str = "SELECT COALESCE(pg_last_wal_replay_lsn(),'0/0')";

/// A node accepting writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryState {
    pub host: String,
    /// `pg_current_wal_lsn()`
    pub current_wal_lsn: Lsn,
}

/// A node in recovery, streaming from the primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaState {
    pub host: String,
    /// `pg_last_wal_receive_lsn()`: received and synced to disk.
    pub last_receive_lsn: Lsn,
    /// `pg_last_wal_replay_lsn()`: applied during recovery.
    pub last_replay_lsn: Lsn,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    Primary(PrimaryState),
    Replica(ReplicaState),
}

impl NodeState {
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::Primary(p) => &p.host,
            Self::Replica(r) => &r.host,
        }
    }

    #[must_use]
    pub const fn is_replica(&self) -> bool {
        matches!(self, Self::Replica(_))
    }
}

/// The probe step that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeStep {
    RecoveryMode,
    CurrentWal,
    LastReceivedWal,
    LastReplayedWal,
}

impl std::fmt::Display for ProbeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RecoveryMode => "recovery mode",
            Self::CurrentWal => "current wal location",
            Self::LastReceivedWal => "last received wal location",
            Self::LastReplayedWal => "last replayed wal location",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProbeErrorKind {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Position(#[from] MalformedPosition),
}

/// Why a node could not be classified in this cycle.
#[derive(Debug, Error)]
#[error("{host}: failed to query {step}: {kind}")]
pub struct ProbeError {
    pub host: String,
    pub step: ProbeStep,
    #[source]
    pub kind: ProbeErrorKind,
}

impl ProbeError {
    fn new(host: &str, step: ProbeStep, kind: impl Into<ProbeErrorKind>) -> Self {
        Self {
            host: host.to_string(),
            step,
            kind: kind.into(),
        }
    }
}

/// A cluster member to be probed once per cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    host: String,
}

impl Node {
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Determine the node's role and the WAL locations relevant to it.
    /// The first failing query or decode ends the probe.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] naming the failed step.
    #[instrument(skip(self, db), level = "debug", fields(host = %self.host))]
    pub async fn probe<C: Connector>(&self, db: &DataSource<C>) -> Result<NodeState, ProbeError> {
        let in_recovery = db
            .query_one_value(&self.host, IS_IN_RECOVERY_QUERY)
            .await
            .map_err(|e| ProbeError::new(&self.host, ProbeStep::RecoveryMode, e))?;

        let state = if is_true(&in_recovery) {
            NodeState::Replica(ReplicaState {
                host: self.host.clone(),
                last_receive_lsn: self
                    .query_lsn(db, LAST_WAL_RECEIVE_LSN_QUERY, ProbeStep::LastReceivedWal)
                    .await?,
                last_replay_lsn: self
                    .query_lsn(db, LAST_WAL_REPLAY_LSN_QUERY, ProbeStep::LastReplayedWal)
                    .await?,
            })
        } else {
            NodeState::Primary(PrimaryState {
                host: self.host.clone(),
                current_wal_lsn: self
                    .query_lsn(db, CURRENT_WAL_LSN_QUERY, ProbeStep::CurrentWal)
                    .await?,
            })
        };

        debug!(?state, "probed");
        Ok(state)
    }

    async fn query_lsn<C: Connector>(
        &self,
        db: &DataSource<C>,
        query: &str,
        step: ProbeStep,
    ) -> Result<Lsn, ProbeError> {
        let text = db
            .query_one_value(&self.host, query)
            .await
            .map_err(|e| ProbeError::new(&self.host, step, e))?;

        Lsn::parse(&text).map_err(|e| ProbeError::new(&self.host, step, e))
    }
}

/// `PostgreSQL` renders booleans as `t`/`f` or, cast to text, `true`/`false`.
fn is_true(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("t") || value.eq_ignore_ascii_case("true")
}
