//! Per-host connection management.
//!
//! Every cluster node gets exactly one connection slot, guarded by its own
//! lock. Connections are opened lazily on first use; a failed query is
//! retried once on a fresh connection and nothing more.

pub mod postgres;

pub use postgres::{PgConnector, PgConnectorOptions};

use crate::metrics::ClusterMetrics;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument as _;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens connections to a named host.
pub trait Connector: Send + Sync + 'static {
    type Connection: NodeConnection;

    /// # Errors
    ///
    /// Returns the driver error when the host cannot be reached or rejects
    /// the login.
    fn connect<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Self::Connection, sqlx::Error>>;
}

/// The handful of operations the exporter needs from a live connection.
pub trait NodeConnection: Send + 'static {
    /// # Errors
    ///
    /// Returns the driver error when the round trip fails.
    fn ping(&mut self) -> BoxFuture<'_, Result<(), sqlx::Error>>;

    /// Run `query` and return the single text value of its single row.
    ///
    /// # Errors
    ///
    /// Returns the driver error when execution fails or the row has no
    /// text column.
    fn query_value<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<String, sqlx::Error>>;
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("can't connect to {host}: {source}")]
    Connection {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("query `{query}` on {host} failed: {source}")]
    Query {
        host: String,
        query: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} on {host} timed out after {timeout:?}")]
    Timeout {
        host: String,
        operation: String,
        timeout: Duration,
    },

    #[error("host {0} is disconnected")]
    Disconnected(String),

    #[error("host {0} is busy with another operation")]
    Busy(String),

    #[error("host {0} is not part of the cluster")]
    UnknownHost(String),
}

/// Connection slot of a single host.
pub enum ConnectionState<C> {
    Absent,
    Present(C),
}

impl<C> ConnectionState<C> {
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DataSourceOptions {
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for DataSourceOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

pub struct DataSource<C: Connector> {
    connector: C,
    options: DataSourceOptions,
    metrics: Arc<ClusterMetrics>,
    slots: HashMap<String, Mutex<ConnectionState<C::Connection>>>,
}

impl<C: Connector> DataSource<C> {
    /// Create a data source with an empty slot for each of `hosts`. The host
    /// set is fixed for the lifetime of the data source.
    pub fn new<I, S>(connector: C, hosts: I, options: DataSourceOptions, metrics: Arc<ClusterMetrics>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = hosts
            .into_iter()
            .map(|host| (host.into(), Mutex::new(ConnectionState::Absent)))
            .collect();

        Self {
            connector,
            options,
            metrics,
            slots,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ClusterMetrics> {
        &self.metrics
    }

    /// Hosts in sorted order.
    #[must_use]
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }

    /// Whether `host` currently holds a connection handle.
    pub async fn is_connected(&self, host: &str) -> bool {
        match self.slot(host) {
            Ok(slot) => slot.lock().await.is_present(),
            Err(_) => false,
        }
    }

    fn slot(&self, host: &str) -> Result<&Mutex<ConnectionState<C::Connection>>, DataSourceError> {
        self.slots
            .get(host)
            .ok_or_else(|| DataSourceError::UnknownHost(host.to_string()))
    }

    /// Run a single-value query against `host`, connecting first when no
    /// connection is held. A failed query triggers one reconnect and one
    /// retry; the retry's outcome is returned as is.
    ///
    /// # Errors
    ///
    /// Returns the connection error when the host cannot be reached, or the
    /// query error of the retried attempt.
    pub async fn query_one_value(&self, host: &str, query: &str) -> Result<String, DataSourceError> {
        debug!(host, query, "query");

        let mut state = self.slot(host)?.lock().await;

        if !state.is_present() {
            let connection = self.open(host).await.inspect_err(|e| {
                warn!(host, error = %e, "can't connect");
            })?;
            *state = ConnectionState::Present(connection);
        }

        let value = match self.execute(host, &mut state, query).await {
            Ok(value) => value,
            Err(first) => {
                warn!(host, query, error = %first, "query failed, reconnecting");
                self.reconnect_locked(host, &mut state).await?;
                self.execute(host, &mut state, query).await.inspect_err(|e| {
                    warn!(host, query, error = %e, "query failed after reconnect");
                })?
            }
        };

        debug!(host, query, value = %value, "query result");
        Ok(value)
    }

    /// Replace the connection of `host` with a fresh, pinged one. On failure
    /// the slot is left empty.
    ///
    /// # Errors
    ///
    /// Returns the connect or ping error.
    pub async fn reconnect(&self, host: &str) -> Result<(), DataSourceError> {
        let mut state = self.slot(host)?.lock().await;
        self.reconnect_locked(host, &mut state).await
    }

    /// Round-trip time of a ping on the existing connection. Never opens a
    /// connection and never waits for the slot.
    ///
    /// # Errors
    ///
    /// Returns [`DataSourceError::Busy`] while a connect or query holds the
    /// slot, [`DataSourceError::Disconnected`] when no connection is held,
    /// otherwise the ping error.
    pub async fn ping(&self, host: &str) -> Result<Duration, DataSourceError> {
        let Ok(mut state) = self.slot(host)?.try_lock() else {
            debug!(host, "slot held, skipping ping");
            return Err(DataSourceError::Busy(host.to_string()));
        };
        let ConnectionState::Present(connection) = &mut *state else {
            self.metrics.clear_ping(host);
            return Err(DataSourceError::Disconnected(host.to_string()));
        };

        let start = Instant::now();
        self.ping_connection(host, connection)
            .await
            .inspect_err(|_| self.metrics.clear_ping(host))?;
        let elapsed = start.elapsed();
        self.metrics.update_ping(host, elapsed);
        Ok(elapsed)
    }

    async fn reconnect_locked(
        &self,
        host: &str,
        state: &mut ConnectionState<C::Connection>,
    ) -> Result<(), DataSourceError> {
        self.metrics.inc_reconnects(host);

        *state = ConnectionState::Absent;

        let mut connection = self.open(host).await.inspect_err(|e| {
            warn!(host, error = %e, "can't reconnect");
        })?;

        self.ping_connection(host, &mut connection)
            .await
            .inspect_err(|e| {
                warn!(host, error = %e, "can't ping after reconnect");
            })?;

        *state = ConnectionState::Present(connection);
        Ok(())
    }

    async fn open(&self, host: &str) -> Result<C::Connection, DataSourceError> {
        let span = info_span!("db.connect", db.system = "postgresql", server.address = host);

        match timeout(self.options.connect_timeout, self.connector.connect(host))
            .instrument(span)
            .await
        {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(source)) => Err(DataSourceError::Connection {
                host: host.to_string(),
                source,
            }),
            Err(_) => Err(DataSourceError::Timeout {
                host: host.to_string(),
                operation: "connect".to_string(),
                timeout: self.options.connect_timeout,
            }),
        }
    }

    async fn ping_connection(&self, host: &str, connection: &mut C::Connection) -> Result<(), DataSourceError> {
        match timeout(self.options.connect_timeout, connection.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DataSourceError::Connection {
                host: host.to_string(),
                source,
            }),
            Err(_) => Err(DataSourceError::Timeout {
                host: host.to_string(),
                operation: "ping".to_string(),
                timeout: self.options.connect_timeout,
            }),
        }
    }

    async fn execute(
        &self,
        host: &str,
        state: &mut ConnectionState<C::Connection>,
        query: &str,
    ) -> Result<String, DataSourceError> {
        let ConnectionState::Present(connection) = state else {
            return Err(DataSourceError::Disconnected(host.to_string()));
        };

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.statement = query,
            server.address = host,
            otel.kind = "client"
        );

        let start = Instant::now();
        let result = match timeout(self.options.query_timeout, connection.query_value(query))
            .instrument(span)
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(DataSourceError::Query {
                host: host.to_string(),
                query: query.to_string(),
                source,
            }),
            Err(_) => Err(DataSourceError::Timeout {
                host: host.to_string(),
                operation: format!("query `{query}`"),
                timeout: self.options.query_timeout,
            }),
        };

        self.metrics
            .update_query_stats(host, query, start.elapsed(), result.is_ok());

        result
    }
}
