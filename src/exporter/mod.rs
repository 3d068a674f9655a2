//! HTTP exposition and the collection loop.

mod collector;
mod config;
mod handlers;
mod scheduler;

pub use collector::{ClusterCollector, CycleOutcome, CycleStatus};
pub use config::{DEFAULT_INTERVAL, DEFAULT_METRICS_PATH, DEFAULT_WEB_PORT, ExporterConfig};
pub use handlers::{AppState, Health, NodeHealth};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle};

use crate::cluster::Cluster;
use crate::datasource::{Connector, DataSource, PgConnector};
use crate::metrics::{ClusterMetrics, CycleMetrics};
use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, header::SERVER},
    routing::get,
};
use prometheus::Registry;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("failed to register metrics: {0:#}")]
    Register(anyhow::Error),

    #[error("invalid metrics path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("metrics server failed: {0}")]
    Serve(#[source] io::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Check that `path` can be routed next to `/` and `/health`.
///
/// # Errors
///
/// Returns the reason the path is unusable.
pub fn validate_metrics_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("must start with '/'");
    }
    if path == "/" || path == "/health" {
        return Err("collides with a built-in route");
    }
    if path.contains(['{', '}', '*', ':']) {
        return Err("must not contain route parameters");
    }
    if path.ends_with('/') {
        return Err("must not end with '/'");
    }
    Ok(())
}

#[derive(Clone, Copy, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = HeaderValue::from_str(&Ulid::new().to_string()).ok()?;
        Some(RequestId::new(id))
    }
}

/// Routes and middleware of the exporter.
#[must_use]
pub fn router<C: Connector>(state: AppState<C>) -> Router {
    let metrics_path = Arc::clone(&state.metrics_path);

    Router::new()
        .route(&metrics_path, get(handlers::metrics::<C>))
        .route("/health", get(handlers::health::<C>))
        .route("/", get(handlers::root::<C>))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    info_span!(
                        "http.request",
                        http.request.method = %request.method(),
                        url.path = %request.uri().path(),
                        request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(SetResponseHeaderLayer::if_not_present(
                    SERVER,
                    HeaderValue::from_static(concat!(
                        env!("CARGO_PKG_NAME"),
                        "/",
                        env!("CARGO_PKG_VERSION")
                    )),
                )),
        )
        .with_state(state)
}

/// Bind `listen`, or `::` falling back to `0.0.0.0` when unset.
///
/// # Errors
///
/// Returns [`ExporterError::Bind`] with the last address tried.
pub async fn bind(listen: Option<IpAddr>, port: u16) -> Result<TcpListener, ExporterError> {
    let try_bind = |ip: IpAddr| async move {
        let addr = SocketAddr::new(ip, port);
        TcpListener::bind(addr)
            .await
            .map_err(|source| ExporterError::Bind { addr, source })
    };

    match listen {
        Some(ip) => try_bind(ip).await,
        None => match try_bind(IpAddr::V6(Ipv6Addr::UNSPECIFIED)).await {
            Ok(listener) => Ok(listener),
            Err(e) => {
                warn!(error = %e, "IPv6 unavailable, falling back to IPv4");
                try_bind(IpAddr::V4(Ipv4Addr::UNSPECIFIED)).await
            }
        },
    }
}

/// Start the exporter and serve until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the metrics cannot be registered, the interval is
/// invalid, or the server cannot bind or serve.
pub async fn new(config: ExporterConfig) -> Result<(), ExporterError> {
    let ExporterConfig {
        listen,
        port,
        metrics_path,
        cluster_name,
        nodes,
        interval,
        connector,
        datasource,
    } = config;

    validate_metrics_path(&metrics_path).map_err(|reason| ExporterError::InvalidPath {
        path: metrics_path.clone(),
        reason,
    })?;
    let scheduler = Scheduler::new(interval)?;

    let metrics = Arc::new(ClusterMetrics::new(&cluster_name));
    let cycles = CycleMetrics::new();
    let registry = Registry::new();
    metrics.register(&registry).map_err(ExporterError::Register)?;
    cycles.register(&registry).map_err(ExporterError::Register)?;

    let db = DataSource::new(
        PgConnector::new(connector),
        nodes.iter().cloned(),
        datasource,
        Arc::clone(&metrics),
    );
    let cluster = Cluster::new(&cluster_name, Arc::new(db));
    let collector = Arc::new(ClusterCollector::new(cluster, metrics, cycles));

    let listener = bind(listen, port).await?;
    let local = listener.local_addr().map_err(ExporterError::Serve)?;

    info!(
        cluster = %cluster_name,
        nodes = ?nodes,
        address = %local,
        path = %metrics_path,
        "listening"
    );

    let cycle_loop = scheduler.spawn(Arc::clone(&collector));

    let app = router(AppState {
        registry,
        collector,
        metrics_path: Arc::from(metrics_path),
    });

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    drop(cycle_loop);

    served.map_err(|e| {
        error!(error = %e, "server error");
        ExporterError::Serve(e)
    })?;

    info!("exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
