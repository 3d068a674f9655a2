use super::{ClusterCollector, CycleStatus};
use crate::datasource::Connector;
use axum::{
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{Html, IntoResponse, Json, Response},
};
use futures::future::join_all;
use prometheus::{Encoder, Registry, TEXT_FORMAT, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

pub struct AppState<C: Connector> {
    pub registry: Registry,
    pub collector: Arc<ClusterCollector<C>>,
    pub metrics_path: Arc<str>,
}

impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            collector: Arc::clone(&self.collector),
            metrics_path: Arc::clone(&self.metrics_path),
        }
    }
}

#[allow(clippy::unused_async)]
pub async fn metrics<C: Connector>(State(state): State<AppState<C>>) -> Response {
    let encoder = TextEncoder::new();
    let families = state.collector.metrics().gather(&state.registry);
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&families, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    debug!(families = families.len(), bytes = buffer.len(), "encoded metrics");

    ([(CONTENT_TYPE, TEXT_FORMAT)], buffer).into_response()
}

#[derive(Debug, Serialize)]
pub struct NodeHealth {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    /// `ok` after a published cycle, `degraded` after a failed one and
    /// `starting` before the first.
    pub status: &'static str,
    pub cluster: String,
    pub version: &'static str,
    pub last_cycle: Option<CycleStatus>,
    pub nodes: Vec<NodeHealth>,
}

/// Pings every node on its existing connection and reports the last cycle.
pub async fn health<C: Connector>(State(state): State<AppState<C>>) -> Json<Health> {
    let cluster = state.collector.cluster();
    let db = cluster.data_source();

    let nodes = join_all(db.hosts().into_iter().map(|host| async move {
        match db.ping(host).await {
            Ok(elapsed) => NodeHealth {
                host: host.to_string(),
                ping_ms: Some(elapsed.as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => NodeHealth {
                host: host.to_string(),
                ping_ms: None,
                error: Some(e.to_string()),
            },
        }
    }))
    .await;

    let last_cycle = state.collector.last_cycle().map(|s| (*s).clone());
    let status = match &last_cycle {
        None => "starting",
        Some(s) if s.is_published() => "ok",
        Some(_) => "degraded",
    };

    Json(Health {
        status,
        cluster: cluster.name().to_string(),
        version: crate::built_info::PKG_VERSION,
        last_cycle,
        nodes,
    })
}

#[allow(clippy::unused_async)]
pub async fn root<C: Connector>(State(state): State<AppState<C>>) -> Html<String> {
    let path = &state.metrics_path;
    let name = state.collector.cluster().name();

    Html(format!(
        "<html>\n<head><title>PostgreSQL replication cluster exporter</title></head>\n<body>\n\
         <h1>PostgreSQL replication cluster exporter</h1>\n\
         <p>Cluster: {name}</p>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         <p><a href=\"/health\">Health</a></p>\n\
         </body>\n</html>\n"
    ))
}
