use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use std::env;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Flushes exported spans when dropped.
#[must_use]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to flush traces: {e}");
        }
    }
}

/// Map `--verbosity` (0..=4) to a level.
#[must_use]
pub const fn verbosity_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
/// Spans are also exported over OTLP when `OTEL_EXPORTER_OTLP_ENDPOINT` is
/// set.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be built or a global
/// subscriber is already installed.
pub fn init(level: Level) -> Result<TelemetryGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let provider = match env::var(OTLP_ENDPOINT_ENV) {
        Ok(endpoint) if !endpoint.is_empty() => Some(tracer_provider(&endpoint)?),
        _ => None,
    };

    let otel = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer()
            .with_tracer(provider.tracer(env!("CARGO_PKG_NAME")))
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(otel)
        .try_init()?;

    if let Some(provider) = &provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    Ok(TelemetryGuard { provider })
}

fn tracer_provider(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(env!("CARGO_PKG_NAME"))
                .build(),
        )
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_level() {
        assert_eq!(verbosity_level(0), Level::ERROR);
        assert_eq!(verbosity_level(1), Level::WARN);
        assert_eq!(verbosity_level(2), Level::INFO);
        assert_eq!(verbosity_level(3), Level::DEBUG);
        assert_eq!(verbosity_level(4), Level::TRACE);
        assert_eq!(verbosity_level(9), Level::TRACE);
    }
}
