use anyhow::Result;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Self-monitoring of collection cycles: how long they take and how often
/// the topology could not be classified.
#[derive(Clone)]
pub struct CycleMetrics {
    cycle_duration_seconds: Histogram,
    cycle_errors_total: IntCounterVec,
    last_cycle_timestamp: Gauge,
    last_cycle_success: Gauge,
    cycles_total: IntCounter,
}

impl Default for CycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleMetrics {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pgrc_exporter_cycle_duration_seconds",
                "Time spent probing all cluster nodes in one collection cycle",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("pgrc_exporter_cycle_duration_seconds");

        let cycle_errors_total = IntCounterVec::new(
            Opts::new(
                "pgrc_exporter_cycle_errors_total",
                "Collection cycles dropped because the topology was invalid",
            ),
            &["reason"],
        )
        .expect("pgrc_exporter_cycle_errors_total");

        let last_cycle_timestamp = Gauge::with_opts(Opts::new(
            "pgrc_exporter_last_cycle_timestamp_seconds",
            "Unix timestamp of the last collection cycle",
        ))
        .expect("pgrc_exporter_last_cycle_timestamp_seconds");

        let last_cycle_success = Gauge::with_opts(Opts::new(
            "pgrc_exporter_last_cycle_success",
            "Whether the last collection cycle published a topology (1=success, 0=failure)",
        ))
        .expect("pgrc_exporter_last_cycle_success");

        let cycles_total = IntCounter::with_opts(Opts::new(
            "pgrc_exporter_cycles_total",
            "Total number of collection cycles since start",
        ))
        .expect("pgrc_exporter_cycles_total");

        Self {
            cycle_duration_seconds,
            cycle_errors_total,
            last_cycle_timestamp,
            last_cycle_success,
            cycles_total,
        }
    }

    #[must_use]
    pub fn start_cycle(&self) -> CycleTimer {
        self.cycles_total.inc();
        CycleTimer {
            start: Instant::now(),
            metrics: self.clone(),
            finished: false,
        }
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles_total.get()
    }

    #[must_use]
    pub fn errors(&self, reason: &str) -> u64 {
        self.cycle_errors_total.with_label_values(&[reason]).get()
    }

    fn record(&self, duration: f64, error: Option<&str>) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        self.cycle_duration_seconds.observe(duration);
        self.last_cycle_timestamp.set(timestamp);

        match error {
            None => self.last_cycle_success.set(1.0),
            Some(reason) => {
                self.cycle_errors_total.with_label_values(&[reason]).inc();
                self.last_cycle_success.set(0.0);
            }
        }
    }

    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.cycle_duration_seconds.clone()))?;
        registry.register(Box::new(self.cycle_errors_total.clone()))?;
        registry.register(Box::new(self.last_cycle_timestamp.clone()))?;
        registry.register(Box::new(self.last_cycle_success.clone()))?;
        registry.register(Box::new(self.cycles_total.clone()))?;
        Ok(())
    }
}

/// Measures one cycle. Dropping an unfinished timer counts as an aborted
/// cycle.
pub struct CycleTimer {
    start: Instant,
    metrics: CycleMetrics,
    finished: bool,
}

impl CycleTimer {
    pub fn success(mut self) {
        self.finished = true;
        self.metrics
            .record(self.start.elapsed().as_secs_f64(), None);
    }

    pub fn error(mut self, reason: &str) {
        self.finished = true;
        self.metrics
            .record(self.start.elapsed().as_secs_f64(), Some(reason));
    }
}

impl Drop for CycleTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics
                .record(self.start.elapsed().as_secs_f64(), Some("aborted"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_metrics_registers_without_error() {
        let metrics = CycleMetrics::new();
        let registry = Registry::new();
        assert!(metrics.register(&registry).is_ok());
    }

    #[test]
    fn test_cycle_timer_success() {
        let metrics = CycleMetrics::new();
        metrics.start_cycle().success();

        assert_eq!(metrics.cycles(), 1);
        assert_eq!(metrics.errors("multiple_primaries"), 0);
        assert!((metrics.last_cycle_success.get() - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.cycle_duration_seconds.get_sample_count(), 1);
    }

    #[test]
    fn test_cycle_timer_error_is_recorded_once() {
        let metrics = CycleMetrics::new();
        metrics.start_cycle().error("multiple_primaries");

        assert_eq!(metrics.errors("multiple_primaries"), 1);
        assert_eq!(metrics.errors("aborted"), 0);
        assert!(metrics.last_cycle_success.get().abs() < f64::EPSILON);
        assert_eq!(metrics.cycle_duration_seconds.get_sample_count(), 1);
    }

    #[test]
    fn test_dropped_timer_counts_as_aborted() {
        let metrics = CycleMetrics::new();
        {
            let _timer = metrics.start_cycle();
        }
        assert_eq!(metrics.errors("aborted"), 1);
    }
}
