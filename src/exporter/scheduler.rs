use super::ClusterCollector;
use crate::datasource::Connector;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("collection interval must be at least one second, got {0:?}")]
    ZeroInterval(Duration),
}

/// Running cycle loop; stopped when dropped.
#[must_use]
pub struct SchedulerHandle(JoinHandle<()>);

impl SchedulerHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives collection cycles at a fixed interval. The first cycle starts
/// immediately; cycles never overlap, a tick missed while a cycle is still
/// running is skipped.
#[derive(Clone, Copy, Debug)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    /// # Errors
    ///
    /// Returns [`SchedulerError::ZeroInterval`] for an interval below one
    /// second.
    pub fn new(interval: Duration) -> Result<Self, SchedulerError> {
        if interval < Duration::from_secs(1) {
            return Err(SchedulerError::ZeroInterval(interval));
        }
        Ok(Self { interval })
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the cycle loop. Cycle errors are logged by the collector and
    /// never stop the loop; dropping the handle does.
    pub fn spawn<C: Connector>(self, collector: Arc<ClusterCollector<C>>) -> SchedulerHandle {
        info!(interval = ?self.interval, "starting collection scheduler");

        SchedulerHandle(tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if collector.run_cycle().await.is_err() {
                    debug!("cycle dropped, waiting for next tick");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::datasource::testing::ScriptedConnector;
    use crate::datasource::{DataSource, DataSourceOptions};
    use crate::metrics::{ClusterMetrics, CycleMetrics};

    fn collector(connector: &ScriptedConnector) -> Arc<ClusterCollector<ScriptedConnector>> {
        let metrics = Arc::new(ClusterMetrics::new("main"));
        let db = DataSource::new(
            connector.clone(),
            ["db1", "db2"],
            DataSourceOptions::default(),
            Arc::clone(&metrics),
        );
        Arc::new(ClusterCollector::new(
            Cluster::new("main", Arc::new(db)),
            metrics,
            CycleMetrics::new(),
        ))
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert_eq!(
            Scheduler::new(Duration::ZERO).err(),
            Some(SchedulerError::ZeroInterval(Duration::ZERO))
        );
        assert!(Scheduler::new(Duration::from_millis(500)).is_err());
        assert!(Scheduler::new(Duration::from_secs(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_runs_immediately_then_on_interval() {
        let connector = ScriptedConnector::new();
        connector.primary("db1", "0/10").replica("db2", "0/10", "0/10");
        let collector = collector(&connector);

        let scheduler = Scheduler::new(Duration::from_secs(15)).unwrap_or_else(|_| unreachable!());
        let handle = scheduler.spawn(Arc::clone(&collector));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(collector.cycle_metrics().cycles(), 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(collector.cycle_metrics().cycles(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(collector.cycle_metrics().cycles(), 4);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(collector.cycle_metrics().cycles(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_cycles_keep_the_loop_alive() {
        let connector = ScriptedConnector::new();
        connector.primary("db1", "0/10").primary("db2", "0/10");
        let collector = collector(&connector);

        let handle = Scheduler::new(Duration::from_secs(1))
            .unwrap_or_else(|_| unreachable!())
            .spawn(Arc::clone(&collector));

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(collector.cycle_metrics().cycles(), 4);
        assert_eq!(collector.cycle_metrics().errors("multiple_primaries"), 4);
        assert!(!handle.is_finished());
    }
}
