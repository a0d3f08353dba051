//! Fixed-interval polling loop
//!
//! Runs one [`CycleTask`] per tick. A cycle is never started while another is
//! still running: if a cycle overruns the period, the next one starts as soon
//! as it finishes and the schedule shifts from there.

use crate::error::MonitorError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Work performed on every tick
#[async_trait]
pub trait CycleTask: Send + Sync {
    /// Run one cycle. An error is a structural failure of the whole cycle.
    async fn run_cycle(&self) -> Result<(), MonitorError>;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Period between cycle starts (default: 20 seconds)
    pub interval: Duration,
    /// Stop after the first failed cycle instead of logging and continuing
    pub fail_fast: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            fail_fast: false,
        }
    }
}

/// Counters for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub cycles: u64,
    pub failures: u64,
}

pub struct Poller {
    task: Arc<dyn CycleTask>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(task: Arc<dyn CycleTask>, config: PollerConfig) -> Self {
        Self { task, config }
    }

    /// Poll until `shutdown` fires, or until the first failure with `fail_fast`.
    ///
    /// A cycle in progress when shutdown is requested runs to completion.
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<PollerStats, MonitorError> {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            fail_fast = self.config.fail_fast,
            "Starting poller"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = PollerStats::default();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!(cycles = stats.cycles, failures = stats.failures, "Shutting down poller");
                    break;
                }
                _ = ticker.tick() => {
                    let start = Instant::now();
                    stats.cycles += 1;

                    let result = self.task.run_cycle().await;
                    let elapsed = start.elapsed();

                    match result {
                        Ok(()) => {
                            debug!(cycle = stats.cycles, elapsed_ms = elapsed.as_millis(), "Cycle complete");
                        }
                        Err(e) => {
                            stats.failures += 1;
                            error!(cycle = stats.cycles, error = %e, "Cycle failed");
                            if self.config.fail_fast {
                                return Err(e);
                            }
                        }
                    }

                    if elapsed > self.config.interval {
                        debug!(
                            elapsed_ms = elapsed.as_millis(),
                            interval_ms = self.config.interval.as_millis(),
                            "Cycle overran the poll interval"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }
}

pub struct PollerBuilder {
    task: Option<Arc<dyn CycleTask>>,
    config: PollerConfig,
}

impl PollerBuilder {
    pub fn new() -> Self {
        Self {
            task: None,
            config: PollerConfig::default(),
        }
    }

    pub fn task(mut self, task: Arc<dyn CycleTask>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    pub fn build(self) -> anyhow::Result<Poller> {
        let task = self
            .task
            .ok_or_else(|| anyhow::anyhow!("Cycle task is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Poll interval must be positive");
        }

        Ok(Poller::new(task, self.config))
    }
}

impl Default for PollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts cycles, optionally sleeping or failing in each one
    struct MockTask {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        work: Duration,
        fail: bool,
    }

    impl MockTask {
        fn new(work: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                work,
                fail,
            })
        }
    }

    #[async_trait]
    impl CycleTask for MockTask {
        async fn run_cycle(&self) -> Result<(), MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(MonitorError::Snapshot(SnapshotError::Empty {
                    namespace: "default".to_string(),
                    what: "deployments".to_string(),
                }))
            } else {
                Ok(())
            }
        }
    }

    fn poller(task: Arc<MockTask>, every: Duration, fail_fast: bool) -> Poller {
        PollerBuilder::new()
            .task(task)
            .interval(every)
            .fail_fast(fail_fast)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_task() {
        assert!(PollerBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = PollerBuilder::new()
            .task(MockTask::new(Duration::ZERO, false))
            .interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_fixed_interval() {
        let task = MockTask::new(Duration::ZERO, false);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(poller(task.clone(), Duration::from_secs(10), false).run(rx));

        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(task.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_delays_next() {
        let task = MockTask::new(Duration::from_secs(15), false);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(poller(task.clone(), Duration::from_secs(10), false).run(rx));

        // Cycles start at 0, 15 and 30
        tokio::time::sleep(Duration::from_secs(40)).await;
        tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(task.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_and_polling_continues() {
        let task = MockTask::new(Duration::ZERO, true);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(poller(task.clone(), Duration::from_secs(10), false).run(rx));

        tokio::time::sleep(Duration::from_secs(15)).await;
        tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats, PollerStats { cycles: 2, failures: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_on_first_failure() {
        let task = MockTask::new(Duration::ZERO, true);
        let (_tx, rx) = broadcast::channel::<()>(1);

        let result = poller(task.clone(), Duration::from_secs(10), true).run(rx).await;

        assert!(matches!(result, Err(MonitorError::Snapshot(_))));
        assert_eq!(task.calls.load(Ordering::SeqCst), 1);
    }
}
