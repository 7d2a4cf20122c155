use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::lifecycle::{LifecycleEngine, LifecycleOutcome};
use crate::metrics::MetricsSink;
use crate::provision::ProvisionedTarget;

/// Runs a lifecycle for every target, all targets concurrently, once per
/// cycle. A cycle ends when every run has finished, so runs for the same
/// target never overlap.
pub struct Scheduler {
    engine: Arc<LifecycleEngine>,
    targets: Vec<ProvisionedTarget>,
    interval: Duration,
    sink: Arc<dyn MetricsSink>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        targets: Vec<ProvisionedTarget>,
        interval: Duration,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            engine,
            targets,
            interval,
            sink,
        }
    }

    pub fn targets(&self) -> &[ProvisionedTarget] {
        &self.targets
    }

    /// One cycle. Outcomes are returned in completion order.
    pub async fn run_cycle(&self) -> Vec<LifecycleOutcome> {
        let started = Instant::now();
        let mut runs = JoinSet::new();
        for target in &self.targets {
            let engine = self.engine.clone();
            let target = target.clone();
            runs.spawn(async move { engine.run(&target).await });
        }

        let mut outcomes = Vec::with_capacity(self.targets.len());
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "lifecycle run panicked"),
            }
        }

        let elapsed = started.elapsed();
        self.sink.record_cycle(elapsed);
        info!(
            targets = self.targets.len(),
            duration_secs = elapsed.as_secs_f64(),
            "probe cycle finished"
        );
        outcomes
    }

    /// Cycles until `shutdown` is cancelled, sleeping `interval` between
    /// cycles. Cancellation drops the cycle in flight.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs_f64(),
            "starting probe scheduler"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.run_cycle() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("probe scheduler stopped");
    }
}
