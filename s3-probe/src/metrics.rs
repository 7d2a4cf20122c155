use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::{describe_gauge, gauge, Unit};

use crate::target::Operation;

pub const UPLOAD_DURATION: &str = "s3_upload_duration_seconds";
pub const DOWNLOAD_DURATION: &str = "s3_download_duration_seconds";
pub const DELETE_DURATION: &str = "s3_delete_duration_seconds";
pub const FILE_INTEGRITY_OK: &str = "s3_file_integrity_ok";
pub const OPERATION_TIMEOUT: &str = "s3_operation_timeout";
pub const OPERATION_IS_ERROR: &str = "s3_operation_is_error";
pub const CYCLE_DURATION: &str = "s3_probe_cycle_duration_seconds";
pub const LAST_CYCLE_TIMESTAMP: &str = "s3_probe_last_cycle_timestamp_seconds";

pub fn duration_metric(operation: Operation) -> &'static str {
    match operation {
        Operation::Upload => UPLOAD_DURATION,
        Operation::Download => DOWNLOAD_DURATION,
        Operation::Delete => DELETE_DURATION,
    }
}

pub fn describe_metrics() {
    describe_gauge!(UPLOAD_DURATION, Unit::Seconds, "Duration of the last successful upload");
    describe_gauge!(DOWNLOAD_DURATION, Unit::Seconds, "Duration of the last successful download");
    describe_gauge!(DELETE_DURATION, Unit::Seconds, "Duration of the last delete attempt");
    describe_gauge!(
        FILE_INTEGRITY_OK,
        "1 if the last downloaded copy matched the uploaded artifact, 0 if it did not"
    );
    describe_gauge!(OPERATION_TIMEOUT, "1 if the last attempt of the operation hit its deadline");
    describe_gauge!(
        OPERATION_IS_ERROR,
        "1 if the last attempt of the operation failed for a reason other than its deadline"
    );
    describe_gauge!(CYCLE_DURATION, Unit::Seconds, "Duration of the last probe cycle");
    describe_gauge!(
        LAST_CYCLE_TIMESTAMP,
        Unit::Seconds,
        "Unix time at which the last probe cycle finished"
    );
}

/// Where lifecycle runs publish their observations.
pub trait MetricsSink: Send + Sync {
    /// Upload and download report their last success; delete reports its last attempt.
    fn record_duration(&self, file: &str, operation: Operation, seconds: f64);
    /// Called on every attempt. At most one flag is set.
    fn record_step_flags(&self, file: &str, operation: Operation, timed_out: bool, errored: bool);
    fn record_integrity(&self, file: &str, matched: bool);
    fn record_cycle(&self, duration: Duration);
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Publishes through the `metrics` facade, scraped via the Prometheus recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record_duration(&self, file: &str, operation: Operation, seconds: f64) {
        gauge!(duration_metric(operation), "file" => file.to_string()).set(seconds);
    }

    fn record_step_flags(&self, file: &str, operation: Operation, timed_out: bool, errored: bool) {
        gauge!(OPERATION_TIMEOUT, "file" => file.to_string(), "operation" => operation.as_str())
            .set(flag(timed_out));
        gauge!(OPERATION_IS_ERROR, "file" => file.to_string(), "operation" => operation.as_str())
            .set(flag(errored));
    }

    fn record_integrity(&self, file: &str, matched: bool) {
        gauge!(FILE_INTEGRITY_OK, "file" => file.to_string()).set(flag(matched));
    }

    fn record_cycle(&self, duration: Duration) {
        gauge!(CYCLE_DURATION).set(duration.as_secs_f64());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        gauge!(LAST_CYCLE_TIMESTAMP).set(now.as_secs_f64());
    }
}

#[derive(Default)]
struct Recorded {
    durations: HashMap<(String, Operation), f64>,
    flags: HashMap<(String, Operation), (bool, bool)>,
    integrity: HashMap<String, bool>,
    cycles: Vec<Duration>,
}

/// Keeps the latest value of every series in memory, for tests and for
/// embedding the probe without a recorder.
#[derive(Default)]
pub struct InMemorySink {
    recorded: Mutex<Recorded>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut recorded = match self.recorded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut recorded)
    }

    pub fn duration(&self, file: &str, operation: Operation) -> Option<f64> {
        self.with(|r| r.durations.get(&(file.to_string(), operation)).copied())
    }

    /// `(timed_out, errored)` of the last attempt
    pub fn flags(&self, file: &str, operation: Operation) -> Option<(bool, bool)> {
        self.with(|r| r.flags.get(&(file.to_string(), operation)).copied())
    }

    pub fn integrity(&self, file: &str) -> Option<bool> {
        self.with(|r| r.integrity.get(file).copied())
    }

    pub fn cycles(&self) -> usize {
        self.with(|r| r.cycles.len())
    }
}

impl MetricsSink for InMemorySink {
    fn record_duration(&self, file: &str, operation: Operation, seconds: f64) {
        self.with(|r| r.durations.insert((file.to_string(), operation), seconds));
    }

    fn record_step_flags(&self, file: &str, operation: Operation, timed_out: bool, errored: bool) {
        self.with(|r| r.flags.insert((file.to_string(), operation), (timed_out, errored)));
    }

    fn record_integrity(&self, file: &str, matched: bool) {
        self.with(|r| r.integrity.insert(file.to_string(), matched));
    }

    fn record_cycle(&self, duration: Duration) {
        self.with(|r| r.cycles.push(duration));
    }
}
