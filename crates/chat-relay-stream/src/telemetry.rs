//! Telemetry sink: counters, gauges, timers, and leveled log entries.
//!
//! Every call is best-effort. Implementations never return errors and never
//! panic into the caller, so the relay can call them unconditionally.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Metric tags as `(key, value)` pairs.
pub type Tags<'a> = &'a [(&'static str, String)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

pub trait Telemetry: Send + Sync {
    fn increment(&self, name: &str, value: u64, tags: Tags<'_>);

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>);

    fn timing(&self, name: &str, seconds: f64, tags: Tags<'_>);

    fn log(&self, level: LogLevel, message: &str, context: &Value);
}

/// The process-wide sink, shared by every in-flight request.
pub type SharedTelemetry = Arc<dyn Telemetry>;

fn labels(tags: Tags<'_>) -> Vec<metrics::Label> {
    tags.iter()
        .map(|(k, v)| metrics::Label::new(*k, v.clone()))
        .collect()
}

/// Run a sink operation, swallowing any panic from the backend.
fn guarded(op: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        debug!(op, "Telemetry call failed");
    }
}

/// Production sink: metrics go to the installed `metrics` recorder, log
/// entries become `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetry;

impl Telemetry for MetricsTelemetry {
    fn increment(&self, name: &str, value: u64, tags: Tags<'_>) {
        guarded("increment", || {
            metrics::counter!(name.to_string(), labels(tags)).increment(value);
        });
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        guarded("gauge", || {
            metrics::gauge!(name.to_string(), labels(tags)).set(value);
        });
    }

    fn timing(&self, name: &str, seconds: f64, tags: Tags<'_>) {
        guarded("timing", || {
            metrics::histogram!(name.to_string(), labels(tags)).record(seconds);
        });
    }

    fn log(&self, level: LogLevel, message: &str, context: &Value) {
        guarded("log", || match level {
            LogLevel::Debug => debug!(%context, "{message}"),
            LogLevel::Info => info!(%context, "{message}"),
            LogLevel::Warn => warn!(%context, "{message}"),
            LogLevel::Error => error!(%context, "{message}"),
        });
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn increment(&self, _name: &str, _value: u64, _tags: Tags<'_>) {}
    fn gauge(&self, _name: &str, _value: f64, _tags: Tags<'_>) {}
    fn timing(&self, _name: &str, _seconds: f64, _tags: Tags<'_>) {}
    fn log(&self, _level: LogLevel, _message: &str, _context: &Value) {}
}

/// One call captured by [`RecordingTelemetry`].
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    Increment {
        name: String,
        value: u64,
        tags: Vec<(String, String)>,
    },
    Gauge {
        name: String,
        value: f64,
        tags: Vec<(String, String)>,
    },
    Timing {
        name: String,
        seconds: f64,
        tags: Vec<(String, String)>,
    },
    Log {
        level: LogLevel,
        message: String,
        context: Value,
    },
}

impl TelemetryRecord {
    /// Metric name, or `None` for log entries.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Increment { name, .. } | Self::Gauge { name, .. } | Self::Timing { name, .. } => {
                Some(name.as_str())
            }
            Self::Log { .. } => None,
        }
    }

    /// Value of a tag, or `None` for log entries and absent keys.
    pub fn tag(&self, key: &str) -> Option<&str> {
        let tags = match self {
            Self::Increment { tags, .. } | Self::Gauge { tags, .. } | Self::Timing { tags, .. } => {
                tags
            }
            Self::Log { .. } => return None,
        };
        tags.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Thread-safe fake that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: TelemetryRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// All metric records with the given name.
    pub fn named(&self, name: &str) -> Vec<TelemetryRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.name() == Some(name))
            .collect()
    }

    /// Sum of all increments of a counter.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.named(name)
            .iter()
            .map(|r| match r {
                TelemetryRecord::Increment { value, .. } => *value,
                _ => 0,
            })
            .sum()
    }

    /// Log entries at the given level as `(message, context)`.
    pub fn logs(&self, level: LogLevel) -> Vec<(String, Value)> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                TelemetryRecord::Log {
                    level: l,
                    message,
                    context,
                } if l == level => Some((message, context)),
                _ => None,
            })
            .collect()
    }
}

fn owned(tags: Tags<'_>) -> Vec<(String, String)> {
    tags.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

impl Telemetry for RecordingTelemetry {
    fn increment(&self, name: &str, value: u64, tags: Tags<'_>) {
        self.push(TelemetryRecord::Increment {
            name: name.to_string(),
            value,
            tags: owned(tags),
        });
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        self.push(TelemetryRecord::Gauge {
            name: name.to_string(),
            value,
            tags: owned(tags),
        });
    }

    fn timing(&self, name: &str, seconds: f64, tags: Tags<'_>) {
        self.push(TelemetryRecord::Timing {
            name: name.to_string(),
            seconds,
            tags: owned(tags),
        });
    }

    fn log(&self, level: LogLevel, message: &str, context: &Value) {
        self.push(TelemetryRecord::Log {
            level,
            message: message.to_string(),
            context: context.clone(),
        });
    }
}
