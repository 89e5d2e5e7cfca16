//! Run counters and custom metrics.
//!
//! A [`MetricsCollector`] attached to a [`Runner`](crate::runner::Runner)
//! tracks the run's wall time and a set of named counters. The runner counts:
//!
//! - `source_tuples`: tuples read from sources,
//! - `filtered_tuples`: tuples dropped by filters,
//! - `key_groups`: key groups delivered to join strategies,
//! - `joined_tuples`: tuples emitted by join strategies,
//! - `spilled_tuples`: tuples written to spill files by branch buffers.
//!
//! Custom metrics implementing [`Metric`] can be registered alongside.
//!
//! # Example
//!
//! ```
//! use tuplestream::metrics::{GaugeMetric, MetricsCollector};
//! use tuplestream::{fields, tuple, Pipeline, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::new();
//! metrics.register(Box::new(GaugeMetric::new("budget", 1.5)));
//!
//! let p = Pipeline::default();
//! let rows = p.source("rows", fields!["n"], vec![tuple![1], tuple![2]]);
//! let runner = Runner::default().with_metrics(metrics.clone());
//! rows.collect_with(&runner)?;
//!
//! assert_eq!(metrics.counter("source_tuples"), Some(2));
//! assert!(metrics.elapsed().is_some());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A named value reported next to the runner's own counters.
pub trait Metric: Send + Sync + Any {
    /// Key under which the metric is exported, e.g. `max_group_size`.
    fn name(&self) -> &str;

    fn value(&self) -> Value;

    fn description(&self) -> Option<&str> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared run statistics.
///
/// Clones share the same underlying state, so a collector handed to a
/// runner can be inspected afterwards through any clone.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    stats: Arc<Mutex<RunStats>>,
}

#[derive(Default)]
struct RunStats {
    counters: BTreeMap<String, u64>,
    custom: HashMap<String, Box<dyn Metric>>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl RunStats {
    fn wall_time(&self) -> Option<Duration> {
        Some(self.finished?.duration_since(self.started?))
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn stats(&self) -> MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a custom metric; a metric with the same name is replaced.
    pub fn register(&self, metric: Box<dyn Metric>) {
        let name = metric.name().to_string();
        self.stats().custom.insert(name, metric);
    }

    /// Mark the beginning of a run, clearing any previous end mark.
    pub fn record_start(&self) {
        let mut stats = self.stats();
        stats.started = Some(Instant::now());
        stats.finished = None;
    }

    pub fn record_end(&self) {
        self.stats().finished = Some(Instant::now());
    }

    /// Wall time of the last run, once it has finished.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.stats().wall_time()
    }

    /// Add `value` to the counter `name`, saturating at `u64::MAX`.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut stats = self.stats();
        match stats.counters.get_mut(name) {
            Some(total) => *total = total.saturating_add(value),
            None => {
                stats.counters.insert(name.to_string(), value);
            }
        }
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.stats().counters.insert(name.to_string(), value);
    }

    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.stats().counters.get(name).copied()
    }

    /// Every counter and metric as `{ name: { "value": .., "description": .. } }`,
    /// plus `execution_time_ms` once the run has finished.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let stats = self.stats();
        let mut out = Map::new();
        out.extend(
            stats
                .counters
                .iter()
                .map(|(name, n)| (name.clone(), json!({ "value": n }))),
        );
        for (name, metric) in &stats.custom {
            let entry = match metric.description() {
                Some(text) => json!({ "value": metric.value(), "description": text }),
                None => json!({ "value": metric.value() }),
            };
            out.insert(name.clone(), entry);
        }
        if let Some(wall) = stats.wall_time() {
            out.insert(
                "execution_time_ms".to_string(),
                json!({
                    "value": wall.as_millis(),
                    "description": "Wall time of the run in milliseconds",
                }),
            );
        }
        Value::Object(out)
    }

    /// Human-readable report, one `name: value` line per entry.
    #[must_use]
    pub fn render(&self) -> String {
        let mut report = String::from("run metrics\n");
        if let Some(wall) = self.elapsed() {
            let _ = writeln!(report, "  wall time: {:.3}s", wall.as_secs_f64());
        }
        for (name, value) in self.snapshot() {
            let _ = writeln!(report, "  {name}: {value}");
        }
        report
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    /// Write [`to_json`](Self::to_json), pretty-printed, to `path`.
    ///
    /// # Errors
    ///
    /// If the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, body).with_context(|| format!("writing metrics to {}", path.display()))
    }

    /// Counter and metric values by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let stats = self.stats();
        let mut values: BTreeMap<String, Value> = stats
            .counters
            .iter()
            .map(|(name, n)| (name.clone(), json!(n)))
            .collect();
        values.extend(stats.custom.iter().map(|(name, m)| (name.clone(), m.value())));
        values
    }
}

/// A counter computed outside the runner, reported as-is.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A point-in-time float reading such as a ratio or a peak buffer size.
pub struct GaugeMetric {
    name: String,
    reading: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, reading: f64) -> Self {
        Self {
            name: name.into(),
            reading,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.reading)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let m = MetricsCollector::new();
        let shared = m.clone();
        m.increment_counter("key_groups", 2);
        shared.increment_counter("key_groups", 3);
        assert_eq!(m.counter("key_groups"), Some(5));
        assert_eq!(m.counter("missing"), None);
    }

    #[test]
    fn json_includes_counters_and_gauges() {
        let m = MetricsCollector::new();
        m.set_counter("joined_tuples", 4);
        m.register(Box::new(GaugeMetric::new("ratio", 0.5).with_description("half")));
        let json = m.to_json();
        assert_eq!(json["joined_tuples"]["value"], json!(4));
        assert_eq!(json["ratio"]["description"], json!("half"));
        assert!(json.get("execution_time_ms").is_none());
    }

    #[test]
    fn registered_counter_downcasts() {
        let m = MetricsCollector::new();
        m.register(Box::new(CounterMetric::with_value("rows", 7)));
        assert_eq!(m.snapshot()["rows"], json!(7));
        let metric = CounterMetric::new("zero");
        assert!(metric.as_any().downcast_ref::<CounterMetric>().is_some());
        assert_eq!(metric.value(), json!(0));
    }

    #[test]
    fn report_and_file_cover_every_entry() -> Result<()> {
        let m = MetricsCollector::new();
        m.record_start();
        m.increment_counter("source_tuples", 3);
        m.record_end();
        assert!(m.render().contains("source_tuples: 3"));

        let file = tempfile::NamedTempFile::new()?;
        m.save_to_file(file.path())?;
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(file.path())?)?;
        assert_eq!(saved["source_tuples"]["value"], json!(3));
        assert!(saved.get("execution_time_ms").is_some());
        Ok(())
    }
}
