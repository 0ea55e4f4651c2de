//! Process-wide metrics registry with Prometheus text exposition.
//!
//! Series families (counters and histograms) are declared once at startup
//! with a fixed set of label names. Request-time updates go through
//! [`MetricsRegistry::increment`] and [`MetricsRegistry::observe`], which are
//! atomic per series and never take a registry-wide lock: the series map is
//! a sharded [`DashMap`] and each series is a plain [`AtomicU64`] (or a
//! vector of them for histogram buckets).
//!
//! Using a name that was never registered is a programming error. It is
//! logged at error level and counted under `internal_errors_total` instead
//! of being silently dropped. Missing a series the application needs is a
//! startup-time [`ConfigError`], surfaced by [`MetricsRegistry::require`] --
//! the binary refuses to start rather than dropping samples at runtime.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::error;

/// Names of every series the server registers, shared between registration
/// and the call sites that update them.
pub mod series {
    /// Requests by method, route template, and status class.
    pub const HTTP_REQUESTS: &str = "http_requests_total";
    /// Request duration in seconds by method, route template, and status class.
    pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
    /// Requests whose client disconnected before the response was written.
    pub const HTTP_REQUESTS_ABANDONED: &str = "http_requests_abandoned_total";
    /// Authentication rejections by failure kind.
    pub const AUTH_FAILURES: &str = "auth_failures_total";
    /// Handler failures (5xx terminal path) by error kind.
    pub const HANDLER_ERRORS: &str = "handler_errors_total";
    /// Metric misuse and other internal faults by kind.
    pub const INTERNAL_ERRORS: &str = "internal_errors_total";
    /// Successful user registrations.
    pub const USER_REGISTRATIONS: &str = "user_registrations_total";
    /// Login attempts by outcome.
    pub const LOGIN_ATTEMPTS: &str = "login_attempts_total";

    /// Series the request pipeline and handlers update unconditionally.
    /// Bootstrap passes this to [`super::MetricsRegistry::require`].
    pub const REQUIRED: &[&str] = &[
        HTTP_REQUESTS,
        HTTP_REQUEST_DURATION,
        HTTP_REQUESTS_ABANDONED,
        AUTH_FAILURES,
        HANDLER_ERRORS,
        INTERNAL_ERRORS,
        USER_REGISTRATIONS,
        LOGIN_ATTEMPTS,
    ];
}

/// Duration buckets in seconds, tuned for typical web request latencies.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Startup-time registry configuration errors. Fatal: the process must
/// refuse to start rather than silently drop series at runtime.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("metric series `{name}` is not registered")]
    UnknownMetricSeries { name: String },
    #[error("metric series `{name}` is registered twice")]
    DuplicateMetricSeries { name: String },
}

// ---------------------------------------------------------------------------
// Series storage
// ---------------------------------------------------------------------------

struct CounterFamily {
    help: &'static str,
    label_names: &'static [&'static str],
    series: DashMap<Vec<String>, AtomicU64>,
}

struct HistogramFamily {
    help: &'static str,
    label_names: &'static [&'static str],
    buckets: Vec<f64>,
    series: DashMap<Vec<String>, HistogramSeries>,
}

/// One histogram series: per-bucket counts plus a running sum and count.
///
/// Bucket counts are stored non-cumulatively; `render` accumulates them.
/// The sum is an `f64` kept in `AtomicU64` bits and updated with a CAS loop
/// so observations from concurrent requests never serialize on a lock.
struct HistogramSeries {
    bucket_counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl HistogramSeries {
    fn new(bucket_len: usize) -> Self {
        Self {
            bucket_counts: (0..bucket_len).map(|_| AtomicU64::new(0)).collect(),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, buckets: &[f64], value: f64) {
        for (i, bound) in buckets.iter().enumerate() {
            if value <= *bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        // Values above the last bound land only in the implicit +Inf bucket,
        // which render derives from `count`.
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }
}

enum Family {
    Counter(CounterFamily),
    Histogram(HistogramFamily),
}

// ---------------------------------------------------------------------------
// MetricsRegistry
// ---------------------------------------------------------------------------

/// Process-wide counter/histogram registry.
///
/// Registration happens during bootstrap (`&mut self`); afterwards the
/// registry is shared behind an `Arc` and only the atomic update and render
/// paths are used. Values only ever increase; there is no reset short of a
/// process restart.
pub struct MetricsRegistry {
    families: HashMap<&'static str, Family>,
    /// Registration order, so `render` output is stable across runs.
    order: Vec<&'static str>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            families: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registers a counter family with a fixed set of label names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateMetricSeries`] if the name is taken.
    pub fn register_counter(
        &mut self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> Result<(), ConfigError> {
        self.insert(
            name,
            Family::Counter(CounterFamily {
                help,
                label_names,
                series: DashMap::new(),
            }),
        )
    }

    /// Registers a histogram family with a fixed set of label names and
    /// ascending bucket bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateMetricSeries`] if the name is taken.
    pub fn register_histogram(
        &mut self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
        buckets: &[f64],
    ) -> Result<(), ConfigError> {
        self.insert(
            name,
            Family::Histogram(HistogramFamily {
                help,
                label_names,
                buckets: buckets.to_vec(),
                series: DashMap::new(),
            }),
        )
    }

    fn insert(&mut self, name: &'static str, family: Family) -> Result<(), ConfigError> {
        if self.families.contains_key(name) {
            return Err(ConfigError::DuplicateMetricSeries {
                name: name.to_string(),
            });
        }
        self.families.insert(name, family);
        self.order.push(name);
        Ok(())
    }

    /// Verifies that every named series is registered.
    ///
    /// Bootstrap calls this before serving; a missing series means the
    /// process refuses to start.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMetricSeries`] naming the first missing
    /// series.
    pub fn require(&self, names: &[&str]) -> Result<(), ConfigError> {
        for name in names {
            if !self.families.contains_key(*name) {
                return Err(ConfigError::UnknownMetricSeries {
                    name: (*name).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Atomically increments the counter series identified by label values.
    ///
    /// Label values must match the family's label arity. Misuse (unknown
    /// name, wrong arity, wrong kind) is logged and counted under
    /// `internal_errors_total`, never silently dropped.
    pub fn increment(&self, name: &str, labels: &[&str]) {
        match self.families.get(name) {
            Some(Family::Counter(family)) => {
                if labels.len() != family.label_names.len() {
                    self.note_misuse(name, "label_arity");
                    return;
                }
                family
                    .series
                    .entry(owned(labels))
                    .or_default()
                    .fetch_add(1, Ordering::Relaxed);
            }
            Some(Family::Histogram(_)) => self.note_misuse(name, "wrong_kind"),
            None => self.note_misuse(name, "unknown_series"),
        }
    }

    /// Atomically records one observation into the histogram series
    /// identified by label values. Misuse handling matches [`Self::increment`].
    pub fn observe(&self, name: &str, labels: &[&str], value: f64) {
        match self.families.get(name) {
            Some(Family::Histogram(family)) => {
                if labels.len() != family.label_names.len() {
                    self.note_misuse(name, "label_arity");
                    return;
                }
                family
                    .series
                    .entry(owned(labels))
                    .or_insert_with(|| HistogramSeries::new(family.buckets.len()))
                    .observe(&family.buckets, value);
            }
            Some(Family::Counter(_)) => self.note_misuse(name, "wrong_kind"),
            None => self.note_misuse(name, "unknown_series"),
        }
    }

    /// Fail-fast path for programming errors on the update path.
    fn note_misuse(&self, name: &str, kind: &'static str) {
        error!(series = name, kind, "metric series misuse");
        if let Some(Family::Counter(internal)) = self.families.get(series::INTERNAL_ERRORS) {
            internal
                .series
                .entry(vec![kind.to_string()])
                .or_default()
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current value of a counter series, if it has been touched.
    #[must_use]
    pub fn counter_value(&self, name: &str, labels: &[&str]) -> Option<u64> {
        match self.families.get(name)? {
            Family::Counter(family) => family
                .series
                .get(&owned(labels))
                .map(|v| v.load(Ordering::Relaxed)),
            Family::Histogram(_) => None,
        }
    }

    /// Observation count of a histogram series, if it has been touched.
    #[must_use]
    pub fn histogram_count(&self, name: &str, labels: &[&str]) -> Option<u64> {
        match self.families.get(name)? {
            Family::Histogram(family) => family
                .series
                .get(&owned(labels))
                .map(|s| s.count.load(Ordering::Relaxed)),
            Family::Counter(_) => None,
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    ///
    /// Deterministic: families appear in registration order, series sorted
    /// by label values. Counters emit one line per series; histograms emit
    /// cumulative `_bucket` lines (including `+Inf`) plus `_sum` and
    /// `_count`. Never fails on a well-formed registry.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for name in &self.order {
            match &self.families[name] {
                Family::Counter(family) => render_counter(&mut out, name, family),
                Family::Histogram(family) => render_histogram(&mut out, name, family),
            }
        }
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the registry with every series the server uses.
///
/// # Errors
///
/// Returns a [`ConfigError`] on duplicate registration.
pub fn standard_registry() -> Result<MetricsRegistry, ConfigError> {
    let mut registry = MetricsRegistry::new();
    registry.register_counter(
        series::HTTP_REQUESTS,
        "Total HTTP requests",
        &["method", "route", "status_class"],
    )?;
    registry.register_histogram(
        series::HTTP_REQUEST_DURATION,
        "HTTP request duration in seconds",
        &["method", "route", "status_class"],
        DURATION_BUCKETS,
    )?;
    registry.register_counter(
        series::HTTP_REQUESTS_ABANDONED,
        "Requests abandoned by the client before the response was written",
        &["method", "route"],
    )?;
    registry.register_counter(
        series::AUTH_FAILURES,
        "Authentication rejections by failure kind",
        &["kind"],
    )?;
    registry.register_counter(
        series::HANDLER_ERRORS,
        "Handler failures by error kind",
        &["kind"],
    )?;
    registry.register_counter(
        series::INTERNAL_ERRORS,
        "Internal faults, including metric series misuse",
        &["kind"],
    )?;
    registry.register_counter(
        series::USER_REGISTRATIONS,
        "Successful user registrations",
        &[],
    )?;
    registry.register_counter(
        series::LOGIN_ATTEMPTS,
        "Login attempts by outcome",
        &["status"],
    )?;
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_counter(out: &mut String, name: &str, family: &CounterFamily) {
    let _ = writeln!(out, "# HELP {name} {}", family.help);
    let _ = writeln!(out, "# TYPE {name} counter");
    let mut entries: Vec<(Vec<String>, u64)> = family
        .series
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect();
    entries.sort();
    for (values, count) in entries {
        let labels = format_labels(family.label_names, &values, None);
        let _ = writeln!(out, "{name}{labels} {count}");
    }
}

fn render_histogram(out: &mut String, name: &str, family: &HistogramFamily) {
    let _ = writeln!(out, "# HELP {name} {}", family.help);
    let _ = writeln!(out, "# TYPE {name} histogram");
    let mut keys: Vec<Vec<String>> = family.series.iter().map(|e| e.key().clone()).collect();
    keys.sort();
    for values in keys {
        let Some(series) = family.series.get(&values) else {
            continue;
        };
        let count = series.count.load(Ordering::Relaxed);
        let mut cumulative = 0u64;
        for (i, bound) in family.buckets.iter().enumerate() {
            cumulative += series.bucket_counts[i].load(Ordering::Relaxed);
            let labels = format_labels(family.label_names, &values, Some(&format!("{bound}")));
            let _ = writeln!(out, "{name}_bucket{labels} {cumulative}");
        }
        let labels = format_labels(family.label_names, &values, Some("+Inf"));
        let _ = writeln!(out, "{name}_bucket{labels} {count}");
        let plain = format_labels(family.label_names, &values, None);
        let _ = writeln!(out, "{name}_sum{plain} {}", series.sum());
        let _ = writeln!(out, "{name}_count{plain} {count}");
    }
}

/// Formats a `{label="value",...}` block, empty when there are no labels.
/// `le` appends the histogram bucket bound label.
fn format_labels(names: &[&str], values: &[String], le: Option<&str>) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values.iter())
        .map(|(n, v)| format!("{n}=\"{}\"", escape_label_value(v)))
        .collect();
    if let Some(bound) = le {
        pairs.push(format!("le=\"{bound}\""));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn owned(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| (*s).to_string()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_registry() -> MetricsRegistry {
        standard_registry().expect("standard registry registers cleanly")
    }

    #[test]
    fn standard_registry_satisfies_required_series() {
        let registry = test_registry();
        registry.require(series::REQUIRED).unwrap();
    }

    #[test]
    fn require_reports_missing_series() {
        let registry = MetricsRegistry::new();
        let err = registry.require(&["http_requests_total"]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownMetricSeries { name } if name == "http_requests_total"
        ));
    }

    #[test]
    fn duplicate_registration_is_a_config_error() {
        let mut registry = MetricsRegistry::new();
        registry.register_counter("dup_total", "first", &[]).unwrap();
        let err = registry.register_counter("dup_total", "second", &[]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateMetricSeries { name } if name == "dup_total"
        ));
    }

    #[test]
    fn increment_and_render_counter_line() {
        let registry = test_registry();
        registry.increment(series::HTTP_REQUESTS, &["GET", "/api/v1/tasks", "2xx"]);
        registry.increment(series::HTTP_REQUESTS, &["GET", "/api/v1/tasks", "2xx"]);

        let rendered = registry.render();
        assert!(rendered.contains(
            "http_requests_total{method=\"GET\",route=\"/api/v1/tasks\",status_class=\"2xx\"} 2"
        ));
        assert!(rendered.contains("# TYPE http_requests_total counter"));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn unknown_series_is_counted_not_dropped() {
        let registry = test_registry();
        registry.increment("no_such_series_total", &[]);
        assert_eq!(
            registry.counter_value(series::INTERNAL_ERRORS, &["unknown_series"]),
            Some(1)
        );
    }

    #[test]
    fn label_arity_mismatch_is_counted() {
        let registry = test_registry();
        registry.increment(series::HTTP_REQUESTS, &["GET"]);
        assert_eq!(
            registry.counter_value(series::INTERNAL_ERRORS, &["label_arity"]),
            Some(1)
        );
        assert_eq!(registry.counter_value(series::HTTP_REQUESTS, &["GET"]), None);
    }

    #[test]
    fn observe_on_counter_is_counted_as_wrong_kind() {
        let registry = test_registry();
        registry.observe(series::HTTP_REQUESTS, &["GET", "/x", "2xx"], 0.1);
        assert_eq!(
            registry.counter_value(series::INTERNAL_ERRORS, &["wrong_kind"]),
            Some(1)
        );
    }

    #[test]
    fn histogram_renders_cumulative_buckets_sum_and_count() {
        let mut registry = MetricsRegistry::new();
        registry
            .register_histogram("lat_seconds", "latency", &["route"], &[0.1, 1.0])
            .unwrap();
        registry.observe("lat_seconds", &["/t"], 0.05);
        registry.observe("lat_seconds", &["/t"], 0.5);
        registry.observe("lat_seconds", &["/t"], 5.0);

        let rendered = registry.render();
        assert!(rendered.contains("lat_seconds_bucket{route=\"/t\",le=\"0.1\"} 1"));
        assert!(rendered.contains("lat_seconds_bucket{route=\"/t\",le=\"1\"} 2"));
        assert!(rendered.contains("lat_seconds_bucket{route=\"/t\",le=\"+Inf\"} 3"));
        assert!(rendered.contains("lat_seconds_count{route=\"/t\"} 3"));
        let sum_line = rendered
            .lines()
            .find(|l| l.starts_with("lat_seconds_sum"))
            .unwrap();
        let sum: f64 = sum_line.rsplit(' ').next().unwrap().parse().unwrap();
        assert!((sum - 5.55).abs() < 1e-9);
    }

    #[test]
    fn no_series_without_labels_until_touched() {
        let registry = test_registry();
        let rendered = registry.render();
        // Families are declared but no series lines exist before first use.
        assert!(rendered.contains("# TYPE http_requests_total counter"));
        assert!(!rendered.contains("http_requests_total{"));
    }

    #[test]
    fn concurrent_increments_lose_no_updates() {
        let registry = std::sync::Arc::new(test_registry());
        let threads: u64 = 8;
        let per_thread: u64 = 1_000;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let registry = std::sync::Arc::clone(&registry);
                scope.spawn(move || {
                    for _ in 0..per_thread {
                        registry.increment(series::HTTP_REQUESTS, &["GET", "/t", "2xx"]);
                    }
                });
            }
        });

        assert_eq!(
            registry.counter_value(series::HTTP_REQUESTS, &["GET", "/t", "2xx"]),
            Some(threads * per_thread)
        );
    }

    proptest! {
        #[test]
        fn concurrent_increment_totals_match(counts in proptest::collection::vec(1u64..200, 2..6)) {
            let registry = std::sync::Arc::new(test_registry());
            std::thread::scope(|scope| {
                for count in &counts {
                    let registry = std::sync::Arc::clone(&registry);
                    let count = *count;
                    scope.spawn(move || {
                        for _ in 0..count {
                            registry.increment(series::LOGIN_ATTEMPTS, &["success"]);
                        }
                    });
                }
            });
            let total: u64 = counts.iter().sum();
            prop_assert_eq!(
                registry.counter_value(series::LOGIN_ATTEMPTS, &["success"]),
                Some(total)
            );
        }
    }

    /// Parses exposition text back into (name, label-block, value) tuples,
    /// skipping comments and histogram bucket lines.
    fn parse_plain_series(rendered: &str) -> Vec<(String, String, f64)> {
        rendered
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .filter(|l| !l.split(' ').next().unwrap_or_default().contains("_bucket"))
            .map(|l| {
                let (series, value) = l.rsplit_once(' ').unwrap();
                let (name, labels) = match series.split_once('{') {
                    Some((n, rest)) => (n.to_string(), format!("{{{rest}")),
                    None => (series.to_string(), String::new()),
                };
                (name, labels, value.parse().unwrap())
            })
            .collect()
    }

    #[test]
    fn exposition_round_trips_recorded_values() {
        let registry = test_registry();
        registry.increment(series::HTTP_REQUESTS, &["GET", "/a", "2xx"]);
        registry.increment(series::HTTP_REQUESTS, &["POST", "/b", "5xx"]);
        registry.increment(series::AUTH_FAILURES, &["ExpiredToken"]);
        registry.increment(series::USER_REGISTRATIONS, &[]);
        registry.observe(series::HTTP_REQUEST_DURATION, &["GET", "/a", "2xx"], 0.2);

        let parsed = parse_plain_series(&registry.render());
        let expect = |name: &str, labels: &str, value: f64| {
            assert!(
                parsed
                    .iter()
                    .any(|(n, l, v)| n == name && l == labels && (v - value).abs() < 1e-9),
                "missing series {name}{labels} {value} in {parsed:?}"
            );
        };
        expect(
            "http_requests_total",
            "{method=\"GET\",route=\"/a\",status_class=\"2xx\"}",
            1.0,
        );
        expect(
            "http_requests_total",
            "{method=\"POST\",route=\"/b\",status_class=\"5xx\"}",
            1.0,
        );
        expect("auth_failures_total", "{kind=\"ExpiredToken\"}", 1.0);
        expect("user_registrations_total", "", 1.0);
        expect(
            "http_request_duration_seconds_count",
            "{method=\"GET\",route=\"/a\",status_class=\"2xx\"}",
            1.0,
        );
        expect(
            "http_request_duration_seconds_sum",
            "{method=\"GET\",route=\"/a\",status_class=\"2xx\"}",
            0.2,
        );
    }

    #[test]
    fn render_is_deterministic() {
        let registry = test_registry();
        registry.increment(series::HTTP_REQUESTS, &["GET", "/b", "2xx"]);
        registry.increment(series::HTTP_REQUESTS, &["GET", "/a", "2xx"]);
        registry.increment(series::HTTP_REQUESTS, &["DELETE", "/a", "4xx"]);

        let first = registry.render();
        let second = registry.render();
        assert_eq!(first, second);

        // Series within a family are sorted by label values.
        let delete = first.find("method=\"DELETE\"").unwrap();
        let get_a = first.find("route=\"/a\",status_class=\"2xx\"").unwrap();
        let get_b = first.find("route=\"/b\"").unwrap();
        assert!(delete < get_a && get_a < get_b);
    }

    #[test]
    fn label_values_are_escaped() {
        let mut registry = MetricsRegistry::new();
        registry
            .register_counter("odd_total", "odd labels", &["k"])
            .unwrap();
        registry.increment("odd_total", &["a\"b\\c"]);
        assert!(registry.render().contains("odd_total{k=\"a\\\"b\\\\c\"} 1"));
    }
}
