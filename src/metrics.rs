//! Prometheus metrics for the fuzzing loop.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup before the first run. The
//! helper functions (`record_request`, `inc_response`, …) are no-ops if
//! `init_metrics` was never called, so the driver is always safe to run and
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `fuzzer_requests_total` | Counter | `kind` (`original`, `mutated`) |
//! | `fuzzer_responses_total` | Counter | `class` of the mutated response (`1xx`..`5xx`, `transport_error`, `other`) |
//! | `fuzzer_mutations_total` | Counter | `action`, `category` |
//! | `fuzzer_request_duration_seconds` | Histogram | `kind` |
//! | `fuzzer_episodes_total` | Counter | `terminal` (`true`, `false`) |

use crate::FuzzerError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the fuzzer, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Requests sent, by kind.
    pub requests_total: CounterVec,
    /// Responses observed, by status class.
    pub responses_total: CounterVec,
    /// Mutation operators chosen by the policy.
    pub mutations_total: CounterVec,
    /// Round-trip latency per request kind.
    pub request_duration: HistogramVec,
    /// Finished episodes, split by whether a terminal status ended them.
    pub episodes_total: CounterVec,
}

impl Metrics {
    /// Build every metric and register it with `registry`.
    fn build(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = CounterVec::new(
            Opts::new("fuzzer_requests_total", "Requests sent to the target"),
            &["kind"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let responses_total = CounterVec::new(
            Opts::new("fuzzer_responses_total", "Mutated-request responses by status class"),
            &["class"],
        )?;
        registry.register(Box::new(responses_total.clone()))?;

        let mutations_total = CounterVec::new(
            Opts::new("fuzzer_mutations_total", "Mutation operators chosen"),
            &["action", "category"],
        )?;
        registry.register(Box::new(mutations_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "fuzzer_request_duration_seconds",
                "Request round-trip duration",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let episodes_total = CounterVec::new(
            Opts::new("fuzzer_episodes_total", "Finished episodes"),
            &["terminal"],
        )?;
        registry.register(Box::new(episodes_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            responses_total,
            mutations_total,
            request_duration,
            episodes_total,
        })
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`FuzzerError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), FuzzerError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = Metrics::build(Registry::new())
        .map_err(|e| FuzzerError::Other(format!("metrics init failed: {e}")))?;

    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(metrics);

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Status class label: `"1xx"`..`"5xx"`, `"transport_error"` for 0, else `"other"`.
pub fn status_class(status: u16) -> &'static str {
    match status {
        0 => "transport_error",
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

/// Count one request of `kind` and observe its duration.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_request(kind: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[kind]) {
            c.inc();
        }
        if let Ok(h) = m.request_duration.get_metric_with_label_values(&[kind]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one response by status class.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_response(status: u16) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .responses_total
            .get_metric_with_label_values(&[status_class(status)])
        {
            c.inc();
        }
    }
}

/// Count one policy-chosen mutation.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_mutation(action: &str, category: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .mutations_total
            .get_metric_with_label_values(&[action, category])
        {
            c.inc();
        }
    }
}

/// Count one finished episode.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_episode(terminal: bool) {
    if let Some(m) = metrics() {
        let label = if terminal { "true" } else { "false" };
        if let Ok(c) = m.episodes_total.get_metric_with_label_values(&[label]) {
            c.inc();
        }
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    encode(&gather())
}

fn encode(families: &[prometheus::proto::MetricFamily]) -> String {
    if families.is_empty() {
        return String::new();
    }
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Response counts keyed by status class.
///
/// Returns an empty map if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn responses_by_class() -> HashMap<String, u64> {
    metrics().map_or_else(HashMap::new, |m| counter_values(&m.responses_total, "class"))
}

fn counter_values(counter: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut values = HashMap::new();
    for family in counter.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            values.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The global `METRICS` cannot be reset between tests, so tests that check
    /// exact values build a local bundle instead.
    fn make_test_metrics() -> Metrics {
        Metrics::build(Registry::new()).expect("test: metrics build")
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_helpers_never_panic() {
        record_request("original", Duration::from_millis(3));
        inc_response(503);
        inc_response(0);
        inc_mutation("fuzz_ids", "boundary");
        inc_episode(true);
    }

    #[test]
    fn test_status_class_buckets() {
        assert_eq!(status_class(0), "transport_error");
        assert_eq!(status_class(101), "1xx");
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(301), "3xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(status_class(42), "other");
        assert_eq!(status_class(600), "other");
    }

    #[test]
    fn test_local_bundle_counts_responses() {
        let m = make_test_metrics();
        for status in [500, 502, 200] {
            m.responses_total
                .with_label_values(&[status_class(status)])
                .inc();
        }
        let values = counter_values(&m.responses_total, "class");
        assert_eq!(values.get("5xx"), Some(&2));
        assert_eq!(values.get("2xx"), Some(&1));
    }

    #[test]
    fn test_encode_local_bundle_contains_metric_names() {
        let m = make_test_metrics();
        m.requests_total.with_label_values(&["mutated"]).inc();
        m.episodes_total.with_label_values(&["true"]).inc();
        let text = encode(&m.registry.gather());
        assert!(text.contains("fuzzer_requests_total"));
        assert!(text.contains("fuzzer_episodes_total"));
    }

    #[test]
    fn test_gather_metrics_after_init_is_text() {
        init_metrics().expect("test: init");
        inc_response(500);
        let text = gather_metrics();
        assert!(text.contains("fuzzer_responses_total"));
    }
}
