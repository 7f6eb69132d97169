//! Gate evaluation: metric extraction and threshold comparison.
//!
//! Gate workers end their report artifact with a metric tag:
//! `<metric>87%</metric>` or `<metric>87</metric>`. The evaluator takes the
//! last tag in the report (workers may emit interim values) and compares it
//! against the gate's threshold to pick the success or the failure edge.

use regex::Regex;
use std::sync::LazyLock;

use crate::graph::GateSpec;

// Compiled once; tolerates a % suffix and surrounding whitespace
static METRIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<metric>\s*(-?\d+(?:\.\d+)?)\s*%?\s*</metric>").unwrap());

/// Outcome of evaluating a gate's report against its threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub passed: bool,
    pub metric: Option<f64>,
    pub reason: String,
}

/// Extract the last metric tag from a report, if any.
pub fn extract_metric(text: &str) -> Option<f64> {
    METRIC_REGEX
        .captures_iter(text)
        .last()
        .and_then(|cap| cap.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok())
}

/// Evaluate a gate report against its spec.
///
/// A report with no parsable metric fails the gate (the omission becomes the
/// recorded reason) rather than erroring, so the retry loop still applies.
pub fn evaluate(spec: &GateSpec, report: &str, artifact: &str) -> GateOutcome {
    match extract_metric(report) {
        Some(metric) => {
            let passed = spec.threshold.accepts(metric);
            let reason = if passed {
                format!("metric {metric} satisfied threshold {}", spec.threshold)
            } else {
                format!("metric {metric} failed threshold {}", spec.threshold)
            };
            GateOutcome {
                passed,
                metric: Some(metric),
                reason,
            }
        }
        None => GateOutcome {
            passed: false,
            metric: None,
            reason: format!("no metric tag found in {artifact}"),
        },
    }
}
