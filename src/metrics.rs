use crate::probe::Check;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;

const LATENCY_LOW_US: u64 = 1;
const LATENCY_HIGH_US: u64 = 10 * 60 * 1_000_000;
const LATENCY_SIGFIG: u8 = 3;

/// Aggregate view over a slice of check history.
///
/// A check counts as up when it carries no error and its status is below 500.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub total: u64,
    pub failures: u64,
    pub server_errors: u64,
    pub uptime: Option<f64>,
    pub latency: Option<LatencyStats>,
    pub last_status_code: Option<u32>,
    pub error_breakdown: BTreeMap<String, u64>,
}

/// Latency over successful checks, in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

pub fn summarize(checks: &[Check]) -> CheckSummary {
    let mut summary = CheckSummary {
        total: checks.len() as u64,
        ..CheckSummary::default()
    };
    let mut latencies_ms = Vec::new();

    for check in checks {
        match &check.error {
            Some(error) => {
                summary.failures += 1;
                *summary
                    .error_breakdown
                    .entry(error.kind.label().to_string())
                    .or_default() += 1;
            }
            None => {
                if check.status_code >= 500 {
                    summary.server_errors += 1;
                }
                latencies_ms.push(check.time_elapsed * 1000.0);
            }
        }
        if check.status_code > 0 {
            summary.last_status_code = Some(check.status_code);
        }
    }

    if summary.total > 0 {
        let up = summary.total - summary.failures - summary.server_errors;
        summary.uptime = Some(up as f64 / summary.total as f64);
    }
    summary.latency = latency_stats(&latencies_ms);
    summary
}

fn latency_stats(values_ms: &[f64]) -> Option<LatencyStats> {
    if values_ms.is_empty() {
        return None;
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for value in values_ms {
        min = min.min(*value);
        max = max.max(*value);
        sum += value;
    }

    let mut histogram =
        Histogram::<u64>::new_with_bounds(LATENCY_LOW_US, LATENCY_HIGH_US, LATENCY_SIGFIG).ok()?;
    for value in values_ms {
        let micros = (*value * 1000.0).max(0.0) as u64;
        histogram.saturating_record(micros.max(LATENCY_LOW_US));
    }

    Some(LatencyStats {
        min,
        max,
        mean: sum / values_ms.len() as f64,
        p50: histogram.value_at_quantile(0.50) as f64 / 1000.0,
        p90: histogram.value_at_quantile(0.90) as f64 / 1000.0,
        p99: histogram.value_at_quantile(0.99) as f64 / 1000.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, ProbeErrorKind};
    use std::time::{Duration, SystemTime};

    fn ok(status: u32, ms: u64) -> Check {
        Check::success(SystemTime::now(), status, 10, Duration::from_millis(ms))
    }

    fn failed(kind: ProbeErrorKind) -> Check {
        Check::failure(
            SystemTime::now(),
            ProbeError {
                kind,
                message: "boom".to_string(),
            },
            0,
        )
    }

    #[test]
    fn empty_history_has_no_ratios() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.uptime.is_none());
        assert!(summary.latency.is_none());
    }

    #[test]
    fn uptime_counts_errors_and_server_errors_as_down() {
        let checks = vec![
            ok(200, 10),
            ok(503, 10),
            failed(ProbeErrorKind::Timeout),
            ok(301, 10),
        ];
        let summary = summarize(&checks);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.server_errors, 1);
        assert_eq!(summary.uptime, Some(0.5));
        assert_eq!(summary.last_status_code, Some(301));
        assert_eq!(summary.error_breakdown.get("timeout"), Some(&1));
    }

    #[test]
    fn latency_percentiles_within_histogram_precision() {
        let checks: Vec<Check> = (1..=100).map(|ms| ok(200, ms)).collect();
        let latency = summarize(&checks).latency.expect("latency");
        assert!((latency.min - 1.0).abs() < 1e-6);
        assert!((latency.max - 100.0).abs() < 1e-6);
        assert!((latency.mean - 50.5).abs() < 1e-6);
        assert!((latency.p50 - 50.0).abs() < 0.2, "p50 {}", latency.p50);
        assert!((latency.p99 - 99.0).abs() < 0.2, "p99 {}", latency.p99);
    }
}
