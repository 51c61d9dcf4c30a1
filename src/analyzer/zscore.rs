use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::types::MetricSample;
use super::Baseline;

/// Deviations above this many sigma are `High`.
const HIGH_SIGMA: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Medium,
    High,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Medium => write!(f, "MEDIUM"),
            AnomalySeverity::High => write!(f, "HIGH"),
        }
    }
}

/// A value that deviated unusually far from its metric's baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    pub baseline_mean: f64,
    pub deviation_sigma: f64,
    pub severity: AnomalySeverity,
    pub timestamp: f64,
}

/// Z-Score based anomaly detection.
/// Flags the latest sample of a metric when it sits too far from the baseline
/// mean. Observational only: anomalies never raise alerts by themselves.
pub struct AnomalyDetector {
    sensitivity: f64,
    capacity: usize,
    state: Mutex<DetectorState>,
}

#[derive(Default)]
struct DetectorState {
    log: VecDeque<Anomaly>,
    last_checked: HashMap<String, f64>,
}

impl AnomalyDetector {
    pub fn new(sensitivity: f64, capacity: usize) -> Self {
        Self {
            sensitivity,
            capacity: capacity.max(1),
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Evaluate `latest` against `baseline`. Returns the anomaly if one was logged.
    ///
    /// No-op without a baseline, and for a sample already examined.
    pub fn detect(&self, latest: &MetricSample, baseline: Option<&Baseline>) -> Option<Anomaly> {
        let baseline = baseline?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(ts) = state.last_checked.get(&latest.metric) {
            if latest.timestamp <= *ts {
                return None;
            }
        }
        state.last_checked.insert(latest.metric.clone(), latest.timestamp);

        let z = baseline.z_score(latest.value);
        if z <= self.sensitivity {
            return None;
        }

        let severity = if z > HIGH_SIGMA { AnomalySeverity::High } else { AnomalySeverity::Medium };
        let anomaly = Anomaly {
            metric: latest.metric.clone(),
            value: latest.value,
            baseline_mean: baseline.mean,
            deviation_sigma: z,
            severity,
            timestamp: latest.timestamp,
        };

        tracing::info!(
            metric = %anomaly.metric,
            value = anomaly.value,
            mean = baseline.mean,
            z_score = z,
            severity = %severity,
            "Anomaly detected"
        );

        if state.log.len() >= self.capacity {
            state.log.pop_front();
        }
        state.log.push_back(anomaly.clone());
        Some(anomaly)
    }

    /// Logged anomalies, oldest first.
    pub fn anomalies(&self) -> Vec<Anomaly> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.log.iter().cloned().collect()
    }

    /// Logged anomalies at or after `since`.
    pub fn anomalies_since(&self, since: f64) -> Vec<Anomaly> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.log.iter().filter(|a| a.timestamp >= since).cloned().collect()
    }

    /// Drop anomalies older than `cutoff`. Returns how many were removed.
    pub fn prune(&self, cutoff: f64) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.log.len();
        state.log.retain(|a| a.timestamp >= cutoff);
        before - state.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(mean: f64, std_dev: f64) -> Baseline {
        Baseline {
            metric: "m".into(),
            mean,
            std_dev,
            min: 0.0,
            max: 0.0,
            median: mean,
            sample_count: 100,
            computed_at: 0.0,
        }
    }

    #[test]
    fn no_baseline_is_noop() {
        let detector = AnomalyDetector::new(2.0, 10);
        assert!(detector.detect(&MetricSample::new("m", 1e9, 1.0), None).is_none());
        assert!(detector.anomalies().is_empty());
    }

    #[test]
    fn grades_severity_by_sigma() {
        let detector = AnomalyDetector::new(2.0, 10);
        let b = baseline(50.0, 10.0);

        assert!(detector.detect(&MetricSample::new("m", 65.0, 1.0), Some(&b)).is_none());

        let medium = detector.detect(&MetricSample::new("m", 75.0, 2.0), Some(&b)).unwrap();
        assert_eq!(medium.severity, AnomalySeverity::Medium);
        assert!((medium.deviation_sigma - 2.5).abs() < 1e-9);

        let high = detector.detect(&MetricSample::new("m", 10.0, 3.0), Some(&b)).unwrap();
        assert_eq!(high.severity, AnomalySeverity::High);
        assert_eq!(high.baseline_mean, 50.0);
        assert_eq!(detector.anomalies().len(), 2);
    }

    #[test]
    fn zero_spread_never_flags() {
        let detector = AnomalyDetector::new(2.0, 10);
        let b = baseline(50.0, 0.0);
        assert!(detector.detect(&MetricSample::new("m", 5000.0, 1.0), Some(&b)).is_none());
    }

    #[test]
    fn same_sample_is_examined_once() {
        let detector = AnomalyDetector::new(2.0, 10);
        let b = baseline(0.0, 1.0);
        let sample = MetricSample::new("m", 10.0, 5.0);
        assert!(detector.detect(&sample, Some(&b)).is_some());
        assert!(detector.detect(&sample, Some(&b)).is_none());
        assert_eq!(detector.anomalies().len(), 1);
    }

    #[test]
    fn log_is_bounded_and_prunable() {
        let detector = AnomalyDetector::new(1.0, 3);
        let b = baseline(0.0, 1.0);
        for t in 0..5 {
            detector.detect(&MetricSample::new("m", 10.0, t as f64), Some(&b));
        }
        let log = detector.anomalies();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].timestamp, 2.0);

        assert_eq!(detector.prune(4.0), 2);
        assert_eq!(detector.anomalies_since(0.0).len(), 1);
    }
}
