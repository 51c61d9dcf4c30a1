use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::storage::Storage;
use super::{mean, median, sample_std_dev};

/// Rolling statistics over a trailing window of one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub metric: String,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub sample_count: usize,
    pub computed_at: f64,
}

impl Baseline {
    /// Compute from a non-empty slice of values.
    pub fn from_values(metric: &str, values: &[f64], computed_at: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            metric: metric.to_string(),
            mean: mean(values),
            std_dev: sample_std_dev(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            median: median(values),
            sample_count: values.len(),
            computed_at,
        })
    }

    /// Absolute z-score of `value`; 0 when the baseline has no spread.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.std_dev == 0.0 {
            return 0.0;
        }
        (value - self.mean).abs() / self.std_dev
    }
}

/// Maintains one baseline per metric, replaced wholesale on each recompute.
pub struct BaselineEstimator {
    window: usize,
    baselines: RwLock<HashMap<String, Baseline>>,
}

impl BaselineEstimator {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            baselines: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Recompute the baseline for `metric` from the last `window` samples.
    ///
    /// With fewer samples than the window the previous baseline (if any) is
    /// left untouched and `None` is returned.
    pub fn recompute(&self, storage: &Storage, metric: &str, now: f64) -> Option<Baseline> {
        let samples = storage.snapshot(metric, self.window);
        if samples.len() < self.window {
            return None;
        }

        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let baseline = Baseline::from_values(metric, &values, now)?;

        tracing::debug!(
            metric,
            mean = baseline.mean,
            std_dev = baseline.std_dev,
            samples = baseline.sample_count,
            "Baseline recomputed"
        );

        self.baselines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metric.to_string(), baseline.clone());
        Some(baseline)
    }

    pub fn get(&self, metric: &str) -> Option<Baseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(metric)
            .cloned()
    }
}
