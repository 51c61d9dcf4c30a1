use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::storage::Storage;
use crate::types::MetricSample;
use super::{mean, sample_std_dev};

/// Fewer samples than this in the window always reads as `Stable`.
pub const MIN_TREND_SAMPLES: usize = 5;

/// Half-to-half mean shift, in standard deviations, that counts as movement.
const DIRECTION_SIGMA: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub metric: String,
    pub direction: TrendDirection,
    /// |second-half mean - first-half mean| / stddev of the window.
    pub strength: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Least-squares slope in units per second; 0 when undefined.
    pub slope: f64,
    pub sample_count: usize,
    pub computed_at: f64,
}

impl Trend {
    fn stable(metric: &str, samples: &[MetricSample], now: f64) -> Self {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        Self {
            metric: metric.to_string(),
            direction: TrendDirection::Stable,
            strength: 0.0,
            mean: mean(&values),
            std_dev: sample_std_dev(&values),
            slope: 0.0,
            sample_count: samples.len(),
            computed_at: now,
        }
    }
}

/// Split-half trend classification over a trailing time window.
pub struct TrendAnalyzer {
    window_secs: f64,
    trends: RwLock<HashMap<String, Trend>>,
}

impl TrendAnalyzer {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            trends: RwLock::new(HashMap::new()),
        }
    }

    /// Least-squares slope of `ys` over `xs`, `None` when the xs don't vary.
    ///
    /// Both axes are centred on their means first; raw moments of epoch
    /// timestamps lose most of their precision to cancellation.
    pub fn least_squares_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
        if xs.len() < 2 || xs.len() != ys.len() {
            return None;
        }
        let mean_x = mean(xs);
        let mean_y = mean(ys);

        let (sxy, sxx) = xs.iter().zip(ys).fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            let dx = x - mean_x;
            (sxy + dx * (y - mean_y), sxx + dx * dx)
        });
        (sxx > f64::EPSILON).then(|| sxy / sxx)
    }

    /// Classify a chronological window of samples.
    pub fn classify(metric: &str, samples: &[MetricSample], now: f64) -> Trend {
        if samples.len() < MIN_TREND_SAMPLES {
            return Trend::stable(metric, samples, now);
        }

        let xs: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
        let ys: Vec<f64> = samples.iter().map(|s| s.value).collect();

        let half = ys.len() / 2;
        let first_mean = mean(&ys[..half]);
        let second_mean = mean(&ys[half..]);
        let std_dev = sample_std_dev(&ys);
        let delta = second_mean - first_mean;

        let direction = if delta > DIRECTION_SIGMA * std_dev && std_dev > 0.0 {
            TrendDirection::Increasing
        } else if delta < -DIRECTION_SIGMA * std_dev && std_dev > 0.0 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };
        let strength = if std_dev > 0.0 { delta.abs() / std_dev } else { 0.0 };
        let slope = Self::least_squares_slope(&xs, &ys).unwrap_or(0.0);

        Trend {
            metric: metric.to_string(),
            direction,
            strength,
            mean: mean(&ys),
            std_dev,
            slope,
            sample_count: ys.len(),
            computed_at: now,
        }
    }

    /// Trend over the samples from the last `window_secs` seconds.
    pub fn compute_trend(&self, storage: &Storage, metric: &str, window_secs: f64, now: f64) -> Trend {
        let samples = storage.since(metric, now - window_secs);
        Self::classify(metric, &samples, now)
    }

    /// Recompute with the configured window and cache the result.
    pub fn refresh(&self, storage: &Storage, metric: &str, now: f64) -> Trend {
        let trend = self.compute_trend(storage, metric, self.window_secs, now);
        self.trends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metric.to_string(), trend.clone());
        trend
    }

    pub fn get(&self, metric: &str) -> Option<Trend> {
        self.trends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(metric)
            .cloned()
    }
}
