pub mod baseline;
pub mod health;
pub mod recommend;
pub mod threshold;
pub mod trend;
pub mod zscore;

pub use baseline::{Baseline, BaselineEstimator};
pub use health::{HealthReport, HealthScorer};
pub use recommend::{Analysis, AnalysisInput, Bottleneck, Priority, Recommendation, RecommendationEngine, RecommendationKind};
pub use threshold::{LevelReading, ThresholdTable};
pub use trend::{Trend, TrendAnalyzer, TrendDirection};
pub use zscore::{Anomaly, AnomalyDetector, AnomalySeverity};

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected sample standard deviation; 0 when fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// Median; even counts average the two middle elements.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
