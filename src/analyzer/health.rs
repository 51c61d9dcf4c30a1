use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::Direction;
use super::{LevelReading, ThresholdTable};

/// Per-metric levels and sub-scores plus the weighted composite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Floored weighted composite, 0..=100.
    pub score: u8,
    /// 0..=100 per metric with a threshold table and a current value.
    pub sub_scores: BTreeMap<String, f64>,
    pub levels: BTreeMap<String, LevelReading>,
}

impl HealthReport {
    /// Metric with the lowest sub-score. Ties break alphabetically.
    pub fn worst(&self) -> Option<(&str, f64)> {
        self.sub_scores
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, score)| (name.as_str(), *score))
    }
}

/// Maps metrics to levels and folds their sub-scores into one weighted score.
///
/// Weights are validated at startup to sum to 1.0. When a weighted metric has
/// no current value the remaining weights are renormalised, so the score stays
/// on the 0..=100 scale while the host is still warming up.
#[derive(Debug, Clone)]
pub struct HealthScorer {
    thresholds: ThresholdTable,
    weights: BTreeMap<String, f64>,
}

impl HealthScorer {
    pub fn new(thresholds: ThresholdTable, weights: BTreeMap<String, f64>) -> Self {
        Self { thresholds, weights }
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    pub fn level(&self, metric: &str, value: f64) -> Option<LevelReading> {
        self.thresholds.level(metric, value)
    }

    /// 0..=100 sub-score for one value.
    ///
    /// Lower-is-worse: `min(100, 100 * value / target)`.
    /// Higher-is-worse: `max(0, 100 - penalty * value)`.
    pub fn sub_score(&self, metric: &str, value: f64) -> Option<f64> {
        let table = self.thresholds.get(metric)?;
        let score = match table.direction {
            Direction::LowerIsWorse => {
                let target = table.target.unwrap_or(table.excellent);
                100.0 * value / target
            }
            Direction::HigherIsWorse => {
                let penalty = table.penalty.unwrap_or(100.0 / table.critical);
                100.0 - penalty * value
            }
        };
        Some(score.clamp(0.0, 100.0))
    }

    /// Composite report, or `None` when no weighted metric has a value yet.
    pub fn composite(&self, values: &HashMap<String, f64>) -> Option<HealthReport> {
        let mut sub_scores = BTreeMap::new();
        let mut levels = BTreeMap::new();
        for (metric, value) in values {
            if let (Some(score), Some(reading)) = (self.sub_score(metric, *value), self.level(metric, *value)) {
                sub_scores.insert(metric.clone(), score);
                levels.insert(metric.clone(), reading);
            }
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (metric, weight) in &self.weights {
            if let Some(score) = sub_scores.get(metric) {
                weighted += weight * score;
                total_weight += weight;
            }
        }
        if total_weight <= 0.0 {
            return None;
        }

        // epsilon absorbs rounding in the weight sums before flooring
        let score = (weighted / total_weight + 1e-9).clamp(0.0, 100.0).floor() as u8;
        Some(HealthReport { score, sub_scores, levels })
    }
}
