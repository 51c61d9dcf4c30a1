use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::config::Direction;
use crate::types::{metrics, Alert, Level};
use super::{Anomaly, AnomalySeverity, HealthReport, ThresholdTable, Trend, TrendDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Rendering,
    Memory,
    Network,
    Cpu,
    Capacity,
    Investigate,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl From<Level> for Priority {
    fn from(level: Level) -> Self {
        match level {
            Level::Critical => Priority::Urgent,
            Level::Poor => Priority::High,
            Level::Fair => Priority::Medium,
            Level::Good | Level::Excellent => Priority::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub message: String,
    pub metric: String,
    pub value: f64,
}

/// The single worst-scoring metric of an evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub metric: String,
    pub level: Level,
    pub sub_score: f64,
    pub value: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Analysis {
    pub bottleneck: Option<Bottleneck>,
    /// Highest priority first.
    pub recommendations: Vec<Recommendation>,
    pub generated_at: f64,
}

/// Everything the engine knows about the current cycle.
pub struct AnalysisInput<'a> {
    pub values: &'a HashMap<String, f64>,
    pub report: &'a HealthReport,
    pub thresholds: &'a ThresholdTable,
    pub active_alerts: &'a [Alert],
    pub anomalies: &'a [Anomaly],
    pub trends: &'a [Trend],
    pub now: f64,
}

fn advice(metric: &str) -> (RecommendationKind, &'static str) {
    match metric {
        metrics::FRAME_RATE => (
            RecommendationKind::Rendering,
            "Frame rate is degraded: reduce render load (effects, draw distance, animated parts)",
        ),
        metrics::MEMORY_USAGE => (
            RecommendationKind::Memory,
            "Memory usage is high: release cached assets and destroy unused instances",
        ),
        metrics::NETWORK_LATENCY => (
            RecommendationKind::Network,
            "Network latency is elevated: batch remote events and lower replication frequency",
        ),
        metrics::CPU_USAGE => (
            RecommendationKind::Cpu,
            "CPU load is high: spread expensive work across frames and throttle script loops",
        ),
        metrics::PLAYER_COUNT => (
            RecommendationKind::Capacity,
            "Concurrent players are near capacity: cap server slots or shift new joins elsewhere",
        ),
        _ => (
            RecommendationKind::General,
            "Metric is outside its acceptable range: review recent changes",
        ),
    }
}

/// Names the bottleneck and turns poor levels into actionable suggestions.
pub struct RecommendationEngine {
    /// Level score (1..=5) at or below which a metric needs attention.
    significant_level: u8,
}

impl RecommendationEngine {
    pub fn new(significant_level: u8) -> Self {
        Self { significant_level }
    }

    pub fn analyze(&self, input: &AnalysisInput<'_>) -> Analysis {
        let mut recommendations = Vec::new();
        let mut covered = BTreeSet::new();
        let bottleneck = self.bottleneck(input);

        for (metric, reading) in &input.report.levels {
            if reading.score > self.significant_level {
                continue;
            }
            let Some(value) = input.values.get(metric).copied() else { continue };
            let sub_score = input.report.sub_scores.get(metric).copied().unwrap_or(0.0);

            let escalated = input
                .active_alerts
                .iter()
                .any(|a| a.metric == *metric && a.escalated);
            let priority = if escalated { Priority::Urgent } else { Priority::from(reading.level) };

            let (kind, text) = advice(metric);
            let mut message = format!("{} ({}={:.1}, {})", text, metric, value, reading.level);
            if self.is_worsening(input, metric) {
                message.push_str("; trend worsening");
            }

            recommendations.push((sub_score, Recommendation {
                kind,
                priority,
                message,
                metric: metric.clone(),
                value,
            }));
            covered.insert(metric.clone());
        }

        for anomaly in input.anomalies {
            if anomaly.severity != AnomalySeverity::High || !covered.insert(anomaly.metric.clone()) {
                continue;
            }
            recommendations.push((100.0, Recommendation {
                kind: RecommendationKind::Investigate,
                priority: Priority::Low,
                message: format!(
                    "Unusual {} reading {:.1} ({:.1} sigma from baseline {:.1}): check for spikes",
                    anomaly.metric, anomaly.value, anomaly.deviation_sigma, anomaly.baseline_mean
                ),
                metric: anomaly.metric.clone(),
                value: anomaly.value,
            }));
        }

        recommendations.sort_by(|(sa, a), (sb, b)| {
            b.priority.cmp(&a.priority).then(sa.total_cmp(sb))
        });

        Analysis {
            bottleneck,
            recommendations: recommendations.into_iter().map(|(_, r)| r).collect(),
            generated_at: input.now,
        }
    }

    /// The lowest sub-score wins; it is only reported once its level is
    /// significant.
    fn bottleneck(&self, input: &AnalysisInput<'_>) -> Option<Bottleneck> {
        let (metric, sub_score) = input.report.worst()?;
        let reading = input.report.levels.get(metric)?;
        if reading.score > self.significant_level {
            return None;
        }
        Some(Bottleneck {
            metric: metric.to_string(),
            level: reading.level,
            sub_score,
            value: input.values.get(metric).copied()?,
            timestamp: input.now,
        })
    }

    fn is_worsening(&self, input: &AnalysisInput<'_>, metric: &str) -> bool {
        let Some(table) = input.thresholds.get(metric) else { return false };
        input.trends.iter().any(|t| {
            t.metric == metric
                && matches!(
                    (table.direction, t.direction),
                    (Direction::HigherIsWorse, TrendDirection::Increasing)
                        | (Direction::LowerIsWorse, TrendDirection::Decreasing)
                )
        })
    }
}
