use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::alerter::{AlertEvent, AlertManager, AlertStats};
use crate::analyzer::{
    Analysis, AnalysisInput, Anomaly, AnomalyDetector, Baseline, BaselineEstimator, HealthReport,
    HealthScorer, LevelReading, RecommendationEngine, ThresholdTable, Trend, TrendAnalyzer,
};
use crate::config::Config;
use crate::error::{ConfigError, EngineError};
use crate::storage::Storage;
use crate::types::{now_secs, Alert, MetricSample};

/// Outcome of one analytics pass.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsPass {
    pub metrics: usize,
    pub baselines_updated: usize,
    pub trends: Vec<Trend>,
    pub anomalies: Vec<Anomaly>,
}

/// The telemetry engine: one store plus every analysis component, all owned by
/// this instance and built from injected configuration.
///
/// Cheap to clone; clones share state. Only ingestion mutates the store, and
/// every reader works on copies taken from it.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Config,
    storage: Storage,
    baselines: BaselineEstimator,
    trends: TrendAnalyzer,
    anomalies: AnomalyDetector,
    scorer: HealthScorer,
    alerts: AlertManager,
    recommender: RecommendationEngine,
}

impl Engine {
    /// Validate `config` and build the engine. Misconfiguration is fatal.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let thresholds = ThresholdTable::new(config.thresholds.clone());
        let inner = EngineInner {
            storage: Storage::new(config.engine.history_size),
            baselines: BaselineEstimator::new(config.analysis.baseline_samples),
            trends: TrendAnalyzer::new(config.analysis.trend_window_secs),
            anomalies: AnomalyDetector::new(
                config.analysis.anomaly_sensitivity,
                config.analysis.anomaly_log_capacity,
            ),
            scorer: HealthScorer::new(thresholds.clone(), config.health.weights.clone()),
            alerts: AlertManager::new(thresholds, &config.alerting, config.engine.hostname.clone()),
            recommender: RecommendationEngine::new(config.analysis.significant_level),
            config,
        };

        tracing::info!(
            history_size = inner.config.engine.history_size,
            metrics_with_thresholds = inner.config.thresholds.len(),
            "Engine initialized"
        );

        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    /// Record one reading. Non-finite values are discarded.
    pub fn ingest(&self, metric: &str, value: f64, timestamp: f64) {
        self.ingest_sample(MetricSample::new(metric, value, timestamp));
    }

    pub fn ingest_sample(&self, sample: MetricSample) {
        if !sample.value.is_finite() || !sample.timestamp.is_finite() {
            tracing::debug!(metric = %sample.metric, "Discarding non-finite sample");
            return;
        }
        self.inner.storage.ingest(sample);
    }

    /// Alert evaluation pass: creation, escalation and resolution.
    pub fn evaluate_alerts(&self, now: f64) -> Vec<AlertEvent> {
        let values = self.inner.storage.current_values();
        self.inner.alerts.evaluate(&values, now)
    }

    /// Analytics pass: baselines, trends and anomaly detection for every metric.
    pub fn refresh_analytics(&self, now: f64) -> AnalyticsPass {
        let inner = &self.inner;
        let mut pass = AnalyticsPass::default();

        for metric in inner.storage.metric_names() {
            pass.metrics += 1;
            if inner.baselines.recompute(&inner.storage, &metric, now).is_some() {
                pass.baselines_updated += 1;
            }
            pass.trends.push(inner.trends.refresh(&inner.storage, &metric, now));

            let Some(latest) = inner.storage.latest(&metric) else { continue };
            let baseline = inner.baselines.get(&metric);
            if let Some(anomaly) = inner.anomalies.detect(&latest, baseline.as_ref()) {
                pass.anomalies.push(anomaly);
            }
        }

        tracing::debug!(
            metrics = pass.metrics,
            baselines = pass.baselines_updated,
            anomalies = pass.anomalies.len(),
            "Analytics pass complete"
        );
        pass
    }

    /// Retention pass over alert history, cooldowns and the anomaly log.
    pub fn cleanup(&self, now: f64) -> (usize, usize) {
        let cfg = &self.inner.config;
        let alerts = self.inner.alerts.prune(now - cfg.alerting.history_retention_secs, now);
        let anomalies = self.inner.anomalies.prune(now - cfg.analysis.anomaly_retention_secs);
        if alerts + anomalies > 0 {
            tracing::info!(alerts, anomalies, "Pruned expired history");
        }
        (alerts, anomalies)
    }

    pub fn get_current_metrics(&self) -> HashMap<String, MetricSample> {
        self.inner.storage.current()
    }

    /// The most recent `window` samples of `metric`, oldest first.
    pub fn get_history(&self, metric: &str, window: usize) -> Result<Vec<MetricSample>, EngineError> {
        self.require_metric(metric)?;
        Ok(self.inner.storage.snapshot(metric, window))
    }

    pub fn get_baseline(&self, metric: &str) -> Result<Baseline, EngineError> {
        self.require_metric(metric)?;
        self.inner
            .baselines
            .get(metric)
            .ok_or_else(|| EngineError::not_ready(metric, "baseline"))
    }

    /// Trend from the latest analytics pass.
    pub fn get_trend(&self, metric: &str) -> Result<Trend, EngineError> {
        self.require_metric(metric)?;
        self.inner
            .trends
            .get(metric)
            .ok_or_else(|| EngineError::not_ready(metric, "trend"))
    }

    /// Trend over an arbitrary trailing window, computed on demand.
    pub fn compute_trend(&self, metric: &str, window_secs: f64, now: f64) -> Result<Trend, EngineError> {
        self.require_metric(metric)?;
        Ok(self.inner.trends.compute_trend(&self.inner.storage, metric, window_secs, now))
    }

    pub fn get_level(&self, metric: &str, value: f64) -> Result<LevelReading, EngineError> {
        self.inner
            .scorer
            .level(metric, value)
            .ok_or_else(|| EngineError::UnknownMetric(metric.to_string()))
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.active()
    }

    pub fn get_alert_history(&self) -> Vec<Alert> {
        self.inner.alerts.history()
    }

    pub fn get_alert_stats(&self) -> AlertStats {
        self.inner.alerts.stats()
    }

    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.inner.alerts.acknowledge(id)
    }

    pub fn get_anomalies(&self) -> Vec<Anomaly> {
        self.inner.anomalies.anomalies()
    }

    /// Composite health, freshly computed from the current values.
    pub fn get_health_score(&self) -> Result<HealthReport, EngineError> {
        let values = self.inner.storage.current_values();
        self.inner
            .scorer
            .composite(&values)
            .ok_or_else(|| EngineError::not_ready("*", "health score"))
    }

    pub fn get_recommendations(&self) -> Analysis {
        self.analyze(now_secs())
    }

    /// Bottleneck and recommendations as of `now`.
    pub fn analyze(&self, now: f64) -> Analysis {
        let inner = &self.inner;
        let values = inner.storage.current_values();
        let Some(report) = inner.scorer.composite(&values) else {
            return Analysis { generated_at: now, ..Analysis::default() };
        };

        let active_alerts = inner.alerts.active();
        let anomalies = inner
            .anomalies
            .anomalies_since(now - inner.config.analysis.trend_window_secs);
        let trends: Vec<Trend> = values.keys().filter_map(|m| inner.trends.get(m)).collect();

        inner.recommender.analyze(&AnalysisInput {
            values: &values,
            report: &report,
            thresholds: inner.scorer.thresholds(),
            active_alerts: &active_alerts,
            anomalies: &anomalies,
            trends: &trends,
            now,
        })
    }

    fn require_metric(&self, metric: &str) -> Result<(), EngineError> {
        if self.inner.storage.contains(metric) {
            Ok(())
        } else {
            Err(EngineError::UnknownMetric(metric.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::metrics;

    fn engine() -> Engine {
        let mut config = Config::default();
        config.analysis.baseline_samples = 5;
        Engine::new(config).unwrap()
    }

    #[test]
    fn refuses_invalid_configuration() {
        let mut config = Config::default();
        config.health.weights.clear();
        assert!(matches!(Engine::new(config), Err(ConfigError::WeightsNotNormalized { .. })));
    }

    #[test]
    fn unknown_metrics_are_distinguished_from_zero() {
        let engine = engine();
        assert!(matches!(engine.get_history("ghost", 10), Err(EngineError::UnknownMetric(_))));
        assert!(matches!(engine.get_baseline("ghost"), Err(EngineError::UnknownMetric(_))));

        engine.ingest("player_count", 0.0, 1.0);
        assert_eq!(engine.get_history("player_count", 10).unwrap()[0].value, 0.0);
        assert!(matches!(
            engine.get_baseline("player_count"),
            Err(EngineError::NotReady { what: "baseline", .. })
        ));
        assert!(matches!(engine.get_level("player_count", 1.0), Err(EngineError::UnknownMetric(_))));
    }

    #[test]
    fn non_finite_samples_are_dropped() {
        let engine = engine();
        engine.ingest(metrics::FRAME_RATE, f64::NAN, 1.0);
        engine.ingest(metrics::FRAME_RATE, f64::INFINITY, 2.0);
        assert!(engine.get_current_metrics().is_empty());
    }

    #[test]
    fn health_score_needs_a_weighted_metric() {
        let engine = engine();
        assert!(engine.get_health_score().is_err());
        engine.ingest(metrics::FRAME_RATE, 60.0, 1.0);
        assert_eq!(engine.get_health_score().unwrap().score, 100);
    }

    #[test]
    fn analytics_pass_fills_baseline_and_trend() {
        let engine = engine();
        for (i, v) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            engine.ingest(metrics::CPU_USAGE, v, i as f64);
        }
        let pass = engine.refresh_analytics(5.0);
        assert_eq!(pass.metrics, 1);
        assert_eq!(pass.baselines_updated, 1);

        let baseline = engine.get_baseline(metrics::CPU_USAGE).unwrap();
        assert_eq!(baseline.mean, 30.0);
        let trend = engine.get_trend(metrics::CPU_USAGE).unwrap();
        assert_eq!(trend.sample_count, 5);
    }

    #[test]
    fn acknowledge_through_engine() {
        let engine = engine();
        engine.ingest(metrics::CPU_USAGE, 99.0, 1.0);
        let events = engine.evaluate_alerts(1.0);
        assert_eq!(events.len(), 1);
        assert!(engine.acknowledge_alert(events[0].alert.id));
        assert!(engine.get_active_alerts()[0].acknowledged);
        assert!(!engine.acknowledge_alert(Uuid::new_v4()));
    }

    #[test]
    fn cleanup_prunes_old_history() {
        let engine = engine();
        engine.ingest(metrics::CPU_USAGE, 99.0, 0.0);
        engine.evaluate_alerts(0.0);
        engine.ingest(metrics::CPU_USAGE, 10.0, 1.0);
        engine.evaluate_alerts(1.0);
        assert_eq!(engine.get_alert_history().len(), 1);

        assert_eq!(engine.cleanup(1000.0), (0, 0));
        assert_eq!(engine.cleanup(100_000.0), (1, 0));
        assert!(engine.get_alert_history().is_empty());
    }
}
