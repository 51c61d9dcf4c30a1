use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::ConfigError;
use crate::types::metrics;

/// Tolerance applied when checking that health weights sum to 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub intervals: IntervalConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, ThresholdConfig>,
    #[serde(default)]
    pub collector: CollectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            intervals: IntervalConfig::default(),
            analysis: AnalysisConfig::default(),
            alerting: AlertingConfig::default(),
            health: HealthConfig::default(),
            thresholds: default_thresholds(),
            collector: CollectorConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Ring buffer capacity per metric.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            log_level: default_log_level(),
            history_size: default_history_size(),
        }
    }
}

/// Cadence of the periodic tasks, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct IntervalConfig {
    #[serde(default = "default_collection_secs")]
    pub collection_secs: u64,
    #[serde(default = "default_alert_secs")]
    pub alert_secs: u64,
    #[serde(default = "default_analytics_secs")]
    pub analytics_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            collection_secs: default_collection_secs(),
            alert_secs: default_alert_secs(),
            analytics_secs: default_analytics_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_baseline_samples")]
    pub baseline_samples: usize,
    #[serde(default = "default_trend_window")]
    pub trend_window_secs: f64,
    #[serde(default = "default_sensitivity")]
    pub anomaly_sensitivity: f64,
    #[serde(default = "default_anomaly_capacity")]
    pub anomaly_log_capacity: usize,
    #[serde(default = "default_anomaly_retention")]
    pub anomaly_retention_secs: f64,
    /// Metrics at or below this level score (1..5) get recommendations.
    #[serde(default = "default_significant_level")]
    pub significant_level: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            baseline_samples: default_baseline_samples(),
            trend_window_secs: default_trend_window(),
            anomaly_sensitivity: default_sensitivity(),
            anomaly_log_capacity: default_anomaly_capacity(),
            anomaly_retention_secs: default_anomaly_retention(),
            significant_level: default_significant_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,
    #[serde(default = "default_escalation")]
    pub escalation_secs: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_history_retention")]
    pub history_retention_secs: f64,
    #[serde(default = "default_rate_per_min")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub log_channel: bool,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            escalation_secs: default_escalation(),
            history_capacity: default_history_capacity(),
            history_retention_secs: default_history_retention(),
            rate_limit_per_minute: default_rate_per_min(),
            delivery_timeout_secs: default_delivery_timeout(),
            log_channel: true,
            webhook: None,
            slack: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub level_filter: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
    #[serde(default)]
    pub level_filter: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Composite score weight per metric. Must sum to 1.0.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { weights: default_weights() }
    }
}

/// Which way a metric gets worse.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Memory, latency, CPU.
    HigherIsWorse,
    /// Frame rate.
    LowerIsWorse,
}

/// Level boundaries for one metric, plus sub-score parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ThresholdConfig {
    pub direction: Direction,
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
    pub critical: f64,
    /// Value that earns a full sub-score on lower-is-worse metrics.
    /// Defaults to the excellent boundary.
    pub target: Option<f64>,
    /// Sub-score points lost per unit on higher-is-worse metrics.
    /// Defaults to `100 / critical`.
    pub penalty: Option<f64>,
}

impl ThresholdConfig {
    pub fn boundaries(&self) -> [f64; 5] {
        [self.excellent, self.good, self.fair, self.poor, self.critical]
    }

    fn validate(&self, metric: &str) -> Result<(), ConfigError> {
        let b = self.boundaries();
        for pair in b.windows(2) {
            let ordered = match self.direction {
                Direction::HigherIsWorse => pair[0] < pair[1],
                Direction::LowerIsWorse => pair[0] > pair[1],
            };
            if !ordered || b.iter().any(|v| !v.is_finite()) {
                return Err(ConfigError::UnorderedThresholds {
                    metric: metric.to_string(),
                    detail: format!("{:?} with {:?}", b, self.direction),
                });
            }
        }
        if self.target.is_some_and(|t| !(t > 0.0)) {
            return Err(ConfigError::NonPositive { field: "thresholds.target" });
        }
        if self.penalty.is_some_and(|p| !(p > 0.0)) {
            return Err(ConfigError::NonPositive { field: "thresholds.penalty" });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CollectorConfig {
    #[serde(default)]
    pub cpu: ProcSourceConfig,
    #[serde(default)]
    pub memory: ProcSourceConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_collection_secs")]
    pub interval_secs: u64,
}

impl Default for ProcSourceConfig {
    fn default() -> Self {
        Self { enabled: true, interval_secs: default_collection_secs() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    /// Readings buffered between collection ticks before new ones are dropped.
    #[serde(default = "default_feed_capacity")]
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { capacity: default_feed_capacity() }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;

        Ok(config)
    }

    /// Reject configurations the engine cannot run with. Called by `Engine::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive_ints = [
            ("engine.history_size", self.engine.history_size as u64),
            ("intervals.collection_secs", self.intervals.collection_secs),
            ("intervals.alert_secs", self.intervals.alert_secs),
            ("intervals.analytics_secs", self.intervals.analytics_secs),
            ("intervals.cleanup_secs", self.intervals.cleanup_secs),
            ("analysis.baseline_samples", self.analysis.baseline_samples as u64),
            ("analysis.anomaly_log_capacity", self.analysis.anomaly_log_capacity as u64),
            ("alerting.history_capacity", self.alerting.history_capacity as u64),
            ("alerting.delivery_timeout_secs", self.alerting.delivery_timeout_secs),
            ("collector.feed.capacity", self.collector.feed.capacity as u64),
        ];
        for (field, value) in positive_ints {
            if value == 0 {
                return Err(ConfigError::NonPositive { field });
            }
        }

        let positive_floats = [
            ("analysis.trend_window_secs", self.analysis.trend_window_secs),
            ("analysis.anomaly_sensitivity", self.analysis.anomaly_sensitivity),
            ("analysis.anomaly_retention_secs", self.analysis.anomaly_retention_secs),
            ("alerting.cooldown_secs", self.alerting.cooldown_secs),
            ("alerting.escalation_secs", self.alerting.escalation_secs),
            ("alerting.history_retention_secs", self.alerting.history_retention_secs),
        ];
        for (field, value) in positive_floats {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field });
            }
        }

        if !(1..=5).contains(&self.analysis.significant_level) {
            return Err(ConfigError::NonPositive { field: "analysis.significant_level" });
        }

        for (metric, table) in &self.thresholds {
            table.validate(metric)?;
        }

        for (metric, weight) in &self.health.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::InvalidWeight { metric: metric.clone(), weight: *weight });
            }
            if !self.thresholds.contains_key(metric) {
                return Err(ConfigError::MissingThresholds { metric: metric.clone() });
            }
        }
        let sum: f64 = self.health.weights.values().sum();
        if !((sum - 1.0).abs() <= WEIGHT_TOLERANCE) {
            return Err(ConfigError::WeightsNotNormalized { sum });
        }

        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

fn default_thresholds() -> BTreeMap<String, ThresholdConfig> {
    let table = |direction, b: [f64; 5], target| ThresholdConfig {
        direction,
        excellent: b[0],
        good: b[1],
        fair: b[2],
        poor: b[3],
        critical: b[4],
        target,
        penalty: None,
    };
    BTreeMap::from([
        (
            metrics::FRAME_RATE.to_string(),
            table(Direction::LowerIsWorse, [55.0, 45.0, 30.0, 10.0, 5.0], Some(60.0)),
        ),
        (
            metrics::MEMORY_USAGE.to_string(),
            table(Direction::HigherIsWorse, [500.0, 1000.0, 1500.0, 2000.0, 2500.0], None),
        ),
        (
            metrics::NETWORK_LATENCY.to_string(),
            table(Direction::HigherIsWorse, [50.0, 100.0, 200.0, 300.0, 500.0], None),
        ),
        (
            metrics::CPU_USAGE.to_string(),
            table(Direction::HigherIsWorse, [30.0, 50.0, 70.0, 85.0, 95.0], None),
        ),
    ])
}

fn default_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        (metrics::FRAME_RATE.to_string(), 0.4),
        (metrics::MEMORY_USAGE.to_string(), 0.3),
        (metrics::CPU_USAGE.to_string(), 0.2),
        (metrics::NETWORK_LATENCY.to_string(), 0.1),
    ])
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_history_size() -> usize { 3600 }
fn default_collection_secs() -> u64 { 1 }
fn default_alert_secs() -> u64 { 5 }
fn default_analytics_secs() -> u64 { 30 }
fn default_cleanup_secs() -> u64 { 300 }
fn default_baseline_samples() -> usize { 100 }
fn default_trend_window() -> f64 { 300.0 }
fn default_sensitivity() -> f64 { 2.0 }
fn default_anomaly_capacity() -> usize { 100 }
fn default_anomaly_retention() -> f64 { 3600.0 }
fn default_significant_level() -> u8 { 3 }
fn default_cooldown() -> f64 { 60.0 }
fn default_escalation() -> f64 { 300.0 }
fn default_history_capacity() -> usize { 500 }
fn default_history_retention() -> f64 { 86_400.0 }
fn default_rate_per_min() -> u32 { 30 }
fn default_delivery_timeout() -> u64 { 5 }
fn default_feed_capacity() -> usize { 10_000 }
fn default_true() -> bool { true }
