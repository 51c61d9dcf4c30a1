pub mod alerter;
pub mod analyzer;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod storage;

pub use engine::Engine;
pub use error::{ConfigError, EngineError};

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Well-known metric names fed by the host application.
    pub mod metrics {
        pub const FRAME_RATE: &str = "frame_rate";
        pub const MEMORY_USAGE: &str = "memory_usage";
        pub const NETWORK_LATENCY: &str = "network_latency";
        pub const CPU_USAGE: &str = "cpu_usage";
        pub const PLAYER_COUNT: &str = "player_count";
    }

    /// A single metric measurement. Timestamps are seconds since the Unix epoch.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct MetricSample {
        pub metric: String,
        pub value: f64,
        pub timestamp: f64,
    }

    impl MetricSample {
        pub fn new(metric: impl Into<String>, value: f64, timestamp: f64) -> Self {
            Self { metric: metric.into(), value, timestamp }
        }
    }

    /// Discrete performance level, ordered worst to best.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Level {
        Critical,
        Poor,
        Fair,
        Good,
        Excellent,
    }

    impl Level {
        /// Levels in classification order, best first.
        pub const BEST_FIRST: [Level; 5] = [
            Level::Excellent,
            Level::Good,
            Level::Fair,
            Level::Poor,
            Level::Critical,
        ];

        /// 1 (Critical) through 5 (Excellent).
        pub fn score(self) -> u8 {
            match self {
                Level::Critical => 1,
                Level::Poor => 2,
                Level::Fair => 3,
                Level::Good => 4,
                Level::Excellent => 5,
            }
        }

        /// Fair or worse.
        pub fn is_alerting(self) -> bool {
            self <= Level::Fair
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s.to_ascii_lowercase().as_str() {
                "excellent" => Some(Level::Excellent),
                "good" => Some(Level::Good),
                "fair" => Some(Level::Fair),
                "poor" => Some(Level::Poor),
                "critical" => Some(Level::Critical),
                _ => None,
            }
        }
    }

    impl std::fmt::Display for Level {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Level::Excellent => write!(f, "Excellent"),
                Level::Good => write!(f, "Good"),
                Level::Fair => write!(f, "Fair"),
                Level::Poor => write!(f, "Poor"),
                Level::Critical => write!(f, "Critical"),
            }
        }
    }

    /// Why an alert left the active set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Resolution {
        /// The metric recovered to better than Fair.
        Recovered,
        /// A worse alert for the same metric replaced it.
        Superseded,
    }

    /// A threshold alert raised by the alert manager
    #[derive(Debug, Clone, Serialize)]
    pub struct Alert {
        pub id: Uuid,
        pub metric: String,
        pub level: Level,
        /// Value that triggered the alert.
        pub value: f64,
        /// Most recent value observed while the alert was active.
        pub current_value: f64,
        /// Boundary the value failed to meet.
        pub threshold: f64,
        pub message: String,
        pub created_at: f64,
        pub acknowledged: bool,
        pub escalated: bool,
        pub escalate_at: Option<f64>,
        pub resolved_at: Option<f64>,
        pub resolution: Option<Resolution>,
        pub hostname: String,
    }

    /// Current wall-clock time in fractional seconds.
    pub fn now_secs() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    /// Convert an engine timestamp back into a UTC datetime.
    pub fn to_datetime(ts: f64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis((ts * 1000.0) as i64).unwrap_or_default()
    }
}
