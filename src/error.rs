use thiserror::Error;

/// Startup validation failures. The engine refuses to start on any of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("health weights must sum to 1.0 (got {sum:.6})")]
    WeightsNotNormalized { sum: f64 },

    #[error("health weight for `{metric}` must be finite and non-negative ({weight})")]
    InvalidWeight { metric: String, weight: f64 },

    #[error("metric `{metric}` is weighted but has no threshold table")]
    MissingThresholds { metric: String },

    #[error("thresholds for `{metric}` are not strictly ordered: {detail}")]
    UnorderedThresholds { metric: String, detail: String },

    #[error("`{field}` must be greater than zero")]
    NonPositive { field: &'static str },
}

/// Query and evaluation errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The metric has never been measured, or has no thresholds configured.
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    /// Not enough data yet to produce the requested value.
    #[error("no {what} for `{metric}` yet")]
    NotReady { metric: String, what: &'static str },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn not_ready(metric: impl Into<String>, what: &'static str) -> Self {
        EngineError::NotReady { metric: metric.into(), what }
    }
}
