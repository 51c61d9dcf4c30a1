use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{Direction, ThresholdConfig};
use crate::types::Level;

/// Result of classifying one value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelReading {
    pub level: Level,
    /// 1 (Critical) through 5 (Excellent).
    pub score: u8,
    /// Boundary of the next better level, i.e. the one the value failed to meet.
    /// For Excellent this is the excellent boundary itself.
    pub threshold: f64,
}

/// Per-metric ordered level boundaries.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    tables: BTreeMap<String, ThresholdConfig>,
}

impl ThresholdTable {
    /// Tables are expected to have passed `Config::validate`.
    pub fn new(tables: BTreeMap<String, ThresholdConfig>) -> Self {
        Self { tables }
    }

    pub fn get(&self, metric: &str) -> Option<&ThresholdConfig> {
        self.tables.get(metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Walk levels best to worst and return the first the value satisfies.
    /// Boundaries are inclusive. Anything worse than the poor boundary is Critical.
    pub fn level(&self, metric: &str, value: f64) -> Option<LevelReading> {
        let table = self.tables.get(metric)?;
        Some(classify(table, value))
    }
}

fn at_least_as_good(direction: Direction, value: f64, boundary: f64) -> bool {
    match direction {
        Direction::HigherIsWorse => value <= boundary,
        Direction::LowerIsWorse => value >= boundary,
    }
}

fn classify(table: &ThresholdConfig, value: f64) -> LevelReading {
    let boundaries = table.boundaries();
    let level = Level::BEST_FIRST
        .iter()
        .zip(boundaries.iter())
        .take(4)
        .find(|(_, boundary)| at_least_as_good(table.direction, value, **boundary))
        .map_or(Level::Critical, |(level, _)| *level);

    // index of the level one step better; Excellent reports its own boundary
    let idx = Level::BEST_FIRST.iter().position(|l| *l == level).unwrap_or(0);
    let threshold = boundaries[idx.saturating_sub(1)];

    LevelReading { level, score: level.score(), threshold }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::metrics;
    use proptest::prelude::*;

    fn table() -> ThresholdTable {
        ThresholdTable::new(Config::default().thresholds)
    }

    #[test]
    fn frame_rate_lower_is_worse() {
        let t = table();
        let level = |v| t.level(metrics::FRAME_RATE, v).unwrap().level;
        assert_eq!(level(60.0), Level::Excellent);
        assert_eq!(level(55.0), Level::Excellent);
        assert_eq!(level(50.0), Level::Good);
        assert_eq!(level(30.0), Level::Fair);
        assert_eq!(level(12.0), Level::Poor);
        assert_eq!(level(10.0), Level::Poor);
        assert_eq!(level(8.0), Level::Critical);
    }

    #[test]
    fn memory_higher_is_worse() {
        let t = table();
        let reading = t.level(metrics::MEMORY_USAGE, 400.0).unwrap();
        assert_eq!(reading.level, Level::Excellent);
        assert_eq!(reading.score, 5);

        let reading = t.level(metrics::MEMORY_USAGE, 1200.0).unwrap();
        assert_eq!(reading.level, Level::Fair);
        assert_eq!(reading.score, 3);
        assert_eq!(reading.threshold, 1000.0);

        let reading = t.level(metrics::MEMORY_USAGE, 9000.0).unwrap();
        assert_eq!(reading.level, Level::Critical);
        assert_eq!(reading.threshold, 2000.0);
    }

    #[test]
    fn unknown_metric_has_no_level() {
        assert!(table().level("player_count", 3.0).is_none());
    }

    proptest! {
        #[test]
        fn classification_is_idempotent(v in -1000.0f64..10_000.0) {
            let t = table();
            for metric in [metrics::FRAME_RATE, metrics::CPU_USAGE, metrics::MEMORY_USAGE] {
                prop_assert_eq!(t.level(metric, v), t.level(metric, v));
            }
        }

        #[test]
        fn worse_values_never_score_better(a in 0.0f64..200.0, b in 0.0f64..200.0) {
            let t = table();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            // frame rate: higher is better
            let lo_fps = t.level(metrics::FRAME_RATE, lo).unwrap().score;
            let hi_fps = t.level(metrics::FRAME_RATE, hi).unwrap().score;
            prop_assert!(lo_fps <= hi_fps);
            // cpu: higher is worse
            let lo_cpu = t.level(metrics::CPU_USAGE, lo).unwrap().score;
            let hi_cpu = t.level(metrics::CPU_USAGE, hi).unwrap().score;
            prop_assert!(lo_cpu >= hi_cpu);
        }
    }
}
