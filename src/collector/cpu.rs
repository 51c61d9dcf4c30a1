use anyhow::Result;
use async_trait::async_trait;

use crate::config::ProcSourceConfig;
use crate::types::{metrics, now_secs, MetricSample};
use super::MetricSource;

/// Host CPU utilisation from /proc/stat, as a percentage of all cores.
pub struct CpuSource {
    interval: u64,
    prev_total: u64,
    prev_idle: u64,
}

impl CpuSource {
    pub fn new(config: &ProcSourceConfig) -> Result<Self> {
        Ok(Self {
            interval: config.interval_secs,
            prev_total: 0,
            prev_idle: 0,
        })
    }

    /// Parse the aggregate `cpu` line and return usage since the previous call.
    /// The first call only primes the counters.
    fn parse_stat(&mut self, content: &str) -> Option<f64> {
        let line = content.lines().find(|l| l.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }

        let total: u64 = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0); // idle + iowait

        let usage = if self.prev_total > 0 {
            let d_total = total.saturating_sub(self.prev_total);
            let d_idle = idle.saturating_sub(self.prev_idle);
            (d_total > 0).then(|| 100.0 * (1.0 - d_idle as f64 / d_total as f64))
        } else {
            None
        };

        self.prev_total = total;
        self.prev_idle = idle;
        usage
    }
}

#[async_trait]
impl MetricSource for CpuSource {
    fn name(&self) -> &str {
        "cpu"
    }

    async fn collect(&mut self) -> Result<Vec<MetricSample>> {
        let content = tokio::fs::read_to_string("/proc/stat").await?;
        Ok(self
            .parse_stat(&content)
            .map(|usage| MetricSample::new(metrics::CPU_USAGE, usage, now_secs()))
            .into_iter()
            .collect())
    }

    fn interval_secs(&self) -> u64 {
        self.interval
    }
}
