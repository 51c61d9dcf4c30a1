use anyhow::Result;
use async_trait::async_trait;

use crate::config::ProcSourceConfig;
use crate::types::{metrics, now_secs, MetricSample};
use super::MetricSource;

/// Host memory in use, in megabytes, from /proc/meminfo
pub struct MemorySource {
    interval: u64,
}

impl MemorySource {
    pub fn new(config: &ProcSourceConfig) -> Result<Self> {
        Ok(Self { interval: config.interval_secs })
    }

    /// Look up one `Key:   1234 kB` field.
    fn field_kb(content: &str, key: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let (name, rest) = line.split_once(':')?;
            if name.trim() != key {
                return None;
            }
            rest.split_whitespace().next()?.parse().ok()
        })
    }

    fn used_mb(content: &str) -> Option<f64> {
        let total = Self::field_kb(content, "MemTotal").filter(|kb| *kb > 0)?;
        // Older kernels lack MemAvailable
        let available = Self::field_kb(content, "MemAvailable").unwrap_or_else(|| {
            ["MemFree", "Buffers", "Cached"]
                .iter()
                .filter_map(|key| Self::field_kb(content, key))
                .sum()
        });
        Some(total.saturating_sub(available) as f64 / 1024.0)
    }
}

#[async_trait]
impl MetricSource for MemorySource {
    fn name(&self) -> &str { "memory" }

    async fn collect(&mut self) -> Result<Vec<MetricSample>> {
        let content = tokio::fs::read_to_string("/proc/meminfo").await?;
        Ok(Self::used_mb(&content)
            .map(|mb| MetricSample::new(metrics::MEMORY_USAGE, mb, now_secs()))
            .into_iter()
            .collect())
    }

    fn interval_secs(&self) -> u64 { self.interval }
}
