pub mod cpu;
pub mod feed;
pub mod memory;

pub use feed::{FeedSource, MetricFeed};

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::types::MetricSample;

/// Trait for everything that produces raw metric readings.
///
/// The analytics core never measures anything itself; host sources and the
/// application's own frame/network instrumentation all come in through here.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Human-readable name for this source (e.g., "cpu", "feed")
    fn name(&self) -> &str;

    /// Collect readings. Called periodically by the scheduler.
    /// An error is logged and treated as a gap in the series.
    async fn collect(&mut self) -> Result<Vec<MetricSample>>;

    /// Collection interval in seconds
    fn interval_secs(&self) -> u64;
}

/// Create the host sources enabled in configuration.
pub fn create_sources(config: &Config) -> Result<Vec<Box<dyn MetricSource>>> {
    let mut sources: Vec<Box<dyn MetricSource>> = Vec::new();

    if config.collector.cpu.enabled {
        sources.push(Box::new(cpu::CpuSource::new(&config.collector.cpu)?));
    }

    if config.collector.memory.enabled {
        sources.push(Box::new(memory::MemorySource::new(&config.collector.memory)?));
    }

    tracing::info!(count = sources.len(), "Initialized metric sources");
    Ok(sources)
}
