use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{now_secs, MetricSample};
use super::MetricSource;

/// Handle the host application uses to push readings (frame rate, latency,
/// player count) into the engine. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct MetricFeed {
    tx: mpsc::Sender<MetricSample>,
    dropped: Arc<AtomicU64>,
}

impl MetricFeed {
    /// Record a reading stamped with the current time.
    pub fn record(&self, metric: impl Into<String>, value: f64) -> bool {
        self.record_at(metric, value, now_secs())
    }

    /// Record a reading with an explicit timestamp. Returns false if the
    /// buffer was full or the engine has shut down.
    pub fn record_at(&self, metric: impl Into<String>, value: f64, timestamp: f64) -> bool {
        match self.tx.try_send(MetricSample::new(metric, value, timestamp)) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Readings rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains readings pushed through a [`MetricFeed`] on every collection tick.
pub struct FeedSource {
    rx: mpsc::Receiver<MetricSample>,
    interval: u64,
    dropped: Arc<AtomicU64>,
    reported_dropped: u64,
}

impl FeedSource {
    pub fn new(capacity: usize, interval_secs: u64) -> (Self, MetricFeed) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let source = Self {
            rx,
            interval: interval_secs,
            dropped: dropped.clone(),
            reported_dropped: 0,
        };
        (source, MetricFeed { tx, dropped })
    }
}

#[async_trait]
impl MetricSource for FeedSource {
    fn name(&self) -> &str { "feed" }

    async fn collect(&mut self) -> Result<Vec<MetricSample>> {
        let mut samples = Vec::new();
        while let Ok(sample) = self.rx.try_recv() {
            if sample.value.is_finite() {
                samples.push(sample);
            } else {
                tracing::debug!(metric = %sample.metric, "Discarding non-finite reading");
            }
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_dropped {
            tracing::warn!(dropped = dropped - self.reported_dropped, "Metric feed buffer overflowed");
            self.reported_dropped = dropped;
        }

        Ok(samples)
    }

    fn interval_secs(&self) -> u64 { self.interval }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_recorded_readings_in_order() {
        let (mut source, feed) = FeedSource::new(16, 1);
        assert!(feed.record_at("frame_rate", 60.0, 1.0));
        assert!(feed.clone().record_at("frame_rate", 59.0, 2.0));

        let samples = source.collect().await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, 59.0);
        assert!(source.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let (mut source, feed) = FeedSource::new(2, 1);
        assert!(feed.record_at("m", 1.0, 1.0));
        assert!(feed.record_at("m", 2.0, 2.0));
        assert!(!feed.record_at("m", 3.0, 3.0));
        assert_eq!(feed.dropped(), 1);
        assert_eq!(source.collect().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_finite_readings_are_skipped() {
        let (mut source, feed) = FeedSource::new(4, 1);
        feed.record_at("m", f64::NAN, 1.0);
        feed.record_at("m", 5.0, 2.0);
        let samples = source.collect().await.unwrap();
        assert_eq!(samples.len(), 1);
    }
}
