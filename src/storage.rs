use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::MetricSample;

/// Thread-safe metric storage using ring buffers.
///
/// One writer (the ingestion task) and any number of readers. Readers always
/// receive owned copies so no lock is held while they compute.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<RwLock<StorageInner>>,
}

struct StorageInner {
    buffers: HashMap<String, RingBuffer>,
    capacity: usize,
}

struct RingBuffer {
    data: Vec<MetricSample>,
    head: usize,
    capacity: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(1024)),
            head: 0,
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn push(&mut self, sample: MetricSample) {
        if self.data.len() < self.capacity {
            self.data.push(sample);
        } else {
            self.data[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn latest(&self) -> Option<&MetricSample> {
        if self.data.is_empty() {
            return None;
        }
        let idx = if self.data.len() < self.capacity {
            self.data.len() - 1
        } else {
            (self.head + self.capacity - 1) % self.capacity
        };
        Some(&self.data[idx])
    }

    /// Iterate newest to oldest.
    fn iter_rev(&self) -> impl Iterator<Item = &MetricSample> {
        let len = self.data.len();
        let newest = if len < self.capacity { len } else { self.head + self.capacity };
        (0..len).map(move |i| &self.data[(newest - 1 - i) % self.capacity])
    }

    /// Get the most recent N samples in chronological order
    fn recent(&self, n: usize) -> Vec<MetricSample> {
        let mut result: Vec<MetricSample> = self.iter_rev().take(n).cloned().collect();
        result.reverse();
        result
    }

    /// Samples with `timestamp >= since`, in chronological order.
    fn since(&self, since: f64) -> Vec<MetricSample> {
        let mut result: Vec<MetricSample> = self
            .iter_rev()
            .take_while(|s| s.timestamp >= since)
            .cloned()
            .collect();
        result.reverse();
        result
    }
}

impl Storage {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StorageInner {
                buffers: HashMap::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Append a sample, creating the metric's series on first write.
    pub fn ingest(&self, sample: MetricSample) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let capacity = inner.capacity;
        match inner.buffers.get_mut(&sample.metric) {
            Some(buffer) => buffer.push(sample),
            None => {
                let mut buffer = RingBuffer::new(capacity);
                let metric = sample.metric.clone();
                buffer.push(sample);
                inner.buffers.insert(metric, buffer);
            }
        }
    }

    /// The most recent `window` samples in chronological order.
    /// Unknown metrics yield an empty vector.
    pub fn snapshot(&self, metric: &str, window: usize) -> Vec<MetricSample> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .buffers
            .get(metric)
            .map(|buf| buf.recent(window))
            .unwrap_or_default()
    }

    /// Samples at or after `since`, in chronological order.
    pub fn since(&self, metric: &str, since: f64) -> Vec<MetricSample> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .buffers
            .get(metric)
            .map(|buf| buf.since(since))
            .unwrap_or_default()
    }

    pub fn latest(&self, metric: &str) -> Option<MetricSample> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.buffers.get(metric)?.latest().cloned()
    }

    pub fn contains(&self, metric: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.buffers.contains_key(metric)
    }

    pub fn len(&self, metric: &str) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.buffers.get(metric).map_or(0, RingBuffer::len)
    }

    pub fn metric_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner.buffers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Latest sample of every metric.
    pub fn current(&self) -> HashMap<String, MetricSample> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .buffers
            .iter()
            .filter_map(|(name, buf)| Some((name.clone(), buf.latest()?.clone())))
            .collect()
    }

    /// Latest value of every metric.
    pub fn current_values(&self) -> HashMap<String, f64> {
        self.current()
            .into_iter()
            .map(|(name, sample)| (name, sample.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fill(storage: &Storage, metric: &str, count: usize) {
        for i in 0..count {
            storage.ingest(MetricSample::new(metric, i as f64, i as f64));
        }
    }

    #[test]
    fn first_write_creates_series() {
        let storage = Storage::new(10);
        assert!(!storage.contains("frame_rate"));
        storage.ingest(MetricSample::new("frame_rate", 60.0, 1.0));
        assert!(storage.contains("frame_rate"));
        assert_eq!(storage.len("frame_rate"), 1);
    }

    #[test]
    fn snapshot_is_chronological_across_wraparound() {
        let storage = Storage::new(4);
        fill(&storage, "m", 7);
        let values: Vec<f64> = storage.snapshot("m", 10).iter().map(|s| s.value).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0, 6.0]);

        let last_two: Vec<f64> = storage.snapshot("m", 2).iter().map(|s| s.value).collect();
        assert_eq!(last_two, vec![5.0, 6.0]);
        assert_eq!(storage.latest("m").unwrap().value, 6.0);
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let storage = Storage::new(5);
        fill(&storage, "m", 3);
        let _ = storage.snapshot("m", 2);
        let _ = storage.snapshot("m", 0);
        assert_eq!(storage.len("m"), 3);
        assert!(storage.snapshot("m", 0).is_empty());
        assert!(storage.snapshot("missing", 5).is_empty());
    }

    #[test]
    fn since_selects_trailing_window() {
        let storage = Storage::new(100);
        fill(&storage, "m", 20);
        let window = storage.since("m", 15.0);
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].timestamp, 15.0);
    }

    #[test]
    fn current_values_reports_latest_per_metric() {
        let storage = Storage::new(3);
        storage.ingest(MetricSample::new("a", 1.0, 1.0));
        storage.ingest(MetricSample::new("a", 2.0, 2.0));
        storage.ingest(MetricSample::new("b", 9.0, 2.0));
        let values = storage.current_values();
        assert_eq!(values["a"], 2.0);
        assert_eq!(values["b"], 9.0);
        assert_eq!(storage.metric_names(), vec!["a".to_string(), "b".to_string()]);
    }

    proptest! {
        #[test]
        fn ring_buffer_keeps_last_n(capacity in 1usize..64, extra in 1usize..200) {
            let storage = Storage::new(capacity);
            let k = capacity + extra;
            fill(&storage, "m", k);
            let all = storage.snapshot("m", usize::MAX);
            prop_assert_eq!(all.len(), capacity);
            // oldest retained is the (k - N + 1)-th ingested sample, i.e. index k - N
            prop_assert_eq!(all[0].timestamp, (k - capacity) as f64);
            prop_assert_eq!(all[capacity - 1].timestamp, (k - 1) as f64);
        }
    }
}
