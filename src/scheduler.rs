use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::alerter::{AlertEvent, Dispatcher};
use crate::analyzer::AnomalySeverity;
use crate::collector::MetricSource;
use crate::engine::Engine;
use crate::types::{now_secs, MetricSample};

const METRIC_QUEUE: usize = 10_000;
const ALERT_QUEUE: usize = 1_000;

/// Drives an [`Engine`]: one task per metric source, one ingestion task, the
/// three periodic passes and an alert delivery task.
pub struct Scheduler;

/// Running tasks of a [`Scheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    producers: Vec<(String, JoinHandle<()>)>,
    ingest: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn(
        engine: Engine,
        sources: Vec<Box<dyn MetricSource>>,
        mut dispatcher: Dispatcher,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (metric_tx, mut metric_rx) = mpsc::channel::<MetricSample>(METRIC_QUEUE);
        let (alert_tx, mut alert_rx) = mpsc::channel::<AlertEvent>(ALERT_QUEUE);
        let intervals = engine.config().intervals.clone();
        let mut producers = Vec::new();

        for source in sources {
            let name = source.name().to_string();
            let handle = spawn_source(source, metric_tx.clone(), shutdown_rx.clone());
            producers.push((name, handle));
        }
        drop(metric_tx);

        let ingest_engine = engine.clone();
        let ingest = tokio::spawn(async move {
            while let Some(sample) = metric_rx.recv().await {
                ingest_engine.ingest_sample(sample);
            }
            debug!("Ingestion drained");
        });

        let alert_engine = engine.clone();
        producers.push((
            "alerts".into(),
            spawn_periodic("alerts", intervals.alert_secs, shutdown_rx.clone(), move || {
                for event in alert_engine.evaluate_alerts(now_secs()) {
                    if let Err(e) = alert_tx.try_send(event) {
                        warn!(error = %e, "Alert delivery queue full, dropping event");
                    }
                }
            }),
        ));

        let analytics_engine = engine.clone();
        producers.push((
            "analytics".into(),
            spawn_periodic("analytics", intervals.analytics_secs, shutdown_rx.clone(), move || {
                let now = now_secs();
                let pass = analytics_engine.refresh_analytics(now);
                for anomaly in pass.anomalies.iter().filter(|a| a.severity == AnomalySeverity::High) {
                    warn!(
                        metric = %anomaly.metric,
                        value = anomaly.value,
                        sigma = anomaly.deviation_sigma,
                        "Significant anomaly"
                    );
                }
                if let Some(b) = analytics_engine.analyze(now).bottleneck {
                    info!(metric = %b.metric, level = %b.level, value = b.value, "Current bottleneck");
                }
            }),
        ));

        let cleanup_engine = engine;
        producers.push((
            "cleanup".into(),
            spawn_periodic("cleanup", intervals.cleanup_secs, shutdown_rx, move || {
                cleanup_engine.cleanup(now_secs());
            }),
        ));

        let delivery = tokio::spawn(async move {
            while let Some(event) = alert_rx.recv().await {
                if let Err(e) = dispatcher.dispatch(event).await {
                    error!(error = %e, "Alert dispatch failed");
                }
            }
            debug!("Alert delivery drained");
        });

        SchedulerHandle { shutdown: shutdown_tx, producers, ingest, delivery }
    }
}

impl SchedulerHandle {
    /// Stop every task. Samples and alert events already queued are still
    /// ingested and delivered before this returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for (name, handle) in self.producers {
            if let Err(e) = handle.await {
                error!(task = %name, error = %e, "Task ended abnormally");
            }
        }
        if let Err(e) = self.ingest.await {
            error!(task = "ingest", error = %e, "Task ended abnormally");
        }
        if let Err(e) = self.delivery.await {
            error!(task = "delivery", error = %e, "Task ended abnormally");
        }
        info!("Scheduler stopped");
    }
}

type SharedSource = Arc<Mutex<Box<dyn MetricSource>>>;

/// Collect from `source` on its own cadence. Each tick runs in a child task so
/// a panicking source loses that tick only. A final tick on shutdown flushes
/// anything the source still buffers.
fn spawn_source(
    source: Box<dyn MetricSource>,
    tx: mpsc::Sender<MetricSample>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let name = source.name().to_string();
    let interval = Duration::from_secs(source.interval_secs().max(1));
    let source: SharedSource = Arc::new(Mutex::new(source));

    tokio::spawn(async move {
        loop {
            if !collect_once(&name, &source, &tx).await {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    collect_once(&name, &source, &tx).await;
                    break;
                }
            }
        }
        debug!(source = %name, "Source stopped");
    })
}

/// One collection tick. Returns false once the ingestion side has gone away.
async fn collect_once(name: &str, source: &SharedSource, tx: &mpsc::Sender<MetricSample>) -> bool {
    let source = source.clone();
    let tick = tokio::spawn(async move {
        let mut source = source.lock().await;
        let result = source.collect().await;
        result
    });

    match tick.await {
        Ok(Ok(samples)) => {
            for sample in samples {
                if tx.send(sample).await.is_err() {
                    return false;
                }
            }
        }
        Ok(Err(e)) => {
            warn!(source = name, error = %e, "Collection failed");
        }
        Err(e) if e.is_panic() => {
            error!(source = name, "Collection panicked");
        }
        Err(e) => {
            error!(source = name, error = %e, "Collection task failed");
        }
    }
    true
}

/// Run `pass` every `secs` seconds until shutdown. A panicking pass is logged
/// and the next tick runs normally.
fn spawn_periodic<F>(
    name: &'static str,
    secs: u64,
    mut shutdown: watch::Receiver<bool>,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if panic::catch_unwind(AssertUnwindSafe(&mut pass)).is_err() {
                error!(task = name, "Periodic pass panicked");
            }
        }
        debug!(task = name, "Periodic task stopped");
    })
}
