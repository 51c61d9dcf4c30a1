pub mod logger;
pub mod manager;
pub mod slack;
pub mod webhook;

pub use manager::{AlertEvent, AlertEventKind, AlertManager, AlertStats};

use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::config::AlertingConfig;
use crate::types::Level;

/// Trait for alert delivery channels
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Deliver a single alert transition
    async fn send(&self, event: &AlertEvent) -> Result<()>;

    /// Check if this channel accepts alerts at the given level
    fn accepts_level(&self, level: &Level) -> bool;
}

/// Parse a configured level filter. Unknown names are ignored.
pub(crate) fn parse_level_filter(names: &[String]) -> Vec<Level> {
    names.iter().filter_map(|s| Level::parse(s)).collect()
}

/// Delivers alert events to channels with a per-send timeout and rate limiting.
///
/// Runs in its own task so a slow channel never delays evaluation.
pub struct Dispatcher {
    channels: Vec<Box<dyn AlertChannel>>,
    rate_limiter: RateLimiter,
    timeout: Duration,
}

struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(per_minute: u32) -> Self {
        Self {
            tokens: per_minute as f64,
            max_tokens: per_minute as f64,
            refill_rate: per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Dispatcher {
    pub fn new(config: &AlertingConfig) -> Result<Self> {
        let mut channels: Vec<Box<dyn AlertChannel>> = Vec::new();

        if config.log_channel {
            channels.push(Box::new(logger::LogChannel));
        }

        if let Some(ref wc) = config.webhook {
            if wc.enabled {
                channels.push(Box::new(webhook::WebhookChannel::new(wc)?));
            }
        }

        if let Some(ref sc) = config.slack {
            if sc.enabled {
                channels.push(Box::new(slack::SlackChannel::new(sc)?));
            }
        }

        tracing::info!(channels = channels.len(), "Initialized alert channels");

        Ok(Self::with_channels(
            channels,
            config.rate_limit_per_minute,
            Duration::from_secs(config.delivery_timeout_secs),
        ))
    }

    pub fn with_channels(channels: Vec<Box<dyn AlertChannel>>, rate_limit_per_minute: u32, timeout: Duration) -> Self {
        Self {
            channels,
            rate_limiter: RateLimiter::new(rate_limit_per_minute),
            timeout,
        }
    }

    /// Deliver one event to every channel that accepts its level.
    ///
    /// Channel failures and timeouts are logged, never returned: one broken
    /// channel must not starve the others.
    pub async fn dispatch(&mut self, event: AlertEvent) -> Result<()> {
        // Escalations and resolutions bypass the rate limit
        if event.kind == AlertEventKind::Raised && !self.rate_limiter.try_acquire() {
            tracing::warn!(metric = %event.alert.metric, "Alert rate limited");
            return Ok(());
        }

        for channel in &self.channels {
            if !channel.accepts_level(&event.alert.level) {
                continue;
            }
            match tokio::time::timeout(self.timeout, channel.send(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(channel = channel.name(), error = %e, "Failed to send alert");
                }
                Err(_) => {
                    tracing::error!(
                        channel = channel.name(),
                        timeout_secs = self.timeout.as_secs_f64(),
                        "Alert delivery timed out"
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, Resolution};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct Recorder {
        sent: Arc<Mutex<Vec<AlertEventKind>>>,
        filter: Vec<Level>,
        delay: Option<Duration>,
        fail: bool,
    }

    #[async_trait]
    impl AlertChannel for Recorder {
        fn name(&self) -> &str { "recorder" }

        fn accepts_level(&self, level: &Level) -> bool {
            self.filter.is_empty() || self.filter.contains(level)
        }

        async fn send(&self, event: &AlertEvent) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("boom");
            }
            self.sent.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    fn recorder(filter: Vec<Level>) -> (Box<dyn AlertChannel>, Arc<Mutex<Vec<AlertEventKind>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = Recorder { sent: sent.clone(), filter, delay: None, fail: false };
        (Box::new(channel), sent)
    }

    fn event(kind: AlertEventKind, level: Level) -> AlertEvent {
        AlertEvent {
            kind,
            alert: Alert {
                id: Uuid::new_v4(),
                metric: "frame_rate".into(),
                level,
                value: 8.0,
                current_value: 8.0,
                threshold: 10.0,
                message: "frame_rate is 8.0".into(),
                created_at: 0.0,
                acknowledged: false,
                escalated: kind == AlertEventKind::Escalated,
                escalate_at: None,
                resolved_at: (kind == AlertEventKind::Resolved).then_some(1.0),
                resolution: (kind == AlertEventKind::Resolved).then_some(Resolution::Recovered),
                hostname: "h".into(),
            },
        }
    }

    #[tokio::test]
    async fn respects_level_filter() {
        let (critical_only, sent) = recorder(vec![Level::Critical]);
        let mut dispatcher = Dispatcher::with_channels(vec![critical_only], 100, Duration::from_secs(1));
        dispatcher.dispatch(event(AlertEventKind::Raised, Level::Fair)).await.unwrap();
        dispatcher.dispatch(event(AlertEventKind::Raised, Level::Critical)).await.unwrap();
        assert_eq!(*sent.lock().unwrap(), vec![AlertEventKind::Raised]);
    }

    #[tokio::test]
    async fn rate_limit_spares_escalations() {
        let (channel, sent) = recorder(vec![]);
        let mut dispatcher = Dispatcher::with_channels(vec![channel], 1, Duration::from_secs(1));
        dispatcher.dispatch(event(AlertEventKind::Raised, Level::Critical)).await.unwrap();
        dispatcher.dispatch(event(AlertEventKind::Raised, Level::Critical)).await.unwrap();
        dispatcher.dispatch(event(AlertEventKind::Escalated, Level::Critical)).await.unwrap();
        assert_eq!(
            *sent.lock().unwrap(),
            vec![AlertEventKind::Raised, AlertEventKind::Escalated]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_or_failing_channels_do_not_block_others() {
        let slow = Recorder {
            sent: Arc::new(Mutex::new(Vec::new())),
            filter: vec![],
            delay: Some(Duration::from_secs(60)),
            fail: false,
        };
        let failing = Recorder {
            sent: Arc::new(Mutex::new(Vec::new())),
            filter: vec![],
            delay: None,
            fail: true,
        };
        let (healthy, sent) = recorder(vec![]);
        let mut dispatcher = Dispatcher::with_channels(
            vec![Box::new(slow), Box::new(failing), healthy],
            100,
            Duration::from_secs(2),
        );
        dispatcher.dispatch(event(AlertEventKind::Raised, Level::Poor)).await.unwrap();
        assert_eq!(*sent.lock().unwrap(), vec![AlertEventKind::Raised]);
    }

    #[test]
    fn level_filter_parsing() {
        let parsed = parse_level_filter(&["critical".into(), "Poor".into(), "bogus".into()]);
        assert_eq!(parsed, vec![Level::Critical, Level::Poor]);
    }
}
