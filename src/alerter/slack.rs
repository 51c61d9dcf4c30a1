use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SlackConfig;
use crate::types::Level;
use super::{parse_level_filter, AlertChannel, AlertEvent, AlertEventKind};

/// Slack webhook alert channel
pub struct SlackChannel {
    webhook_url: String,
    channel: Option<String>,
    level_filter: Vec<Level>,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            channel: config.channel.clone(),
            level_filter: parse_level_filter(&config.level_filter),
            client: reqwest::Client::new(),
        })
    }

    fn color(event: &AlertEvent) -> &'static str {
        match (event.kind, event.alert.level) {
            (AlertEventKind::Resolved, _) => "#2ecc71",
            (AlertEventKind::Escalated, _) => "#9b59b6",
            (_, Level::Critical) => "#e74c3c",
            (_, Level::Poor) => "#e67e22",
            _ => "#f39c12",
        }
    }

    fn payload(&self, event: &AlertEvent) -> Value {
        let alert = &event.alert;
        let mut payload = json!({
            "attachments": [{
                "color": Self::color(event),
                "title": format!("[{}] {}", event.kind, alert.message),
                "fields": [
                    { "title": "Host", "value": &alert.hostname, "short": true },
                    { "title": "Metric", "value": &alert.metric, "short": true },
                    { "title": "Level", "value": alert.level.to_string(), "short": true },
                    { "title": "Value", "value": format!("{:.2}", alert.current_value), "short": true },
                ],
                "ts": alert.created_at as i64,
            }]
        });

        if let Some(ref ch) = self.channel {
            payload["channel"] = json!(ch);
        }
        payload
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &str { "slack" }

    fn accepts_level(&self, level: &Level) -> bool {
        self.level_filter.is_empty() || self.level_filter.contains(level)
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        self.client.post(&self.webhook_url)
            .json(&self.payload(event))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Alert;
    use uuid::Uuid;

    #[test]
    fn resolved_events_are_green_and_routed() {
        let channel = SlackChannel::new(&SlackConfig {
            enabled: true,
            webhook_url: "https://hooks.slack.invalid/x".into(),
            channel: Some("#ops".into()),
            level_filter: vec!["critical".into()],
        })
        .unwrap();
        assert!(channel.accepts_level(&Level::Critical));
        assert!(!channel.accepts_level(&Level::Fair));

        let event = AlertEvent {
            kind: AlertEventKind::Resolved,
            alert: Alert {
                id: Uuid::nil(),
                metric: "cpu_usage".into(),
                level: Level::Critical,
                value: 97.0,
                current_value: 40.0,
                threshold: 85.0,
                message: "cpu_usage is 97.0".into(),
                created_at: 10.0,
                acknowledged: true,
                escalated: false,
                escalate_at: Some(310.0),
                resolved_at: Some(20.0),
                resolution: None,
                hostname: "game-01".into(),
            },
        };
        let payload = channel.payload(&event);
        assert_eq!(payload["channel"], "#ops");
        assert_eq!(payload["attachments"][0]["color"], "#2ecc71");
        assert_eq!(payload["attachments"][0]["title"], "[RESOLVED] cpu_usage is 97.0");
    }
}
