use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::WebhookConfig;
use crate::types::{to_datetime, Level};
use super::{parse_level_filter, AlertChannel, AlertEvent};

/// Custom webhook alert channel
pub struct WebhookChannel {
    url: String,
    headers: std::collections::HashMap<String, String>,
    level_filter: Vec<Level>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            level_filter: parse_level_filter(&config.level_filter),
            client: reqwest::Client::new(),
        })
    }

    fn payload(event: &AlertEvent) -> Value {
        let alert = &event.alert;
        json!({
            "event": event.kind,
            "id": alert.id,
            "hostname": &alert.hostname,
            "metric": &alert.metric,
            "level": alert.level,
            "value": alert.value,
            "current_value": alert.current_value,
            "threshold": alert.threshold,
            "escalated": alert.escalated,
            "acknowledged": alert.acknowledged,
            "message": &alert.message,
            "created_at": to_datetime(alert.created_at).to_rfc3339(),
            "resolved_at": alert.resolved_at.map(|t| to_datetime(t).to_rfc3339()),
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str { "webhook" }

    fn accepts_level(&self, level: &Level) -> bool {
        self.level_filter.is_empty() || self.level_filter.contains(level)
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let mut req = self.client.post(&self.url).json(&Self::payload(event));
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }

        req.send().await?.error_for_status()?;
        Ok(())
    }
}
