use anyhow::Result;
use async_trait::async_trait;

use crate::types::Level;
use super::{AlertChannel, AlertEvent, AlertEventKind};

/// Writes every alert transition to the tracing log.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str { "log" }

    fn accepts_level(&self, _level: &Level) -> bool {
        true
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let alert = &event.alert;
        match event.kind {
            AlertEventKind::Escalated => tracing::error!(
                target: "perfwatch::alerts",
                id = %alert.id,
                metric = %alert.metric,
                level = %alert.level,
                value = alert.current_value,
                "[{}] {}", event.kind, alert.message
            ),
            AlertEventKind::Raised => tracing::warn!(
                target: "perfwatch::alerts",
                id = %alert.id,
                metric = %alert.metric,
                level = %alert.level,
                value = alert.value,
                "[{}] {}", event.kind, alert.message
            ),
            AlertEventKind::Resolved => tracing::info!(
                target: "perfwatch::alerts",
                id = %alert.id,
                metric = %alert.metric,
                value = alert.current_value,
                "[{}] {}", event.kind, alert.message
            ),
        }
        Ok(())
    }
}
