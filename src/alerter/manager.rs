use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use crate::analyzer::ThresholdTable;
use crate::config::AlertingConfig;
use crate::types::{Alert, Level, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    Raised,
    Escalated,
    Resolved,
}

impl std::fmt::Display for AlertEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertEventKind::Raised => write!(f, "RAISED"),
            AlertEventKind::Escalated => write!(f, "ESCALATED"),
            AlertEventKind::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// An observable alert transition, handed to the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub alert: Alert,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub raised: u64,
    pub escalated: u64,
    /// Alerts closed because the metric recovered.
    pub resolved: u64,
    /// Alerts closed because a worse alert replaced them.
    pub superseded: u64,
    pub acknowledged: u64,
    /// Breaches that did not raise an alert because of the cooldown.
    pub suppressed: u64,
    pub raised_by_level: BTreeMap<Level, u64>,
    total_resolution_secs: f64,
}

impl AlertStats {
    /// Mean seconds from creation to recovery, if anything recovered.
    pub fn mean_resolution_secs(&self) -> Option<f64> {
        (self.resolved > 0).then(|| self.total_resolution_secs / self.resolved as f64)
    }
}

#[derive(Default)]
struct AlertState {
    active: HashMap<Uuid, Alert>,
    by_metric: HashMap<String, Uuid>,
    history: VecDeque<Alert>,
    last_fired: HashMap<String, f64>,
    stats: AlertStats,
}

/// Threshold alerting with per-metric cooldown, escalation and resolution.
///
/// Per metric: Normal -> Active -> (Escalated) -> Resolved -> Normal. At most
/// one alert per metric is active. A worse level replaces the active alert once
/// the cooldown allows a new one.
pub struct AlertManager {
    thresholds: ThresholdTable,
    cooldown_secs: f64,
    escalation_secs: f64,
    history_capacity: usize,
    hostname: String,
    state: Mutex<AlertState>,
}

impl AlertManager {
    pub fn new(thresholds: ThresholdTable, config: &AlertingConfig, hostname: impl Into<String>) -> Self {
        Self {
            thresholds,
            cooldown_secs: config.cooldown_secs,
            escalation_secs: config.escalation_secs,
            history_capacity: config.history_capacity.max(1),
            hostname: hostname.into(),
            state: Mutex::new(AlertState::default()),
        }
    }

    /// Run one evaluation cycle against the current metric values.
    pub fn evaluate(&self, values: &HashMap<String, f64>, now: f64) -> Vec<AlertEvent> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events = Vec::new();

        // Resolution and escalation run every cycle regardless of cooldown.
        let mut ids: Vec<Uuid> = state.active.keys().copied().collect();
        ids.sort_by(|a, b| state.active[a].created_at.total_cmp(&state.active[b].created_at));
        for id in ids {
            let Some(alert) = state.active.get_mut(&id) else { continue };
            let Some(value) = values.get(&alert.metric).copied() else { continue };
            let Some(reading) = self.thresholds.level(&alert.metric, value) else { continue };
            alert.current_value = value;

            if !reading.level.is_alerting() {
                if let Some(closed) = self.close(&mut state, id, now, Resolution::Recovered) {
                    tracing::info!(
                        metric = %closed.metric,
                        value,
                        duration_secs = now - closed.created_at,
                        "Alert resolved"
                    );
                    events.push(AlertEvent { kind: AlertEventKind::Resolved, alert: closed });
                }
                continue;
            }

            let due = alert.escalate_at.is_some_and(|at| now >= at);
            if due && !alert.escalated && reading.level == Level::Critical {
                alert.escalated = true;
                alert.message = format!(
                    "{} has been Critical for over {:.0}s (now {:.1})",
                    alert.metric, self.escalation_secs, value
                );
                tracing::error!(metric = %alert.metric, value, "Alert escalated");
                let escalated = alert.clone();
                state.stats.escalated += 1;
                events.push(AlertEvent { kind: AlertEventKind::Escalated, alert: escalated });
            }
        }

        // New alerts, at most one per metric per cooldown window.
        let mut metrics: Vec<(&String, f64)> = values.iter().map(|(m, v)| (m, *v)).collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (metric, value) in metrics {
            let Some(reading) = self.thresholds.level(metric, value) else { continue };
            if !reading.level.is_alerting() {
                continue;
            }

            let existing = state.by_metric.get(metric).copied();
            if let Some(id) = existing {
                if state.active.get(&id).is_some_and(|a| a.level <= reading.level) {
                    continue;
                }
            }

            if let Some(last) = state.last_fired.get(metric) {
                if now - last < self.cooldown_secs {
                    state.stats.suppressed += 1;
                    tracing::debug!(metric = %metric, level = %reading.level, "Alert suppressed by cooldown");
                    continue;
                }
            }

            if let Some(id) = existing {
                if let Some(closed) = self.close(&mut state, id, now, Resolution::Superseded) {
                    events.push(AlertEvent { kind: AlertEventKind::Resolved, alert: closed });
                }
            }

            let alert = Alert {
                id: Uuid::new_v4(),
                metric: metric.clone(),
                level: reading.level,
                value,
                current_value: value,
                threshold: reading.threshold,
                message: format!(
                    "{} is {:.1} ({}, threshold {:.1})",
                    metric, value, reading.level, reading.threshold
                ),
                created_at: now,
                acknowledged: false,
                escalated: false,
                escalate_at: (reading.level == Level::Critical).then_some(now + self.escalation_secs),
                resolved_at: None,
                resolution: None,
                hostname: self.hostname.clone(),
            };

            tracing::warn!(
                metric = %alert.metric,
                level = %alert.level,
                value,
                threshold = alert.threshold,
                "Alert raised"
            );

            state.last_fired.insert(metric.clone(), now);
            state.stats.raised += 1;
            *state.stats.raised_by_level.entry(alert.level).or_insert(0) += 1;
            state.by_metric.insert(metric.clone(), alert.id);
            state.active.insert(alert.id, alert.clone());
            events.push(AlertEvent { kind: AlertEventKind::Raised, alert });
        }

        events
    }

    fn close(&self, state: &mut AlertState, id: Uuid, now: f64, resolution: Resolution) -> Option<Alert> {
        let mut alert = state.active.remove(&id)?;
        if state.by_metric.get(&alert.metric) == Some(&id) {
            state.by_metric.remove(&alert.metric);
        }
        alert.resolved_at = Some(now);
        alert.resolution = Some(resolution);

        match resolution {
            Resolution::Recovered => {
                state.stats.resolved += 1;
                state.stats.total_resolution_secs += now - alert.created_at;
            }
            Resolution::Superseded => state.stats.superseded += 1,
        }

        if state.history.len() >= self.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(alert.clone());
        Some(alert)
    }

    /// Mark an active alert as acknowledged. False if no such active alert.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(alert) = state.active.get_mut(&id) else { return false };
        if !alert.acknowledged {
            alert.acknowledged = true;
            state.stats.acknowledged += 1;
        }
        true
    }

    /// Active alerts, oldest first.
    pub fn active(&self) -> Vec<Alert> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut alerts: Vec<Alert> = state.active.values().cloned().collect();
        alerts.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        alerts
    }

    /// Resolved alerts, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.history.iter().cloned().collect()
    }

    pub fn stats(&self) -> AlertStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.stats.clone()
    }

    /// Drop history resolved before `cutoff` and expired cooldown entries.
    /// Returns how many history entries were removed.
    pub fn prune(&self, cutoff: f64, now: f64) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.history.len();
        state.history.retain(|a| a.resolved_at.map_or(true, |t| t >= cutoff));
        let cooldown = self.cooldown_secs;
        state.last_fired.retain(|_, last| now - *last < cooldown);
        before - state.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::metrics;
    use proptest::prelude::*;

    fn manager() -> AlertManager {
        let config = Config::default();
        AlertManager::new(ThresholdTable::new(config.thresholds), &config.alerting, "test-host")
    }

    fn fps(value: f64) -> HashMap<String, f64> {
        HashMap::from([(metrics::FRAME_RATE.to_string(), value)])
    }

    fn kinds(events: &[AlertEvent]) -> Vec<AlertEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn healthy_values_raise_nothing() {
        let m = manager();
        assert!(m.evaluate(&fps(60.0), 0.0).is_empty());
        assert!(m.active().is_empty());
    }

    #[test]
    fn critical_breach_raises_alert() {
        let m = manager();
        let events = m.evaluate(&fps(8.0), 100.0);
        assert_eq!(kinds(&events), vec![AlertEventKind::Raised]);
        let alert = &events[0].alert;
        assert_eq!(alert.level, Level::Critical);
        assert_eq!(alert.threshold, 10.0);
        assert_eq!(alert.escalate_at, Some(400.0));
        assert_eq!(alert.hostname, "test-host");
        assert_eq!(m.active().len(), 1);
        assert_eq!(m.stats().raised_by_level[&Level::Critical], 1);
    }

    #[test]
    fn fair_alert_has_no_escalation_deadline() {
        let m = manager();
        let events = m.evaluate(&fps(35.0), 0.0);
        assert_eq!(events[0].alert.level, Level::Fair);
        assert_eq!(events[0].alert.escalate_at, None);
    }

    #[test]
    fn recovery_resolves_within_one_cycle() {
        let m = manager();
        m.evaluate(&fps(20.0), 0.0);
        let events = m.evaluate(&fps(50.0), 5.0);
        assert_eq!(kinds(&events), vec![AlertEventKind::Resolved]);
        assert!(m.active().is_empty());

        let history = m.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].resolved_at, Some(5.0));
        assert_eq!(history[0].resolution, Some(Resolution::Recovered));
        assert_eq!(history[0].current_value, 50.0);
        assert_eq!(m.stats().mean_resolution_secs(), Some(5.0));
    }

    #[test]
    fn still_fair_does_not_resolve() {
        let m = manager();
        m.evaluate(&fps(35.0), 0.0);
        assert!(m.evaluate(&fps(31.0), 5.0).is_empty());
        assert_eq!(m.active()[0].current_value, 31.0);
    }

    #[test]
    fn critical_escalates_once_after_deadline() {
        let m = manager();
        m.evaluate(&fps(8.0), 0.0);
        assert!(m.evaluate(&fps(7.0), 299.0).is_empty());

        let events = m.evaluate(&fps(7.0), 300.0);
        assert_eq!(kinds(&events), vec![AlertEventKind::Escalated]);
        assert!(m.active()[0].escalated);

        assert!(m.evaluate(&fps(7.0), 305.0).is_empty());
        assert_eq!(m.stats().escalated, 1);
    }

    #[test]
    fn no_escalation_once_level_improves() {
        let m = manager();
        m.evaluate(&fps(8.0), 0.0);
        assert!(m.evaluate(&fps(20.0), 400.0).is_empty());
        assert!(!m.active()[0].escalated);
    }

    #[test]
    fn worse_level_supersedes_after_cooldown() {
        let m = manager();
        m.evaluate(&fps(35.0), 0.0);

        // worse, but inside cooldown
        assert!(m.evaluate(&fps(8.0), 30.0).is_empty());
        assert_eq!(m.stats().suppressed, 1);

        let events = m.evaluate(&fps(8.0), 60.0);
        assert_eq!(kinds(&events), vec![AlertEventKind::Resolved, AlertEventKind::Raised]);
        assert_eq!(events[0].alert.resolution, Some(Resolution::Superseded));
        let active = m.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, Level::Critical);

        // replacement is not a recovery
        let stats = m.stats();
        assert_eq!((stats.resolved, stats.superseded), (0, 1));
        assert_eq!(stats.mean_resolution_secs(), None);

        m.evaluate(&fps(60.0), 100.0);
        let stats = m.stats();
        assert_eq!((stats.resolved, stats.superseded), (1, 1));
        assert_eq!(stats.mean_resolution_secs(), Some(40.0));
    }

    #[test]
    fn cooldown_blocks_refire_after_quick_recovery() {
        let m = manager();
        m.evaluate(&fps(8.0), 0.0);
        m.evaluate(&fps(60.0), 5.0);
        assert!(m.evaluate(&fps(8.0), 10.0).is_empty());
        assert!(m.active().is_empty());
        assert_eq!(kinds(&m.evaluate(&fps(8.0), 60.0)), vec![AlertEventKind::Raised]);
    }

    #[test]
    fn metrics_are_not_deduplicated_across_each_other() {
        let m = manager();
        let values = HashMap::from([
            (metrics::FRAME_RATE.to_string(), 8.0),
            (metrics::CPU_USAGE.to_string(), 99.0),
            ("player_count".to_string(), 500.0),
        ]);
        let events = m.evaluate(&values, 0.0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn acknowledge_only_active_alerts() {
        let m = manager();
        let events = m.evaluate(&fps(8.0), 0.0);
        let id = events[0].alert.id;
        assert!(m.acknowledge(id));
        assert!(m.acknowledge(id));
        assert!(m.active()[0].acknowledged);
        assert_eq!(m.stats().acknowledged, 1);
        assert!(!m.acknowledge(Uuid::new_v4()));
    }

    #[test]
    fn history_is_bounded_and_prunable() {
        let mut config = Config::default();
        config.alerting.history_capacity = 2;
        config.alerting.cooldown_secs = 1.0;
        let m = AlertManager::new(ThresholdTable::new(config.thresholds), &config.alerting, "h");
        for i in 0..4 {
            let t = i as f64 * 10.0;
            m.evaluate(&fps(8.0), t);
            m.evaluate(&fps(60.0), t + 1.0);
        }
        let history = m.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].resolved_at, Some(21.0));

        assert_eq!(m.prune(25.0, 40.0), 1);
        assert_eq!(m.history().len(), 1);
    }

    proptest! {
        #[test]
        fn no_refire_inside_cooldown(t1 in 0.0f64..10_000.0, gap in 0.0f64..59.999) {
            let m = manager();
            let first = m.evaluate(&fps(8.0), t1);
            prop_assert_eq!(first.len(), 1);
            // recover then breach again before the cooldown expires
            m.evaluate(&fps(60.0), t1 + gap / 2.0);
            let second = m.evaluate(&fps(8.0), t1 + gap);
            prop_assert!(second.iter().all(|e| e.kind != AlertEventKind::Raised));
        }
    }
}
