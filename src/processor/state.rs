//! Seen, active and expired alert sets guarded by the processor lock.

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::cap::Alert;

/// Where an alert stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not active and never was
    Unseen,
    Active,
    /// Terminal
    Expired,
}

/// State shared between the processor loop and the admin operations.
#[derive(Debug)]
pub(crate) struct AlertState {
    pub seen: HashSet<String>,
    pub active: HashMap<String, Arc<Alert>>,
    pub expired: HashMap<String, Arc<Alert>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub next_alert_check: Instant,
    pub next_expired_check: Instant,
    pub next_purge_check: Option<Instant>,
}

impl AlertState {
    pub fn new(now: Instant, purge: bool) -> Self {
        AlertState {
            seen: HashSet::new(),
            active: HashMap::new(),
            expired: HashMap::new(),
            last_heartbeat: None,
            next_alert_check: now,
            next_expired_check: now + super::EXPIRY_SWEEP_INTERVAL,
            next_purge_check: purge.then_some(now),
        }
    }

    /// Marks `identifier` as seen; returns `true` the first time.
    pub fn mark_seen(&mut self, identifier: &str) -> bool {
        self.seen.insert(identifier.to_owned())
    }

    /// Activates `alert` unless it is already active or has expired.
    pub fn mark_active(&mut self, alert: Arc<Alert>) -> bool {
        if self.active.contains_key(&alert.identifier) || self.expired.contains_key(&alert.identifier) {
            return false;
        }
        self.active.insert(alert.identifier.clone(), alert);
        true
    }

    /// Moves an active alert to the expired set, returning it.
    pub fn mark_expired(&mut self, identifier: &str) -> Option<Arc<Alert>> {
        let alert = self.active.remove(identifier)?;
        self.expired.insert(identifier.to_owned(), alert.clone());
        Some(alert)
    }

    pub fn lifecycle(&self, identifier: &str) -> Lifecycle {
        if self.active.contains_key(identifier) {
            Lifecycle::Active
        } else if self.expired.contains_key(identifier) {
            Lifecycle::Expired
        } else {
            Lifecycle::Unseen
        }
    }
}

/// Orders alerts for airing: immediate alerts first, most recent first.
pub fn sort_by_importance(alerts: impl IntoIterator<Item = Arc<Alert>>) -> Vec<Arc<Alert>> {
    let mut alerts: Vec<Arc<Alert>> = alerts.into_iter().collect();
    alerts.sort_by_key(|alert| Reverse(alert.importance()));
    alerts
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cap::AlertXml;

    fn state() -> AlertState {
        AlertState::new(Instant::now(), false)
    }

    #[test]
    fn test_alert_is_in_exactly_one_set() {
        let mut state = state();
        let alert = Arc::new(AlertXml::new("X001").parse());
        assert_eq!(state.lifecycle("X001"), Lifecycle::Unseen);

        assert!(state.mark_active(alert.clone()));
        assert_eq!(state.lifecycle("X001"), Lifecycle::Active);
        assert!(!state.mark_active(alert.clone()));
        assert_eq!(state.active.len(), 1);

        assert!(state.mark_expired("X001").is_some());
        assert_eq!(state.lifecycle("X001"), Lifecycle::Expired);
        assert!(!state.active.contains_key("X001"));

        assert!(!state.mark_active(alert));
        assert!(state.mark_expired("X001").is_none());
        assert_eq!(state.lifecycle("X001"), Lifecycle::Expired);
    }

    #[test]
    fn test_mark_seen_once() {
        let mut state = state();
        assert!(state.mark_seen("X001"));
        assert!(!state.mark_seen("X001"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_alerts_sort_first() {
        let mut immediate = AlertXml::new("IMMEDIATE");
        immediate.immediate = true;
        let immediate = Arc::new(immediate.parse());

        tokio::time::advance(Duration::from_secs(60)).await;
        let recent = Arc::new(AlertXml::new("RECENT").parse());
        tokio::time::advance(Duration::from_secs(60)).await;
        let most_recent = Arc::new(AlertXml::new("MOST_RECENT").parse());

        let sorted = sort_by_importance(vec![recent, most_recent, immediate]);
        let order: Vec<&str> = sorted.iter().map(|alert| alert.identifier.as_str()).collect();

        assert_eq!(order, vec!["IMMEDIATE", "MOST_RECENT", "RECENT"]);
    }
}
