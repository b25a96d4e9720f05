//! Operations of the admin layer: listing, cancellation and test injection.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use super::{AlertProcessor, sort_by_importance};
use crate::{
    cap::{Alert, ParseError},
    http::HttpFetcher,
    media::SpeechSynthesizer,
    playback::PlaybackController,
    utils::is_safe_path,
};

/// Errors of a test alert injection.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("refusing to read {0}: path climbs out of its directory")]
    UnsafePath(PathBuf),
    #[error("no alert file at {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid alert file: {0}")]
    Parse(#[from] ParseError),
    #[error("no target geocode configured")]
    NoTargetGeocode,
}

/// Alert as listed by the admin layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub identifier: String,
    pub sender: String,
    pub sent: String,
    pub headline: String,
    pub description: String,
    pub played: u32,
}

impl AlertSummary {
    fn new(alert: &Alert, language: &str) -> Self {
        let info = alert.get_first_info(language, true);
        let headline = info
            .and_then(|info| info.headline.as_deref())
            .map(capitalize)
            .unwrap_or_default();
        let description = info
            .and_then(|info| info.description.clone())
            .unwrap_or_default();

        AlertSummary {
            identifier: alert.identifier.clone(),
            sender: alert.sender.clone(),
            sent: alert.sent.clone(),
            headline,
            description,
            played: alert.times_played(),
        }
    }
}

/// Snapshot of the processor state.
#[derive(Debug, Clone, Serialize)]
pub struct AlertListing {
    pub active: Vec<AlertSummary>,
    pub expired: Vec<AlertSummary>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub next_play: DateTime<Utc>,
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

impl<H, S, P> AlertProcessor<H, S, P>
where
    H: HttpFetcher,
    S: SpeechSynthesizer,
    P: PlaybackController,
{
    /// Lists the active and expired alerts, most important first.
    pub fn list_alerts(&self) -> AlertListing {
        let state = self.state();
        let language = self.settings.language.primary.as_str();
        let summaries = |alerts: Vec<Arc<Alert>>| -> Vec<AlertSummary> {
            alerts
                .iter()
                .map(|alert| AlertSummary::new(alert, language))
                .collect()
        };

        let now = Instant::now();
        let until_next = state.next_alert_check.saturating_duration_since(now);
        let next_play = Utc::now()
            + chrono::Duration::from_std(until_next).unwrap_or_else(|_| chrono::Duration::zero());

        AlertListing {
            active: summaries(sort_by_importance(state.active.values().cloned())),
            expired: summaries(sort_by_importance(state.expired.values().cloned())),
            last_heartbeat: state.last_heartbeat,
            next_play,
        }
    }

    /// Looks an alert up in the active then the expired alerts.
    pub fn get_alert(&self, identifier: &str) -> Option<Arc<Alert>> {
        let state = self.state();
        state
            .active
            .get(identifier)
            .or_else(|| state.expired.get(identifier))
            .cloned()
    }

    /// Expires the given active alerts. Returns how many were cancelled.
    pub fn cancel_alerts<T: AsRef<str>>(&self, identifiers: &[T]) -> usize {
        let mut state = self.state();
        let mut cancelled = 0;
        for identifier in identifiers.iter().map(|identifier| identifier.as_ref()) {
            if state.mark_expired(identifier).is_some() {
                info!("alert {} cancelled", identifier);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Queues the alert stored at `path` as a test alert.
    ///
    /// The alert is made to match the first target geocode and plays once.
    /// Returns its identifier.
    pub async fn inject_alert(&self, path: &Path) -> Result<String, InjectError> {
        if !is_safe_path(path) {
            return Err(InjectError::UnsafePath(path.to_owned()));
        }
        if !path.is_file() {
            return Err(InjectError::NotFound(path.to_owned()));
        }

        let location = &self.settings.location;
        let geocode = location
            .geocodes
            .first()
            .ok_or(InjectError::NoTargetGeocode)?;

        let data = tokio::fs::read(path).await.map_err(|source| InjectError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut alert = Alert::parse(&data)?;
        alert.add_geocode(geocode, location.kind);
        alert.max_plays = 1;

        info!("injecting test alert {} from {}", alert.identifier, path.display());
        let identifier = alert.identifier.clone();
        self.dispatch(alert);
        Ok(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cap::AlertXml,
        http::MockHttpFetcher,
        processor::{Lifecycle, tests::*},
    };

    #[tokio::test]
    async fn test_list_alerts() {
        let fixture = fixture();
        fixture.processor.handle_dispatch(AlertXml::new("X001").parse()).await;
        fixture.processor.handle_dispatch(AlertXml::new("X002").parse()).await;
        fixture.processor.cancel_alerts(&["X002"]);

        let listing = fixture.processor.list_alerts();

        assert_eq!(
            listing.active,
            vec![AlertSummary {
                identifier: "X001".to_owned(),
                sender: "sender@example.com".to_owned(),
                sent: "2024-03-01T10:00:00-05:00".to_owned(),
                headline: "Tornado warning in effect".to_owned(),
                description: "A tornado was sighted.".to_owned(),
                played: 0,
            }]
        );
        assert_eq!(listing.expired.len(), 1);
        assert_eq!(listing.expired[0].identifier, "X002");
        assert!(listing.last_heartbeat.is_none());

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["active"][0]["identifier"], "X001");
    }

    #[tokio::test]
    async fn test_get_and_cancel_alerts() {
        let fixture = fixture();
        fixture.processor.handle_dispatch(AlertXml::new("X001").parse()).await;

        assert_eq!(fixture.processor.cancel_alerts(&["X001", "UNKNOWN"]), 1);
        assert_eq!(fixture.processor.lifecycle("X001"), Lifecycle::Expired);
        assert_eq!(fixture.processor.get_alert("X001").unwrap().identifier, "X001");
        assert!(fixture.processor.get_alert("UNKNOWN").is_none());
        assert_eq!(fixture.processor.cancel_alerts(&["X001"]), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_alert_plays_once() {
        let fixture = fixture_with(MockHttpFetcher::new(), |settings| {
            settings.playback.repeat_times = 5;
        });
        let path = fixture.dir.path().join("test-alert.xml");
        let mut alert = AlertXml::new("T001");
        alert.geocode = "4806016";
        std::fs::write(&path, alert.xml()).unwrap();

        let identifier = fixture.processor.inject_alert(&path).await.unwrap();
        assert_eq!(identifier, "T001");
        assert!(fixture.processor.process_intake().await);
        assert_eq!(fixture.processor.lifecycle("T001"), Lifecycle::Active);

        fixture.processor.run_play_cycle().await;

        assert_eq!(fixture.processor.lifecycle("T001"), Lifecycle::Expired);
        assert_eq!(fixture.processor.get_alert("T001").unwrap().times_played(), 1);
    }

    #[tokio::test]
    async fn test_inject_rejects_bad_paths() {
        let fixture = fixture();

        assert!(matches!(
            fixture
                .processor
                .inject_alert(Path::new("/var/lib/alertcast/../../etc/passwd"))
                .await,
            Err(InjectError::UnsafePath(_))
        ));
        assert!(matches!(
            fixture
                .processor
                .inject_alert(&fixture.dir.path().join("missing.xml"))
                .await,
            Err(InjectError::NotFound(_))
        ));
        assert!(fixture.intake.is_empty());
    }

    #[tokio::test]
    async fn test_inject_requires_target_geocode() {
        let fixture = fixture_with(MockHttpFetcher::new(), |settings| {
            settings.location.geocodes.clear();
        });
        let path = fixture.dir.path().join("test-alert.xml");
        std::fs::write(&path, AlertXml::new("T001").xml()).unwrap();

        assert!(matches!(
            fixture.processor.inject_alert(&path).await,
            Err(InjectError::NoTargetGeocode)
        ));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("SEVERE thunderstorm WATCH"), "Severe thunderstorm watch");
        assert_eq!(capitalize(""), "");
    }
}
