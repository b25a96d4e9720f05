//! Alert processor: lifecycle state machine, play-cycle scheduler and the
//! operations exposed to the admin layer.
//!
//! Alerts flow from the [`IntakeQueue`] through [`AlertProcessor::handle_dispatch`],
//! which decides whether they become active. Once per second the processor
//! loop handles one queued alert, sweeps expired alerts, purges old files,
//! runs a play cycle when one is due and checks the feed heartbeat.
//!
//! Two locks guard the processor. The state lock protects the seen, active
//! and expired sets with the scheduling timestamps and is never held across
//! an `.await`. The dispatch lock serializes whole dispatches, reference
//! backfill included, so transitions of one chain never interleave with
//! another.

mod admin;
mod intake;
mod purge;
mod scheduler;
mod state;
mod watchdog;

use std::{
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{Local, Utc};
use futures::FutureExt;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{
    cap::{Alert, AlertReference},
    config::{Config, Language, Location, Playback, Retention},
    http::HttpFetcher,
    media::{MediaGenerator, SpeechSynthesizer},
    playback::PlaybackController,
    triggers::TriggerSet,
    utils::{ALERTS_DIR, get_path},
};

pub use admin::{AlertListing, AlertSummary, InjectError};
pub use intake::IntakeQueue;
pub use purge::purge_old_files;
pub use state::{Lifecycle, sort_by_importance};
pub use watchdog::{Alarm, HEARTBEAT_TIMEOUT, HeartbeatWatchdog, SoxAlarm};

use state::AlertState;

/// Interval between two expiry sweeps.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between two retention purges.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay before airing a newly active alert.
pub const PULL_FORWARD: Duration = Duration::from_secs(20);

/// Longest reference chain followed by the backfill.
pub const MAX_REFERENCE_DEPTH: usize = 8;

/// Default attention signal, relative to the data directory.
pub const ATTENTION_SIGNAL: &str = "media/canadian-attention-signal.mp3";

/// Pre-recorded first nations messages, relative to the data directory.
pub const FIRST_NATIONS_DIR: &str = "first_nations";

const TICK: Duration = Duration::from_secs(1);

/// Errors of a processor loop iteration.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("failed to purge old alert files: {0}")]
    Purge(#[from] std::io::Error),
}

/// Settings of the processor, resolved from the configuration.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub location: Location,
    pub playback: Playback,
    pub language: Language,
    pub archive_hosts: Vec<String>,
    pub retention: Retention,
    /// Directory of the alert artifacts
    pub alerts_dir: PathBuf,
}

impl ProcessorSettings {
    /// Resolves the settings of `config` against the data directory.
    pub fn from_config(config: &Config, data_dir: &Path) -> Self {
        let mut playback = config.playback.clone();
        if playback.attention_signal.is_none() {
            playback.attention_signal = Some(data_dir.join(ATTENTION_SIGNAL));
        }

        ProcessorSettings {
            location: config.location.clone(),
            playback,
            language: config.language.clone(),
            archive_hosts: config.feed.archive_hosts.clone(),
            retention: config.retention.clone(),
            alerts_dir: get_path(data_dir, ALERTS_DIR),
        }
    }
}

/// Decides which alerts air and schedules them on the playback controller.
pub struct AlertProcessor<H, S, P>
where
    H: HttpFetcher,
    S: SpeechSynthesizer,
    P: PlaybackController,
{
    settings: ProcessorSettings,
    fetcher: H,
    media: MediaGenerator<S>,
    controller: Arc<P>,
    triggers: Arc<TriggerSet>,
    watchdog: HeartbeatWatchdog,
    intake: Arc<IntakeQueue>,
    state: Mutex<AlertState>,
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl<H, S, P> AlertProcessor<H, S, P>
where
    H: HttpFetcher,
    S: SpeechSynthesizer,
    P: PlaybackController,
{
    /// Create a new [AlertProcessor].
    ///
    /// # Arguments
    ///
    /// * `settings` - Resolved processor settings
    /// * `fetcher` - HTTP client for archive backfill and remote resources
    /// * `media` - Generator of the alert audio and images
    /// * `controller` - Playback queue receiving the play cycles
    /// * `triggers` - Hooks invoked around each play cycle
    /// * `watchdog` - Heartbeat watchdog of the feed connection
    /// * `intake` - Queue filled by the feed connection
    pub fn new(
        settings: ProcessorSettings,
        fetcher: H,
        media: MediaGenerator<S>,
        controller: Arc<P>,
        triggers: TriggerSet,
        watchdog: HeartbeatWatchdog,
        intake: Arc<IntakeQueue>,
    ) -> Self {
        let state = AlertState::new(Instant::now(), settings.retention.purge_files);
        AlertProcessor {
            settings,
            fetcher,
            media,
            controller,
            triggers: Arc::new(triggers),
            watchdog,
            intake,
            state: Mutex::new(state),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Queues `alert` for the processor loop.
    pub fn dispatch(&self, alert: Alert) {
        debug!("queueing alert {}", alert.identifier);
        self.intake.push(alert);
    }

    /// Handles the oldest queued alert. Returns `false` when the queue is empty.
    pub async fn process_intake(&self) -> bool {
        match self.intake.pop() {
            Some(alert) => {
                self.handle_dispatch(alert).await;
                true
            }
            None => false,
        }
    }

    /// Applies the lifecycle transitions of `alert`, then backfills the
    /// alerts it references when it is a heartbeat seen for the first time.
    ///
    /// Backfill walks the reference chain depth first with an explicit stack,
    /// skipping already seen alerts and stopping at [`MAX_REFERENCE_DEPTH`].
    pub async fn handle_dispatch(&self, alert: Alert) {
        let _dispatching = self.dispatch_lock.lock().await;

        let mut pending: Vec<(AlertReference, usize, bool)> = Vec::new();
        let mut next = Some((alert, 0));
        loop {
            if let Some((alert, depth)) = next.take() {
                let required = alert.status == "system";
                let identifier = alert.identifier.clone();
                let references = self.apply_dispatch(alert);

                if !references.is_empty() {
                    if depth < MAX_REFERENCE_DEPTH {
                        pending.extend(
                            references
                                .into_iter()
                                .rev()
                                .map(|reference| (reference, depth + 1, required)),
                        );
                    } else {
                        warn!(
                            "reference chain of alert {} is too deep, not following it",
                            identifier
                        );
                    }
                }
            }

            let Some((reference, depth, required)) = pending.pop() else {
                break;
            };
            if self.is_seen(&reference.identifier) {
                continue;
            }
            next = self
                .fetch_reference(&reference, required)
                .await
                .map(|alert| (alert, depth));
        }
    }

    fn is_seen(&self, identifier: &str) -> bool {
        self.state().seen.contains(identifier)
    }

    /// State transitions of a single alert. Returns the references to backfill.
    fn apply_dispatch(&self, alert: Alert) -> Vec<AlertReference> {
        let alert = Arc::new(alert);
        let mut state = self.state();

        let mut backfill = Vec::new();
        if state.mark_seen(&alert.identifier) && alert.status == "system" {
            backfill = alert.references.clone();
        }

        if matches!(alert.msg_type.as_str(), "update" | "cancel") {
            for reference in &alert.references {
                if let Some(previous) = state.mark_expired(&reference.identifier) {
                    info!(
                        "alert {} superseded by {} {}",
                        previous.identifier, alert.msg_type, alert.identifier
                    );
                    alert.inherit_importance(previous.broadcast_immediately());
                }
            }
        }

        if alert.status == "system" {
            debug!("heartbeat {} received", alert.identifier);
            state.last_heartbeat = Some(Utc::now());
        } else if matches!(alert.msg_type.as_str(), "alert" | "update")
            && self.match_alert_conditions(&alert)
            && state.mark_active(alert.clone())
        {
            info!("alert {} is now active", alert.identifier);
            if alert.minor_change().is_none() {
                state.next_alert_check = Instant::now() + PULL_FORWARD;
            }
        }

        backfill
    }

    /// Returns `true` when `alert` concerns the station and must air.
    pub fn match_alert_conditions(&self, alert: &Alert) -> bool {
        let location = &self.settings.location;
        if !alert.has_geocode(&location.geocodes, location.kind) {
            debug!("alert {} is outside the coverage area", alert.identifier);
            return false;
        }

        let playback = &self.settings.playback;
        if alert.status == "test" {
            return playback.play_tests;
        }
        if alert.status != "actual" || alert.scope != "public" {
            return false;
        }

        alert.broadcast_immediately() || playback.play_moderates
    }

    /// Fetches a referenced alert from the archive hosts, in order.
    async fn fetch_reference(&self, reference: &AlertReference, required: bool) -> Option<Alert> {
        for host in &self.settings.archive_hosts {
            let url = reference.archive_url(host);
            debug!("fetching alert {} from {}", reference.identifier, url);

            let data = match self.fetcher.fetch(&url).await {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    debug!("{}", e);
                    continue;
                }
            };

            let path = self
                .settings
                .alerts_dir
                .join(format!("{}.xml", reference.reference()));
            if let Err(e) = self.persist(&path, &data).await {
                warn!("error saving alert {}: {}", path.display(), e);
            }

            match Alert::parse(&data) {
                Ok(alert) => return Some(alert),
                Err(e) => error!("error parsing alert fetched from {}: {}", url, e),
            }
        }

        if required {
            error!("unable to fetch referenced alert {}", reference.identifier);
        } else {
            debug!("unable to fetch referenced alert {}", reference.identifier);
        }
        None
    }

    async fn persist(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.settings.alerts_dir).await?;
        tokio::fs::write(path, data).await
    }

    /// Expires every active alert whose infos have all expired.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.state();
        let expired: Vec<String> = state
            .active
            .values()
            .filter(|alert| alert.is_expired())
            .map(|alert| alert.identifier.clone())
            .collect();

        for identifier in &expired {
            state.mark_expired(identifier);
            info!("alert {} has expired", identifier);
        }
        expired.len()
    }

    /// Deletes the alert artifacts older than the retention period.
    pub async fn purge_old_files(&self) -> Result<usize, ProcessorError> {
        let deleted = purge_old_files(
            &self.settings.alerts_dir,
            Local::now().date_naive(),
            self.settings.retention.days,
        )
        .await?;
        Ok(deleted)
    }

    /// Runs the heartbeat watchdog. Returns `true` when it fired.
    pub fn check_heartbeat(&self) -> bool {
        self.watchdog.check(Instant::now())
    }

    /// Where the alert `identifier` stands in its lifecycle.
    pub fn lifecycle(&self, identifier: &str) -> Lifecycle {
        self.state().lifecycle(identifier)
    }

    /// One iteration of the processor loop.
    pub async fn tick(&self) -> Result<(), ProcessorError> {
        self.process_intake().await;

        let now = Instant::now();
        let (sweep, purge, play) = {
            let mut state = self.state();

            let sweep = now >= state.next_expired_check;
            if sweep {
                state.next_expired_check = now + EXPIRY_SWEEP_INTERVAL;
            }

            let purge = state.next_purge_check.is_some_and(|check| now >= check);
            if purge {
                state.next_purge_check = Some(now + PURGE_INTERVAL);
            }

            (sweep, purge, now >= state.next_alert_check)
        };

        if sweep {
            self.sweep_expired();
        }
        if play {
            self.run_play_cycle().await;
        }
        self.check_heartbeat();
        if purge {
            self.purge_old_files().await?;
        }
        Ok(())
    }

    /// Runs the processor loop until `cancel` is triggered.
    ///
    /// A failing or panicking iteration is logged and the loop goes on.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("alert processor started");

        let mut ticks = interval(TICK);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }

            match AssertUnwindSafe(self.tick()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("error in alert processor: {}", e),
                Err(_) => error!("alert processor iteration panicked"),
            }
        }

        info!("alert processor stopped");
    }
}
