//! Playback queue interface used by the play-cycle scheduler.
//!
//! The scheduler only talks to a [`PlaybackController`]: it holds the queue,
//! appends [`MediaRequest`]s, re-times them and releases the hold.
//! [`QueuePlaybackController`] is an in-process implementation which airs
//! requests by logging them and firing their callbacks at the scheduled times.

use std::{
    collections::VecDeque,
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, info};
use serde::Serialize;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;

use crate::media::{MediaClip, MediaType};

/// Resolution of the in-process queue clock.
const TICK: Duration = Duration::from_millis(100);

/// Callback fired when a request starts or ends airing.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Silence
    Break,
    Audio,
    Image,
}

impl From<MediaType> for RequestKind {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Audio => RequestKind::Audio,
            MediaType::Image => RequestKind::Image,
        }
    }
}

/// One segment to air.
#[derive(Clone)]
pub struct MediaRequest {
    pub kind: RequestKind,
    pub path: Option<PathBuf>,
    /// Absolute start; appended after the queue end when absent
    pub start_time: Option<Instant>,
    pub duration: Duration,
    pub artist: Option<String>,
    pub title: String,
    pub overlay_text: Option<String>,
    pub on_start: Option<Callback>,
    pub on_end: Option<Callback>,
}

impl MediaRequest {
    /// A break of `duration`.
    pub fn pause(title: &str, duration: Duration) -> Self {
        MediaRequest {
            kind: RequestKind::Break,
            path: None,
            start_time: None,
            duration,
            artist: None,
            title: title.to_owned(),
            overlay_text: None,
            on_start: None,
            on_end: None,
        }
    }

    /// A request airing `clip`.
    pub fn clip(clip: &MediaClip) -> Self {
        MediaRequest {
            kind: clip.media_type.into(),
            path: Some(clip.path.clone()),
            start_time: None,
            duration: clip.duration,
            artist: Some(clip.artist.clone()),
            title: clip.title.clone(),
            overlay_text: clip.overlay_text.clone(),
            on_start: None,
            on_end: None,
        }
    }

    pub fn starting_at(mut self, start_time: Instant) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn on_start(mut self, callback: Callback) -> Self {
        self.on_start = Some(callback);
        self
    }

    pub fn on_end(mut self, callback: Callback) -> Self {
        self.on_end = Some(callback);
        self
    }
}

impl fmt::Debug for MediaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaRequest")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("start_time", &self.start_time)
            .field("duration", &self.duration)
            .field("title", &self.title)
            .field("overlay_text", &self.overlay_text)
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// Shared, priority-aware playback queue.
pub trait PlaybackController {
    /// Appends a request, after the current queue end unless it has a start time.
    fn add_request(&self, request: MediaRequest);

    /// While held, queued requests are not aired.
    fn hold_requests(&self, hold: bool);

    /// End of the last queued request, or now when the queue is empty.
    fn get_requests_endtime(&self) -> Instant;

    /// Shifts every queued request so that the first one starts at `now`.
    fn adjust_request_times(&self, now: Instant);

    /// Drops every queued request.
    fn stop_requests(&self);
}

#[derive(Debug)]
struct ScheduledRequest {
    start: Instant,
    end: Instant,
    started: bool,
    request: MediaRequest,
}

#[derive(Debug, Default)]
struct QueueState {
    held: bool,
    requests: VecDeque<ScheduledRequest>,
}

impl QueueState {
    fn endtime(&self, now: Instant) -> Instant {
        self.requests
            .iter()
            .map(|scheduled| scheduled.end)
            .fold(now, Instant::max)
    }
}

/// In-process [`PlaybackController`].
pub struct QueuePlaybackController {
    name: String,
    priority: u32,
    state: Mutex<QueueState>,
}

impl QueuePlaybackController {
    /// Create a new [QueuePlaybackController].
    ///
    /// # Arguments
    ///
    /// * `name` - Name used in the logs
    /// * `priority` - Priority over other controllers sharing the output
    pub fn new(name: &str, priority: u32) -> Self {
        QueuePlaybackController {
            name: name.to_owned(),
            priority,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queued requests with their scheduled start times.
    pub fn requests(&self) -> Vec<MediaRequest> {
        self.state()
            .requests
            .iter()
            .map(|scheduled| scheduled.request.clone().starting_at(scheduled.start))
            .collect()
    }

    pub fn is_held(&self) -> bool {
        self.state().held
    }

    /// Airs due requests and fires their callbacks.
    pub fn advance(&self, now: Instant) {
        let mut callbacks = Vec::new();
        {
            let mut state = self.state();
            if state.held {
                return;
            }

            for scheduled in state.requests.iter_mut() {
                if !scheduled.started && scheduled.start <= now {
                    scheduled.started = true;
                    info!(
                        "{}: airing {:?} {} ({:.1}s)",
                        self.name,
                        scheduled.request.kind,
                        scheduled.request.title,
                        scheduled.request.duration.as_secs_f64()
                    );
                    callbacks.extend(scheduled.request.on_start.clone());
                }
            }

            while let Some(position) = state
                .requests
                .iter()
                .position(|scheduled| scheduled.started && scheduled.end <= now)
            {
                if let Some(done) = state.requests.remove(position) {
                    debug!("{}: finished {}", self.name, done.request.title);
                    callbacks.extend(done.request.on_end);
                }
            }
        }

        for callback in callbacks {
            callback();
        }
    }

    /// Runs the queue clock until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticks = interval(TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => self.advance(Instant::now()),
            }
        }
        info!("{}: playback stopped", self.name);
    }
}

impl PlaybackController for QueuePlaybackController {
    fn add_request(&self, request: MediaRequest) {
        let mut state = self.state();
        let start = request
            .start_time
            .unwrap_or_else(|| state.endtime(Instant::now()));
        let end = start + request.duration;
        debug!("{}: queued {} at {:?}", self.name, request.title, start);

        state.requests.push_back(ScheduledRequest {
            start,
            end,
            started: false,
            request,
        });
    }

    fn hold_requests(&self, hold: bool) {
        self.state().held = hold;
    }

    fn get_requests_endtime(&self) -> Instant {
        self.state().endtime(Instant::now())
    }

    fn adjust_request_times(&self, now: Instant) {
        let mut state = self.state();
        let Some(first) = state
            .requests
            .iter()
            .filter(|scheduled| !scheduled.started)
            .map(|scheduled| scheduled.start)
            .min()
        else {
            return;
        };

        for scheduled in state.requests.iter_mut().filter(|scheduled| !scheduled.started) {
            if now >= first {
                let shift = now - first;
                scheduled.start += shift;
                scheduled.end += shift;
            } else {
                let shift = first - now;
                scheduled.start -= shift;
                scheduled.end -= shift;
            }
        }
    }

    fn stop_requests(&self) {
        let mut state = self.state();
        info!("{}: dropping {} queued requests", self.name, state.requests.len());
        state.requests.clear();
    }
}
