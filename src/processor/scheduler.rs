//! Play cycle: queues every active alert on the playback controller.

use std::{sync::Arc, time::Duration};

use log::{info, warn};
use tokio::time::Instant;

use super::{AlertProcessor, sort_by_importance};
use crate::{
    http::HttpFetcher,
    media::{MediaBundle, MediaClip, SpeechSynthesizer},
    playback::{MediaRequest, PlaybackController, RequestKind},
    triggers::CycleContext,
};

/// Length of the attention signal and of the lead-in announcement.
const PREROLL_DURATION: Duration = Duration::from_secs(8);

/// Silence before the attention signal.
const TONE_DELAY: Duration = Duration::from_secs(1);

impl<H, S, P> AlertProcessor<H, S, P>
where
    H: HttpFetcher,
    S: SpeechSynthesizer,
    P: PlaybackController,
{
    /// Queues a play cycle of the active alerts, most important first.
    ///
    /// Alerts reaching their play limit are expired once the whole cycle is
    /// queued. The next cycle is due a repeat interval after the end of the
    /// queue.
    pub async fn run_play_cycle(&self) {
        let alerts = sort_by_importance(self.state().active.values().cloned());
        let controller = self.controller.as_ref();

        if alerts.is_empty() {
            self.schedule_next_cycle();
            return;
        }
        info!("playing {} active alert(s)", alerts.len());

        let playback = &self.settings.playback;
        controller.hold_requests(true);

        let triggers = self.triggers.clone();
        controller.add_request(
            MediaRequest::pause("alert lead in delay", seconds(playback.leadin_delay)).on_start(Arc::new(
                move || {
                    triggers.cycle_start();
                },
            )),
        );
        self.triggers.cycle_init();

        let mut finished = Vec::new();
        let mut aired = 0;
        for (position, alert) in alerts.iter().enumerate() {
            let media = self
                .media
                .get_media_info(
                    alert,
                    &self.settings.language,
                    playback.first_nations,
                    &self.fetcher,
                )
                .await;
            let Some(primary) = &media.primary else {
                warn!("no media for alert {}, skipping it this cycle", alert.identifier);
                continue;
            };

            if alert.record_play() <= 1 {
                self.queue_preroll(&primary.audio);
            }
            for bundle in [Some(primary), media.secondary.as_ref(), media.first_nation.as_ref()]
                .into_iter()
                .flatten()
            {
                self.queue_bundle(bundle);
            }
            aired += 1;

            let context = CycleContext {
                languages: &self.settings.language,
                position,
                aired,
            };
            self.triggers.cycle_each(alert, &media, &context);

            if alert.reached_play_limit(playback.repeat_times) {
                finished.push(alert.identifier.clone());
            }
        }

        let triggers = self.triggers.clone();
        controller.add_request(
            MediaRequest::pause("alert lead out delay", seconds(playback.leadout_delay)).on_end(Arc::new(
                move || {
                    triggers.cycle_stop();
                },
            )),
        );
        controller.adjust_request_times(Instant::now());
        controller.hold_requests(false);

        {
            let mut state = self.state();
            for identifier in &finished {
                if state.mark_expired(identifier).is_some() {
                    info!("alert {} reached its play limit", identifier);
                }
            }
        }
        self.schedule_next_cycle();
    }

    fn schedule_next_cycle(&self) {
        let next = self.controller.get_requests_endtime()
            + Duration::from_secs(self.settings.playback.repeat_interval * 60);
        self.state().next_alert_check = next;
    }

    /// Lead-in announcement and attention signal aired before a first play.
    fn queue_preroll(&self, primary: &MediaClip) {
        let playback = &self.settings.playback;
        let controller = self.controller.as_ref();

        if let Some(message) = playback.leadin_message.as_ref().filter(|path| path.is_file()) {
            controller.add_request(preroll(message, "alert lead in message", primary));
        }
        controller.add_request(MediaRequest::pause("alert tone delay", TONE_DELAY));
        if let Some(signal) = &playback.attention_signal {
            controller.add_request(preroll(signal, "alert attention signal", primary));
        }
    }

    /// Queues the audio of `bundle` and its visual, starting together.
    fn queue_bundle(&self, bundle: &MediaBundle) {
        let controller = self.controller.as_ref();
        let start = controller.get_requests_endtime();

        controller.add_request(MediaRequest::clip(&bundle.audio));
        if let Some(visual) = &bundle.visual {
            controller.add_request(MediaRequest::clip(visual).starting_at(start));
        }
    }
}

fn preroll(path: &std::path::Path, title: &str, primary: &MediaClip) -> MediaRequest {
    MediaRequest {
        kind: RequestKind::Audio,
        path: Some(path.to_owned()),
        start_time: None,
        duration: PREROLL_DURATION,
        artist: Some(primary.artist.clone()),
        title: title.to_owned(),
        overlay_text: primary.overlay_text.clone(),
        on_start: None,
        on_end: None,
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
