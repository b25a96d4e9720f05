//! Heartbeat watchdog resetting a silent feed connection.

use std::{process::Stdio, sync::Arc, time::Duration};

use log::{error, warn};
use tokio::{process::Command, time::Instant};

use crate::feed::FeedLink;

/// Silence after which the feed connection is considered dead.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(360);

/// Four beeps through sox.
const BEEPS: &str = "play -q -n synth 0.8 sin 880; sleep 1; play -q -n synth 0.8 sin 880; \
                     sleep 1; play -q -n synth 0.8 sin 880; sleep 1; play -q -n synth 0.8 sin 880";

/// Audible local alarm.
pub trait Alarm: Send + Sync {
    fn sound(&self);
}

/// [`Alarm`] beeping through the sox `play` command, without waiting for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoxAlarm;

impl Alarm for SoxAlarm {
    fn sound(&self) {
        match Command::new("sh")
            .args(["-c", BEEPS])
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if status.success() => {}
                        Ok(status) => warn!("alarm exited with {}", status),
                        Err(e) => warn!("error waiting for alarm: {}", e),
                    }
                });
            }
            Err(e) => error!("error sounding alarm: {}", e),
        }
    }
}

/// Watches the arrival of feed frames.
pub struct HeartbeatWatchdog {
    link: Arc<FeedLink>,
    alarm: Box<dyn Alarm>,
    timeout: Duration,
}

impl HeartbeatWatchdog {
    pub fn new(link: Arc<FeedLink>, alarm: Box<dyn Alarm>) -> Self {
        HeartbeatWatchdog {
            link,
            alarm,
            timeout: HEARTBEAT_TIMEOUT,
        }
    }

    /// Sounds the alarm and closes the connection when nothing arrived for
    /// longer than the timeout. Returns `true` when it fired.
    ///
    /// Closing clears the frame timestamp, so the watchdog fires once per
    /// silent connection rather than on every check.
    pub fn check(&self, now: Instant) -> bool {
        let Some(last_received) = self.link.last_received() else {
            return false;
        };
        if now.saturating_duration_since(last_received) <= self.timeout {
            return false;
        }

        error!(
            "no heartbeat received for {} min, resetting alert feed",
            self.timeout.as_secs() / 60
        );
        self.alarm.sound();
        self.link.close();
        true
    }
}
