//! Configuration file structures for Alertcast.
//!
//! The configuration is read from a YAML file and can be overridden with
//! environment variables prefixed with `ALERTCAST_`; nested keys are separated
//! with a double underscore.
//!
//! # Configuration File Format
//!
//! ```yaml
//! feed:
//!   transport: tcp
//!   streaming_hosts:
//!     - "streaming1.naad-adna.pelmorex.com:8080"
//!     - "streaming2.naad-adna.pelmorex.com:8080"
//!   archive_hosts:
//!     - "http://capcp1.naad-adna.pelmorex.com"
//!     - "http://capcp2.naad-adna.pelmorex.com"
//!
//! location:
//!   kind: CA
//!   geocodes: ["3506", "35"]
//!
//! playback:
//!   repeat_interval: 30
//!   repeat_times: 1
//!   leadin_delay: 1
//!   leadout_delay: 1
//!   play_moderates: false
//!   play_tests: false
//!
//! language:
//!   primary: english
//!   primary_voice: en
//!   secondary: french
//!   secondary_voice: fr
//!
//! tts:
//!   aws_access_key_id: "AKIA..."
//!   aws_secret_access_key: "..."
//!   aws_region: "ca-central-1"
//! ```
//!
//! # Environment Variable Overrides
//!
//! ```bash
//! export ALERTCAST_LOCATION__KIND="US"
//! export ALERTCAST_TTS__AWS_SECRET_ACCESS_KEY="secret-from-env"
//! ```

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

use crate::cap::LocationKind;

/// Prefix of the environment variables overriding the configuration file.
const ENV_PREFIX: &str = "ALERTCAST_";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Alert feed connection settings
    #[serde(default)]
    pub feed: Feed,
    /// Coverage area of the station
    pub location: Location,
    /// Play cycle settings
    #[serde(default)]
    pub playback: Playback,
    /// Languages and voices of the generated messages
    #[serde(default)]
    pub language: Language,
    /// Cloud text-to-speech credentials
    #[serde(default)]
    pub tts: Tts,
    /// On-disk artifact retention
    #[serde(default)]
    pub retention: Retention,
    /// Commands run around each play cycle
    #[serde(default)]
    pub triggers: Vec<CommandTriggerConfig>,
}

impl Config {
    /// Loads the configuration from a YAML file, applying `ALERTCAST_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] when the file is unreadable, a value has the
    /// wrong type or a required key (such as `location`) is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}

/// Transport used to receive the alert stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Connect to the streaming hosts over TCP
    #[default]
    Tcp,
    /// Listen for datagrams on `udp_bind`
    Udp,
}

/// Alert feed connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Feed {
    /// Transport of the alert stream
    #[serde(default)]
    pub transport: Transport,
    /// Streaming hosts tried in order, as `host:port`
    #[serde(default = "default_streaming_hosts")]
    pub streaming_hosts: Vec<String>,
    /// Archive hosts used to backfill missed alerts, as base URLs
    #[serde(default = "default_archive_hosts")]
    pub archive_hosts: Vec<String>,
    /// Local address bound when the transport is UDP
    #[serde(default = "default_udp_bind")]
    pub udp_bind: String,
}

impl Default for Feed {
    fn default() -> Self {
        Feed {
            transport: Transport::default(),
            streaming_hosts: default_streaming_hosts(),
            archive_hosts: default_archive_hosts(),
            udp_bind: default_udp_bind(),
        }
    }
}

/// Coverage area of the station.
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    /// Geocode scheme used for relevance matching
    #[serde(default)]
    pub kind: LocationKind,
    /// Target geocodes (SAME/FIPS codes for US, SGC codes for CA)
    pub geocodes: Vec<String>,
}

/// Play cycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Playback {
    /// Minutes between two play cycles
    #[serde(default = "default_repeat_interval")]
    pub repeat_interval: u64,
    /// Number of cycles an alert plays before expiring, 0 for unlimited
    #[serde(default = "default_repeat_times")]
    pub repeat_times: u32,
    /// Seconds of silence before the alerts
    #[serde(default = "default_delay")]
    pub leadin_delay: f64,
    /// Seconds of silence after the alerts
    #[serde(default = "default_delay")]
    pub leadout_delay: f64,
    /// Play alerts without the broadcast immediately flag
    #[serde(default)]
    pub play_moderates: bool,
    /// Play alerts with the `test` status
    #[serde(default)]
    pub play_tests: bool,
    /// Cut non-immediate messages at their first paragraph
    #[serde(default)]
    pub truncate: bool,
    /// Also air the first nations rendering of each alert
    #[serde(default)]
    pub first_nations: bool,
    /// Attention signal aired before the first play of an alert
    pub attention_signal: Option<PathBuf>,
    /// Optional announcement aired before the attention signal
    pub leadin_message: Option<PathBuf>,
}

impl Default for Playback {
    fn default() -> Self {
        Playback {
            repeat_interval: default_repeat_interval(),
            repeat_times: default_repeat_times(),
            leadin_delay: default_delay(),
            leadout_delay: default_delay(),
            play_moderates: false,
            play_tests: false,
            truncate: false,
            first_nations: false,
            attention_signal: None,
            leadin_message: None,
        }
    }
}

/// Languages and voices of the generated messages.
#[derive(Debug, Clone, Deserialize)]
pub struct Language {
    /// Primary language name (`english`, `french`, ...) or CAP language tag
    #[serde(default = "default_primary_language")]
    pub primary: String,
    /// Voice of the primary language, prefix with `aws-` for the cloud backend
    #[serde(default = "default_primary_voice")]
    pub primary_voice: String,
    /// Optional secondary language
    pub secondary: Option<String>,
    /// Voice of the secondary language
    pub secondary_voice: Option<String>,
}

impl Default for Language {
    fn default() -> Self {
        Language {
            primary: default_primary_language(),
            primary_voice: default_primary_voice(),
            secondary: None,
            secondary_voice: None,
        }
    }
}

/// Cloud text-to-speech credentials.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Tts {
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: Option<String>,
}

impl Tts {
    /// Returns `(key id, secret, region)` when every credential is configured.
    pub fn aws_credentials(&self) -> Option<(&str, &str, &str)> {
        match (
            &self.aws_access_key_id,
            &self.aws_secret_access_key,
            &self.aws_region,
        ) {
            (Some(id), Some(secret), Some(region)) => Some((id, secret, region)),
            _ => None,
        }
    }
}

/// On-disk artifact retention.
#[derive(Debug, Clone, Deserialize)]
pub struct Retention {
    /// Delete old alert artifacts once a day
    #[serde(default = "default_true")]
    pub purge_files: bool,
    /// Age in days after which artifacts are deleted
    #[serde(default = "default_retention_days")]
    pub days: u64,
}

impl Default for Retention {
    fn default() -> Self {
        Retention {
            purge_files: true,
            days: default_retention_days(),
        }
    }
}

/// A trigger running external commands when a play cycle starts and stops.
///
/// Commands are given as argv lists, e.g. `["relay-ctl", "on"]`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandTriggerConfig {
    pub name: String,
    #[serde(default)]
    pub on_start: Vec<String>,
    #[serde(default)]
    pub on_stop: Vec<String>,
}

fn default_streaming_hosts() -> Vec<String> {
    vec![
        "streaming1.naad-adna.pelmorex.com:8080".to_owned(),
        "streaming2.naad-adna.pelmorex.com:8080".to_owned(),
    ]
}

fn default_archive_hosts() -> Vec<String> {
    vec![
        "http://capcp1.naad-adna.pelmorex.com".to_owned(),
        "http://capcp2.naad-adna.pelmorex.com".to_owned(),
    ]
}

fn default_udp_bind() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_repeat_interval() -> u64 {
    30
}

fn default_repeat_times() -> u32 {
    1
}

fn default_delay() -> f64 {
    1.0
}

fn default_primary_language() -> String {
    "english".to_owned()
}

fn default_primary_voice() -> String {
    "en".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u64 {
    90
}
