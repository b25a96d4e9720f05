//! The `<alert>` root entity and its relevance queries.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use log::debug;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    cap::{Info, LocationKind, Signature, info::MINOR_CHANGE, xml},
    media::MediaBundle,
    utils::alert_reference,
};

/// Code announcing the Canadian CAP profile.
pub const CAP_CP_PROFILE_CODE: &str = "profile:CAP-CP:0.4";
/// Code announcing the US IPAWS profile.
pub const IPAWS_PROFILE_CODE: &str = "IPAWSv1.0";

/// Errors raised while parsing a CAP message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("alert is not valid utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("invalid alert xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("no alert element found")]
    MissingAlert,
    #[error("alert has no identifier")]
    MissingIdentifier,
}

/// CAP profile of an alert, deciding language and urgency conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Canadian profile: one language tag per info and vendor parameters
    #[default]
    CpCa,
    /// US profile: no language tags, severity drives urgency
    Ipaws,
}

impl Profile {
    fn detect(codes: &[String]) -> Self {
        match codes.first().map(|code| code.trim()) {
            Some(IPAWS_PROFILE_CODE) => Profile::Ipaws,
            _ => Profile::CpCa,
        }
    }
}

/// A `sender,identifier,sent` triplet from the `<references>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertReference {
    pub sender: String,
    pub identifier: String,
    pub sent: String,
}

impl AlertReference {
    fn parse(triplet: &str) -> Option<Self> {
        let mut parts = triplet.split(',');
        let sender = parts.next()?.to_owned();
        let identifier = parts.next()?.to_owned();
        let sent = parts.next()?.to_owned();
        Some(AlertReference {
            sender,
            identifier,
            sent,
        })
    }

    /// Filesystem-safe reference of the designated alert.
    pub fn reference(&self) -> String {
        alert_reference(&self.sent, &self.identifier)
    }

    /// URL of the designated alert on an archive host.
    ///
    /// # Examples
    ///
    /// ```
    /// # use alertcast::cap::AlertReference;
    /// # let reference = AlertReference { sender: "s".into(), identifier: "X001".into(), sent: "2024-03-01T10:00:00-05:00".into() };
    /// assert_eq!(
    ///     reference.archive_url("http://archive.example/"),
    ///     "http://archive.example/2024-03-01/2024_03_01T10_00_00_05_00IX001.xml"
    /// );
    /// ```
    pub fn archive_url(&self, host: &str) -> String {
        let date = self.sent.split('T').next().unwrap_or_default();
        format!(
            "{}/{}/{}.xml",
            host.trim_end_matches('/'),
            date,
            self.reference()
        )
    }
}

/// A parsed CAP alert.
///
/// Play accounting and the per-language media cache use interior mutability so
/// that an alert can be shared between the processor state and a running play
/// cycle.
#[derive(Debug)]
pub struct Alert {
    pub profile: Profile,
    pub identifier: String,
    pub sender: String,
    pub sent: String,
    pub codes: Vec<String>,
    /// Lowercased `status` (`actual`, `test`, `system`...)
    pub status: String,
    /// Lowercased `msgType` (`alert`, `update`, `cancel`...)
    pub msg_type: String,
    /// Lowercased `scope` (`public`, `restricted`...)
    pub scope: String,
    pub references: Vec<AlertReference>,
    pub infos: Vec<Info>,
    pub signatures: Vec<Signature>,
    /// When the alert entered the system
    pub received_at: Instant,
    /// Per-alert play cap, 0 meaning unlimited
    pub max_plays: u32,
    times_played: AtomicU32,
    previously_important: AtomicBool,
    media: Mutex<HashMap<String, Option<MediaBundle>>>,
}

impl Alert {
    /// Parses a raw CAP message.
    ///
    /// Unknown or missing tags are tolerated; only a missing `alert` element or
    /// `identifier` fails the parse.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let source = std::str::from_utf8(data)?;
        let doc = roxmltree::Document::parse(source.trim_start_matches('\u{feff}'))?;

        let alert = doc
            .descendants()
            .find(|node| node.is_element() && node.tag_name().name() == "alert")
            .ok_or(ParseError::MissingAlert)?;

        let identifier = xml::first_value(alert, "identifier")
            .map(|identifier| identifier.trim().to_owned())
            .filter(|identifier| !identifier.is_empty())
            .ok_or(ParseError::MissingIdentifier)?;

        let lowercase = |tag: &str| {
            xml::first_value(alert, tag)
                .unwrap_or_default()
                .trim()
                .to_lowercase()
        };

        let codes = xml::values(alert, "code");
        let references = xml::first_value(alert, "references")
            .unwrap_or_default()
            .split_whitespace()
            .filter_map(AlertReference::parse)
            .collect();

        let parsed = Alert {
            profile: Profile::detect(&codes),
            sender: xml::first_value(alert, "sender").unwrap_or_default().trim().to_owned(),
            sent: xml::first_value(alert, "sent").unwrap_or_default().trim().to_owned(),
            status: lowercase("status"),
            msg_type: lowercase("msgType"),
            scope: lowercase("scope"),
            codes,
            references,
            infos: xml::children(alert, "info").map(Info::parse).collect(),
            signatures: xml::children(alert, "Signature")
                .map(|node| Signature::parse(node, doc.input_text()))
                .collect(),
            identifier,
            received_at: Instant::now(),
            max_plays: 0,
            times_played: AtomicU32::new(0),
            previously_important: AtomicBool::new(false),
            media: Mutex::new(HashMap::new()),
        };

        debug!(
            "parsed alert {} ({:?}, {} info blocks)",
            parsed.identifier,
            parsed.profile,
            parsed.infos.len()
        );
        Ok(parsed)
    }

    /// Filesystem-safe reference naming every artifact of this alert.
    pub fn reference(&self) -> String {
        alert_reference(&self.sent, &self.identifier)
    }

    /// First info in `language` (a name such as `french`, or a CAP tag).
    ///
    /// When no info matches and `bestmatch` is set, the first info is returned.
    pub fn get_first_info(&self, language: &str, bestmatch: bool) -> Option<&Info> {
        let tag = lang_ref(language);
        self.infos
            .iter()
            .find(|info| info.language.eq_ignore_ascii_case(&tag))
            .or_else(|| if bestmatch { self.infos.first() } else { None })
    }

    /// Returns `true` if any area of any info matches one of `codes`.
    pub fn has_geocode<S: AsRef<str>>(&self, codes: &[S], kind: LocationKind) -> bool {
        self.infos
            .iter()
            .flat_map(|info| &info.areas)
            .any(|area| area.has_geocode(codes, kind))
    }

    /// Adds `code` to every area of every info.
    pub fn add_geocode(&mut self, code: &str, kind: LocationKind) {
        for area in self.infos.iter_mut().flat_map(|info| &mut info.areas) {
            area.add_geocode(code, kind);
        }
    }

    /// Returns `true` when every info has expired.
    ///
    /// An alert without any info is never considered expired.
    pub fn is_expired(&self) -> bool {
        !self.infos.is_empty() && self.infos.iter().all(Info::is_expired)
    }

    /// Returns `true` if the alert must preempt moderate-severity gating.
    ///
    /// The flag is sticky: an alert updating an important one stays important.
    pub fn broadcast_immediately(&self) -> bool {
        self.previously_important()
            || self
                .infos
                .iter()
                .any(|info| info.broadcast_immediately(self.profile))
    }

    /// Value of the vendor minor-change parameter, if any info carries one.
    pub fn minor_change(&self) -> Option<&str> {
        self.infos
            .iter()
            .filter_map(|info| info.parameter(MINOR_CHANGE))
            .find(|value| !value.trim().is_empty())
    }

    pub fn previously_important(&self) -> bool {
        self.previously_important.load(Ordering::SeqCst)
    }

    /// Carries the importance of a superseded alert onto this one.
    pub fn inherit_importance(&self, important: bool) {
        if important {
            self.previously_important.store(true, Ordering::SeqCst);
        }
    }

    pub fn times_played(&self) -> u32 {
        self.times_played.load(Ordering::SeqCst)
    }

    /// Counts one more play and returns the new total.
    pub fn record_play(&self) -> u32 {
        self.times_played.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns `true` once the alert has played `repeat_times` times (0 = no
    /// limit) or reached its own play cap.
    pub fn reached_play_limit(&self, repeat_times: u32) -> bool {
        let played = self.times_played();
        (repeat_times > 0 && played >= repeat_times) || (self.max_plays > 0 && played >= self.max_plays)
    }

    /// Sort key for play order: immediate alerts first, then the most recent.
    pub fn importance(&self) -> (bool, Instant) {
        (self.broadcast_immediately(), self.received_at)
    }

    pub(crate) fn media_cache(&self) -> &Mutex<HashMap<String, Option<MediaBundle>>> {
        &self.media
    }
}

/// Maps a configured language name to its CAP language tag.
///
/// Values that already look like a tag (`fr-CA`) are returned unchanged and
/// unknown names map to `en-US`.
///
/// # Examples
///
/// ```
/// # use alertcast::cap::lang_ref;
/// assert_eq!(lang_ref("french"), "fr-CA");
/// assert_eq!(lang_ref("en-CA"), "en-CA");
/// assert_eq!(lang_ref("klingon"), "en-US");
/// ```
pub fn lang_ref(language: &str) -> String {
    let tag = match language.trim().to_lowercase().as_str() {
        "english" => "en-CA",
        "french" => "fr-CA",
        "cree" => "cr-CA",
        "inuktitut" => "iu-CA",
        "ojibwe" => "oj-CA",
        "chipewyan" => "chp-CA",
        "mikmaq" => "mic-CA",
        _ if language.contains('-') => return language.trim().to_owned(),
        _ => "en-US",
    };
    tag.to_owned()
}
