//! `<info>` blocks of an alert and the rendering of their broadcast text.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use roxmltree::Node;

use crate::cap::{
    Area, Profile, Resource, first_nations::first_nations_languages, xml,
};

/// Parameter carrying the vendor "broadcast immediately" flag.
pub const BROADCAST_IMMEDIATELY: &str = "layer:SOREM:1.0:Broadcast_Immediately";
/// Parameter carrying a ready-made broadcast text.
pub const BROADCAST_TEXT: &str = "layer:SOREM:1.0:Broadcast_Text";
/// Parameter flagging an update that changes nothing material.
pub const MINOR_CHANGE: &str = "profile:CAP-CP:0.4:MinorChange";

/// Language assumed for info blocks without a `<language>` tag.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Marker appended to truncated messages.
const TRUNCATION_MARKER: &str = "***";

/// An `<info>` block: the message of an alert in one language.
#[derive(Debug, Clone, Default)]
pub struct Info {
    pub language: String,
    pub event: Option<String>,
    pub urgency: Option<String>,
    pub severity: Option<String>,
    pub certainty: Option<String>,
    pub effective: Option<String>,
    pub onset: Option<String>,
    pub expires: Option<String>,
    pub categories: Vec<String>,
    pub response_types: Vec<String>,
    pub sender_name: Option<String>,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub instruction: Option<String>,
    pub parameters: Vec<(String, String)>,
    pub event_codes: Vec<(String, String)>,
    pub areas: Vec<Area>,
    pub resources: Vec<Resource>,
}

impl Info {
    pub(crate) fn parse(node: Node) -> Self {
        Info {
            language: xml::first_value(node, "language")
                .map(|language| language.trim().to_owned())
                .filter(|language| !language.is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned()),
            event: xml::first_value(node, "event"),
            urgency: xml::first_value(node, "urgency"),
            severity: xml::first_value(node, "severity"),
            certainty: xml::first_value(node, "certainty"),
            effective: xml::first_value(node, "effective"),
            onset: xml::first_value(node, "onset"),
            expires: xml::first_value(node, "expires"),
            categories: xml::values(node, "category"),
            response_types: xml::values(node, "responseType"),
            sender_name: xml::first_value(node, "senderName"),
            headline: xml::first_value(node, "headline"),
            description: xml::first_value(node, "description"),
            instruction: xml::first_value(node, "instruction"),
            parameters: xml::named_values(node, "parameter"),
            event_codes: xml::named_values(node, "eventCode"),
            areas: xml::children(node, "area").map(Area::parse).collect(),
            resources: xml::children(node, "resource").map(Resource::parse).collect(),
        }
    }

    /// Value of the first parameter named `name`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parsed expiry timestamp, `None` when absent or unparsable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let expires = self.expires.as_deref()?.trim();
        match DateTime::parse_from_rfc3339(expires) {
            Ok(expires) => Some(expires.with_timezone(&Utc)),
            Err(e) => {
                warn!("invalid expiry timestamp {}: {}", expires, e);
                None
            }
        }
    }

    /// Returns `true` iff `now` is past the expiry timestamp.
    ///
    /// An info without a parsable expiry never expires by time.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now > expires)
    }

    /// Returns `true` iff the current time is past the expiry timestamp.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Resources whose MIME type belongs to `top_level` (`audio`, `image`...).
    pub fn resources_of_type<'a>(&'a self, top_level: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources
            .iter()
            .filter(move |resource| resource.is_type(top_level))
    }

    fn severity_is(&self, levels: &[&str]) -> bool {
        self.severity.as_deref().is_some_and(|severity| {
            levels
                .iter()
                .any(|level| severity.trim().eq_ignore_ascii_case(level))
        })
    }

    /// Returns `true` if this info asks for an immediate broadcast under `profile`.
    pub fn broadcast_immediately(&self, profile: Profile) -> bool {
        match profile {
            Profile::CpCa => self
                .parameter(BROADCAST_IMMEDIATELY)
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("yes")),
            Profile::Ipaws => self.severity_is(&["severe"]),
        }
    }

    /// Renders the text read on air.
    ///
    /// The vendor broadcast text wins when present, otherwise the text is
    /// composed from the sender, event, areas, description and instruction.
    /// With `truncate`, everything after the first blank line is replaced by a
    /// truncation marker. Line breaks are collapsed into spaces.
    pub fn message_text(&self, profile: Profile, truncate: bool) -> String {
        let text = match self.parameter(BROADCAST_TEXT).filter(|text| !text.trim().is_empty()) {
            Some(text) => text.to_owned(),
            None => self.compose_text(profile),
        };

        let mut text = html_escape::decode_html_entities(&text).into_owned();

        if truncate {
            if let Some((first, _)) = text.split_once("\n\n") {
                text = format!("{}{}", first, TRUNCATION_MARKER);
            }
        }

        text.replace('\r', "").replace('\n', " ")
    }

    fn compose_text(&self, profile: Profile) -> String {
        let sender = non_empty(&self.sender_name);
        let event = non_empty(&self.event).map(|event| {
            if event.eq_ignore_ascii_case("test") {
                "Test Alert"
            } else {
                event
            }
        });
        let areas = self
            .areas
            .iter()
            .map(|area| area.description.trim())
            .filter(|description| !description.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let description = non_empty(&self.description);
        let instruction = non_empty(&self.instruction);

        let mut text = String::new();
        if self.language.to_ascii_lowercase().starts_with("fr") {
            text.push_str("Alerte");
            push_prefixed(&mut text, " ", sender);
            text.push_str(" - Alerte");
            push_prefixed(&mut text, " ", event);
            push_prefixed(&mut text, " ", Some(areas.as_str()).filter(|a| !a.is_empty()));
            push_sentence(&mut text, instruction);
        } else if profile == Profile::Ipaws {
            text.push_str(event.unwrap_or("Emergency Alert"));
            push_prefixed(&mut text, " issued by ", sender);
            push_prefixed(&mut text, " for ", Some(areas.as_str()).filter(|a| !a.is_empty()));
            push_sentence(&mut text, description);
            push_sentence(&mut text, instruction);
        } else {
            text.push_str("Message from");
            push_prefixed(&mut text, " ", sender);
            push_prefixed(&mut text, ". ", event);
            push_prefixed(&mut text, " for ", Some(areas.as_str()).filter(|a| !a.is_empty()));
            push_sentence(&mut text, description);
            push_sentence(&mut text, instruction);
        }
        text
    }

    /// SGC codes of every area, without duplicates.
    pub fn sgc_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = Vec::new();
        for code in self.areas.iter().flat_map(Area::sgc_codes) {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }

    /// Speech markup referencing the pre-recorded first nations audio of this event.
    ///
    /// Recordings are looked up as `<audio_dir>/<language>/<event>.wav`, one per
    /// language derived from the areas' SGC codes. Returns `None` when no
    /// language applies or the info has no event.
    pub fn first_nations_text(&self, audio_dir: &Path) -> Option<String> {
        let event = non_empty(&self.event)?.to_lowercase();
        let languages = first_nations_languages(self.sgc_codes());
        debug!("first nations languages {:?}", languages);

        if languages.is_empty() {
            return None;
        }

        Some(
            languages
                .iter()
                .map(|language| {
                    let path = audio_dir
                        .join(language.to_lowercase())
                        .join(format!("{}.wav", event));
                    format!("<audio src=\"{}\"></audio>", path.display())
                })
                .collect(),
        )
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Appends `value` as a new sentence, closing the previous one if needed.
fn push_sentence(text: &mut String, value: Option<&str>) {
    if let Some(value) = value {
        if !text.ends_with(['.', '!', '?']) {
            text.push('.');
        }
        text.push(' ');
        text.push_str(value);
    }
}

fn push_prefixed(text: &mut String, prefix: &str, value: Option<&str>) {
    if let Some(value) = value {
        text.push_str(prefix);
        text.push_str(value);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::cap::{Geocode, area::CAP_CP_LOCATION};

    fn info(language: &str) -> Info {
        Info {
            language: language.to_owned(),
            event: Some("tornado".to_owned()),
            sender_name: Some("Environment Canada".to_owned()),
            description: Some("A tornado was sighted.".to_owned()),
            instruction: Some("Take shelter.".to_owned()),
            areas: vec![
                Area {
                    description: "City of Toronto".to_owned(),
                    geocodes: vec![Geocode {
                        scheme: CAP_CP_LOCATION.to_owned(),
                        value: "3520005".to_owned(),
                    }],
                    ..Default::default()
                },
                Area {
                    description: "York".to_owned(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_english_template() {
        assert_eq!(
            info("en-CA").message_text(Profile::CpCa, false),
            "Message from Environment Canada. tornado for City of Toronto, York. \
             A tornado was sighted. Take shelter."
        );
    }

    #[test]
    fn test_french_template_omits_description() {
        assert_eq!(
            info("fr-CA").message_text(Profile::CpCa, false),
            "Alerte Environment Canada - Alerte tornado City of Toronto, York. Take shelter."
        );
    }

    #[test]
    fn test_ipaws_template() {
        let mut info = info("en-US");
        info.instruction = None;
        assert_eq!(
            info.message_text(Profile::Ipaws, false),
            "tornado issued by Environment Canada for City of Toronto, York. A tornado was sighted."
        );
    }

    #[test]
    fn test_test_event_is_spelled_out() {
        let mut info = info("en-CA");
        info.event = Some("test".to_owned());
        assert!(info.message_text(Profile::CpCa, false).contains(". Test Alert for"));
    }

    #[test]
    fn test_broadcast_text_parameter_wins() {
        let mut info = info("en-CA");
        info.parameters
            .push((BROADCAST_TEXT.to_owned(), "Tornado warning &amp; shelter".to_owned()));
        assert_eq!(
            info.message_text(Profile::CpCa, false),
            "Tornado warning & shelter"
        );
    }

    #[test]
    fn test_truncate_cuts_at_first_blank_line() {
        let mut info = info("en-CA");
        info.parameters.push((
            BROADCAST_TEXT.to_owned(),
            "First paragraph\nstill first.\n\nSecond paragraph.".to_owned(),
        ));

        assert_eq!(
            info.message_text(Profile::CpCa, true),
            "First paragraph still first.***"
        );
        assert_eq!(
            info.message_text(Profile::CpCa, false),
            "First paragraph still first.  Second paragraph."
        );
    }

    #[test]
    fn test_expiry() {
        let mut info = info("en-CA");
        let now = Utc::now();

        info.expires = Some((now - Duration::minutes(5)).to_rfc3339());
        assert!(info.is_expired_at(now));

        info.expires = Some((now + Duration::minutes(5)).to_rfc3339());
        assert!(!info.is_expired_at(now));

        info.expires = None;
        assert!(!info.is_expired_at(now));

        info.expires = Some("not a date".to_owned());
        assert!(!info.is_expired_at(now));
    }

    #[test]
    fn test_broadcast_immediately_by_profile() {
        let mut info = info("en-CA");
        assert!(!info.broadcast_immediately(Profile::CpCa));

        info.parameters
            .push((BROADCAST_IMMEDIATELY.to_owned(), "Yes".to_owned()));
        assert!(info.broadcast_immediately(Profile::CpCa));

        info.severity = Some("Severe".to_owned());
        assert!(info.broadcast_immediately(Profile::Ipaws));
        info.severity = Some("Moderate".to_owned());
        assert!(!info.broadcast_immediately(Profile::Ipaws));
        info.severity = Some("Extreme".to_owned());
        assert!(!info.broadcast_immediately(Profile::Ipaws));
    }

    #[test]
    fn test_first_nations_text() {
        let text = info("en-CA")
            .first_nations_text(Path::new("/data/first_nations"))
            .unwrap();

        assert!(text.starts_with("<audio src=\"/data/first_nations/swampy-cree/tornado.wav\"></audio>"));
        assert!(text.contains("/data/first_nations/moose-cree/tornado.wav"));
        assert!(text.contains("/data/first_nations/ojibwe/tornado.wav"));
    }

    #[test]
    fn test_first_nations_text_without_languages() {
        let mut info = info("en-CA");
        info.areas.clear();
        assert!(info.first_nations_text(Path::new("/data")).is_none());
    }
}
