//! CAP (Common Alerting Protocol) alert model.
//!
//! A raw message is parsed into an [`Alert`] holding [`Info`] blocks, each
//! with its [`Area`]s and [`Resource`]s. The model answers the relevance
//! questions asked by the processor (geocode match, expiry, importance) and
//! renders the localized text read on air.
//!
//! # Examples
//!
//! ```
//! # use alertcast::cap::{Alert, LocationKind};
//! let xml = br#"<alert xmlns="urn:oasis:names:tc:emergency:cap:1.2">
//!   <identifier>X001</identifier>
//!   <status>Actual</status>
//!   <info>
//!     <language>en-CA</language>
//!     <area><geocode><valueName>profile:CAP-CP:Location:0.3</valueName><value>3520005</value></geocode></area>
//!   </info>
//! </alert>"#;
//!
//! let alert = Alert::parse(xml).unwrap();
//! assert_eq!(alert.status, "actual");
//! assert!(alert.has_geocode(&["35"], LocationKind::Canada));
//! ```

mod alert;
mod area;
mod first_nations;
mod info;
mod resource;
pub(crate) mod xml;

pub use alert::{Alert, AlertReference, ParseError, Profile, lang_ref};
pub use area::{Area, CAP_CP_LOCATION, FIPS6, Geocode, LocationKind, SAME};
pub use first_nations::first_nations_languages;
pub use info::{BROADCAST_IMMEDIATELY, BROADCAST_TEXT, Info, MINOR_CHANGE};
pub use resource::{Resource, ResourceContent, Signature};

#[cfg(test)]
pub(crate) use alert::tests::AlertXml;

/// Pseudo-language under which the first nations rendering is cached.
pub const FIRST_NATION: &str = "first_nations";
