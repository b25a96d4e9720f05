//! Geographic areas of an alert and geocode relevance matching.

use roxmltree::Node;
use serde::Deserialize;

use crate::cap::xml;

/// Geocode scheme of Canadian SGC location codes.
pub const CAP_CP_LOCATION: &str = "profile:CAP-CP:Location:0.3";
/// Geocode scheme of US SAME codes.
pub const SAME: &str = "SAME";
/// Geocode scheme of US FIPS codes.
pub const FIPS6: &str = "FIPS6";

/// Jurisdiction scheme deciding how geocodes are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum LocationKind {
    /// SGC codes, matched by prefix in either direction
    #[default]
    #[serde(rename = "CA")]
    Canada,
    /// SAME/FIPS codes, matched exactly
    #[serde(rename = "US")]
    UnitedStates,
}

impl LocationKind {
    /// Geocode scheme name used when adding codes for this jurisdiction.
    pub fn scheme(&self) -> &'static str {
        match self {
            LocationKind::Canada => CAP_CP_LOCATION,
            LocationKind::UnitedStates => SAME,
        }
    }
}

/// A `(scheme, value)` geocode pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geocode {
    pub scheme: String,
    pub value: String,
}

impl Geocode {
    /// Returns `true` if this geocode designates `code` under `kind`.
    pub fn matches(&self, code: &str, kind: LocationKind) -> bool {
        match kind {
            LocationKind::UnitedStates => {
                (self.scheme == SAME || self.scheme == FIPS6) && self.value == code
            }
            LocationKind::Canada => {
                self.scheme == CAP_CP_LOCATION
                    && !self.value.is_empty()
                    && !code.is_empty()
                    && (self.value.starts_with(code) || code.starts_with(&self.value))
            }
        }
    }
}

/// An `<area>` block of an info.
#[derive(Debug, Clone, Default)]
pub struct Area {
    pub description: String,
    pub altitude: Option<String>,
    pub ceiling: Option<String>,
    pub polygons: Vec<String>,
    pub circles: Vec<String>,
    pub geocodes: Vec<Geocode>,
}

impl Area {
    pub(crate) fn parse(node: Node) -> Self {
        Area {
            description: xml::first_value(node, "areaDesc").unwrap_or_default(),
            altitude: xml::first_value(node, "altitude"),
            ceiling: xml::first_value(node, "ceiling"),
            polygons: xml::values(node, "polygon"),
            circles: xml::values(node, "circle"),
            geocodes: xml::named_values(node, "geocode")
                .into_iter()
                .map(|(scheme, value)| Geocode { scheme, value })
                .collect(),
        }
    }

    /// Returns `true` if any geocode of the area matches one of `codes`.
    pub fn has_geocode<S: AsRef<str>>(&self, codes: &[S], kind: LocationKind) -> bool {
        self.geocodes.iter().any(|geocode| {
            codes
                .iter()
                .any(|code| geocode.matches(code.as_ref().trim(), kind))
        })
    }

    /// Adds `code` under the scheme of `kind`.
    pub fn add_geocode(&mut self, code: &str, kind: LocationKind) {
        self.geocodes.push(Geocode {
            scheme: kind.scheme().to_owned(),
            value: code.to_owned(),
        });
    }

    /// SGC codes of the area, used to derive first nations languages.
    pub fn sgc_codes(&self) -> impl Iterator<Item = &str> {
        self.geocodes
            .iter()
            .filter(|geocode| geocode.scheme == CAP_CP_LOCATION)
            .map(|geocode| geocode.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(geocodes: &[(&str, &str)]) -> Area {
        Area {
            description: "somewhere".to_owned(),
            geocodes: geocodes
                .iter()
                .map(|(scheme, value)| Geocode {
                    scheme: scheme.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_canada_matches_prefix_in_both_directions() {
        let area = area(&[(CAP_CP_LOCATION, "3506008")]);

        assert!(area.has_geocode(&["35"], LocationKind::Canada));
        assert!(area.has_geocode(&["350600812"], LocationKind::Canada));
        assert!(!area.has_geocode(&["24"], LocationKind::Canada));
    }

    #[test]
    fn test_canada_ignores_other_schemes() {
        let area = area(&[(SAME, "3506008")]);
        assert!(!area.has_geocode(&["35"], LocationKind::Canada));
    }

    #[test]
    fn test_us_requires_exact_same_or_fips() {
        let area = area(&[(SAME, "039025"), (FIPS6, "039061")]);

        assert!(area.has_geocode(&["039025"], LocationKind::UnitedStates));
        assert!(area.has_geocode(&["039061"], LocationKind::UnitedStates));
        assert!(!area.has_geocode(&["0390"], LocationKind::UnitedStates));
    }

    #[test]
    fn test_us_does_not_match_other_scheme_values() {
        let area = area(&[("UGC", "039025")]);
        assert!(!area.has_geocode(&["039025"], LocationKind::UnitedStates));
    }

    #[test]
    fn test_add_geocode_uses_jurisdiction_scheme() {
        let mut area = area(&[]);
        area.add_geocode("039025", LocationKind::UnitedStates);
        area.add_geocode("35", LocationKind::Canada);

        assert_eq!(area.geocodes[0].scheme, SAME);
        assert_eq!(area.geocodes[1].scheme, CAP_CP_LOCATION);
        assert_eq!(area.sgc_codes().collect::<Vec<_>>(), vec!["35"]);
    }
}
