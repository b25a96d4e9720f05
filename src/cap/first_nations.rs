//! Derivation of first nations languages from SGC geocodes.
//!
//! Each language is spoken in the provinces and territories whose SGC codes
//! start with one of the listed prefixes.

/// Languages and the SGC province prefixes they are associated with.
const LANGUAGES_BY_SGC_PREFIX: &[(&str, &[&str])] = &[
    ("Plains-Cree", &["47", "48", "59", "61"]),
    ("Woods-Cree", &["46", "47"]),
    ("Swampy-Cree", &["35", "46", "47"]),
    ("Moose-Cree", &["35"]),
    ("Atikamekw", &["24"]),
    ("Northern-East-Cree", &["24"]),
    ("Southern-East-Cree", &["24"]),
    ("Kawawachikamach-Naskapi", &["24"]),
    ("Western-Innu", &["24"]),
    ("Eastern-Innu", &["24", "10"]),
    ("Inuktitut", &["24", "10", "46", "61"]),
    ("Ojibwe", &["24", "35", "46", "47", "59"]),
    ("Innu", &["24", "10"]),
    ("Chipewyan", &["47", "48", "61", "46"]),
    ("Mikmaq", &["12", "13", "11", "10"]),
];

/// Returns the first nations languages of the given SGC codes, without duplicates.
///
/// # Examples
///
/// ```
/// # use alertcast::cap::first_nations_languages;
/// let languages = first_nations_languages(["3506008"]);
/// assert_eq!(languages, vec!["Swampy-Cree", "Moose-Cree", "Ojibwe"]);
/// ```
pub fn first_nations_languages<'a>(sgc_codes: impl IntoIterator<Item = &'a str>) -> Vec<&'static str> {
    let mut languages: Vec<&'static str> = Vec::new();

    for sgc in sgc_codes {
        for &(language, prefixes) in LANGUAGES_BY_SGC_PREFIX {
            if prefixes.iter().any(|prefix| sgc.starts_with(prefix)) && !languages.contains(&language) {
                languages.push(language);
            }
        }
    }

    languages
}
