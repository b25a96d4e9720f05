//! Utility functions for artifact naming and path handling.
//!
//! Every on-disk artifact of an alert (raw XML, generated audio, image) is named
//! after a reference derived from the alert's sent timestamp and identifier, so
//! that generating the same artifact twice always lands on the same file.

use std::path::{Component, Path, PathBuf};

/// Name of the data subdirectory holding alert artifacts.
pub const ALERTS_DIR: &str = "alerts";

/// Constructs a file system path by joining a directory path with a subdirectory.
///
/// # Examples
///
/// ```
/// # use alertcast::utils::get_path;
/// let path = get_path("/var/lib/alertcast", "alerts");
/// assert_eq!(path, std::path::PathBuf::from("/var/lib/alertcast/alerts"));
/// ```
pub fn get_path(dir_path: impl AsRef<Path>, subdir_path: &str) -> PathBuf {
    dir_path.as_ref().join(subdir_path)
}

/// Derives the filesystem-safe reference of an alert.
///
/// The reference is `sent + "I" + identifier` where `-` and `:` become `_` and
/// `+` becomes `p`. Archive hosts publish alerts under the same name, and the
/// retention purge relies on the `YYYY_MM_DD` prefix it produces.
///
/// # Examples
///
/// ```
/// # use alertcast::utils::alert_reference;
/// let reference = alert_reference("2024-03-01T10:15:00-05:00", "urn:oid:2.49.0.1.124");
/// assert_eq!(reference, "2024_03_01T10_15_00_05_00Iurn_oid_2.49.0.1.124");
/// ```
pub fn alert_reference(sent: &str, identifier: &str) -> String {
    format!("{}I{}", sent, identifier)
        .chars()
        .map(|c| match c {
            '-' | ':' => '_',
            '+' => 'p',
            other => other,
        })
        .collect()
}

/// Returns `true` when the path does not climb out of its base with `..`.
pub fn is_safe_path(path: &Path) -> bool {
    !path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
        && !path.to_string_lossy().contains("..")
}
