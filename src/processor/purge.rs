//! Retention purge of on-disk alert artifacts.

use std::{io, path::Path};

use chrono::{Days, NaiveDate};
use log::{debug, info, warn};

/// Deletes artifacts of `dir` whose `YYYY_MM_DD` name prefix is more than
/// `days` before `today`. Files without a date prefix are left alone and
/// entries that cannot be deleted are logged and skipped.
///
/// Returns the number of deleted files.
pub async fn purge_old_files(dir: &Path, today: NaiveDate, days: u64) -> io::Result<usize> {
    let Some(threshold) = today.checked_sub_days(Days::new(days)) else {
        return Ok(0);
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut deleted = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(file_date) else {
            continue;
        };

        if date < threshold {
            let path = entry.path();
            debug!("deleting alert file {}", path.display());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("error deleting alert file {}: {}", path.display(), e);
                continue;
            }
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!("deleted {} old alert files", deleted);
    }
    Ok(deleted)
}

fn file_date(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name.get(..10)?, "%Y_%m_%d").ok()
}
