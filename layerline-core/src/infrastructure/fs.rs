// layerline-core/src/infrastructure/fs.rs

use crate::infrastructure::error::InfrastructureError;
use crate::ports::source::SourceFile;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Write content to a file atomically using a temporary file in the same
/// directory, then renaming it over the target. Readers see either the old
/// file or the new one.
pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
) -> Result<(), InfrastructureError> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_ref())?;
    temp_file
        .persist(path)
        .map_err(|e| InfrastructureError::Io(e.error))?;

    Ok(())
}

fn date_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"(\d{4})_(\d{2})_(\d{2})").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Date encoded in a file name as `YYYY_MM_DD`, at midnight UTC.
pub fn marker_from_name(name: &str) -> Option<DateTime<Utc>> {
    date_token().captures_iter(name).find_map(|caps| {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc())
    })
}

/// Files under `root` (or `root` itself) whose extension is one of
/// `extensions`, ordered by marker then path.
pub fn discover_source_files(
    root: &Path,
    extensions: &[&str],
) -> Result<Vec<SourceFile>, InfrastructureError> {
    if !root.exists() {
        return Err(InfrastructureError::SourceError(format!(
            "source location '{}' does not exist",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| InfrastructureError::SourceError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)));
        if !matches {
            continue;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let marker = match marker_from_name(name) {
            Some(marker) => marker,
            None => DateTime::<Utc>::from(entry.metadata().map_err(|e| {
                InfrastructureError::SourceError(e.to_string())
            })?.modified()?),
        };
        files.push(SourceFile {
            path: path.to_path_buf(),
            marker,
        });
    }

    files.sort_by(|a, b| a.marker.cmp(&b.marker).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}
