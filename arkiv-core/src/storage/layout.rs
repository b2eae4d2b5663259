use std::path::{Path, PathBuf};

use arkiv_config::PathPolicyConfig;
use chrono::NaiveDate;

use crate::path_policy::{PathPolicyError, build_filename_from_pattern, build_target_dir};

/// The derived locations of one archived ticket: directory, PDF, sidecar,
/// and the attachments directory next to the PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub target_dir: PathBuf,
    pub target_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub attachments_dir: PathBuf,
}

impl StoragePaths {
    pub fn filename(&self) -> &str {
        self.target_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

/// Deterministic layout: `root/<user>/<segments...>/<pattern-rendered>` with
/// the sidecar as `<filename>.json` and attachments under `attachments/`.
pub fn build_storage_paths(
    root: &Path,
    username: &str,
    segments: &[String],
    policy: &PathPolicyConfig,
    ticket_number: &str,
    date_utc: NaiveDate,
) -> Result<StoragePaths, PathPolicyError> {
    let target_dir = build_target_dir(
        root,
        username,
        segments,
        &policy.allow_prefixes,
        policy.max_depth,
        policy.max_segment_length,
    )?;

    let date_iso = date_utc.format("%Y-%m-%d").to_string();
    let filename = build_filename_from_pattern(&policy.filename_pattern, ticket_number, &date_iso)?;

    let target_path = target_dir.join(&filename);
    let sidecar_path = target_dir.join(format!("{filename}.json"));
    let attachments_dir = target_dir.join("attachments");

    Ok(StoragePaths {
        target_dir,
        target_path,
        sidecar_path,
        attachments_dir,
    })
}
