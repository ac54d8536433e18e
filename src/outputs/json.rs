//! JSON report sink.
//!
//! The report is written as one pretty-printed UTF-8 document. The write goes
//! to a sibling temp file first and is then renamed over the target, so
//! readers see either the previous report or the new one, never a torn file.

use crate::models::Report;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "report.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `report` and atomically replace `path` with it.
///
/// # Arguments
///
/// * `report` - The finished run report
/// * `path` - Destination file; its parent directory must already exist
///
/// # Returns
///
/// `Ok(())` once the new document is in place. On error the temp file is
/// cleaned up and any previous report at `path` is left untouched.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(report: &Report, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let tmp = temp_path_for(path);

    if let Err(e) = fs::write(&tmp, json.as_bytes()).await {
        error!(tmp = %tmp.display(), error = %e, "Failed to write temp report");
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        error!(tmp = %tmp.display(), error = %e, "Failed to move report into place");
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    info!(
        bytes = json.len(),
        items = report.items.len(),
        errors = report.errors.len(),
        "Wrote report"
    );
    Ok(())
}
