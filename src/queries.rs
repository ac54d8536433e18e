//! Query source loading.
//!
//! The query file is either a JSON array or, for `.yaml`/`.yml` paths, a YAML
//! sequence of [`QueryDescriptor`]s. The count must equal the call budget
//! exactly: pacing and the attempt budget are sized for one call per query, so
//! a short or long file is a hard configuration error rather than a warning.

use crate::error::ConfigError;
use crate::models::QueryDescriptor;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Read, parse and validate the query source.
///
/// # Arguments
///
/// * `path` - Query file; `.yaml`/`.yml` is read as YAML, anything else as JSON
/// * `expected` - Exact number of descriptors required (the call budget)
///
/// # Returns
///
/// The descriptors in file order, or a [`ConfigError`] if the file cannot be
/// read or parsed, the count is wrong, or a tag repeats.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_queries(
    path: &Path,
    expected: usize,
) -> Result<Vec<QueryDescriptor>, ConfigError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let queries = parse_queries(path, &raw)?;
    validate_queries(&queries, expected)?;
    info!(count = queries.len(), "Loaded query source");
    Ok(queries)
}

/// Parse the file body, picking the format from the extension.
pub fn parse_queries(path: &Path, raw: &str) -> Result<Vec<QueryDescriptor>, ConfigError> {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let parsed = if is_yaml {
        serde_yaml::from_str::<Vec<QueryDescriptor>>(raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<Vec<QueryDescriptor>>(raw).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Enforce the exact count and tag uniqueness.
pub fn validate_queries(queries: &[QueryDescriptor], expected: usize) -> Result<(), ConfigError> {
    if queries.len() != expected {
        return Err(ConfigError::QueryCount {
            found: queries.len(),
            expected,
        });
    }

    let mut seen = HashSet::new();
    for q in queries {
        if !seen.insert(q.tag.as_str()) {
            return Err(ConfigError::DuplicateTag(q.tag.clone()));
        }
    }
    Ok(())
}
