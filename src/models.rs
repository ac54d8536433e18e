//! Data models for queries, result items and the emitted report.
//!
//! This module defines the core data structures used throughout the application:
//! - [`QueryDescriptor`]: One entry of the query source file
//! - [`RawResultItem`]: One provider-supplied news object, tagged with its query
//! - [`NormalizedItem`]: A deduplicated, region-classified, trimmed item
//! - [`ErrorRecord`]: One query that ultimately failed
//! - [`Report`]: The single JSON document written per run
//!
//! Field names on the wire use snake_case to match the prompt contract and the
//! query file format consumed by the dashboard.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One search query, loaded from the query source and never mutated.
///
/// The file format keeps the historical key names (`query_tag`, `badge_color`,
/// `query_text`), hence the renames.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Unique within a run.
    #[serde(rename = "query_tag")]
    pub tag: String,
    /// `"local"` or any other audience label.
    pub demographic: String,
    /// Opaque display hint passed through to every item of this query.
    #[serde(rename = "badge_color")]
    pub display_attribute: String,
    /// The search payload sent to the provider.
    #[serde(rename = "query_text")]
    pub text: String,
}

/// A provider-supplied news object tagged with the query that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResultItem {
    pub title: String,
    pub summary: String,
    pub source: String,
    pub url: Option<String>,
    pub strategic_implication: String,
    pub tag: String,
    pub display_attribute: String,
    pub demographic: String,
    pub query_text: String,
}

impl RawResultItem {
    /// Build an item from one element of the provider's JSON array.
    ///
    /// Missing or non-string fields become empty strings; `url` stays `None`
    /// unless it is a string.
    pub fn from_value(value: &Value, query: &QueryDescriptor) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        RawResultItem {
            title: text("title"),
            summary: text("summary"),
            source: text("source"),
            url: value.get("url").and_then(Value::as_str).map(str::to_string),
            strategic_implication: text("strategic_implication"),
            tag: query.tag.clone(),
            display_attribute: query.display_attribute.clone(),
            demographic: query.demographic.clone(),
            query_text: query.text.clone(),
        }
    }
}

/// Geographic relevance of an item.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Local,
    Regional,
    Global,
}

/// A result item after deduplication, classification and trimming.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NormalizedItem {
    /// Short stable id derived from the title.
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    /// Passed through from the provider untouched.
    pub url: Option<String>,
    /// The provider never supplies a date; always `null`.
    pub published_at: Option<String>,
    pub region: Region,
    pub badge_color: String,
    pub strategic_implication: String,
    pub query_tag: String,
    pub demographic: String,
    pub fetched_from_query: String,
    /// Case-folded, alphanumeric-only, length-capped title.
    pub dedup_key: String,
}

/// Report-facing failure classification.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    ServerError,
    Network,
    Timeout,
    ClientError,
    Contract,
    Stopped,
}

/// One query that ultimately failed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorRecord {
    #[serde(rename = "query_tag")]
    pub tag: String,
    #[serde(rename = "error_type")]
    pub error_kind: ErrorKind,
    /// Sanitized and length-capped.
    pub message: String,
    /// 1 or 2.
    pub attempts: u32,
}

/// Client-side digest of the items.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExecutiveSummary {
    pub trends: Vec<String>,
    pub strategic: Vec<String>,
    pub local: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReportMeta {
    pub version: String,
    pub generated_at_iso: String,
    pub generated_at_local: String,
    pub schedule_local: String,
    /// Successful provider calls.
    pub calls_used: u32,
    pub calls_attempted: u32,
    pub calls_budget: u32,
    pub partial: bool,
    /// Whether schema-constrained output was still enabled when the run ended.
    pub schema_constrained: bool,
    pub notes: String,
}

/// The single document emitted per run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Report {
    pub meta: ReportMeta,
    pub executive_summary: ExecutiveSummary,
    pub items: Vec<NormalizedItem>,
    pub errors: Vec<ErrorRecord>,
}
