//! Report assembly: ordering, executive summary and run metadata.
//!
//! Everything here is computed from data already fetched; no provider calls.

use crate::controller::{HaltReason, RunStats};
use crate::models::{ErrorRecord, ExecutiveSummary, NormalizedItem, Region, Report, ReportMeta};
use crate::utils::{thai_local_stamp, to_bangkok};
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use std::cmp::Ordering;

pub const REPORT_VERSION: &str = "1B-v2.2";
pub const SCHEDULE_LOCAL: &str = "ทุกวัน: 8:00 น.";

/// Entries kept in `trends` and `strategic`.
pub const SUMMARY_LIMIT: usize = 3;

pub const TRENDS_PLACEHOLDER: &str = "ยังไม่มีข้อมูลเทรนด์";
pub const STRATEGIC_PLACEHOLDER: &str = "ยังไม่มีข้อมูลเชิงกลยุทธ์";
pub const LOCAL_PLACEHOLDER: &str = "ยังไม่มีข่าวท้องถิ่นในรอบนี้";

/// Publications and institutions ranked first, lower-cased.
const REPUTABLE_SOURCES: [&str; 24] = [
    "harvard",
    "who",
    "mayo clinic",
    "nih",
    "johns hopkins",
    "cdc",
    "lancet",
    "nature",
    "cleveland clinic",
    "stanford",
    "psychology today",
    "sleep foundation",
    "healthline",
    "webmd",
    "well+good",
    "mindbodygreen",
    "bangkok post",
    "thai pbs",
    "chulalongkorn",
    "mahidol",
    "nejm",
    "bmj",
    "fda",
    "global wellness summit",
];

/// Case-insensitive exact match against the allow-list.
pub fn is_reputable(source: &str) -> bool {
    let source = source.trim().to_lowercase();
    REPUTABLE_SOURCES.contains(&source.as_str())
}

/// Reputable sources first, then case-insensitive title. Stable, so equal
/// titles keep their emission order.
pub fn sort_items(items: &mut [NormalizedItem]) {
    items.sort_by(|a, b| {
        let rank = |i: &NormalizedItem| if is_reputable(&i.source) { 0 } else { 1 };
        match rank(a).cmp(&rank(b)) {
            Ordering::Equal => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            other => other,
        }
    });
}

/// Whole text, case-folded and stripped to alphanumerics. Unlike the title
/// key this is not length-capped, so only fully equal texts collapse.
fn fold_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn first_unique<'a>(texts: impl Iterator<Item = &'a str>) -> Vec<String> {
    texts
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unique_by(|t| fold_text(t))
        .take(SUMMARY_LIMIT)
        .map(str::to_string)
        .collect()
}

/// Build the executive summary from the (sorted) items.
pub fn synthesize_executive_summary(items: &[NormalizedItem]) -> ExecutiveSummary {
    let mut trends = first_unique(items.iter().map(|i| i.summary.as_str()));
    let mut strategic = first_unique(items.iter().map(|i| i.strategic_implication.as_str()));
    let mut local: Vec<String> = items
        .iter()
        .filter(|i| i.region == Region::Local)
        .map(|i| i.title.clone())
        .collect();

    if trends.is_empty() {
        trends.push(TRENDS_PLACEHOLDER.to_string());
    }
    if strategic.is_empty() {
        strategic.push(STRATEGIC_PLACEHOLDER.to_string());
    }
    if local.is_empty() {
        local.push(LOCAL_PLACEHOLDER.to_string());
    }

    ExecutiveSummary {
        trends,
        strategic,
        local,
    }
}

/// Human-readable count summary for `meta.notes`.
pub fn build_notes(
    item_count: usize,
    error_count: usize,
    stats: &RunStats,
    partial: bool,
) -> String {
    let mut notes = format!(
        "{} articles from {} successful calls ({} attempted, budget {}). {} errors. {}",
        item_count,
        stats.calls_used,
        stats.calls_attempted,
        stats.calls_budget,
        error_count,
        if partial { "PARTIAL" } else { "OK" },
    );
    match stats.halt {
        Some(HaltReason::CircuitBreaker) => notes.push_str(": stopped early by circuit breaker."),
        Some(HaltReason::Budget) => notes.push_str(": stopped early, call budget exhausted."),
        None => {}
    }
    notes
}

/// Put the run's results together into the final document.
///
/// # Arguments
///
/// * `items` - Normalized items in emission order; sorted here
/// * `errors` - One record per query that ultimately failed
/// * `stats` - Call counters and halt reason from the controller
/// * `now` - Run timestamp, rendered both as UTC ISO-8601 and Bangkok local
///
/// # Returns
///
/// The complete [`Report`]. `meta.partial` is set when any query failed or
/// fewer calls succeeded than the budget allows.
pub fn assemble(
    mut items: Vec<NormalizedItem>,
    errors: Vec<ErrorRecord>,
    stats: &RunStats,
    now: DateTime<Utc>,
) -> Report {
    sort_items(&mut items);
    let executive_summary = synthesize_executive_summary(&items);

    let partial = !errors.is_empty() || stats.calls_used < stats.calls_budget;
    let notes = build_notes(items.len(), errors.len(), stats, partial);

    let meta = ReportMeta {
        version: REPORT_VERSION.to_string(),
        generated_at_iso: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        generated_at_local: thai_local_stamp(&to_bangkok(now)),
        schedule_local: SCHEDULE_LOCAL.to_string(),
        calls_used: stats.calls_used,
        calls_attempted: stats.calls_attempted,
        calls_budget: stats.calls_budget,
        partial,
        schema_constrained: stats.schema_constrained,
        notes,
    };

    Report {
        meta,
        executive_summary,
        items,
        errors,
    }
}
