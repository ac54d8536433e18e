//! Item normalization: dedup, region classification and field cleanup.
//!
//! Items arrive grouped by query in processing order. The first item to
//! produce a given [`dedup_key`] wins; later duplicates are dropped, whether
//! they come from the same response or a later query.

use crate::controller::QueryBatch;
use crate::models::{NormalizedItem, RawResultItem, Region};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// Characters kept in a dedup key.
pub const DEDUP_KEY_LEN: usize = 50;
/// Hex characters kept in an item id.
pub const ITEM_ID_LEN: usize = 12;

/// Home market: Thailand, its capital, and its major health institutions.
static HOME_MARKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)thai|bangkok|chula|mahidol|siriraj|bumrungrad|\bbdi\b|\bmoph\b")
        .expect("static regex compiles")
});

/// Wider Asia-Pacific region.
static REGIONAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)asean|singapore|japan|korea|china|india|vietnam|indonesia|philippines|malaysia|hong\s*kong|taiwan|asia",
    )
    .expect("static regex compiles")
});

/// Case-folded, alphanumeric-only title prefix used to spot duplicates.
pub fn dedup_key(title: &str) -> String {
    title
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .take(DEDUP_KEY_LEN)
        .collect()
}

/// Short stable id: md5 of the lower-cased trimmed title.
pub fn item_id(title: &str) -> String {
    let digest = md5::compute(title.trim().to_lowercase().as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(ITEM_ID_LEN);
    hex
}

/// Decide the region for an item.
///
/// `text` is the item's title, summary and source joined. A `local` query
/// always yields [`Region::Local`].
pub fn classify_region(text: &str, demographic: &str) -> Region {
    if demographic.trim().eq_ignore_ascii_case("local") || HOME_MARKET.is_match(text) {
        Region::Local
    } else if REGIONAL.is_match(text) {
        Region::Regional
    } else {
        Region::Global
    }
}

/// Run-scoped normalizer; owns the set of dedup keys seen so far.
#[derive(Debug, Default)]
pub struct Normalizer {
    seen: HashSet<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one raw item, or `None` if it has no title or is a duplicate.
    pub fn normalize(&mut self, raw: RawResultItem) -> Option<NormalizedItem> {
        let title = raw.title.trim();
        if title.is_empty() {
            debug!(tag = %raw.tag, "Dropping item without title");
            return None;
        }

        let key = dedup_key(title);
        if !self.seen.insert(key.clone()) {
            debug!(tag = %raw.tag, %key, "Dropping duplicate item");
            return None;
        }

        let summary = raw.summary.trim();
        let source = raw.source.trim();
        let region = classify_region(&format!("{title} {summary} {source}"), &raw.demographic);

        Some(NormalizedItem {
            id: item_id(title),
            title: title.to_string(),
            summary: summary.to_string(),
            source: source.to_string(),
            url: raw.url,
            published_at: None,
            region,
            badge_color: raw.display_attribute.trim().to_string(),
            strategic_implication: raw.strategic_implication.trim().to_string(),
            query_tag: raw.tag.trim().to_string(),
            demographic: raw.demographic.trim().to_string(),
            fetched_from_query: raw.query_text.trim().to_string(),
            dedup_key: key,
        })
    }

    /// Normalize every batch in order.
    pub fn normalize_batches(&mut self, batches: Vec<QueryBatch>) -> Vec<NormalizedItem> {
        let mut out = Vec::new();
        for batch in batches {
            let before = out.len();
            out.extend(batch.items.into_iter().filter_map(|raw| self.normalize(raw)));
            debug!(tag = %batch.tag, kept = out.len() - before, "Normalized batch");
        }
        out
    }
}
