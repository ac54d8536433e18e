//! # Wellness Brief
//!
//! Fetches a fixed budget of health & wellness news through a search-enabled
//! LLM API, deduplicates and classifies the items, and writes one JSON report
//! per run for the team dashboard.
//!
//! ## Usage
//!
//! ```sh
//! ANTHROPIC_API_KEY=... wellness_brief -q queries.json -o data.json
//! ```
//!
//! ## Architecture
//!
//! The application follows a strictly forward pipeline:
//! 1. **Pre-flight**: credential present, exactly 20 queries, output dir writable
//! 2. **Retrieval**: one provider call at a time under a 20-call budget,
//!    one retry for transient failures, circuit breaker at 5 failed attempts
//! 3. **Normalization**: dedup by title key, region classification, trimming
//! 4. **Assembly**: reputable-first ordering, executive summary, metadata
//! 5. **Output**: atomic write of the JSON report
//!
//! Only pre-flight failures exit non-zero. Anything that goes wrong during
//! retrieval ends up in the report's `errors` and `partial` flag instead.

use chrono::{DateTime, Utc};
use clap::Parser;
use std::error::Error;
use tracing::{error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod controller;
mod error;
mod models;
mod normalize;
mod outputs;
mod queries;
mod report;
mod utils;

use api::{AnthropicSearch, SchemaMode, SearchProvider};
use cli::Cli;
use controller::{CALL_BUDGET, Delay, RetrievalController, RunLimits, TokioDelay};
use error::ConfigError;
use models::{QueryDescriptor, Report};
use normalize::Normalizer;
use outputs::json;
use utils::ensure_parent_dir;

/// Environment variable holding the provider credential. There is no flag.
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Accept the raw credential value, treating empty or blank as absent.
fn credential_from(value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or(ConfigError::MissingCredential)
}

/// Checks that must pass before anything touches the network.
///
/// # Arguments
///
/// * `args` - Parsed command line
/// * `api_key` - Raw value of `ANTHROPIC_API_KEY`, if set
///
/// # Returns
///
/// The credential and the validated queries. Any error here is fatal: the
/// provider is never called and no report is written.
async fn preflight(
    args: &Cli,
    api_key: Option<String>,
) -> Result<(String, Vec<QueryDescriptor>), Box<dyn Error>> {
    let api_key = match credential_from(api_key) {
        Ok(k) => k,
        Err(e) => {
            error!("{API_KEY_ENV} is not set; aborting before any call");
            return Err(e.into());
        }
    };

    let queries = match queries::load_queries(&args.queries, CALL_BUDGET as usize).await {
        Ok(q) => q,
        Err(e) => {
            error!(path = %args.queries.display(), error = %e, "Query source rejected");
            return Err(e.into());
        }
    };

    if let Err(e) = ensure_parent_dir(&args.output).await {
        error!(
            path = %args.output.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    Ok((api_key, queries))
}

/// Retrieval, normalization and assembly for one run.
#[instrument(level = "info", skip_all)]
async fn build_report<P, D>(
    provider: &P,
    delay: D,
    limits: RunLimits,
    schema: SchemaMode,
    queries: &[QueryDescriptor],
    now: DateTime<Utc>,
) -> Report
where
    P: SearchProvider,
    D: Delay,
{
    let controller = RetrievalController::new(provider, delay, limits);
    let outcome = controller.run(queries, schema).await;
    let stats = outcome.stats();

    let items = Normalizer::new().normalize_batches(outcome.batches);
    info!(items = items.len(), "Normalized items");

    report::assemble(items, outcome.errors, &stats, now)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let now = Utc::now();
    info!("wellness_brief starting up");

    let args = Cli::parse();

    // ---- Pre-flight: nothing below may touch the network until these pass ----
    let (api_key, queries) = preflight(&args, std::env::var(API_KEY_ENV).ok()).await?;

    let provider = AnthropicSearch::new(
        args.api_url.clone(),
        api_key,
        args.model.clone(),
        args.max_tokens,
        args.timeout(),
    )?;
    info!(?provider, budget = CALL_BUDGET, "Provider client ready");

    // ---- Run ----
    let report = build_report(
        &provider,
        TokioDelay,
        args.limits(),
        SchemaMode::new(!args.no_schema),
        &queries,
        now,
    )
    .await;

    if let Err(e) = json::write_report(&report, &args.output).await {
        error!(path = %args.output.display(), error = %e, "Failed to write report");
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        items = report.items.len(),
        errors = report.errors.len(),
        calls_used = report.meta.calls_used,
        calls_attempted = report.meta.calls_attempted,
        partial = report.meta.partial,
        path = %args.output.display(),
        "Execution complete"
    );

    Ok(())
}
