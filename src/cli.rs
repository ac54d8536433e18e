//! Command-line interface definitions for Wellness Brief.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! All arguments can be provided via command-line flags or environment variables.
//! The API key is the exception: it is read from `ANTHROPIC_API_KEY` only and
//! has no flag, so it never shows up in argv or shell history.

use crate::controller::{CALL_BUDGET, CONSECUTIVE_FAIL_LIMIT, MAX_ATTEMPTS_PER_QUERY, RunLimits};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Command-line arguments for the Wellness Brief application.
///
/// # Examples
///
/// ```sh
/// # Defaults: ./queries.json in, ./data.json out, key from ANTHROPIC_API_KEY
/// wellness_brief
///
/// # Custom paths and slower pacing
/// wellness_brief -q config/queries.yaml -o public/data.json --pace-ms 3000
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Query source file (JSON array, or YAML for .yaml/.yml)
    #[arg(short, long, env = "WELLNESS_QUERIES", default_value = "queries.json")]
    pub queries: PathBuf,

    /// Where to write the JSON report
    #[arg(short, long, env = "WELLNESS_OUTPUT", default_value = "data.json")]
    pub output: PathBuf,

    /// Messages API endpoint
    #[arg(
        long,
        env = "ANTHROPIC_API_URL",
        default_value = "https://api.anthropic.com/v1/messages",
        value_parser = Url::parse
    )]
    pub api_url: Url,

    /// Model identifier
    #[arg(long, default_value = "claude-sonnet-4-20250514")]
    pub model: String,

    /// Maximum output tokens per call
    #[arg(long, default_value_t = 1024)]
    pub max_tokens: u32,

    /// Pause before every call except the first, in milliseconds
    #[arg(long, default_value_t = 1500)]
    pub pace_ms: u64,

    /// Extra pause before a retry, in milliseconds
    #[arg(long, default_value_t = 3000)]
    pub backoff_ms: u64,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Never request schema-constrained output
    #[arg(long)]
    pub no_schema: bool,
}

impl Cli {
    pub fn limits(&self) -> RunLimits {
        RunLimits {
            call_budget: CALL_BUDGET,
            consecutive_fail_limit: CONSECUTIVE_FAIL_LIMIT,
            max_attempts_per_query: MAX_ATTEMPTS_PER_QUERY,
            pace: Duration::from_millis(self.pace_ms),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
