//! Budget-governed retrieval loop.
//!
//! Drives the query list through [`execute`] one call at a time under three
//! limits:
//! - a global attempt budget, checked before every attempt,
//! - at most two attempts per query, the second only after a transient failure,
//! - a circuit breaker on consecutive failed *attempts* (a retry's failure
//!   counts too; any success resets it).
//!
//! Hitting the budget or the breaker stops the whole run; the caller still
//! assembles a (partial) report from whatever was collected. Pacing and
//! backoff go through the [`Delay`] trait so tests can run without sleeping.

use crate::api::{SchemaMode, SearchProvider, execute};
use crate::error::ProviderError;
use crate::models::{ErrorRecord, QueryDescriptor, RawResultItem};
use crate::utils::{sanitize_message, truncate_for_log};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Provider calls allowed per run; also the required query count.
pub const CALL_BUDGET: u32 = 20;
pub const CONSECUTIVE_FAIL_LIMIT: u32 = 5;
pub const MAX_ATTEMPTS_PER_QUERY: u32 = 2;
/// Cap for messages stored in error records.
pub const ERROR_MESSAGE_MAX: usize = 200;

/// Limits and timings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub call_budget: u32,
    pub consecutive_fail_limit: u32,
    pub max_attempts_per_query: u32,
    /// Sleep before every attempt except the first of the run.
    pub pace: Duration,
    /// Extra sleep before a retry.
    pub backoff: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            call_budget: CALL_BUDGET,
            consecutive_fail_limit: CONSECUTIVE_FAIL_LIMIT,
            max_attempts_per_query: MAX_ATTEMPTS_PER_QUERY,
            pace: Duration::from_millis(1500),
            backoff: Duration::from_millis(3000),
        }
    }
}

/// Timed suspension between attempts.
pub trait Delay {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeping via tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Never sleeps.
#[cfg(test)]
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

#[cfg(test)]
impl Delay for NoDelay {
    async fn sleep(&self, _duration: Duration) {}
}

/// The controller's working memory for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Never exceeds the budget.
    pub calls_attempted: u32,
    pub calls_succeeded: u32,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
    pub schema: SchemaMode,
}

impl RunState {
    pub fn new(schema: SchemaMode) -> Self {
        Self {
            calls_attempted: 0,
            calls_succeeded: 0,
            consecutive_failures: 0,
            schema,
        }
    }
}

/// Outcome of one attempt, as seen by the loop.
#[derive(Debug)]
pub enum Attempt {
    Success(Vec<Value>),
    Transient(ProviderError),
    Permanent(ProviderError),
}

impl From<Result<Vec<Value>, ProviderError>> for Attempt {
    fn from(res: Result<Vec<Value>, ProviderError>) -> Self {
        match res {
            Ok(items) => Attempt::Success(items),
            Err(e) if e.is_transient() => Attempt::Transient(e),
            Err(e) => Attempt::Permanent(e),
        }
    }
}

/// Why a run stopped before the end of the query list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    CircuitBreaker,
    Budget,
}

/// Items from one successful query, in response order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBatch {
    pub tag: String,
    pub items: Vec<RawResultItem>,
}

/// Everything the loop produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOutcome {
    /// In query processing order.
    pub batches: Vec<QueryBatch>,
    pub errors: Vec<ErrorRecord>,
    /// Successful calls.
    pub calls_used: u32,
    pub calls_attempted: u32,
    pub calls_budget: u32,
    pub halt: Option<HaltReason>,
    /// Whether schema-constrained output was still on at the end.
    pub schema_constrained: bool,
}

impl RetrievalOutcome {
    /// Counters and flags the report needs.
    pub fn stats(&self) -> RunStats {
        RunStats {
            calls_used: self.calls_used,
            calls_attempted: self.calls_attempted,
            calls_budget: self.calls_budget,
            halt: self.halt,
            schema_constrained: self.schema_constrained,
        }
    }
}

/// Final counters of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub calls_used: u32,
    pub calls_attempted: u32,
    pub calls_budget: u32,
    pub halt: Option<HaltReason>,
    pub schema_constrained: bool,
}

enum QueryOutcome {
    Succeeded(Vec<RawResultItem>),
    Failed(ErrorRecord),
}

/// Runs the query list against a provider.
pub struct RetrievalController<'a, P, D> {
    provider: &'a P,
    delay: D,
    limits: RunLimits,
}

impl<'a, P, D> RetrievalController<'a, P, D>
where
    P: SearchProvider,
    D: Delay,
{
    pub fn new(provider: &'a P, delay: D, limits: RunLimits) -> Self {
        Self {
            provider,
            delay,
            limits,
        }
    }

    /// Process `queries` in order until exhausted, out of budget, or tripped.
    #[instrument(level = "info", skip_all, fields(queries = queries.len()))]
    pub async fn run(&self, queries: &[QueryDescriptor], schema: SchemaMode) -> RetrievalOutcome {
        let mut state = RunState::new(schema);
        let mut batches = Vec::new();
        let mut errors = Vec::new();
        let mut halt = None;

        for query in queries {
            if state.consecutive_failures >= self.limits.consecutive_fail_limit {
                warn!(
                    consecutive_failures = state.consecutive_failures,
                    limit = self.limits.consecutive_fail_limit,
                    "Circuit breaker tripped; halting run"
                );
                halt = Some(HaltReason::CircuitBreaker);
                break;
            }
            if state.calls_attempted >= self.limits.call_budget {
                warn!(
                    calls_attempted = state.calls_attempted,
                    budget = self.limits.call_budget,
                    "Call budget exhausted; halting run"
                );
                halt = Some(HaltReason::Budget);
                break;
            }

            info!(
                tag = %query.tag,
                call = state.calls_attempted + 1,
                budget = self.limits.call_budget,
                query = %truncate_for_log(&query.text, 60),
                "Running query"
            );

            match self.run_query(&mut state, query).await {
                QueryOutcome::Succeeded(items) => {
                    info!(tag = %query.tag, items = items.len(), "Query succeeded");
                    batches.push(QueryBatch {
                        tag: query.tag.clone(),
                        items,
                    });
                }
                QueryOutcome::Failed(record) => {
                    warn!(
                        tag = %record.tag,
                        attempts = record.attempts,
                        consecutive_failures = state.consecutive_failures,
                        error = %record.message,
                        "Query failed"
                    );
                    errors.push(record);
                }
            }
        }

        info!(
            calls_used = state.calls_succeeded,
            calls_attempted = state.calls_attempted,
            errors = errors.len(),
            halt = ?halt,
            "Retrieval finished"
        );

        RetrievalOutcome {
            batches,
            errors,
            calls_used: state.calls_succeeded,
            calls_attempted: state.calls_attempted,
            calls_budget: self.limits.call_budget,
            halt,
            schema_constrained: state.schema.enabled(),
        }
    }

    /// Up to two attempts for one query. The caller has already checked the
    /// budget for the first one.
    async fn run_query(&self, state: &mut RunState, query: &QueryDescriptor) -> QueryOutcome {
        let mut attempts = 0u32;
        let mut messages: Vec<String> = Vec::new();

        loop {
            if state.calls_attempted > 0 {
                self.delay.sleep(self.limits.pace).await;
            }
            state.calls_attempted += 1;
            attempts += 1;

            let result = execute(self.provider, &mut state.schema, &query.text).await;
            let (error, transient) = match Attempt::from(result) {
                Attempt::Success(values) => {
                    state.calls_succeeded += 1;
                    state.consecutive_failures = 0;
                    let items = values
                        .iter()
                        .map(|v| RawResultItem::from_value(v, query))
                        .collect();
                    return QueryOutcome::Succeeded(items);
                }
                Attempt::Transient(e) => (e, true),
                Attempt::Permanent(e) => (e, false),
            };

            state.consecutive_failures += 1;
            messages.push(error.to_string());

            let can_retry = transient
                && attempts < self.limits.max_attempts_per_query
                && state.calls_attempted < self.limits.call_budget
                && state.consecutive_failures < self.limits.consecutive_fail_limit;

            if !can_retry {
                return QueryOutcome::Failed(ErrorRecord {
                    tag: query.tag.clone(),
                    error_kind: error.kind(),
                    message: record_message(&messages),
                    attempts,
                });
            }

            warn!(
                tag = %query.tag,
                attempt = attempts,
                backoff_ms = self.limits.backoff.as_millis() as u64,
                error = %error,
                "Transient failure; retrying"
            );
            self.delay.sleep(self.limits.backoff).await;
        }
    }
}

/// `first | retry: second`, sanitized and capped.
fn record_message(messages: &[String]) -> String {
    match messages {
        [] => String::new(),
        [only] => sanitize_message(only, ERROR_MESSAGE_MAX),
        [first, .., last] => {
            let first = sanitize_message(first, ERROR_MESSAGE_MAX / 2 - 10);
            let last = sanitize_message(last, ERROR_MESSAGE_MAX / 2);
            format!("{first} | retry: {last}")
        }
    }
}
