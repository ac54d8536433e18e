//! Provider interaction: one search-enabled LLM request per call.
//!
//! This module is the query executor. It owns the request/response contract
//! with the provider and turns every failure into a classified
//! [`ProviderError`], but it never retries on its own: pacing, retry and the
//! call budget belong to the retrieval controller.
//!
//! # Architecture
//!
//! - [`SearchProvider`]: sends exactly one request and returns the raw reply
//! - [`AnthropicSearch`]: the Messages API implementation with web search enabled
//! - [`SchemaMode`]: run-scoped, sticky switch for schema-constrained output
//! - [`execute`]: one executor call; handles the schema downgrade and
//!   validates the reply against the two-item contract
//!
//! # Schema downgrade
//!
//! When a constrained request is rejected because the provider does not know
//! the output schema field, [`execute`] disables [`SchemaMode`] for the rest of
//! the run and re-issues the same query once, unconstrained. That re-issue is
//! part of the same executor call and is not a query-level retry.

use crate::error::ProviderError;
use crate::utils::{looks_truncated, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Items every reply must contain.
pub const ITEMS_PER_QUERY: usize = 2;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const STRUCTURED_OUTPUT_BETA: &str = "structured-outputs-2025-11-13";

pub const SYSTEM_PROMPT: &str = "You are a strategic health & wellness intelligence curator for a business team. \
Given search results, extract exactly 2 news items. \
Return ONLY a JSON array of objects with: \
title (string), summary (one sentence), source (publication name), \
url (string or null), \
strategic_implication (one sentence explaining what this means for organizations \
and what teams should prepare for). \
No markdown fences, no explanation. JSON only.";

/// Stop reasons that void a reply.
const HARD_STOP_REASONS: [&str; 2] = ["max_tokens", "refusal"];

/// Phrases naming the schema field in a rejection body.
const SCHEMA_FIELD_PHRASES: [&str; 3] = ["output_format", "json_schema", "structured output"];

/// Phrases saying that field is not accepted.
const SCHEMA_REJECTION_PHRASES: [&str; 6] = [
    "unknown",
    "unsupported",
    "not supported",
    "not permitted",
    "unexpected",
    "unrecognized",
];

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?").expect("static regex compiles"));

/// The parts of a provider reply the executor cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderReply {
    /// Text segments in reply order; non-text blocks are dropped.
    pub texts: Vec<String>,
    pub stop_reason: Option<String>,
}

/// Sends exactly one request to the provider.
///
/// Implementors must not retry. A returned error must already be classified.
pub trait SearchProvider {
    /// Submit `query_text`, optionally asking for schema-constrained output.
    async fn send(
        &self,
        query_text: &str,
        constrained: bool,
    ) -> Result<ProviderReply, ProviderError>;
}

/// Whether schema-constrained output is still requested in this run.
///
/// Starts enabled unless configured otherwise; once disabled it stays
/// disabled until the run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaMode {
    enabled: bool,
}

impl SchemaMode {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

/// Heuristic: does this 4xx body say the output schema field is unsupported?
///
/// Matches when the status is 400-class and the lower-cased body contains one
/// of [`SCHEMA_FIELD_PHRASES`] together with one of
/// [`SCHEMA_REJECTION_PHRASES`]. Provider wording can change without notice,
/// so a miss here simply surfaces as a permanent client error.
pub fn is_schema_unsupported(status: u16, body: &str) -> bool {
    if !(400..500).contains(&status) {
        return false;
    }
    let body = body.to_lowercase();
    SCHEMA_FIELD_PHRASES.iter().any(|p| body.contains(p))
        && SCHEMA_REJECTION_PHRASES.iter().any(|p| body.contains(p))
}

/// JSON schema for the two-item reply.
pub fn output_schema() -> Value {
    json!({
        "type": "array",
        "minItems": ITEMS_PER_QUERY,
        "maxItems": ITEMS_PER_QUERY,
        "items": {
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "summary": { "type": "string" },
                "source": { "type": "string" },
                "url": { "type": ["string", "null"] },
                "strategic_implication": { "type": "string" }
            },
            "required": ["title", "summary", "source", "url", "strategic_implication"],
            "additionalProperties": false
        }
    })
}

/// Build the Messages API request body.
pub fn build_request_body(
    model: &str,
    max_tokens: u32,
    query_text: &str,
    constrained: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": SYSTEM_PROMPT,
        "messages": [{
            "role": "user",
            "content": format!(
                "Find 2 most recent and important health/wellness news from this search. JSON array only:\n{query_text}"
            ),
        }],
        "tools": [{ "type": "web_search_20250305", "name": "web_search" }],
    });
    if constrained {
        body["output_format"] = json!({
            "type": "json_schema",
            "schema": output_schema(),
        });
    }
    body
}

/// Validate a reply against the contract and return its items verbatim.
pub fn parse_reply(reply: &ProviderReply) -> Result<Vec<Value>, ProviderError> {
    if let Some(reason) = reply.stop_reason.as_deref() {
        if HARD_STOP_REASONS.contains(&reason) {
            return Err(ProviderError::Stopped(reason.to_string()));
        }
    }

    let text = reply
        .texts
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::Contract("empty text payload".to_string()))?;

    let clean = CODE_FENCE.replace_all(text, "");
    let clean = clean.trim();

    let parsed: Value = serde_json::from_str(clean).map_err(|e| {
        if looks_truncated(&e) {
            ProviderError::Contract(format!("truncated JSON: {e}"))
        } else {
            ProviderError::Contract(format!("malformed JSON: {e}"))
        }
    })?;

    match parsed {
        Value::Array(items) if items.len() == ITEMS_PER_QUERY => Ok(items),
        Value::Array(items) => Err(ProviderError::Contract(format!(
            "expected exactly {ITEMS_PER_QUERY} items, got {}",
            items.len()
        ))),
        other => Err(ProviderError::Contract(format!(
            "expected a JSON array, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One executor call for one query.
///
/// Performs one provider request, plus at most one unconstrained re-issue
/// when the constrained request is rejected as unsupported.
///
/// # Arguments
///
/// * `provider` - Transport that performs the single request
/// * `schema` - Run-wide schema flag; cleared for good on a schema rejection
/// * `query_text` - Search payload from the query descriptor
///
/// # Returns
///
/// Exactly [`ITEMS_PER_QUERY`] JSON objects, or a classified [`ProviderError`].
/// Truncated or refused replies and malformed arrays are errors, never partial
/// results.
#[instrument(level = "info", skip_all)]
pub async fn execute<P: SearchProvider>(
    provider: &P,
    schema: &mut SchemaMode,
    query_text: &str,
) -> Result<Vec<Value>, ProviderError> {
    let reply = match provider.send(query_text, schema.enabled()).await {
        Err(ProviderError::SchemaUnsupported { status, message }) => {
            warn!(
                status,
                body = %truncate_for_log(&message, 200),
                "Provider rejected schema-constrained output; disabling it for this run"
            );
            schema.disable();
            provider.send(query_text, false).await?
        }
        other => other?,
    };
    parse_reply(&reply)
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl From<MessagesResponse> for ProviderReply {
    fn from(resp: MessagesResponse) -> Self {
        ProviderReply {
            texts: resp
                .content
                .into_iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text)
                .collect(),
            stop_reason: resp.stop_reason,
        }
    }
}

/// Anthropic Messages API client with the web search tool enabled.
pub struct AnthropicSearch {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicSearch {
    /// Build a client with a per-request timeout.
    pub fn new(
        api_url: Url,
        api_key: String,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
            max_tokens,
        })
    }
}

impl fmt::Debug for AnthropicSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicSearch")
            .field("api_url", &self.api_url.as_str())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl SearchProvider for AnthropicSearch {
    #[instrument(level = "info", skip_all, fields(constrained = constrained))]
    async fn send(
        &self,
        query_text: &str,
        constrained: bool,
    ) -> Result<ProviderReply, ProviderError> {
        let t0 = Instant::now();
        let body = build_request_body(&self.model, self.max_tokens, query_text, constrained);

        let mut request = self
            .client
            .post(self.api_url.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if constrained {
            request = request.header("anthropic-beta", STRUCTURED_OUTPUT_BETA);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let status = status.as_u16();
            warn!(
                status,
                elapsed_ms = t0.elapsed().as_millis() as u64,
                body = %truncate_for_log(&text, 300),
                "Provider returned an error status"
            );
            if constrained && is_schema_unsupported(status, &text) {
                return Err(ProviderError::SchemaUnsupported {
                    status,
                    message: text,
                });
            }
            return Err(ProviderError::from_status(status, &text));
        }

        let parsed: MessagesResponse = response.json().await?;
        let reply = ProviderReply::from(parsed);
        debug!(
            text_blocks = reply.texts.len(),
            stop_reason = ?reply.stop_reason,
            "Provider reply received"
        );
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Provider call succeeded");
        Ok(reply)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory provider shared by executor and controller tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub fn reply_with(titles: &[&str]) -> ProviderReply {
        let items: Vec<Value> = titles
            .iter()
            .map(|t| {
                json!({
                    "title": t,
                    "summary": format!("Summary of {t}"),
                    "source": "Healthline",
                    "url": null,
                    "strategic_implication": format!("Prepare for {t}"),
                })
            })
            .collect();
        ProviderReply {
            texts: vec![Value::Array(items).to_string()],
            stop_reason: Some("end_turn".to_string()),
        }
    }

    /// Pops scripted outcomes in order; once empty, answers with two fresh items.
    #[derive(Default)]
    pub struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ProviderReply, ProviderError>>>,
        pub calls: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<Result<ProviderReply, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn constrained_flags(&self) -> Vec<bool> {
            self.calls.lock().unwrap().iter().map(|(_, c)| *c).collect()
        }
    }

    impl SearchProvider for ScriptedProvider {
        async fn send(
            &self,
            query_text: &str,
            constrained: bool,
        ) -> Result<ProviderReply, ProviderError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((query_text.to_string(), constrained));
                calls.len()
            };
            match self.script.lock().unwrap().pop_front() {
                Some(outcome) => outcome,
                None => {
                    let a = format!("{query_text} headline A{n}");
                    let b = format!("{query_text} headline B{n}");
                    Ok(reply_with(&[&a, &b]))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedProvider, reply_with};
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn text_reply(text: &str) -> ProviderReply {
        ProviderReply {
            texts: vec![text.to_string()],
            stop_reason: Some("end_turn".to_string()),
        }
    }

    #[test]
    fn test_parse_reply_accepts_two_items() {
        let items = parse_reply(&reply_with(&["One", "Two"])).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "One");
    }

    #[test]
    fn test_parse_reply_strips_fences() {
        let reply = text_reply("```json\n[{\"title\":\"a\"},{\"title\":\"b\"}]\n```");
        assert_eq!(parse_reply(&reply).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_reply_uses_first_non_empty_text() {
        let reply = ProviderReply {
            texts: vec!["   ".to_string(), "[{}, {}]".to_string(), "ignored".to_string()],
            stop_reason: None,
        };
        assert_eq!(parse_reply(&reply).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_reply_contract_violations() {
        let cases = [
            ProviderReply::default(),
            text_reply("not json at all"),
            text_reply("{\"title\": \"object\"}"),
            text_reply("[{\"title\": \"only one\"}]"),
            text_reply("[{}, {}, {}]"),
            text_reply("[{\"title\": \"cut"),
        ];
        for reply in cases {
            let err = parse_reply(&reply).unwrap_err();
            assert!(matches!(err, ProviderError::Contract(_)), "{reply:?} -> {err:?}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_parse_reply_hard_stops() {
        for reason in ["max_tokens", "refusal"] {
            let mut reply = reply_with(&["a", "b"]);
            reply.stop_reason = Some(reason.to_string());
            assert_eq!(
                parse_reply(&reply).unwrap_err(),
                ProviderError::Stopped(reason.to_string())
            );
        }
    }

    #[test]
    fn test_is_schema_unsupported() {
        assert!(is_schema_unsupported(
            400,
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"output_format: Extra inputs are not permitted"}}"#
        ));
        assert!(is_schema_unsupported(400, "Unknown field json_schema"));
        assert!(!is_schema_unsupported(500, "output_format unsupported"));
        assert!(!is_schema_unsupported(400, "max_tokens: unknown value"));
        assert!(!is_schema_unsupported(401, "invalid x-api-key"));
    }

    #[test]
    fn test_request_body_schema_toggle() {
        let constrained = build_request_body("m", 1024, "sleep", true);
        assert_eq!(constrained["output_format"]["type"], "json_schema");
        assert_eq!(constrained["tools"][0]["name"], "web_search");
        assert!(
            constrained["messages"][0]["content"]
                .as_str()
                .unwrap()
                .ends_with("\nsleep")
        );

        let plain = build_request_body("m", 1024, "sleep", false);
        assert!(plain.get("output_format").is_none());
        assert_eq!(plain["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn test_execute_downgrades_schema_once() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::SchemaUnsupported {
                status: 400,
                message: "output_format: unknown field".to_string(),
            }),
            Ok(reply_with(&["x", "y"])),
        ]);
        let mut schema = SchemaMode::new(true);

        let items = execute(&provider, &mut schema, "q").await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(!schema.enabled());
        assert_eq!(provider.constrained_flags(), vec![true, false]);

        execute(&provider, &mut schema, "q2").await.unwrap();
        assert_eq!(provider.constrained_flags(), vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_execute_passes_other_errors_through() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::from_status(
            400,
            "bad request",
        ))]);
        let mut schema = SchemaMode::new(true);
        let err = execute(&provider, &mut schema, "q").await.unwrap_err();
        assert!(matches!(err, ProviderError::Client { status: 400, .. }));
        assert!(schema.enabled());
        assert_eq!(provider.call_count(), 1);
    }

    fn client_for(server: &MockServer) -> AnthropicSearch {
        let url = Url::parse(&format!("{}/v1/messages", server.uri())).unwrap();
        AnthropicSearch::new(
            url,
            "test-key".to_string(),
            "claude-test".to_string(),
            1024,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn messages_body(text: &str, stop_reason: &str) -> Value {
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                { "type": "server_tool_use", "id": "t1", "name": "web_search", "input": {} },
                { "type": "text", "text": text }
            ],
            "stop_reason": stop_reason
        })
    }

    #[tokio::test]
    async fn test_anthropic_search_success() {
        let server = MockServer::start().await;
        let items = json!([
            {
                "title": "A",
                "summary": "s",
                "source": "WHO",
                "url": null,
                "strategic_implication": "i"
            },
            {
                "title": "B",
                "summary": "s",
                "source": "CDC",
                "url": "https://cdc.gov",
                "strategic_implication": "i"
            }
        ])
        .to_string();
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(messages_body(&items, "end_turn")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut schema = SchemaMode::new(false);
        let out = execute(&client, &mut schema, "sleep").await.unwrap();
        assert_eq!(out[1]["source"], "CDC");
    }

    #[tokio::test]
    async fn test_anthropic_search_classifies_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("q-ratelimit"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("q-overload"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("q-unauth"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rate = client.send("q-ratelimit", false).await.unwrap_err();
        assert!(matches!(rate, ProviderError::RateLimited(_)));
        assert!(rate.is_transient());

        let server_err = client.send("q-overload", false).await.unwrap_err();
        assert!(matches!(server_err, ProviderError::Server { status: 529, .. }));

        let auth = client.send("q-unauth", false).await.unwrap_err();
        assert!(matches!(auth, ProviderError::Client { status: 401, .. }));
        assert!(!auth.is_transient());
    }

    #[tokio::test]
    async fn test_anthropic_search_schema_rejection_then_plain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("output_format"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": {
                    "type": "invalid_request_error",
                    "message": "output_format: Extra inputs are not permitted"
                }
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(messages_body(r#"[{"title":"A"},{"title":"B"}]"#, "end_turn")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut schema = SchemaMode::new(true);
        let out = execute(&client, &mut schema, "sleep").await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(!schema.enabled());
    }

    #[tokio::test]
    async fn test_anthropic_search_refusal_is_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(messages_body("[{}, {}]", "refusal")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut schema = SchemaMode::new(false);
        let err = execute(&client, &mut schema, "sleep").await.unwrap_err();
        assert_eq!(err, ProviderError::Stopped("refusal".to_string()));
    }

    #[tokio::test]
    async fn test_anthropic_search_network_error_is_transient() {
        // Nothing listens on port 9 locally.
        let url = Url::parse("http://127.0.0.1:9/v1/messages").unwrap();
        let client = AnthropicSearch::new(
            url,
            "k".to_string(),
            "m".to_string(),
            16,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.send("q", false).await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
