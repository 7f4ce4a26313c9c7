use futures::channel::mpsc;
use futures::StreamExt;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::constants::endpoints;
use crate::context::{ProviderPart, ProviderTurn, UsageDelta};
use crate::error::ChatError;
use crate::llm::traits::*;

/// Client for the Gemini REST API (`generativelanguage.googleapis.com`).
#[derive(Clone)]
pub struct GeminiClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: endpoints::GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// `{base}/v1beta/{path}`
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, endpoints::API_VERSION, path)
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        self.api_url(&format!("models/{model}:{method}"))
    }

    pub(crate) fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(endpoints::API_KEY_HEADER, &self.api_key)
    }

    /// Turn a non-2xx response into a provider error.
    pub(crate) async fn check_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(response.headers().get("retry-after"));
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
        Err(map_http_error(status, body, retry_after))
    }

    async fn post_generate(
        &self,
        model: &str,
        method: &str,
        history: &[ProviderTurn],
        config: &GenerationConfig,
    ) -> Result<reqwest::Response, ChatError> {
        let body = build_request_body(history, config);
        let mut url = self.model_url(model, method);
        if method == "streamGenerateContent" {
            url.push_str("?alt=sse");
        }

        tracing::debug!(model, turns = history.len(), "sending Gemini {method}");
        let response = self.authed(self.client.post(&url)).json(&body).send().await?;
        Self::check_status(response).await
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        history: &[ProviderTurn],
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, ChatError> {
        let response = self
            .post_generate(model, "generateContent", history, config)
            .await?;
        let text = response.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| ChatError::provider(format!("Failed to parse Gemini response: {e}")))?;
        let fragment = parsed.into_fragment();

        Ok(ProviderResponse {
            text: fragment.text.unwrap_or_default(),
            usage: fragment.usage,
            block_reason: fragment.block_reason,
            grounding: fragment.grounding,
        })
    }

    async fn generate_stream(
        &self,
        model: &str,
        history: &[ProviderTurn],
        config: &GenerationConfig,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, ChatError> {
        let response = self
            .post_generate(model, "streamGenerateContent", history, config)
            .await?;

        let (tx, rx) = mpsc::unbounded();
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            // Usage metadata on each chunk is cumulative; only the last
            // figures are forwarded, once, after the text.
            let mut last_usage: Option<UsageDelta> = None;

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.unbounded_send(StreamEvent::Error(ChatError::Http(e)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=line_end).collect();
                    if !forward_line(&String::from_utf8_lossy(&line), &tx, &mut last_usage) {
                        return;
                    }
                }
            }

            // The body may end without a final newline.
            if !buffer.is_empty()
                && !forward_line(&String::from_utf8_lossy(&buffer), &tx, &mut last_usage)
            {
                return;
            }

            if let Some(usage) = last_usage {
                let _ = tx.unbounded_send(StreamEvent::Fragment(Fragment {
                    usage: Some(usage),
                    ..Fragment::default()
                }));
            }
            let _ = tx.unbounded_send(StreamEvent::Done);
        });

        Ok(rx)
    }
}

/// Parse one SSE line and send its fragment on. Returns `false` once the
/// stream must stop: a parse or provider error was sent, or the receiver
/// is gone.
fn forward_line(
    line: &str,
    tx: &mpsc::UnboundedSender<StreamEvent>,
    last_usage: &mut Option<UsageDelta>,
) -> bool {
    match parse_sse_line(line) {
        None => true,
        Some(Ok(mut fragment)) => {
            if let Some(usage) = fragment.usage.take() {
                *last_usage = Some(usage);
            }
            // A failed send means the caller abandoned the request.
            fragment == Fragment::default()
                || tx.unbounded_send(StreamEvent::Fragment(fragment)).is_ok()
        }
        Some(Err(e)) => {
            let _ = tx.unbounded_send(StreamEvent::Error(e));
            false
        }
    }
}

/// Parse one SSE line. `None` for blank lines, comments, and non-data fields.
pub(crate) fn parse_sse_line(line: &str) -> Option<Result<Fragment, ChatError>> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return Some(Err(ChatError::provider(format!(
                "Malformed stream chunk: {e}"
            ))))
        }
    };

    if let Some(error) = value.get("error") {
        let body: ErrorBody = serde_json::from_value(error.clone()).unwrap_or_default();
        return Some(Err(ChatError::Provider {
            status: body.code.map(|c| c as u16),
            message: body.describe(data),
            retryable: false,
            retry_after: None,
        }));
    }

    Some(
        serde_json::from_value::<GenerateContentResponse>(value)
            .map(GenerateContentResponse::into_fragment)
            .map_err(|e| ChatError::provider(format!("Malformed stream chunk: {e}"))),
    )
}

// ─── Request wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [ProviderTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationParams,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached_content: Option<&'a str>,
}

#[derive(Serialize)]
pub(crate) struct SystemInstruction {
    pub(crate) parts: Vec<ProviderPart>,
}

impl SystemInstruction {
    pub(crate) fn text(text: &str) -> Self {
        Self {
            parts: vec![ProviderPart::Text {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

fn build_request_body<'a>(
    history: &'a [ProviderTurn],
    config: &'a GenerationConfig,
) -> GenerateContentRequest<'a> {
    let generation_config = GenerationParams {
        temperature: config.temperature(),
        top_p: config.top_p(),
        thinking_config: config
            .thinking_budget()
            .map(|thinking_budget| ThinkingConfig { thinking_budget }),
    };

    // A cached context already carries its own system instruction and tools.
    if let Some(cache) = config.cached_content() {
        return GenerateContentRequest {
            contents: history,
            system_instruction: None,
            generation_config,
            tools: Vec::new(),
            cached_content: Some(cache),
        };
    }

    let mut tools = Vec::new();
    if config.grounding_enabled() {
        tools.push(serde_json::json!({ "googleSearch": {} }));
    }

    GenerateContentRequest {
        contents: history,
        system_instruction: config.system_instruction().map(SystemInstruction::text),
        generation_config,
        tools,
        cached_content: None,
    }
}

// ─── Response wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    search_entry_point: Option<SearchEntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntryPoint {
    rendered_content: Option<String>,
}

/// Finish reasons that end a reply normally.
const NORMAL_FINISH: &[&str] = &["STOP", "MAX_TOKENS", "FINISH_REASON_UNSPECIFIED"];

impl GenerateContentResponse {
    fn into_fragment(self) -> Fragment {
        let usage = self.usage_metadata.map(|u| UsageDelta {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
            cached_tokens: u.cached_content_token_count,
        });

        let prompt_block = self.prompt_feedback.and_then(|f| f.block_reason);
        let candidate = self.candidates.into_iter().next();

        let (text, finish_reason, grounding) = match candidate {
            Some(c) => {
                let text: String = c
                    .content
                    .map(|content| {
                        content
                            .parts
                            .into_iter()
                            .filter(|p| !p.thought)
                            .filter_map(|p| p.text)
                            .collect()
                    })
                    .unwrap_or_default();
                let grounding = c
                    .grounding_metadata
                    .and_then(|g| g.search_entry_point)
                    .and_then(|s| s.rendered_content);
                (text, c.finish_reason, grounding)
            }
            None => (String::new(), None, None),
        };

        let block_reason = prompt_block.or_else(|| {
            finish_reason.filter(|reason| !NORMAL_FINISH.contains(&reason.as_str()))
        });

        Fragment {
            text: (!text.is_empty()).then_some(text),
            usage,
            block_reason,
            grounding,
        }
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    code: Option<i32>,
    message: Option<String>,
    status: Option<String>,
}

impl ErrorBody {
    fn describe(self, raw: &str) -> String {
        let msg = self.message.unwrap_or_else(|| raw.to_string());
        match self.status.filter(|s| !s.is_empty()) {
            Some(status) => format!("{status}: {msg}"),
            None => msg,
        }
    }
}

fn map_http_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> ChatError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| wrapper.error.describe(&body))
        .unwrap_or_else(|_| body.clone());

    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    ChatError::Provider {
        status: Some(status.as_u16()),
        message,
        retryable,
        retry_after,
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.parse::<u64>().ok().map(Duration::from_secs)
}
