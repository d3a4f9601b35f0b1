// Copyright 2025 Tracejudge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Judge model clients.
//!
//! A [`JudgeClient`] turns a prompt into text (plus optional metered cost
//! and token logprobs). Capabilities such as structured-output schemas and
//! logprob reporting are advertised through flags, so callers branch on
//! what a judge supports instead of probing it with failing requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::EvalError;

/// Errors from the judge model transport layer.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Log-probability of one generated token, with the top alternatives the
/// model considered at that position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    #[serde(default)]
    pub top_logprobs: Vec<TopLogprob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopLogprob {
    pub token: String,
    pub logprob: f64,
}

/// Text completion plus optional cost metering.
#[derive(Debug, Clone)]
pub struct JudgeResponse {
    pub text: String,
    /// USD cost of the call when the judge meters usage.
    pub cost: Option<f64>,
}

/// Completion with token-level detail, used by logprob-weighted scoring.
#[derive(Debug, Clone)]
pub struct RawChatResponse {
    pub text: String,
    pub cost: Option<f64>,
    pub logprobs: Option<Vec<TokenLogprob>>,
}

/// A judge model that scores generated text.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Generate a plain text completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<JudgeResponse, JudgeError>;

    /// Generate a completion with per-token logprobs. Only meaningful when
    /// [`supports_logprobs`](JudgeClient::supports_logprobs) is `true`;
    /// other judges return a response with `logprobs: None`.
    async fn generate_raw(
        &self,
        prompt: &str,
        top_logprobs: u32,
    ) -> Result<RawChatResponse, JudgeError>;

    fn model_name(&self) -> &str;

    /// Whether the provider honors a JSON response-format constraint.
    fn supports_schema(&self) -> bool {
        false
    }

    /// Whether the provider reports token logprobs.
    fn supports_logprobs(&self) -> bool {
        false
    }
}

/// Extract the first balanced JSON object or array embedded in raw model
/// output.
///
/// Judges wrap JSON in prose or markdown fences more often than not; the
/// scanner is string- and escape-aware so braces inside string values do
/// not unbalance it.
pub fn extract_json(raw: &str) -> Result<&str, EvalError> {
    let bytes = raw.as_bytes();
    let start = raw
        .find(|c| c == '{' || c == '[')
        .ok_or_else(|| EvalError::Parse(format!("no JSON found in judge output: {raw:.200}")))?;

    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&raw[start..=i]);
                }
            }
            _ => {}
        }
    }

    Err(EvalError::Parse(format!(
        "unbalanced JSON in judge output: {raw:.200}"
    )))
}

/// Cost in USD per million tokens for the judge models we meter. Unknown
/// models report no cost rather than a guessed one.
fn pricing_per_million(model: &str) -> Option<(f64, f64)> {
    let rates = match model {
        m if m.starts_with("gpt-4o-mini") => (0.15, 0.60),
        m if m.starts_with("gpt-4o") => (2.50, 10.00),
        m if m.starts_with("gpt-4-turbo") => (10.00, 30.00),
        m if m.starts_with("gpt-3.5-turbo") => (0.50, 1.50),
        m if m.starts_with("claude-3-5-haiku") => (0.80, 4.00),
        m if m.starts_with("claude-3-5-sonnet") => (3.00, 15.00),
        m if m.starts_with("claude-3-opus") => (15.00, 75.00),
        _ => return None,
    };
    Some(rates)
}

fn calculate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> Option<f64> {
    let (input_rate, output_rate) = pricing_per_million(model)?;
    Some(
        prompt_tokens as f64 / 1_000_000.0 * input_rate
            + completion_tokens as f64 / 1_000_000.0 * output_rate,
    )
}

// --- OpenAI ---

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f64,
    /// All judge prompts expect JSON back; constrained decoding cuts down
    /// on prose-wrapped responses.
    response_format: ResponseFormat<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    #[serde(default)]
    logprobs: Option<OpenAiLogprobs>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiLogprobs {
    #[serde(default)]
    content: Vec<TokenLogprob>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// OpenAI chat-completions judge.
pub struct OpenAiJudge {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiJudge {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1".to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        }
    }

    async fn chat(&self, prompt: &str, top_logprobs: Option<u32>) -> Result<RawChatResponse, JudgeError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![OpenAiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            logprobs: top_logprobs.map(|_| true),
            top_logprobs,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(JudgeError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::Api(format!("OpenAI returned {status}: {body}")));
        }

        let parsed: OpenAiResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| JudgeError::InvalidResponse("empty choices".to_string()))?;
        let text = choice
            .message
            .content
            .ok_or_else(|| JudgeError::InvalidResponse("missing message content".to_string()))?;

        let cost = parsed
            .usage
            .and_then(|u| calculate_cost(&self.model, u.prompt_tokens, u.completion_tokens));
        debug!(model = %self.model, cost, "judge call completed");

        Ok(RawChatResponse {
            text,
            cost,
            logprobs: choice.logprobs.map(|l| l.content),
        })
    }
}

#[async_trait]
impl JudgeClient for OpenAiJudge {
    async fn generate(&self, prompt: &str) -> Result<JudgeResponse, JudgeError> {
        let raw = self.chat(prompt, None).await?;
        Ok(JudgeResponse {
            text: raw.text,
            cost: raw.cost,
        })
    }

    async fn generate_raw(
        &self,
        prompt: &str,
        top_logprobs: u32,
    ) -> Result<RawChatResponse, JudgeError> {
        self.chat(prompt, Some(top_logprobs)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_schema(&self) -> bool {
        true
    }

    fn supports_logprobs(&self) -> bool {
        true
    }
}

// --- Anthropic ---

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Anthropic messages-API judge. Does not report logprobs.
pub struct AnthropicJudge {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicJudge {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, "https://api.anthropic.com/v1".to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        }
    }
}

#[async_trait]
impl JudgeClient for AnthropicJudge {
    async fn generate(&self, prompt: &str) -> Result<JudgeResponse, JudgeError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: 2048,
            messages: vec![OpenAiMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(JudgeError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::Api(format!(
                "Anthropic returned {status}: {body}"
            )));
        }

        let parsed: AnthropicResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| JudgeError::InvalidResponse("no text content".to_string()))?;
        let cost = parsed
            .usage
            .and_then(|u| calculate_cost(&self.model, u.input_tokens, u.output_tokens));

        Ok(JudgeResponse { text, cost })
    }

    async fn generate_raw(
        &self,
        prompt: &str,
        _top_logprobs: u32,
    ) -> Result<RawChatResponse, JudgeError> {
        let response = self.generate(prompt).await?;
        Ok(RawChatResponse {
            text: response.text,
            cost: response.cost,
            logprobs: None,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
