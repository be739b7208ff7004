//! Pluggable proposal source for agent runs.
//!
//! [`ChatCompletionsProposer`] asks an OpenAI-compatible
//! `/v1/chat/completions` endpoint for a rewritten shot prompt.
//! [`StaticProposer`] returns fixed or templated content without any
//! network access.

use std::time::Duration;

use async_trait::async_trait;
use reelforge_core::error::{CoreError, CoreResult};
use reelforge_core::proposal::ProposalRules;
use serde::Deserialize;
use serde_json::json;

use crate::store::ShotContext;

/// Everything a proposer sees for one run.
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    pub context: &'a ShotContext,
    pub instruction: Option<&'a str>,
    pub rules: &'a ProposalRules,
}

#[async_trait]
pub trait ContentProposer: Send + Sync {
    /// Proposed full contents of `prompts/shots/<shot>.md`.
    async fn propose(&self, request: ProposalRequest<'_>) -> CoreResult<String>;
}

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

pub const DEFAULT_PROPOSER_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_PROPOSER_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct ProposerConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl ProposerConfig {
    /// | Env Var             | Default                  |
    /// |---------------------|--------------------------|
    /// | `PROPOSER_API_KEY`  | unset (proposals fail)   |
    /// | `PROPOSER_BASE_URL` | `https://api.openai.com` |
    /// | `PROPOSER_MODEL`    | `gpt-4o-mini`            |
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("PROPOSER_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            base_url: std::env::var("PROPOSER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PROPOSER_BASE_URL.into()),
            model: std::env::var("PROPOSER_MODEL").unwrap_or_else(|_| DEFAULT_PROPOSER_MODEL.into()),
        }
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ChatCompletionsProposer {
    client: reqwest::Client,
    config: ProposerConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsProposer {
    pub fn new(config: ProposerConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build reqwest HTTP client"),
            config,
        }
    }

    fn system_prompt(rules: &ProposalRules) -> String {
        format!(
            "You rewrite shot prompts for an image pipeline. Reply with markdown only. \
             Start with a '# ' title line. Include these sections exactly: {}. \
             Stay under {} characters.",
            rules.required_sections.join(", "),
            rules.max_chars
        )
    }
}

#[async_trait]
impl ContentProposer for ChatCompletionsProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> CoreResult<String> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            CoreError::AuthRequired("Proposer API key is not configured".into())
        })?;

        let user = json!({
            "shot": request.context,
            "instruction": request.instruction,
        });
        let body = json!({
            "model": self.config.model,
            "temperature": 0.4,
            "messages": [
                { "role": "system", "content": Self::system_prompt(request.rules) },
                { "role": "user", "content": user.to_string() },
            ],
        });

        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Provider {
                status: e.status().map(|s| s.as_u16()),
                message: format!("Proposer request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CoreError::Provider {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| CoreError::Provider {
            status: None,
            message: format!("Invalid proposer response: {e}"),
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CoreError::Provider {
                status: None,
                message: "Proposer returned no content".into(),
            })?;

        Ok(strip_code_fence(&content))
    }
}

/// Remove a surrounding ```markdown fence if the model added one.
fn strip_code_fence(content: &str) -> String {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or_default();
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Deterministic proposer for tests and dry runs.
pub enum StaticProposer {
    /// Always returns this content.
    Fixed(String),
    /// Builds a well-formed prompt from the shot context.
    Template,
}

impl StaticProposer {
    pub fn fixed(content: impl Into<String>) -> Self {
        Self::Fixed(content.into())
    }

    fn render(request: &ProposalRequest<'_>) -> String {
        let ctx = request.context;
        let title = ctx.record.intent.as_deref().unwrap_or("Untitled");
        let mut prompt = vec![ctx.record.intent.clone().unwrap_or_else(|| ctx.shot_id.clone())];
        let characters = ctx.record.characters_by_prominence();
        if !characters.is_empty() {
            prompt.push(format!("Characters: {}.", characters.join(", ")));
        }
        if let Some(location) = &ctx.record.location {
            prompt.push(format!("Location: {location}."));
        }
        if let Some(style) = &ctx.record.style {
            prompt.push(format!("Style: {style}."));
        }
        if let Some(instruction) = request.instruction {
            prompt.push(instruction.to_string());
        }
        format!(
            "# {}: {title}\n\n## Prompt\n{}\n\n## Negative Prompt\nblurry, low detail, extra limbs\n",
            ctx.shot_id,
            prompt.join(" ")
        )
    }
}

#[async_trait]
impl ContentProposer for StaticProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> CoreResult<String> {
        Ok(match self {
            Self::Fixed(content) => content.clone(),
            Self::Template => Self::render(&request),
        })
    }
}
