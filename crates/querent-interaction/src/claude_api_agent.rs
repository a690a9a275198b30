//! ClaudeApiAgent - fragment proposals from the Anthropic Messages API.

use crate::http::JsonEndpoint;
use crate::prompt::render_prompt;
use crate::response::extract_fragment;
use async_trait::async_trait;
use querent_core::agent::{AgentError, Fragment, FragmentAgent, ProposalRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct ClaudeApiAgent {
    endpoint: JsonEndpoint,
    model: String,
    max_tokens: u32,
}

impl ClaudeApiAgent {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let endpoint = JsonEndpoint::new("Claude", MESSAGES_URL, timeout)?
            .with_secret_header("x-api-key", api_key)?
            .with_header("anthropic-version", API_VERSION);
        Ok(Self {
            endpoint,
            model: model.into(),
            max_tokens: 1024,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.with_url(url);
        self
    }

    /// The Messages API requires a cap; 1024 unless overridden.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl FragmentAgent for ClaudeApiAgent {
    fn name(&self) -> &str {
        "claude"
    }

    async fn propose(&self, request: &ProposalRequest) -> Result<Fragment, AgentError> {
        let prompt = render_prompt(request)?;
        let body = MessagesRequest {
            model: &self.model,
            system: &prompt.system,
            messages: vec![UserTurn {
                role: "user",
                content: vec![Block::Text { text: &prompt.user }],
            }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        tracing::debug!(
            "[ClaudeApiAgent] POST {} (model={}, regeneration={})",
            self.endpoint.url(),
            self.model,
            request.feedback.is_some()
        );
        let reply: MessagesReply = self.endpoint.post(&body).await?;
        extract_fragment(&reply.into_text()?, request.expected_kind())
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<UserTurn<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: Vec<Block<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Block<'a> {
    Text { text: &'a str },
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
}

/// Thinking and tool blocks are skipped.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ReplyBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessagesReply {
    fn into_text(self) -> Result<String, AgentError> {
        self.content
            .into_iter()
            .find_map(|block| match block {
                ReplyBlock::Text { text } => Some(text),
                ReplyBlock::Other => None,
            })
            .ok_or_else(|| AgentError::MalformedResponse("Claude reply carried no text block".into()))
    }
}
