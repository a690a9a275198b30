//! OpenAiApiAgent - fragment proposals from an OpenAI-compatible chat API.
//!
//! Any endpoint that speaks the Chat Completions protocol works; set
//! `model.base_url` to point at a gateway or a local server.

use crate::http::JsonEndpoint;
use crate::prompt::render_prompt;
use crate::response::extract_fragment;
use async_trait::async_trait;
use querent_core::agent::{AgentError, Fragment, FragmentAgent, ProposalRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiApiAgent {
    endpoint: JsonEndpoint,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiApiAgent {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let endpoint = JsonEndpoint::new("OpenAI", CHAT_COMPLETIONS_URL, timeout)?
            .with_secret_header("authorization", &format!("Bearer {api_key}"))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            max_tokens: None,
        })
    }

    /// Points the agent at another Chat Completions endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.with_url(url);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl FragmentAgent for OpenAiApiAgent {
    fn name(&self) -> &str {
        "openai"
    }

    async fn propose(&self, request: &ProposalRequest) -> Result<Fragment, AgentError> {
        let prompt = render_prompt(request)?;
        let turns = [
            Turn {
                role: "system",
                content: &prompt.system,
            },
            Turn {
                role: "user",
                content: &prompt.user,
            },
        ];
        let body = ChatRequest {
            model: &self.model,
            messages: &turns,
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        tracing::debug!(
            "[OpenAiApiAgent] POST {} (model={}, regeneration={})",
            self.endpoint.url(),
            self.model,
            request.feedback.is_some()
        );
        let reply: ChatReply = self.endpoint.post(&body).await?;
        extract_fragment(&reply.into_text()?, request.expected_kind())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn<'a>],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<ReplyChoice>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyTurn,
}

#[derive(Deserialize)]
struct ReplyTurn {
    content: Option<String>,
}

impl ChatReply {
    fn into_text(self) -> Result<String, AgentError> {
        self.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| AgentError::MalformedResponse("OpenAI reply carried no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_text() {
        let reply: ChatReply = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "```sql\nSELECT 1\n```"}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.into_text().unwrap(), "```sql\nSELECT 1\n```");

        let empty: ChatReply = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(empty.into_text(), Err(AgentError::MalformedResponse(_))));
    }

    #[test]
    fn test_request_omits_unset_max_tokens() {
        let turns = [Turn {
            role: "user",
            content: "hi",
        }];
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: &turns,
            max_tokens: None,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_base_url_override() {
        let agent = OpenAiApiAgent::new("sk-test", DEFAULT_OPENAI_MODEL, Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:8080/v1/chat/completions");
        assert_eq!(agent.endpoint.url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(agent.model(), "gpt-4o-mini");
    }
}
