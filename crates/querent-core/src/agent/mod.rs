//! Agent capability interface.
//!
//! A [`FragmentAgent`] turns a question plus schema context into a candidate
//! fragment. Its output is untrusted: every fragment goes through the
//! security validator before anything executes it.

use crate::schema::SourceSchema;
use crate::session::{DataMode, FragmentKind, TablePreview};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A generated code or SQL snippet, pending validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub text: String,
}

impl Fragment {
    pub fn new(kind: FragmentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn sql(text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Sql, text)
    }

    pub fn code(text: impl Into<String>) -> Self {
        Self::new(FragmentKind::Code, text)
    }
}

/// Why a previous fragment was rejected. Only ever sent back to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationFeedback {
    pub rejected_fragment: String,
    pub reason: String,
}

/// Everything an agent may see when proposing a fragment.
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub question: String,
    pub mode: DataMode,
    pub schema: Arc<SourceSchema>,
    pub preview: Vec<TablePreview>,
    pub feedback: Option<RegenerationFeedback>,
}

impl ProposalRequest {
    pub fn new(
        question: impl Into<String>,
        mode: DataMode,
        schema: Arc<SourceSchema>,
        preview: Vec<TablePreview>,
    ) -> Self {
        Self {
            question: question.into(),
            mode,
            schema,
            preview,
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: RegenerationFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// The fragment kind the bound source expects.
    pub fn expected_kind(&self) -> FragmentKind {
        self.mode.fragment_kind()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Provider error: {message}")]
    ProcessError {
        status_code: Option<u16>,
        message: String,
        is_retryable: bool,
        retry_after: Option<Duration>,
    },

    #[error("Agent timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Malformed agent response: {0}")]
    MalformedResponse(String),
}

impl AgentError {
    pub fn process_error_with_retry_after(
        status_code: u16,
        message: impl Into<String>,
        is_retryable: bool,
        retry_after: Duration,
    ) -> Self {
        Self::ProcessError {
            status_code: Some(status_code),
            message: message.into(),
            is_retryable,
            retry_after: Some(retry_after),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProcessError { is_retryable, .. } => *is_retryable,
            Self::Timeout(_) => true,
            Self::ExecutionFailed(_) | Self::MalformedResponse(_) => false,
        }
    }
}

/// Produces candidate fragments. Variants: local rule-based and remote APIs.
#[async_trait]
pub trait FragmentAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn propose(&self, request: &ProposalRequest) -> Result<Fragment, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(
            AgentError::process_error_with_retry_after(429, "slow down", true, Duration::from_secs(2))
                .is_retryable()
        );
        assert!(!AgentError::MalformedResponse("no code block".into()).is_retryable());
    }

    #[test]
    fn test_expected_kind_follows_mode() {
        let request = ProposalRequest::new(
            "how many rows?",
            DataMode::Relational,
            Arc::new(SourceSchema::default()),
            Vec::new(),
        );
        assert_eq!(request.expected_kind(), FragmentKind::Sql);
    }
}
