use std::time::Duration;

use thiserror::Error;

use crate::events::FailureKind;

pub type Result<T> = std::result::Result<T, AssistFlowError>;

#[derive(Debug, Error)]
pub enum AssistFlowError {
    #[error("command `{0}` not found, is it installed and on PATH?")]
    ProcessNotFound(String),
    #[error("assistant `{assistant}` hit a rate limit or auth failure (exit code {code:?}): {stderr}")]
    RateLimited {
        assistant: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("assistant `{assistant}` exited with code {code:?}: {stderr}")]
    ProcessFailed {
        assistant: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("assistant process hung for {0:?} without output")]
    HangTimeout(Duration),
    #[error("assistant process failed to exit cleanly within {0:?}")]
    ExitTimeout(Duration),
    #[error("assistant failed: no output generated, model may be unavailable or invalid (stderr: {0})")]
    EmptyOutput(String),
    #[error("invocation cancelled")]
    Cancelled,
    #[error("Nothing to compress yet, send some context before #code")]
    EmptyWindow,
    #[error("assistant `{0}` not registered")]
    AssistantNotRegistered(String),
    #[error("no default assistant set")]
    NoDefaultAssistant,
    #[error("assistant `{0}` produced an empty command line")]
    EmptyCommand(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AssistFlowError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AssistFlowError::ProcessNotFound(_) => FailureKind::ProcessNotFound,
            AssistFlowError::RateLimited { .. } => FailureKind::RateLimited,
            AssistFlowError::ProcessFailed { .. } => FailureKind::ProcessFailed,
            AssistFlowError::HangTimeout(_) => FailureKind::HangTimeout,
            AssistFlowError::ExitTimeout(_) => FailureKind::ExitTimeout,
            AssistFlowError::EmptyOutput(_) => FailureKind::EmptyOutput,
            AssistFlowError::Cancelled => FailureKind::Cancelled,
            AssistFlowError::EmptyWindow => FailureKind::EmptyWindow,
            _ => FailureKind::Internal,
        }
    }

    /// 只有限流/鉴权类错误允许通过模型轮换重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AssistFlowError::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AssistFlowError::Cancelled)
    }
}

impl From<serde_json::Error> for AssistFlowError {
    fn from(err: serde_json::Error) -> Self {
        AssistFlowError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            AssistFlowError::Cancelled.failure_kind(),
            FailureKind::Cancelled
        );
        assert_eq!(
            AssistFlowError::EmptyOutput(String::new()).failure_kind(),
            FailureKind::EmptyOutput
        );
        assert_eq!(
            AssistFlowError::Config("bad".into()).failure_kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn test_only_rate_limit_is_retryable() {
        let limited = AssistFlowError::RateLimited {
            assistant: "gemini".into(),
            code: Some(1),
            stderr: "429".into(),
        };
        assert!(limited.is_retryable());
        assert!(!AssistFlowError::HangTimeout(Duration::from_secs(1)).is_retryable());
    }
}
