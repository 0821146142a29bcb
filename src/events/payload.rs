use serde::{Deserialize, Serialize};

use super::domain::Metadata;

/// 进度载荷
///
/// 内容驱动的更新与心跳更新共用同一结构，下游无需区分来源。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub header: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub elapsed: Option<u64>,
    #[serde(default)]
    pub tokens: Option<usize>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub eta_seconds: Option<u64>,
}

impl ProgressPayload {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    pub fn with_elapsed(mut self, elapsed: u64) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn with_eta(mut self, eta_seconds: Option<u64>) -> Self {
        self.eta_seconds = eta_seconds;
        self
    }
}

/// 一次调用的最终结果，构建后不可变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamingResult {
    pub output: String,
    pub tokens: usize,
    #[serde(default)]
    pub question: Option<String>,
    pub assistant_name: String,
    pub model_name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_clamps_progress() {
        let payload = ProgressPayload::new("Thinking...").with_progress(1.7);
        assert_eq!(payload.progress, Some(1.0));
    }

    #[test]
    fn test_empty_body_is_none() {
        let payload = ProgressPayload::new("Writing").with_body("");
        assert!(payload.body.is_none());
    }
}
