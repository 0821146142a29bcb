use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::assistant::CustomAssistantConfig;
use crate::error::{AssistFlowError, Result};

use super::env::EnvConfig;

const MIN_HEARTBEAT_SECS: u64 = 5;
const MAX_HEARTBEAT_SECS: u64 = 30;

/// 心跳配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// 调用开始后这段时间内不发心跳
    pub min_elapsed_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 8_000,
            min_elapsed_ms: 10_000,
        }
    }
}

impl HeartbeatConfig {
    /// 间隔限制在 5–30 秒
    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_ms = secs.clamp(MIN_HEARTBEAT_SECS, MAX_HEARTBEAT_SECS) * 1000;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn min_elapsed(&self) -> Duration {
        Duration::from_millis(self.min_elapsed_ms)
    }
}

/// 流式调用配置，所有字段都有默认值
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 子进程工作目录
    pub repo_root: PathBuf,
    pub poll_interval_ms: u64,
    pub hang_timeout_ms: u64,
    pub exit_timeout_ms: u64,
    pub edit_rate_limit_ms: u64,
    pub event_buffer: usize,
    pub body_tail_chars: usize,
    pub heartbeat: HeartbeatConfig,
    pub history_size: usize,
    pub default_assistant: Option<String>,
    pub assistants: Vec<CustomAssistantConfig>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            poll_interval_ms: 5_000,
            hang_timeout_ms: 120_000,
            exit_timeout_ms: 10_000,
            edit_rate_limit_ms: 500,
            event_buffer: 256,
            body_tail_chars: 3_500,
            heartbeat: HeartbeatConfig::default(),
            history_size: 50,
            default_assistant: None,
            assistants: Vec::new(),
        }
    }
}

impl StreamConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AssistFlowError::Config(format!("Failed to parse stream config: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AssistFlowError::Other(anyhow!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// 默认配置叠加 `ASSISTFLOW_*` 环境变量
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(root) = EnvConfig::get_env_optional("ASSISTFLOW_REPO_ROOT") {
            self.repo_root = PathBuf::from(root);
        }
        if let Some(secs) = EnvConfig::parse_env::<u64>("ASSISTFLOW_HANG_TIMEOUT_SECS")? {
            self.hang_timeout_ms = secs * 1000;
        }
        if let Some(ms) = EnvConfig::parse_env::<u64>("ASSISTFLOW_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = ms;
        }
        if let Some(secs) = EnvConfig::parse_env::<u64>("ASSISTFLOW_HEARTBEAT_SECS")? {
            self.heartbeat = self.heartbeat.with_interval_secs(secs);
        }
        if let Some(ms) = EnvConfig::parse_env::<u64>("ASSISTFLOW_EDIT_RATE_LIMIT_MS")? {
            self.edit_rate_limit_ms = ms;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_repo_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.repo_root = root.into();
        self
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("hang_timeout_ms", self.hang_timeout_ms),
            ("exit_timeout_ms", self.exit_timeout_ms),
            ("heartbeat.interval_ms", self.heartbeat.interval_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AssistFlowError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.hang_timeout_ms < self.poll_interval_ms {
            return Err(AssistFlowError::Config(format!(
                "hang_timeout_ms ({}) is shorter than poll_interval_ms ({})",
                self.hang_timeout_ms, self.poll_interval_ms
            )));
        }
        if self.event_buffer == 0 {
            return Err(AssistFlowError::Config("event_buffer must be at least 1".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn hang_timeout(&self) -> Duration {
        Duration::from_millis(self.hang_timeout_ms)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn edit_rate_limit(&self) -> Duration {
        Duration::from_millis(self.edit_rate_limit_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.hang_timeout(), Duration::from_secs(120));
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(8));
        assert_eq!(config.body_tail_chars, 3500);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = StreamConfig::from_json_str(
            r#"{"hang_timeout_ms": 3000, "heartbeat": {"interval_ms": 6000}}"#,
        )
        .unwrap();
        assert_eq!(config.hang_timeout_ms, 3000);
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.heartbeat.min_elapsed_ms, 10_000);
        assert!(matches!(config.validate(), Err(AssistFlowError::Config(_))));
    }

    #[test]
    fn test_heartbeat_interval_is_clamped() {
        assert_eq!(HeartbeatConfig::default().with_interval_secs(1).interval_ms, 5_000);
        assert_eq!(HeartbeatConfig::default().with_interval_secs(90).interval_ms, 30_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistflow.json");
        std::fs::write(
            &path,
            r#"{"repo_root": "/tmp", "assistants": [{"name": "echo", "program": "echo"}]}"#,
        )
        .unwrap();
        let config = StreamConfig::load(&path).unwrap();
        assert_eq!(config.repo_root, PathBuf::from("/tmp"));
        assert_eq!(config.assistants.len(), 1);

        assert!(StreamConfig::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = StreamConfig {
            poll_interval_ms: 0,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
