use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assistant::assistant::{is_rate_limit_text, Assistant, CommandSpec, StreamEvent};
use crate::assistant::roster::ModelRoster;
use crate::error::{AssistFlowError, Result};

use super::{classify_line, event_type, fallback_text, str_field, Line};

/// 自定义助手配置
///
/// `args` 支持 `{prompt}`、`{model}`、`{agent}` 占位符；
/// 没有 `{prompt}` 时 prompt 作为最后一个参数追加。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomAssistantConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// JSON 模式下额外追加的参数（位于 prompt 之前）
    #[serde(default)]
    pub json_args: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub plan_model: Option<String>,
    #[serde(default)]
    pub build_model: Option<String>,
    /// 额外的限流/鉴权关键字
    #[serde(default)]
    pub rate_limit_markers: Vec<String>,
}

impl CustomAssistantConfig {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            json_args: Vec::new(),
            models: Vec::new(),
            plan_model: None,
            build_model: None,
            rate_limit_markers: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }
}

/// 任意命令行工具的通用适配
///
/// 解码器接受通用的 JSON 行：
/// `{"type":"text|reasoning|tool_use|tool_result|error|finished", "content": ...}`
pub struct CustomAssistant {
    config: CustomAssistantConfig,
    roster: ModelRoster,
}

impl CustomAssistant {
    pub fn new(config: CustomAssistantConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(AssistFlowError::Config("custom assistant needs a name".into()));
        }
        if config.program.trim().is_empty() {
            return Err(AssistFlowError::Config(format!(
                "custom assistant `{}` needs a program",
                config.name
            )));
        }
        let roster = ModelRoster::new(config.models.clone())
            .with_plan_model(config.plan_model.clone())
            .with_build_model(config.build_model.clone());
        Ok(Self { config, roster })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: CustomAssistantConfig = serde_json::from_str(raw).map_err(|e| {
            AssistFlowError::Other(anyhow!("Failed to parse custom assistant config: {}", e))
        })?;
        Self::new(config)
    }

    pub fn config(&self) -> &CustomAssistantConfig {
        &self.config
    }
}

fn text_of(data: &serde_json::Map<String, Value>) -> String {
    str_field(data, "content")
        .or_else(|| str_field(data, "text"))
        .unwrap_or_default()
        .to_string()
}

impl Assistant for CustomAssistant {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    fn build_command(&self, spec: &CommandSpec<'_>) -> Vec<String> {
        let model = spec
            .model
            .map(str::to_string)
            .or_else(|| self.roster.current())
            .unwrap_or_default();
        let mut argv = vec![self.config.program.clone()];
        let mut has_prompt = false;
        for arg in &self.config.args {
            has_prompt |= arg.contains("{prompt}");
            // prompt 最后替换，避免 prompt 内容被再次展开
            argv.push(
                arg.replace("{model}", &model)
                    .replace("{agent}", spec.agent)
                    .replace("{prompt}", spec.prompt),
            );
        }
        if spec.json_mode {
            argv.extend(self.config.json_args.iter().cloned());
        }
        if !has_prompt {
            argv.push(spec.prompt.to_string());
        }
        argv
    }

    fn decode_line(&self, line: &str) -> Option<StreamEvent> {
        let data = match classify_line(line) {
            Line::Blank => return None,
            Line::Plain(text) => return Some(StreamEvent::Text(text)),
            Line::Object(data) => data,
        };

        match event_type(&data).as_str() {
            "text" | "message" => Some(StreamEvent::Text(text_of(&data))),
            "reasoning" | "thinking" => Some(StreamEvent::Reasoning(text_of(&data))),
            "tool_use" => {
                let name = str_field(&data, "name")
                    .or_else(|| str_field(&data, "tool_name"))
                    .unwrap_or("tool")
                    .to_string();
                let input = data
                    .get("input")
                    .or_else(|| data.get("parameters"))
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                Some(StreamEvent::ToolUse { name, input })
            }
            "tool_result" => Some(StreamEvent::ToolResult(
                str_field(&data, "output")
                    .map(str::to_string)
                    .unwrap_or_else(|| text_of(&data)),
            )),
            "error" => Some(StreamEvent::Error(
                str_field(&data, "message")
                    .map(str::to_string)
                    .unwrap_or_else(|| text_of(&data)),
            )),
            "finished" | "result" | "done" => Some(StreamEvent::Finished),
            _ => fallback_text(&data),
        }
    }

    fn is_rate_limit_error(&self, stderr: &str) -> bool {
        if is_rate_limit_text(stderr) {
            return true;
        }
        let lower = stderr.to_lowercase();
        self.config
            .rate_limit_markers
            .iter()
            .any(|marker| !marker.is_empty() && lower.contains(&marker.to_lowercase()))
    }
}
