use serde_json::Value;

use crate::session::ConversationTurn;

use super::roster::ModelRoster;

const RATE_LIMIT_MARKERS: &[&str] = &["429", "401", "402", "rate limit", "unauthorized", "quota"];

/// 单行输出解码后的标准化事件
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Reasoning(String),
    ToolUse { name: String, input: Value },
    ToolResult(String),
    Error(String),
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Text,
    Reasoning,
    ToolUse,
    ToolResult,
    Error,
    Finished,
}

impl StreamEvent {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamEvent::Text(_) => StreamKind::Text,
            StreamEvent::Reasoning(_) => StreamKind::Reasoning,
            StreamEvent::ToolUse { .. } => StreamKind::ToolUse,
            StreamEvent::ToolResult(_) => StreamKind::ToolResult,
            StreamEvent::Error(_) => StreamKind::Error,
            StreamEvent::Finished => StreamKind::Finished,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            StreamEvent::Text(text)
            | StreamEvent::Reasoning(text)
            | StreamEvent::ToolResult(text)
            | StreamEvent::Error(text) => Some(text.as_str()),
            StreamEvent::ToolUse { .. } | StreamEvent::Finished => None,
        }
    }
}

/// 构建命令行所需的参数
#[derive(Clone, Copy, Debug)]
pub struct CommandSpec<'a> {
    pub prompt: &'a str,
    pub agent: &'a str,
    pub model: Option<&'a str>,
    pub json_mode: bool,
}

impl<'a> CommandSpec<'a> {
    pub fn new(prompt: &'a str, agent: &'a str) -> Self {
        Self {
            prompt,
            agent,
            model: None,
            json_mode: true,
        }
    }

    pub fn with_model(mut self, model: Option<&'a str>) -> Self {
        self.model = model;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

/// 外部编码助手 CLI 的能力描述
///
/// 实现方负责：拼装命令行、把一行输出解码为 `StreamEvent`、识别限流/鉴权错误。
/// 模型状态放在 `ModelRoster` 中，只有显式轮换才会修改。
pub trait Assistant: Send + Sync {
    fn name(&self) -> &str;

    fn roster(&self) -> &ModelRoster;

    /// 纯函数：相同输入必须得到相同的 argv
    fn build_command(&self, spec: &CommandSpec<'_>) -> Vec<String>;

    /// 解码失败时退化为 `Text`，绝不返回错误
    fn decode_line(&self, line: &str) -> Option<StreamEvent>;

    fn is_rate_limit_error(&self, stderr: &str) -> bool {
        is_rate_limit_text(stderr)
    }

    fn rotate_model(&self) -> bool {
        self.roster().rotate()
    }

    fn current_model(&self) -> Option<String> {
        self.roster().current()
    }

    fn model_for_agent(&self, agent: &str) -> Option<String> {
        self.roster().model_for_agent(agent)
    }

    /// 展示用的模型名
    fn model_label(&self) -> String {
        match self.current_model() {
            Some(model) => self.roster().label(&model),
            None => "default".to_string(),
        }
    }

    /// 一次调用内最多尝试的次数
    fn rotation_budget(&self) -> usize {
        self.roster().len().max(1)
    }

    fn format_prompt(&self, window: &[ConversationTurn], system: &str, extra: &str) -> String {
        format_prompt(window, system, extra)
    }
}

pub fn is_rate_limit_text(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// 把会话窗口与系统指令拼成单个 prompt
pub fn format_prompt(window: &[ConversationTurn], system: &str, extra: &str) -> String {
    let mut parts = vec![format!("System: {system}")];
    if !extra.is_empty() {
        parts.push(format!("\n{extra}"));
    }
    parts.push("\nConversation so far:".to_string());
    for turn in window {
        let is_user = turn.role == "user";
        let role = if is_user { "Developer" } else { "Assistant" };
        if turn.solo && is_user {
            parts.push(format!("{role}: [developer thinking aloud]: {}", turn.content));
        } else {
            parts.push(format!("{role}: {}", turn.content));
        }
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_markers() {
        assert!(is_rate_limit_text("HTTP 429 Too Many Requests"));
        assert!(is_rate_limit_text("Error: Rate Limit exceeded"));
        assert!(is_rate_limit_text("request was UNAUTHORIZED"));
        assert!(is_rate_limit_text("quota exhausted for project"));
        assert!(!is_rate_limit_text("segmentation fault"));
        assert!(!is_rate_limit_text(""));
    }

    #[test]
    fn test_format_prompt_layout() {
        let window = vec![
            ConversationTurn::user("add a flag"),
            ConversationTurn::assistant("which flag?"),
            ConversationTurn::user("the verbose one").solo(),
        ];
        let prompt = format_prompt(&window, "Be brief.", "repo: demo");
        let expected = "System: Be brief.\n\n\nrepo: demo\n\n\nConversation so far:\n\n\
Developer: add a flag\n\nAssistant: which flag?\n\n\
Developer: [developer thinking aloud]: the verbose one";
        assert_eq!(prompt, expected);
    }

    #[test]
    fn test_stream_event_content() {
        assert_eq!(StreamEvent::Text("a".into()).content(), Some("a"));
        assert_eq!(StreamEvent::Finished.content(), None);
        assert_eq!(
            StreamEvent::ToolUse {
                name: "bash".into(),
                input: Value::Null
            }
            .kind(),
            StreamKind::ToolUse
        );
    }
}
