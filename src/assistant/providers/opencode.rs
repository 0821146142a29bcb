use serde_json::{Map, Value};

use crate::assistant::assistant::{Assistant, CommandSpec, StreamEvent};
use crate::assistant::roster::ModelRoster;

use super::{classify_line, event_type, fallback_text, Line};

pub const DEFAULT_OPENCODE_MODEL: &str = "opencode/minimax-m2.5-free";

/// OpenCode CLI (`opencode run --format json`)
///
/// 每行是 `{"type": "...", "part": {...}}`，文本内容在 `part.text`。
pub struct OpenCodeAssistant {
    roster: ModelRoster,
}

impl OpenCodeAssistant {
    pub fn new() -> Self {
        Self::with_roster(ModelRoster::single(DEFAULT_OPENCODE_MODEL))
    }

    pub fn with_roster(roster: ModelRoster) -> Self {
        Self { roster }
    }
}

impl Default for OpenCodeAssistant {
    fn default() -> Self {
        Self::new()
    }
}

fn part_str<'a>(part: Option<&'a Map<String, Value>>, key: &str) -> &'a str {
    part.and_then(|p| p.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

impl Assistant for OpenCodeAssistant {
    fn name(&self) -> &str {
        "opencode"
    }

    fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    fn build_command(&self, spec: &CommandSpec<'_>) -> Vec<String> {
        let model = spec
            .model
            .map(str::to_string)
            .or_else(|| self.roster.current())
            .unwrap_or_else(|| DEFAULT_OPENCODE_MODEL.to_string());
        let mut argv = vec![
            "opencode".to_string(),
            "run".to_string(),
            "--agent".to_string(),
            spec.agent.to_string(),
            "-m".to_string(),
            model,
            "--thinking".to_string(),
        ];
        if spec.json_mode {
            argv.push("--format".to_string());
            argv.push("json".to_string());
        }
        argv.push(spec.prompt.to_string());
        argv
    }

    fn decode_line(&self, line: &str) -> Option<StreamEvent> {
        let data = match classify_line(line) {
            Line::Blank => return None,
            Line::Plain(text) => return Some(StreamEvent::Text(text)),
            Line::Object(data) => data,
        };
        let part = data.get("part").and_then(Value::as_object);

        match event_type(&data).as_str() {
            "reasoning" => Some(StreamEvent::Reasoning(part_str(part, "text").to_string())),
            "text" => Some(StreamEvent::Text(part_str(part, "text").to_string())),
            "tool_use" => {
                let name = match part_str(part, "name") {
                    "" => "tool",
                    name => name,
                };
                let input = part
                    .and_then(|p| p.get("input"))
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                Some(StreamEvent::ToolUse {
                    name: name.to_string(),
                    input,
                })
            }
            "tool_result" => Some(StreamEvent::ToolResult(part_str(part, "output").to_string())),
            "error" => {
                let message = data
                    .get("error")
                    .and_then(|e| e.get("message").or(Some(e)))
                    .and_then(Value::as_str)
                    .or_else(|| part.and_then(|p| p.get("message")).and_then(Value::as_str))
                    .unwrap_or("unknown error");
                Some(StreamEvent::Error(message.to_string()))
            }
            _ => fallback_text(&data),
        }
    }
}
