use serde_json::Value;

use crate::assistant::assistant::{Assistant, CommandSpec, StreamEvent};
use crate::assistant::roster::ModelRoster;

use super::{classify_line, event_type, fallback_text, str_field, Line};

const FLASH: &str = "gemini-3-flash-preview";
const PRO: &str = "gemini-3-pro-preview";

/// Gemini CLI
///
/// `--output-format stream-json` 输出：
/// ```text
/// {"type":"message","role":"assistant","content":"...","delta":true}
/// {"type":"tool_use","tool_name":"read_file","parameters":{...}}
/// {"type":"tool_result","output":"...","error":{"message":"..."}}
/// {"type":"result", ...}
/// ```
pub struct GeminiAssistant {
    roster: ModelRoster,
}

impl GeminiAssistant {
    pub fn new() -> Self {
        Self {
            roster: ModelRoster::new([FLASH, PRO])
                .with_label(FLASH, "Gemini 3 Flash")
                .with_label(PRO, "Gemini 3 Pro"),
        }
    }

    pub fn with_roster(roster: ModelRoster) -> Self {
        Self { roster }
    }
}

impl Default for GeminiAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl Assistant for GeminiAssistant {
    fn name(&self) -> &str {
        "gemini"
    }

    fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    fn build_command(&self, spec: &CommandSpec<'_>) -> Vec<String> {
        let model = spec
            .model
            .map(str::to_string)
            .or_else(|| self.roster.current())
            .unwrap_or_else(|| FLASH.to_string());
        let format = if spec.json_mode { "stream-json" } else { "text" };
        vec![
            "gemini".to_string(),
            "--model".to_string(),
            model,
            "--prompt".to_string(),
            spec.prompt.to_string(),
            "--accept-raw-output-risk".to_string(),
            "--output-format".to_string(),
            format.to_string(),
        ]
    }

    fn decode_line(&self, line: &str) -> Option<StreamEvent> {
        let data = match classify_line(line) {
            Line::Blank => return None,
            Line::Plain(text) => return Some(StreamEvent::Text(text)),
            Line::Object(data) => data,
        };

        match event_type(&data).as_str() {
            "message" => {
                let content = str_field(&data, "content").unwrap_or_default().to_string();
                let is_delta = data.get("delta").and_then(Value::as_bool).unwrap_or(false);
                // assistant 的增量消息视为思考过程
                if str_field(&data, "role") == Some("assistant") && is_delta {
                    Some(StreamEvent::Reasoning(content))
                } else {
                    Some(StreamEvent::Text(content))
                }
            }
            "tool_use" => Some(StreamEvent::ToolUse {
                name: str_field(&data, "tool_name").unwrap_or("tool").to_string(),
                input: data
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new())),
            }),
            "tool_result" => {
                let mut text = str_field(&data, "output").unwrap_or_default().to_string();
                if let Some(error) = data.get("error").filter(|e| !e.is_null()) {
                    let message = error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error");
                    text.push_str(&format!("\nError: {message}"));
                }
                Some(StreamEvent::ToolResult(text))
            }
            "error" => Some(StreamEvent::Error(
                str_field(&data, "message").unwrap_or("unknown error").to_string(),
            )),
            "result" => Some(StreamEvent::Finished),
            _ => fallback_text(&data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_command_json_mode() {
        let assistant = GeminiAssistant::new();
        let argv = assistant.build_command(&CommandSpec::new("fix it", "coder"));
        assert_eq!(
            argv,
            vec![
                "gemini",
                "--model",
                FLASH,
                "--prompt",
                "fix it",
                "--accept-raw-output-risk",
                "--output-format",
                "stream-json"
            ]
        );
        let text_argv =
            assistant.build_command(&CommandSpec::new("fix it", "coder").with_json_mode(false));
        assert_eq!(text_argv.last().map(String::as_str), Some("text"));
    }

    #[test]
    fn test_decode_message_roles() {
        let assistant = GeminiAssistant::new();
        let delta = r#"{"type":"message","role":"assistant","content":"hmm","delta":true}"#;
        assert_eq!(
            assistant.decode_line(delta),
            Some(StreamEvent::Reasoning("hmm".into()))
        );
        let full = r#"{"type":"message","role":"assistant","content":"done"}"#;
        assert_eq!(
            assistant.decode_line(full),
            Some(StreamEvent::Text("done".into()))
        );
    }

    #[test]
    fn test_decode_tool_events() {
        let assistant = GeminiAssistant::new();
        let tool = r#"{"type":"tool_use","tool_name":"read_file","parameters":{"path":"a.rs"}}"#;
        assert_eq!(
            assistant.decode_line(tool),
            Some(StreamEvent::ToolUse {
                name: "read_file".into(),
                input: json!({"path": "a.rs"})
            })
        );
        let result = r#"{"type":"tool_result","output":"ok","error":{"message":"denied"}}"#;
        assert_eq!(
            assistant.decode_line(result),
            Some(StreamEvent::ToolResult("ok\nError: denied".into()))
        );
        assert_eq!(
            assistant.decode_line(r#"{"type":"result","stats":{}}"#),
            Some(StreamEvent::Finished)
        );
    }

    #[test]
    fn test_decode_noise_degrades_to_text() {
        let assistant = GeminiAssistant::new();
        assert_eq!(
            assistant.decode_line("Loaded cached credentials."),
            Some(StreamEvent::Text("Loaded cached credentials.\n".into()))
        );
        assert_eq!(assistant.decode_line(""), None);
        assert_eq!(assistant.decode_line(r#"{"type":"init","session_id":"x"}"#), None);
    }

    #[test]
    fn test_rotation_walks_both_models() {
        let assistant = GeminiAssistant::new();
        assert_eq!(assistant.model_label(), "Gemini 3 Flash");
        assert!(assistant.rotate_model());
        assert_eq!(assistant.model_label(), "Gemini 3 Pro");
        assert!(!assistant.rotate_model());
        assert_eq!(assistant.rotation_budget(), 2);
    }
}
