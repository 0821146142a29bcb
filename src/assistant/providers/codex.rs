use crate::assistant::assistant::{Assistant, CommandSpec, StreamEvent};
use crate::assistant::roster::ModelRoster;

use super::decode_plain;

/// Codex CLI，输出按纯文本流处理
pub struct CodexAssistant {
    roster: ModelRoster,
}

impl CodexAssistant {
    pub fn new() -> Self {
        Self {
            roster: ModelRoster::single("codex-1").with_label("codex-1", "Codex Agent"),
        }
    }
}

impl Default for CodexAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl Assistant for CodexAssistant {
    fn name(&self) -> &str {
        "codex"
    }

    fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    fn build_command(&self, spec: &CommandSpec<'_>) -> Vec<String> {
        vec![
            "codex".to_string(),
            "run".to_string(),
            "--full-auto".to_string(),
            spec.prompt.to_string(),
        ]
    }

    fn decode_line(&self, line: &str) -> Option<StreamEvent> {
        decode_plain(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_is_text() {
        let assistant = CodexAssistant::new();
        assert_eq!(
            assistant.decode_line(r#"{"type":"reasoning"}"#),
            Some(StreamEvent::Text("{\"type\":\"reasoning\"}\n".into()))
        );
        assert_eq!(assistant.decode_line("  \n"), None);
        assert_eq!(assistant.model_label(), "Codex Agent");
    }

    #[test]
    fn test_command_ignores_model() {
        let assistant = CodexAssistant::new();
        let argv = assistant.build_command(&CommandSpec::new("x", "coder").with_model(Some("m")));
        assert_eq!(argv, vec!["codex", "run", "--full-auto", "x"]);
    }
}
