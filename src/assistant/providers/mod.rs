// 内置的助手实现

mod codex;
mod custom;
mod gemini;
mod opencode;

pub use codex::CodexAssistant;
pub use custom::{CustomAssistant, CustomAssistantConfig};
pub use gemini::GeminiAssistant;
pub use opencode::OpenCodeAssistant;

use serde_json::{Map, Value};

use super::assistant::StreamEvent;

/// 一行输出的初步分类
pub(crate) enum Line {
    Blank,
    Plain(String),
    Object(Map<String, Value>),
}

/// 只有 JSON 对象才进入 provider 的判别逻辑，其他一律按纯文本处理
pub(crate) fn classify_line(line: &str) -> Line {
    let raw = line.trim_end_matches(['\r', '\n']);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return Line::Object(map);
        }
    }
    Line::Plain(format!("{raw}\n"))
}

pub(crate) fn event_type(data: &Map<String, Value>) -> String {
    data.get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

pub(crate) fn str_field<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

/// 未识别的子类型：若带有文本字段则退化为 `Text`，否则丢弃
pub(crate) fn fallback_text(data: &Map<String, Value>) -> Option<StreamEvent> {
    ["content", "text", "message"]
        .iter()
        .find_map(|key| str_field(data, key))
        .filter(|text| !text.is_empty())
        .map(|text| StreamEvent::Text(text.to_string()))
}

pub(crate) fn decode_plain(line: &str) -> Option<StreamEvent> {
    let raw = line.trim_end_matches(['\r', '\n']);
    if raw.trim().is_empty() {
        None
    } else {
        Some(StreamEvent::Text(format!("{raw}\n")))
    }
}
