use std::sync::Arc;

use serde::Serialize;

use crate::assistant::{AssistantRegistry, CustomAssistant};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::events::{DomainEvent, LifecycleStatus};

/// 助手列表中的一行
#[derive(Clone, Debug, Serialize)]
pub struct AssistantEntry {
    pub name: String,
    pub default: bool,
    pub models: Vec<String>,
}

/// 内置助手 + 配置中的自定义助手
pub fn build_registry(config: &StreamConfig) -> Result<AssistantRegistry> {
    let mut registry = AssistantRegistry::with_builtin();
    for custom in &config.assistants {
        registry.register(Arc::new(CustomAssistant::new(custom.clone())?), false);
    }
    if let Some(name) = config.default_assistant.as_deref() {
        registry.set_default(name)?;
    }
    Ok(registry)
}

pub fn assistant_entries(registry: &AssistantRegistry) -> Vec<AssistantEntry> {
    let default = registry.default_name();
    registry
        .names()
        .into_iter()
        .filter_map(|name| {
            let assistant = registry.get(&name)?;
            Some(AssistantEntry {
                default: default == Some(name.as_str()),
                models: assistant.roster().models(),
                name,
            })
        })
        .collect()
}

/// 事件的单行文本表示；内容增量原样返回
pub fn render_event(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::Lifecycle { status, message } => {
            let label = match status {
                LifecycleStatus::Started => "started",
                LifecycleStatus::Completed => "completed",
                LifecycleStatus::Failed => "failed",
            };
            Some(format!("[{label}] {}", message.as_deref().unwrap_or_default()))
        }
        DomainEvent::StateChanged { state, details } => Some(format!(
            "[{}] {}",
            state.as_str(),
            details.as_deref().unwrap_or_default()
        )),
        DomainEvent::Progress(update) => {
            let header = update
                .metadata
                .get("header")
                .and_then(|v| v.as_str())
                .unwrap_or(update.stage.as_str());
            let percent = update.progress.map(|p| (p * 100.0).round() as u64).unwrap_or(0);
            let eta = update
                .eta_seconds
                .map(|s| format!(", eta {s}s"))
                .unwrap_or_default();
            Some(format!("[progress {percent}%{eta}] {header}"))
        }
        DomainEvent::ContentDelta { text, .. } => Some(text.clone()),
        DomainEvent::TaskInteraction { question, .. } => Some(format!("[question] {question}")),
        DomainEvent::ProcessingFailed { error, kind, .. } => {
            let kind = serde_json::to_value(kind).ok()?;
            Some(format!("[error:{}] {error}", kind.as_str().unwrap_or("internal")))
        }
    }
}
