#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use assistflow::{
    AssistantRegistry, CustomAssistant, CustomAssistantConfig, DomainEvent, HeartbeatConfig,
    MemorySessionStore, StreamConfig, StreamOrchestrator,
};

/// 短轮询、短超时、关闭心跳的配置
pub fn fast_config(root: &Path) -> StreamConfig {
    let mut config = StreamConfig::default().with_repo_root(root);
    config.poll_interval_ms = 50;
    config.hang_timeout_ms = 3_000;
    config.exit_timeout_ms = 2_000;
    config.edit_rate_limit_ms = 0;
    config.heartbeat = HeartbeatConfig {
        interval_ms: 60_000,
        min_elapsed_ms: 60_000,
    };
    config
}

/// 写入 `<name>.sh`，调用方式为 `sh <name>.sh <model> <agent> <prompt>`
pub fn script_assistant(root: &Path, name: &str, body: &str, models: &[&str]) -> CustomAssistant {
    let script = format!("{name}.sh");
    std::fs::write(root.join(&script), body).unwrap();
    let config = CustomAssistantConfig::new(name, "sh")
        .with_args([script.as_str(), "{model}", "{agent}", "{prompt}"])
        .with_models(models.iter().copied());
    CustomAssistant::new(config).unwrap()
}

pub fn orchestrator(
    config: StreamConfig,
    assistant: CustomAssistant,
    session: Arc<MemorySessionStore>,
) -> Arc<StreamOrchestrator> {
    let mut registry = AssistantRegistry::new();
    registry.register(Arc::new(assistant), true);
    Arc::new(StreamOrchestrator::new(config, session, Arc::new(registry)))
}

pub fn content_of(events: &[DomainEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            DomainEvent::ContentDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn terminal_count(events: &[DomainEvent]) -> usize {
    events.iter().filter(|event| event.is_terminal()).count()
}

/// 事件序列以 Started 开始，以唯一的终止事件结束
pub fn assert_bracketed(events: &[DomainEvent]) {
    assert!(
        matches!(events.first(), Some(DomainEvent::Lifecycle { status, .. }) if *status == assistflow::LifecycleStatus::Started),
        "first event was {:?}",
        events.first()
    );
    assert_eq!(terminal_count(events), 1, "events: {events:#?}");
    assert!(events.last().unwrap().is_terminal());
}
