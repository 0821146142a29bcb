// 外部编码助手：能力抽象、模型轮换、内置实现

#[allow(clippy::module_inception)]
pub mod assistant;
pub mod providers;
pub mod registry;
pub mod roster;

pub use assistant::{format_prompt, is_rate_limit_text, Assistant, CommandSpec, StreamEvent, StreamKind};
pub use providers::{
    CodexAssistant, CustomAssistant, CustomAssistantConfig, GeminiAssistant, OpenCodeAssistant,
};
pub use registry::AssistantRegistry;
pub use roster::ModelRoster;
