use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AssistFlowError, Result};

use super::assistant::Assistant;
use super::providers::{CodexAssistant, GeminiAssistant, OpenCodeAssistant};

/// 按名称查找助手，名称不区分大小写
#[derive(Default)]
pub struct AssistantRegistry {
    assistants: HashMap<String, Arc<dyn Assistant>>,
    order: Vec<String>,
    default: Option<String>,
}

impl AssistantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置 gemini（默认）、opencode、codex
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GeminiAssistant::new()), true);
        registry.register(Arc::new(OpenCodeAssistant::new()), false);
        registry.register(Arc::new(CodexAssistant::new()), false);
        registry
    }

    /// 同名注册会覆盖旧的实现
    pub fn register(&mut self, assistant: Arc<dyn Assistant>, is_default: bool) {
        let key = assistant.name().to_lowercase();
        if !self.assistants.contains_key(&key) {
            self.order.push(key.clone());
        }
        if is_default || self.default.is_none() {
            self.default = Some(key.clone());
        }
        self.assistants.insert(key, assistant);
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        if !self.assistants.contains_key(&key) {
            return Err(AssistFlowError::AssistantNotRegistered(name.to_string()));
        }
        self.default = Some(key);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Assistant>> {
        self.assistants.get(&name.to_lowercase()).map(Arc::clone)
    }

    pub fn require(&self, name: &str) -> Result<Arc<dyn Assistant>> {
        self.get(name)
            .ok_or_else(|| AssistFlowError::AssistantNotRegistered(name.to_string()))
    }

    pub fn default_assistant(&self) -> Result<Arc<dyn Assistant>> {
        self.default
            .as_deref()
            .and_then(|key| self.get(key))
            .ok_or(AssistFlowError::NoDefaultAssistant)
    }

    /// 指定名称则查找该助手，否则返回默认助手
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Assistant>> {
        match name {
            Some(name) => self.require(name),
            None => self.default_assistant(),
        }
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// 按注册顺序
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.assistants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assistants.is_empty()
    }
}
