use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

/// 模型轮换表
///
/// 固定顺序的模型列表 + 当前下标。`rotate` 只会向后推进，到达末尾后返回 false，
/// 因此列表长度就是一次调用内轮换重试的上限。
pub struct ModelRoster {
    inner: RwLock<RosterState>,
}

struct RosterState {
    models: Vec<String>,
    index: usize,
    plan: Option<String>,
    build: Option<String>,
    labels: HashMap<String, String>,
}

impl ModelRoster {
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: RwLock::new(RosterState {
                models: models.into_iter().map(Into::into).collect(),
                index: 0,
                plan: None,
                build: None,
                labels: HashMap::new(),
            }),
        }
    }

    pub fn single(model: impl Into<String>) -> Self {
        Self::new([model.into()])
    }

    pub fn with_label(self, model: impl Into<String>, label: impl Into<String>) -> Self {
        self.inner.write().labels.insert(model.into(), label.into());
        self
    }

    pub fn with_plan_model(self, model: Option<String>) -> Self {
        self.inner.write().plan = model;
        self
    }

    pub fn with_build_model(self, model: Option<String>) -> Self {
        self.inner.write().build = model;
        self
    }

    pub fn current(&self) -> Option<String> {
        let state = self.inner.read();
        state.models.get(state.index).cloned()
    }

    pub fn models(&self) -> Vec<String> {
        self.inner.read().models.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().models.is_empty()
    }

    pub fn position(&self) -> usize {
        self.inner.read().index
    }

    /// 推进到下一个模型，已在末尾时返回 false
    pub fn rotate(&self) -> bool {
        let mut state = self.inner.write();
        if state.index + 1 < state.models.len() {
            state.index += 1;
            info!(model = %state.models[state.index], "rotated to next model");
            true
        } else {
            false
        }
    }

    pub fn reset(&self) {
        self.inner.write().index = 0;
    }

    pub fn plan_model(&self) -> Option<String> {
        let plan = self.inner.read().plan.clone();
        plan.or_else(|| self.current())
    }

    pub fn build_model(&self) -> Option<String> {
        let build = self.inner.read().build.clone();
        build.or_else(|| self.current())
    }

    pub fn set_plan_model(&self, model: impl Into<String>) {
        self.inner.write().plan = Some(model.into());
    }

    pub fn set_build_model(&self, model: impl Into<String>) {
        self.inner.write().build = Some(model.into());
    }

    /// `plan`/`brainstorm` 类 agent 使用规划模型，其余使用构建模型
    pub fn model_for_agent(&self, agent: &str) -> Option<String> {
        match agent {
            "plan" | "brainstorm" => self.plan_model(),
            _ => self.build_model(),
        }
    }

    pub fn label(&self, model: &str) -> String {
        self.inner
            .read()
            .labels
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_stops_at_last_model() {
        let roster = ModelRoster::new(["a", "b"]);
        assert_eq!(roster.current().as_deref(), Some("a"));
        assert!(roster.rotate());
        assert_eq!(roster.current().as_deref(), Some("b"));
        assert!(!roster.rotate());
        assert_eq!(roster.current().as_deref(), Some("b"));
    }

    #[test]
    fn test_plan_and_build_fallback_to_current() {
        let roster = ModelRoster::single("base");
        assert_eq!(roster.model_for_agent("plan").as_deref(), Some("base"));
        roster.set_plan_model("thinker");
        roster.set_build_model("builder");
        assert_eq!(roster.model_for_agent("plan").as_deref(), Some("thinker"));
        assert_eq!(roster.model_for_agent("coder").as_deref(), Some("builder"));
    }

    #[test]
    fn test_label_defaults_to_model_id() {
        let roster = ModelRoster::single("x-1").with_label("x-1", "X One");
        assert_eq!(roster.label("x-1"), "X One");
        assert_eq!(roster.label("x-2"), "x-2");
    }
}
