use tokio_util::sync::CancellationToken;

use crate::events::WorkflowState;

pub const DEFAULT_AGENT: &str = "coder";

/// 一次助手调用的参数
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    pub prompt: String,
    pub agent: String,
    /// 为空时使用默认助手
    pub assistant: Option<String>,
    /// 只作用于第一次尝试，轮换后使用轮换表的当前模型
    pub model: Option<String>,
    pub chat_id: i64,
    pub session_id: Option<i64>,
    pub json_mode: bool,
    /// 文本/思考内容所在的工作流状态
    pub content_state: WorkflowState,
    /// 为 false 时不逐条转发 `ContentDelta`
    pub content_deltas: bool,
    /// 附加到每条进度事件的 `phase` 元数据
    pub phase: Option<String>,
    /// 为 false 时思考内容只进入展示正文，不计入最终输出
    pub reasoning_in_output: bool,
    cancel: CancellationToken,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            agent: DEFAULT_AGENT.to_string(),
            assistant: None,
            model: None,
            chat_id: 0,
            session_id: None,
            json_mode: true,
            content_state: WorkflowState::Coding,
            content_deltas: true,
            phase: None,
            reasoning_in_output: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_assistant(mut self, assistant: Option<String>) -> Self {
        self.assistant = assistant;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_chat(mut self, chat_id: i64) -> Self {
        self.chat_id = chat_id;
        self
    }

    pub fn with_session(mut self, session_id: Option<i64>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_content_state(mut self, state: WorkflowState) -> Self {
        self.content_state = state;
        self
    }

    pub fn with_content_deltas(mut self, enabled: bool) -> Self {
        self.content_deltas = enabled;
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_reasoning_in_output(mut self, enabled: bool) -> Self {
        self.reasoning_in_output = enabled;
        self
    }

    /// 绑定外部的取消令牌
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 待回答问题写入的会话 id，未指定时使用 chat id
    pub fn question_session(&self) -> i64 {
        self.session_id.unwrap_or(self.chat_id)
    }
}
