use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AssistFlowError, Result};
use crate::events::{DomainEvent, WorkflowState};
use crate::progress::ProgressReport;
use crate::session::ConversationTurn;

use super::orchestrator::StreamOrchestrator;
use super::request::InvocationRequest;
use super::sink::EventSink;
use super::stream::DomainEventStream;

pub const BRAINSTORM_SYSTEM: &str = "You are a collaborative thinking partner and software architect helping a developer \
brainstorm, plan, and refine their ideas. Engage thoughtfully, ask clarifying questions, \
and help sharpen concepts. You are NOT writing code right now, this is a shared thinking \
space. Keep responses concise and conversational. \
DO NOT use any tools. Just think and respond with your analysis. \
Reference the conversation above when relevant to maintain context across messages.";

pub const COMPRESS_SYSTEM: &str = "You are a technical writer specialising in software specifications. \
Given a brainstorming conversation between a developer and their AI assistant, \
synthesise it into a single, clear, and actionable implementation prompt for a coding \
assistant. Include all relevant technical details, constraints, and goals discussed. \
Write it as a direct, comprehensive instruction. No preamble.";

const PLAN_AGENT: &str = "plan";

/// 一次工作流请求
#[derive(Clone, Debug)]
pub struct WorkflowRequest {
    pub chat_id: i64,
    pub session_id: Option<i64>,
    pub user_text: String,
    /// 追加在系统指令之后的额外上下文
    pub extra: String,
    pub assistant: Option<String>,
    cancel: CancellationToken,
}

impl WorkflowRequest {
    pub fn new(chat_id: i64, user_text: impl Into<String>) -> Self {
        Self {
            chat_id,
            session_id: None,
            user_text: user_text.into(),
            extra: String::new(),
            assistant: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn with_assistant(mut self, assistant: Option<String>) -> Self {
        self.assistant = assistant;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn invocation(&self, prompt: String, agent: &str) -> InvocationRequest {
        InvocationRequest::new(prompt)
            .with_agent(agent)
            .with_assistant(self.assistant.clone())
            .with_chat(self.chat_id)
            .with_session(self.session_id)
            .with_cancel(self.cancel.clone())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AssistFlowError::Cancelled);
        }
        Ok(())
    }
}

/// `#code` 与头脑风暴两条工作流
///
/// 每个流都以 `Started` 开始，以 `Completed` 或 `ProcessingFailed` + `Failed` 结束。
#[derive(Clone)]
pub struct WorkflowService {
    orchestrator: Arc<StreamOrchestrator>,
}

impl WorkflowService {
    pub fn new(orchestrator: Arc<StreamOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<StreamOrchestrator> {
        &self.orchestrator
    }

    /// 压缩会话窗口为 prompt，再交给编码助手执行
    pub fn stream_code(&self, request: WorkflowRequest) -> DomainEventStream {
        let (sink, rx) = EventSink::channel(self.orchestrator.config().event_buffer);
        let service = self.clone();
        let task = tokio::spawn(async move {
            sink.emit(DomainEvent::started("Processing #code request")).await;
            match service.run_code(&request, &sink).await {
                Ok(()) => sink.emit(DomainEvent::completed("Workflow finished")).await,
                Err(err) => {
                    warn!(chat_id = request.chat_id, error = %err, "code workflow failed");
                    sink.emit_failure(&err, WorkflowState::Transcribing).await;
                }
            }
        });
        DomainEventStream::new(rx, task)
    }

    /// 与规划助手讨论，不调用工具
    pub fn stream_brainstorm(&self, request: WorkflowRequest) -> DomainEventStream {
        let (sink, rx) = EventSink::channel(self.orchestrator.config().event_buffer);
        let service = self.clone();
        let task = tokio::spawn(async move {
            sink.emit(DomainEvent::started("Starting brainstorm")).await;
            match service.run_brainstorm(&request, &sink).await {
                Ok(()) => sink.emit(DomainEvent::completed("Brainstorm complete")).await,
                Err(err) => {
                    warn!(chat_id = request.chat_id, error = %err, "brainstorm failed");
                    sink.emit_failure(&err, WorkflowState::Thinking).await;
                }
            }
        });
        DomainEventStream::new(rx, task)
    }

    async fn run_code(&self, request: &WorkflowRequest, sink: &EventSink) -> Result<()> {
        let session = self.orchestrator.session();

        sink.emit(DomainEvent::state_changed(
            WorkflowState::Transcribing,
            "Capturing conversation window",
        ))
        .await;
        let window = session.conversation_window(request.chat_id).await?;
        if window.is_empty() {
            return Err(AssistFlowError::EmptyWindow);
        }
        request.ensure_active()?;

        sink.emit(DomainEvent::state_changed(
            WorkflowState::Thinking,
            "Compressing conversation into a prompt",
        ))
        .await;
        let assistant = self
            .orchestrator
            .registry()
            .resolve(request.assistant.as_deref())?;
        let convo = assistant.format_prompt(&window, COMPRESS_SYSTEM, &request.extra);
        let compress = request
            .invocation(convo, PLAN_AGENT)
            .with_content_state(WorkflowState::Thinking)
            .with_content_deltas(false)
            .with_reasoning_in_output(false)
            .with_phase("compressing");
        let compressed = self.orchestrator.run(&compress, sink).await?;
        let prompt = compressed.output.trim().to_string();
        if prompt.is_empty() {
            return Err(AssistFlowError::EmptyOutput("none".to_string()));
        }
        info!(chat_id = request.chat_id, prompt_chars = prompt.chars().count(), "conversation compressed");
        request.ensure_active()?;

        session
            .append_turn(request.chat_id, ConversationTurn::user(request.user_text.clone()))
            .await?;

        let complexity = self.orchestrator.analyze_complexity(&prompt);
        let eta = self.orchestrator.estimated_duration(&complexity);
        let update = self.orchestrator.reporter().emit(
            ProgressReport::new()
                .with_stage(WorkflowState::Thinking)
                .with_message(format!("Prompt complexity: {}", complexity.label.as_str()))
                .with_complexity(&complexity)
                .with_eta(Some(eta.round() as u64))
                .with_meta("phase", "complexity")
                .with_session(request.session_id),
        );
        sink.emit(DomainEvent::Progress(update)).await;

        sink.emit(DomainEvent::state_changed(
            WorkflowState::Coding,
            "Running the assistant",
        ))
        .await;
        let coder = request.invocation(prompt, super::request::DEFAULT_AGENT);
        let result = self.orchestrator.run(&coder, sink).await?;

        session
            .append_turn(request.chat_id, ConversationTurn::assistant(result.output.clone()))
            .await?;
        if let Some(question) = result.question.clone() {
            sink.emit(DomainEvent::TaskInteraction {
                question,
                stage: sink.current_state(WorkflowState::Coding),
                metadata: result.metadata.clone(),
            })
            .await;
        }

        sink.emit(DomainEvent::state_changed(
            WorkflowState::Executing,
            "Execution complete",
        ))
        .await;
        Ok(())
    }

    async fn run_brainstorm(&self, request: &WorkflowRequest, sink: &EventSink) -> Result<()> {
        let session = self.orchestrator.session();

        sink.emit(DomainEvent::state_changed(
            WorkflowState::Thinking,
            "Brainstorming with the assistant",
        ))
        .await;
        let window = session.conversation_window(request.chat_id).await?;
        let assistant = self
            .orchestrator
            .registry()
            .resolve(request.assistant.as_deref())?;
        let prompt = assistant.format_prompt(&window, BRAINSTORM_SYSTEM, &request.extra);

        let brainstorm = request
            .invocation(prompt, PLAN_AGENT)
            .with_content_state(WorkflowState::Thinking)
            .with_content_deltas(false)
            .with_phase("brainstorm");
        let result = self.orchestrator.run(&brainstorm, sink).await?;

        if !result.output.is_empty() {
            sink.emit(DomainEvent::ContentDelta {
                text: result.output.clone(),
                state: WorkflowState::Thinking,
            })
            .await;
        }
        session
            .append_turn(request.chat_id, ConversationTurn::assistant(result.output.clone()))
            .await?;
        if let Some(question) = result.question.clone() {
            sink.emit(DomainEvent::TaskInteraction {
                question,
                stage: WorkflowState::Thinking,
                metadata: result.metadata.clone(),
            })
            .await;
        }
        Ok(())
    }
}
