use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assistant::{Assistant, StreamEvent, StreamKind};
use crate::error::{AssistFlowError, Result};
use crate::events::{DomainEvent, Metadata, ProgressPayload, ProgressUpdate, WorkflowState};
use crate::progress::{
    HeartbeatSource, ProcessingStage, ProgressEstimator, ProgressReport, ProgressReporter,
    ProgressSnapshot, StageTracker, TimingSample,
};
use crate::session::SessionPort;
use crate::utils::{head_chars, tail_chars};

use super::request::InvocationRequest;
use super::sink::EventSink;

const TOOL_RESULT_BODY_CHARS: usize = 800;
const STARTING_HEADER: &str = "Assistant starting...";

struct Buffers {
    output: String,
    stderr: String,
    active_header: String,
    active_body: String,
    last_kind: Option<StreamKind>,
    last_tool: String,
    tokens: usize,
    bubble_started: Instant,
    last_emit: Instant,
    last_activity: Instant,
    workflow: WorkflowState,
    had_content: bool,
    tool_calls: usize,
    errors: Vec<String>,
    estimator: ProgressEstimator,
    tracker: StageTracker,
}

impl Buffers {
    /// 新的展示气泡：重置标题、正文与计时，必要时切换阶段
    fn begin_bubble(&mut self, header: impl Into<String>, stage: ProcessingStage) {
        let header = header.into();
        if self.tracker.current_stage() != Some(stage) {
            self.tracker.start_stage(stage, &header, Metadata::new());
        }
        self.estimator.set_current_stage(stage);
        self.active_header = header;
        self.active_body.clear();
        self.bubble_started = Instant::now();
    }
}

/// 一次尝试结束后的累积结果
pub(crate) struct AttemptSummary {
    pub output: String,
    pub stderr: String,
    pub tokens: usize,
    pub had_content: bool,
    pub tool_calls: usize,
    pub errors: Vec<String>,
    pub workflow: WorkflowState,
    pub samples: Vec<TimingSample>,
}

/// 单次尝试的共享状态
///
/// 缓冲区与当前阶段只由 stdout/stderr 读取任务修改；心跳只读取它们。
pub(crate) struct AttemptState {
    inner: Mutex<Buffers>,
    sink: EventSink,
    reporter: Arc<ProgressReporter>,
    agent: String,
    rate_limit: Duration,
    body_tail: usize,
    session_id: Option<i64>,
    phase: Option<String>,
    content_state: WorkflowState,
    content_deltas: bool,
    reasoning_in_output: bool,
}

impl AttemptState {
    pub fn new(
        request: &InvocationRequest,
        estimator: ProgressEstimator,
        reporter: Arc<ProgressReporter>,
        sink: EventSink,
        rate_limit: Duration,
        body_tail: usize,
    ) -> Self {
        let now = Instant::now();
        let mut tracker = StageTracker::new();
        tracker.start_stage(
            ProcessingStage::InvokingAssistant,
            STARTING_HEADER,
            Metadata::new(),
        );
        Self {
            inner: Mutex::new(Buffers {
                output: String::new(),
                stderr: String::new(),
                active_header: STARTING_HEADER.to_string(),
                active_body: String::new(),
                last_kind: None,
                last_tool: "tool".to_string(),
                tokens: 0,
                bubble_started: now,
                last_emit: now,
                last_activity: now,
                workflow: request.content_state,
                had_content: false,
                tool_calls: 0,
                errors: Vec::new(),
                estimator,
                tracker,
            }),
            sink,
            reporter,
            agent: request.agent.clone(),
            rate_limit,
            body_tail,
            session_id: request.session_id,
            phase: request.phase.clone(),
            content_state: request.content_state,
            content_deltas: request.content_deltas,
            reasoning_in_output: request.reasoning_in_output,
        }
    }

    pub fn touch(&self) {
        self.inner.lock().last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.lock().last_activity.elapsed()
    }

    /// stderr 只累积和记录日志，从不作为内容
    pub fn push_stderr(&self, line: &str) {
        if !line.trim().is_empty() {
            warn!(agent = %self.agent, line, "assistant stderr");
        }
        let mut buffers = self.inner.lock();
        buffers.stderr.push_str(line);
        buffers.stderr.push('\n');
    }

    fn push_content(
        &self,
        buffers: &mut Buffers,
        content: &str,
        into_output: bool,
        outgoing: &mut Vec<DomainEvent>,
    ) {
        if content.is_empty() {
            return;
        }
        buffers.active_body.push_str(content);
        if into_output {
            buffers.output.push_str(content);
        }
        debug!(agent = %self.agent, chunk = content, "assistant content");

        if buffers.workflow != self.content_state {
            buffers.workflow = self.content_state;
            outgoing.push(DomainEvent::state_changed(
                self.content_state,
                "Resuming code generation",
            ));
        }
        if self.content_deltas {
            buffers.had_content = true;
            outgoing.push(DomainEvent::ContentDelta {
                text: content.to_string(),
                state: self.content_state,
            });
        }
    }

    /// 处理一条解码后的事件，按 stdout 顺序转发领域事件
    pub async fn handle(&self, event: StreamEvent) {
        let mut outgoing = Vec::new();
        let mut extra = Metadata::new();
        let mut force = false;
        let emits_progress = !matches!(event, StreamEvent::Error(_) | StreamEvent::Finished);

        {
            let mut buffers = self.inner.lock();
            match event {
                StreamEvent::Reasoning(content) => {
                    buffers.tokens += 1;
                    buffers.tracker.add_tokens(1);
                    if buffers.last_kind != Some(StreamKind::Reasoning) {
                        buffers.begin_bubble("Thinking...", ProcessingStage::Thinking);
                        buffers.last_kind = Some(StreamKind::Reasoning);
                        info!(agent = %self.agent, "assistant thinking");
                    }
                    let into_output = self.reasoning_in_output;
                    self.push_content(&mut buffers, &content, into_output, &mut outgoing);
                }
                StreamEvent::Text(content) => {
                    if buffers.last_kind != Some(StreamKind::Text) {
                        buffers.begin_bubble("Writing answer...", ProcessingStage::Writing);
                        buffers.last_kind = Some(StreamKind::Text);
                        info!(agent = %self.agent, "assistant writing");
                    }
                    self.push_content(&mut buffers, &content, true, &mut outgoing);
                }
                StreamEvent::ToolUse { name, input } => {
                    let input_text = match &input {
                        Value::String(text) => text.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    info!(agent = %self.agent, tool = %name, "assistant tool call");
                    if !input_text.is_empty() {
                        info!(tool = %name, input = %input_text, "tool input");
                    }

                    buffers.tool_calls += 1;
                    buffers.last_tool = name.clone();
                    buffers.begin_bubble(format!("Calling: {name}"), ProcessingStage::ToolExecution);
                    if !input_text.is_empty() {
                        buffers.active_body = format!("Params: {input_text}");
                    }
                    buffers.last_kind = Some(StreamKind::ToolUse);

                    if buffers.workflow != WorkflowState::Executing {
                        buffers.workflow = WorkflowState::Executing;
                        outgoing.push(DomainEvent::state_changed(
                            WorkflowState::Executing,
                            "Executing tool",
                        ));
                    }
                    extra.insert("phase".into(), Value::from("tool_use"));
                    extra.insert("tool".into(), Value::from(name));
                    extra.insert("input".into(), input);
                    force = true;
                }
                StreamEvent::ToolResult(content) => {
                    if !content.is_empty() {
                        let tool = buffers.last_tool.clone();
                        buffers.output.push_str(&content);
                        buffers.begin_bubble(
                            format!("Result from: {tool}"),
                            ProcessingStage::ToolExecution,
                        );
                        buffers.active_body = head_chars(&content, TOOL_RESULT_BODY_CHARS).to_string();
                        info!(tool = %tool, "tool result");
                        debug!(tool = %tool, content = %content, "tool result content");
                        if self.content_deltas {
                            buffers.had_content = true;
                            outgoing.push(DomainEvent::ContentDelta {
                                text: content,
                                state: buffers.workflow,
                            });
                        }
                    }
                    buffers.last_kind = Some(StreamKind::ToolResult);
                    buffers.last_activity = Instant::now();
                    if buffers.workflow != self.content_state {
                        buffers.workflow = self.content_state;
                        outgoing.push(DomainEvent::state_changed(self.content_state, "Tool finished"));
                    }
                }
                StreamEvent::Error(message) => {
                    warn!(agent = %self.agent, error = %message, "assistant reported an error");
                    buffers.errors.push(message);
                }
                StreamEvent::Finished => {
                    debug!(agent = %self.agent, "assistant reported completion");
                }
            }
        }

        for event in outgoing {
            self.sink.emit(event).await;
        }
        if emits_progress {
            self.emit_progress(force, extra).await;
        }
    }

    /// 内容驱动的进度推送，按 `edit_rate_limit` 限频
    async fn emit_progress(&self, force: bool, extra: Metadata) {
        let update = {
            let mut buffers = self.inner.lock();
            let now = Instant::now();
            if !force && now.saturating_duration_since(buffers.last_emit) < self.rate_limit {
                return;
            }
            buffers.last_emit = now;
            self.build_update(&mut buffers, extra)
        };
        self.sink.emit(DomainEvent::Progress(update)).await;
    }

    fn build_update(&self, buffers: &mut Buffers, extra: Metadata) -> ProgressUpdate {
        let tokens = buffers.tokens;
        buffers.estimator.update_tokens(tokens);
        let snapshot = buffers.estimator.snapshot();
        self.compose_update(buffers, snapshot, extra)
    }

    /// 由快照与当前气泡组装进度；不修改缓冲区
    fn compose_update(
        &self,
        buffers: &Buffers,
        snapshot: ProgressSnapshot,
        extra: Metadata,
    ) -> ProgressUpdate {
        let tokens = buffers.tokens;
        let source = if buffers.active_body.is_empty() {
            &buffers.output
        } else {
            &buffers.active_body
        };
        let payload = ProgressPayload::new(buffers.active_header.clone())
            .with_body(tail_chars(source, self.body_tail))
            .with_elapsed(buffers.bubble_started.elapsed().as_secs())
            .with_tokens(tokens)
            .with_progress(snapshot.progress)
            .with_eta(snapshot.eta_seconds);

        let mut report = ProgressReport::new()
            .with_stage(buffers.workflow)
            .with_payload(payload)
            .with_session(self.session_id);
        if let Some(stage) = snapshot.stage {
            report = report.with_meta("processing_stage", stage.as_str());
        }
        if let Some(phase) = &self.phase {
            report = report.with_meta("phase", phase.clone());
        }
        report.metadata.extend(extra);
        self.reporter.emit(report)
    }

    pub fn mark_error(&self, error: &str) {
        self.inner.lock().tracker.mark_error(error);
    }

    pub fn finish(&self) -> AttemptSummary {
        let mut buffers = self.inner.lock();
        buffers.tracker.complete_stage();
        buffers.estimator.set_current_stage(ProcessingStage::Complete);
        AttemptSummary {
            output: std::mem::take(&mut buffers.output),
            stderr: std::mem::take(&mut buffers.stderr),
            tokens: buffers.tokens,
            had_content: buffers.had_content,
            tool_calls: buffers.tool_calls,
            errors: std::mem::take(&mut buffers.errors),
            workflow: buffers.workflow,
            samples: buffers.estimator.take_recorded(),
        }
    }
}

#[async_trait]
impl HeartbeatSource for AttemptState {
    fn since_last_emit(&self) -> Duration {
        self.inner.lock().last_emit.elapsed()
    }

    async fn beat(&self, elapsed: Duration) {
        let update = {
            let buffers = self.inner.lock();
            let mut extra = Metadata::new();
            extra.insert("heartbeat".into(), Value::Bool(true));
            extra.insert("total_elapsed_s".into(), Value::from(elapsed.as_secs()));
            let snapshot = buffers.estimator.peek();
            let update = self.compose_update(&buffers, snapshot, extra);
            info!(
                stage = update.stage.as_str(),
                elapsed_s = elapsed.as_secs(),
                tokens = buffers.tokens,
                progress = update.progress.unwrap_or_default(),
                eta_seconds = ?update.eta_seconds,
                "heartbeat"
            );
            update
        };
        self.sink.emit(DomainEvent::Progress(update)).await;
    }
}

/// stdout/stderr 读取器
///
/// 每次阻塞读取前检查取消；超过轮询间隔没有数据时检查是否挂起。
pub(crate) struct StreamReaders<'a> {
    pub state: &'a AttemptState,
    pub assistant: &'a dyn Assistant,
    pub session: &'a dyn SessionPort,
    pub chat_id: i64,
    pub token: &'a CancellationToken,
    pub poll: Duration,
    pub hang: Duration,
}

impl StreamReaders<'_> {
    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() || self.session.is_cancelled(self.chat_id) {
            return Err(AssistFlowError::Cancelled);
        }
        Ok(())
    }

    pub async fn read<R>(&self, stream: R, is_stderr: bool) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            self.check_cancelled()?;

            // 超时取消的读取会把已读到的部分留在 buf 中，下次继续追加
            let read = tokio::select! {
                _ = self.token.cancelled() => return Err(AssistFlowError::Cancelled),
                read = timeout(self.poll, reader.read_until(b'\n', &mut buf)) => read,
            };
            let n = match read {
                Err(_) => {
                    if self.state.idle_for() > self.hang {
                        warn!(hang_ms = self.hang.as_millis() as u64, "assistant process hung");
                        return Err(AssistFlowError::HangTimeout(self.hang));
                    }
                    continue;
                }
                Ok(result) => result?,
            };
            if n == 0 && buf.is_empty() {
                break;
            }

            self.state.touch();
            let raw = String::from_utf8_lossy(&buf).into_owned();
            buf.clear();
            let line = raw.trim_end_matches(['\r', '\n']);

            if is_stderr {
                self.state.push_stderr(line);
                continue;
            }
            if !line.trim().is_empty() {
                debug!(line, "raw assistant output");
            }
            if let Some(event) = self.assistant.decode_line(line) {
                self.state.handle(event).await;
            }
        }
        Ok(())
    }
}

/// 非零退出码的分类：限流/鉴权或普通失败
pub(crate) fn classify_exit(
    assistant: &dyn Assistant,
    status: ExitStatus,
    stderr: &str,
) -> Option<AssistFlowError> {
    if status.success() {
        return None;
    }
    let code = status.code();
    let trimmed = stderr.trim().to_string();
    if assistant.is_rate_limit_error(stderr) {
        Some(AssistFlowError::RateLimited {
            assistant: assistant.name().to_string(),
            code,
            stderr: trimmed,
        })
    } else {
        Some(AssistFlowError::ProcessFailed {
            assistant: assistant.name().to_string(),
            code,
            stderr: trimmed,
        })
    }
}
