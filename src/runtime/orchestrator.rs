use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::assistant::{Assistant, AssistantRegistry, CommandSpec};
use crate::config::StreamConfig;
use crate::error::{AssistFlowError, Result};
use crate::events::{DomainEvent, Metadata, ProgressPayload, StreamingResult};
use crate::observability::ObservabilityHub;
use crate::progress::{
    spawn_heartbeat, ComplexityReport, ProcessingStage, ProgressEstimator, ProgressReport,
    ProgressReporter,
};
use crate::session::SessionPort;
use crate::utils::{detect_question, head_chars, strip_ansi};

use super::attempt::{classify_exit, AttemptState, StreamReaders};
use super::request::InvocationRequest;
use super::sink::EventSink;
use super::stream::{DomainEventStream, InvocationStream};

const STDERR_EXCERPT_CHARS: usize = 500;

/// 流式编排器：启动助手子进程，把输出转成领域事件
///
/// 限流/鉴权失败时轮换模型重试，次数以轮换表大小为上限。
pub struct StreamOrchestrator {
    config: StreamConfig,
    session: Arc<dyn SessionPort>,
    registry: Arc<AssistantRegistry>,
    reporter: Arc<ProgressReporter>,
    estimator: Arc<Mutex<ProgressEstimator>>,
}

impl StreamOrchestrator {
    pub fn new(
        config: StreamConfig,
        session: Arc<dyn SessionPort>,
        registry: Arc<AssistantRegistry>,
    ) -> Self {
        let estimator = ProgressEstimator::new(config.history_size);
        Self {
            config,
            session,
            registry,
            reporter: Arc::new(ProgressReporter::new()),
            estimator: Arc::new(Mutex::new(estimator)),
        }
    }

    /// 进度事件同时发布到观测 hub
    pub fn with_hub(mut self, hub: ObservabilityHub) -> Self {
        self.reporter = Arc::new(ProgressReporter::new().with_hub(hub));
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<dyn SessionPort> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<AssistantRegistry> {
        &self.registry
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.reporter
    }

    pub fn analyze_complexity(&self, prompt: &str) -> ComplexityReport {
        self.estimator.lock().analyze_prompt_complexity(prompt)
    }

    /// 按历史数据与复杂度估算的总时长（秒）
    pub fn estimated_duration(&self, complexity: &ComplexityReport) -> f64 {
        let mut estimator = self.estimator.lock().fork();
        estimator.set_complexity(complexity);
        estimator.estimated_total_duration()
    }

    /// 执行一次调用，带模型轮换重试
    ///
    /// 事件写入 `sink`；不发送生命周期的起止事件。
    pub async fn run(&self, request: &InvocationRequest, sink: &EventSink) -> Result<StreamingResult> {
        let assistant = self.registry.resolve(request.assistant.as_deref())?;
        let token = request.cancellation_token();
        let first_model = request
            .model
            .clone()
            .or_else(|| assistant.model_for_agent(&request.agent));
        // 首次使用轮换表之外的模型时，重试先回到当前模型，额外占一次尝试
        let off_roster = first_model.is_some() && first_model != assistant.current_model();
        let budget = assistant.rotation_budget() + usize::from(off_roster);
        let mut model = first_model;
        let mut attempt = 1;

        loop {
            self.session.clear_cancelled(request.chat_id);
            if token.is_cancelled() {
                return Err(AssistFlowError::Cancelled);
            }

            let used = model.clone();
            match self.run_attempt(&assistant, request, model, attempt, sink).await {
                Err(err) if err.is_retryable() && attempt < budget => {
                    let current = assistant.current_model();
                    let stays_on_current = current.is_some() && used != current;
                    if !stays_on_current && !assistant.rotate_model() {
                        return Err(err);
                    }
                    let next = assistant.model_label();
                    warn!(
                        assistant = assistant.name(),
                        attempt,
                        next_model = %next,
                        error = %err,
                        "rate limit hit, rotating model"
                    );
                    let update = self.reporter.emit(
                        ProgressReport::new()
                            .with_stage(sink.current_state(request.content_state))
                            .with_payload(ProgressPayload::new(format!(
                                "Rate limit hit, retrying with {next}"
                            )))
                            .with_meta("phase", "rotation")
                            .with_meta("model", next.clone())
                            .with_session(request.session_id),
                    );
                    sink.emit(DomainEvent::Progress(update)).await;
                    model = assistant.current_model();
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn run_attempt(
        &self,
        assistant: &Arc<dyn Assistant>,
        request: &InvocationRequest,
        model: Option<String>,
        attempt: usize,
        sink: &EventSink,
    ) -> Result<StreamingResult> {
        let spec = CommandSpec::new(&request.prompt, &request.agent)
            .with_model(model.as_deref())
            .with_json_mode(request.json_mode);
        let argv = assistant.build_command(&spec);
        let Some((program, args)) = argv.split_first() else {
            return Err(AssistFlowError::EmptyCommand(assistant.name().to_string()));
        };

        info!(
            assistant = assistant.name(),
            model = model.as_deref().unwrap_or("default"),
            agent = %request.agent,
            attempt,
            "spawning assistant"
        );
        debug!(command = %argv.join(" "), "assistant command");
        debug!(prompt = head_chars(&request.prompt, STDERR_EXCERPT_CHARS), "prompt excerpt");

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.config.repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    error!(program = %program, "assistant command not found");
                    AssistFlowError::ProcessNotFound(program.clone())
                } else {
                    AssistFlowError::Io(err)
                }
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AssistFlowError::Other(anyhow!("assistant stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AssistFlowError::Other(anyhow!("assistant stderr was not captured")))?;

        let mut estimator = self.estimator.lock().fork();
        let complexity = estimator.analyze_prompt_complexity(&request.prompt);
        estimator.set_complexity(&complexity);
        estimator.set_current_stage(ProcessingStage::InvokingAssistant);

        let state = Arc::new(AttemptState::new(
            request,
            estimator,
            self.reporter.clone(),
            sink.clone(),
            self.config.edit_rate_limit(),
            self.config.body_tail_chars,
        ));

        let token = request.cancellation_token().child_token();
        let heartbeat = spawn_heartbeat(&self.config.heartbeat, &token, state.clone());
        let readers = StreamReaders {
            state: &state,
            assistant: assistant.as_ref(),
            session: self.session.as_ref(),
            chat_id: request.chat_id,
            token: &token,
            poll: self.config.poll_interval(),
            hang: self.config.hang_timeout(),
        };

        let exit_timeout = self.config.exit_timeout();
        let outcome: Result<ExitStatus> =
            match tokio::try_join!(readers.read(stdout, false), readers.read(stderr, true)) {
                Ok(_) => match timeout(exit_timeout, child.wait()).await {
                    Ok(status) => status.map_err(AssistFlowError::from),
                    Err(_) => {
                        warn!(timeout_ms = exit_timeout.as_millis() as u64, "assistant failed to exit cleanly");
                        Err(AssistFlowError::ExitTimeout(exit_timeout))
                    }
                },
                Err(err) => Err(err),
            };
        token.cancel();
        heartbeat.stop().await;

        let status = match outcome {
            Ok(status) => status,
            Err(err) => {
                let _ = child.start_kill();
                let _ = timeout(exit_timeout, child.wait()).await;
                if err.is_cancelled() {
                    self.session.clear_cancelled(request.chat_id);
                    info!(chat_id = request.chat_id, agent = %request.agent, "invocation cancelled");
                } else {
                    error!(assistant = assistant.name(), error = %err, "assistant attempt failed");
                }
                state.mark_error(&err.to_string());
                return Err(err);
            }
        };

        let summary = state.finish();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(err) = classify_exit(assistant.as_ref(), status, &summary.stderr) {
            error!(
                assistant = assistant.name(),
                code = ?status.code(),
                elapsed_ms,
                error = %err,
                "assistant exited with failure"
            );
            return Err(err);
        }

        info!(
            assistant = assistant.name(),
            code = ?status.code(),
            elapsed_ms,
            tokens = summary.tokens,
            output_chars = summary.output.chars().count(),
            "assistant exited"
        );
        if !summary.stderr.trim().is_empty() {
            warn!(stderr = %summary.stderr.trim(), "assistant stderr output");
        }

        if summary.tokens == 0 && summary.output.trim().is_empty() {
            let stderr = summary.stderr.trim();
            let excerpt = if stderr.is_empty() {
                "none".to_string()
            } else {
                head_chars(stderr, STDERR_EXCERPT_CHARS).to_string()
            };
            error!(assistant = assistant.name(), stderr = %excerpt, "assistant returned no output");
            return Err(AssistFlowError::EmptyOutput(excerpt));
        }

        self.estimator.lock().absorb(summary.samples);

        let output = strip_ansi(summary.output.trim());
        let question = detect_question(&output);
        if let Some(question) = question.as_deref() {
            self.session
                .set_pending_question(request.question_session(), question)
                .await?;
            info!(question, "assistant asked a question");
        }

        if request.content_deltas && !summary.had_content && !output.is_empty() {
            sink.emit(DomainEvent::ContentDelta {
                text: output.clone(),
                state: summary.workflow,
            })
            .await;
        }

        let mut metadata = Metadata::new();
        metadata.insert("attempts".into(), Value::from(attempt));
        metadata.insert("agent".into(), Value::from(request.agent.clone()));
        metadata.insert("elapsed_ms".into(), Value::from(elapsed_ms));
        metadata.insert("tool_calls".into(), Value::from(summary.tool_calls));
        if let Some(code) = status.code() {
            metadata.insert("exit_code".into(), Value::from(code));
        }
        if !summary.errors.is_empty() {
            metadata.insert("errors".into(), Value::from(summary.errors));
        }
        if let Some(question) = question.as_deref() {
            metadata.insert("question".into(), Value::from(question));
        }

        Ok(StreamingResult {
            output,
            tokens: summary.tokens,
            question,
            assistant_name: assistant.name().to_string(),
            model_name: model.unwrap_or_else(|| "default".to_string()),
            metadata,
        })
    }

    /// 带生命周期起止事件的调用
    ///
    /// 成功时以 `Completed` 结尾；失败时以 `ProcessingFailed` + `Failed` 结尾。
    pub async fn run_bracketed(
        &self,
        request: &InvocationRequest,
        sink: &EventSink,
    ) -> Result<StreamingResult> {
        let label = request
            .assistant
            .clone()
            .or_else(|| self.registry.default_name().map(str::to_string))
            .unwrap_or_else(|| "assistant".to_string());
        sink.emit(DomainEvent::started(format!("Invoking {label}"))).await;
        sink.emit(DomainEvent::state_changed(request.content_state, "Running the assistant"))
            .await;

        match self.run(request, sink).await {
            Ok(result) => {
                if let Some(question) = result.question.clone() {
                    sink.emit(DomainEvent::TaskInteraction {
                        question,
                        stage: sink.current_state(request.content_state),
                        metadata: result.metadata.clone(),
                    })
                    .await;
                }
                sink.emit(DomainEvent::completed("Assistant finished")).await;
                Ok(result)
            }
            Err(err) => {
                sink.emit_failure(&err, request.content_state).await;
                Err(err)
            }
        }
    }

    /// 在后台任务中调用，返回事件流与最终结果
    pub fn stream(self: &Arc<Self>, request: InvocationRequest) -> InvocationStream {
        let (sink, rx) = EventSink::channel(self.config.event_buffer);
        let (result_tx, result_rx) = oneshot::channel();
        let orchestrator = Arc::clone(self);

        let task = tokio::spawn(async move {
            let result = orchestrator.run_bracketed(&request, &sink).await;
            let _ = result_tx.send(result);
        });
        InvocationStream::new(DomainEventStream::new(rx, task), result_rx)
    }
}
