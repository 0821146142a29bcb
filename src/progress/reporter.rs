use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{Metadata, ProgressPayload, ProgressUpdate, VisualIndicators, VisualState, WorkflowState};
use crate::observability::ObservabilityHub;

use super::estimator::ComplexityReport;
use super::stage::ProcessingStage;

/// 一次进度上报的输入，未填写的字段由 reporter 的当前状态补齐
#[derive(Clone, Debug, Default)]
pub struct ProgressReport {
    pub stage: Option<WorkflowState>,
    pub payload: Option<ProgressPayload>,
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub tokens: Option<usize>,
    pub eta_seconds: Option<u64>,
    pub visual_state: Option<VisualState>,
    pub visual_indicators: Option<VisualIndicators>,
    pub metadata: Metadata,
    pub complexity_label: Option<String>,
    pub complexity_score: Option<f64>,
    pub session_id: Option<i64>,
}

impl ProgressReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: WorkflowState) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_payload(mut self, payload: ProgressPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_eta(mut self, eta_seconds: Option<u64>) -> Self {
        self.eta_seconds = eta_seconds;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_complexity(mut self, report: &ComplexityReport) -> Self {
        self.complexity_label = Some(report.label.as_str().to_string());
        self.complexity_score = Some(report.score);
        self
    }

    pub fn with_session(mut self, session_id: Option<i64>) -> Self {
        self.session_id = session_id;
        self
    }
}

struct ReporterState {
    stage: ProcessingStage,
    progress: f64,
    message: String,
    started_at: Instant,
    tokens: usize,
    metadata: Metadata,
}

/// 把阶段状态与上报输入合成为 `ProgressUpdate`，并推送到观测 hub
pub struct ProgressReporter {
    state: Mutex<ReporterState>,
    hub: Option<ObservabilityHub>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReporterState {
                stage: ProcessingStage::Idle,
                progress: 0.0,
                message: ProcessingStage::Idle.default_message().to_string(),
                started_at: Instant::now(),
                tokens: 0,
                metadata: Metadata::new(),
            }),
            hub: None,
        }
    }

    pub fn with_hub(mut self, hub: ObservabilityHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn start_stage(&self, stage: ProcessingStage, message: Option<&str>, metadata: Metadata) {
        let mut state = self.state.lock();
        state.stage = stage;
        state.progress = 0.0;
        state.message = message
            .filter(|m| !m.is_empty())
            .unwrap_or(stage.default_message())
            .to_string();
        state.started_at = Instant::now();
        state.tokens = 0;
        state.metadata = metadata;
    }

    pub fn update_progress(&self, progress: f64, message: Option<&str>, metadata: Metadata) {
        let mut state = self.state.lock();
        state.progress = progress.clamp(0.0, 1.0);
        if let Some(message) = message.filter(|m| !m.is_empty()) {
            state.message = message.to_string();
        }
        state.metadata.extend(metadata);
    }

    pub fn increment_tokens(&self) {
        self.state.lock().tokens += 1;
    }

    pub fn set_token_count(&self, count: usize) {
        self.state.lock().tokens = count;
    }

    pub fn complete_stage(&self) {
        let mut state = self.state.lock();
        state.stage = ProcessingStage::Complete;
        state.progress = 1.0;
    }

    pub fn mark_error(&self, error: &str) {
        let mut state = self.state.lock();
        state.stage = ProcessingStage::Error;
        state.message = if error.is_empty() {
            ProcessingStage::Error.default_message().to_string()
        } else {
            error.to_string()
        };
    }

    pub fn current_stage(&self) -> ProcessingStage {
        self.state.lock().stage
    }

    /// 显式字段 > payload > 当前状态
    pub fn resolve(&self, report: ProgressReport) -> ProgressUpdate {
        let state = self.state.lock();
        let payload = report.payload.as_ref();
        let stage = report.stage.unwrap_or_else(|| state.stage.workflow_state());

        let mut update = ProgressUpdate::new(stage);
        update.progress = report
            .progress
            .or_else(|| payload.and_then(|p| p.progress))
            .or(Some(state.progress));
        update.message = report
            .message
            .or_else(|| payload.and_then(|p| p.body.clone()))
            .or_else(|| Some(state.message.clone()));
        update.tokens = report
            .tokens
            .or_else(|| payload.and_then(|p| p.tokens))
            .or(Some(state.tokens));
        update.elapsed_s = payload
            .and_then(|p| p.elapsed)
            .or_else(|| Some(state.started_at.elapsed().as_secs()));
        update.eta_seconds = report.eta_seconds.or_else(|| payload.and_then(|p| p.eta_seconds));
        if let Some(visual_state) = report.visual_state {
            update.visual_state = visual_state;
        }
        if let Some(indicators) = report.visual_indicators {
            update.visual_indicators = indicators;
        }

        let mut metadata = state.metadata.clone();
        if let Some(payload) = payload {
            metadata.insert("header".to_string(), Value::from(payload.header.clone()));
        }
        metadata.extend(report.metadata);
        update.metadata = metadata;
        update.complexity_label = report.complexity_label;
        update.complexity_score = report.complexity_score;
        update.session_id = report.session_id;
        update
    }

    /// 合成并发布；没有 hub 时只返回事件
    pub fn emit(&self, report: ProgressReport) -> ProgressUpdate {
        let update = self.resolve(report);
        if let Some(hub) = self.hub.as_ref() {
            hub.publish(update.clone());
        }
        update
    }
}
