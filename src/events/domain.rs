use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Metadata = Map<String, Value>;

/// 工作流状态
///
/// 状态可以回退（例如工具调用结束后回到 Coding），但同一时刻只持有一个状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Transcribing,
    Thinking,
    Coding,
    Executing,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Transcribing => "transcribing",
            WorkflowState::Thinking => "thinking",
            WorkflowState::Coding => "coding",
            WorkflowState::Executing => "executing",
        }
    }

    pub fn visual_state(&self) -> VisualState {
        match self {
            WorkflowState::Transcribing | WorkflowState::Thinking => VisualState::Thinking,
            WorkflowState::Coding => VisualState::Coding,
            WorkflowState::Executing => VisualState::Executing,
        }
    }

    pub fn visual_indicators(&self) -> VisualIndicators {
        match self {
            WorkflowState::Transcribing | WorkflowState::Thinking => VisualIndicators {
                thinking: true,
                coding: false,
            },
            WorkflowState::Coding => VisualIndicators {
                thinking: true,
                coding: true,
            },
            WorkflowState::Executing => VisualIndicators {
                thinking: false,
                coding: true,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    #[default]
    Idle,
    Thinking,
    Coding,
    Executing,
    Complete,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualIndicators {
    pub thinking: bool,
    pub coding: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Started,
    Completed,
    Failed,
}

/// 失败类别，随 `ProcessingFailed` 一起下发，取消与普通失败可区分
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProcessNotFound,
    RateLimited,
    ProcessFailed,
    HangTimeout,
    ExitTimeout,
    EmptyOutput,
    Cancelled,
    EmptyWindow,
    Internal,
}

/// 进度更新事件
///
/// 所有字段都可能为空，下游必须容忍全空的更新。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: WorkflowState,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub elapsed_s: Option<u64>,
    #[serde(default)]
    pub eta_seconds: Option<u64>,
    #[serde(default)]
    pub tokens: Option<usize>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub visual_state: VisualState,
    #[serde(default)]
    pub visual_indicators: VisualIndicators,
    #[serde(default)]
    pub complexity_label: Option<String>,
    #[serde(default)]
    pub complexity_score: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub session_id: Option<i64>,
}

impl ProgressUpdate {
    pub fn new(stage: WorkflowState) -> Self {
        Self {
            stage,
            progress: None,
            elapsed_s: None,
            eta_seconds: None,
            tokens: None,
            message: None,
            visual_state: stage.visual_state(),
            visual_indicators: stage.visual_indicators(),
            complexity_label: None,
            complexity_score: None,
            metadata: Metadata::new(),
            session_id: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.metadata
            .get("heartbeat")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// 对外发布的领域事件
///
/// 一次调用的事件序列以唯一的 `Lifecycle(Started)` 开始，
/// 以唯一的 `Lifecycle(Completed | Failed)` 结束。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Lifecycle {
        status: LifecycleStatus,
        #[serde(default)]
        message: Option<String>,
    },
    StateChanged {
        state: WorkflowState,
        #[serde(default)]
        details: Option<String>,
    },
    Progress(ProgressUpdate),
    ContentDelta {
        text: String,
        state: WorkflowState,
    },
    TaskInteraction {
        question: String,
        stage: WorkflowState,
        #[serde(default)]
        metadata: Metadata,
    },
    ProcessingFailed {
        error: String,
        stage: WorkflowState,
        kind: FailureKind,
        #[serde(default)]
        details: Option<String>,
    },
}

impl DomainEvent {
    pub fn started(message: impl Into<String>) -> Self {
        DomainEvent::Lifecycle {
            status: LifecycleStatus::Started,
            message: Some(message.into()),
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        DomainEvent::Lifecycle {
            status: LifecycleStatus::Completed,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        DomainEvent::Lifecycle {
            status: LifecycleStatus::Failed,
            message: Some(message.into()),
        }
    }

    pub fn state_changed(state: WorkflowState, details: impl Into<String>) -> Self {
        DomainEvent::StateChanged {
            state,
            details: Some(details.into()),
        }
    }

    pub fn lifecycle_status(&self) -> Option<LifecycleStatus> {
        match self {
            DomainEvent::Lifecycle { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.lifecycle_status(),
            Some(LifecycleStatus::Completed) | Some(LifecycleStatus::Failed)
        )
    }
}
