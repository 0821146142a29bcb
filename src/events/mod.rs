// 领域事件模型

mod domain;
mod payload;

pub use domain::{
    DomainEvent, FailureKind, LifecycleStatus, Metadata, ProgressUpdate, VisualIndicators,
    VisualState, WorkflowState,
};
pub use payload::{ProgressPayload, StreamingResult};
