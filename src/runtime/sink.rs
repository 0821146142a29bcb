use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AssistFlowError;
use crate::events::{DomainEvent, WorkflowState};

/// 领域事件的发送端
///
/// 接收端被丢弃后发送静默失败，调用本身继续执行直到结束或被取消。
/// 同时记住最近一次转发的工作流状态，失败事件据此标注阶段。
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::Sender<DomainEvent>,
    state: Arc<Mutex<Option<WorkflowState>>>,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<DomainEvent>) -> Self {
        Self {
            sender,
            state: Arc::new(Mutex::new(None)),
        }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: DomainEvent) {
        if let DomainEvent::StateChanged { state, .. } = &event {
            *self.state.lock() = Some(*state);
        }
        if self.sender.send(event).await.is_err() {
            debug!("event receiver dropped, discarding event");
        }
    }

    /// 最近一次 `StateChanged` 的状态，没有则返回 `fallback`
    pub fn current_state(&self, fallback: WorkflowState) -> WorkflowState {
        self.state.lock().unwrap_or(fallback)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// 失败的两段式结尾：`ProcessingFailed` + `Lifecycle(Failed)`
    pub async fn emit_failure(&self, err: &AssistFlowError, fallback: WorkflowState) {
        let stage = self.current_state(fallback);
        for event in failure_events(err, stage) {
            self.emit(event).await;
        }
    }
}

pub fn failure_events(err: &AssistFlowError, stage: WorkflowState) -> [DomainEvent; 2] {
    let message = err.to_string();
    let (details, lifecycle_message) = if err.is_cancelled() {
        (Some("Workflow cancelled".to_string()), "Workflow cancelled".to_string())
    } else {
        (None, message.clone())
    };
    [
        DomainEvent::ProcessingFailed {
            error: message,
            stage,
            kind: err.failure_kind(),
            details,
        },
        DomainEvent::failed(lifecycle_message),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FailureKind, LifecycleStatus};

    #[tokio::test]
    async fn test_closed_receiver_is_tolerated() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        sink.emit(DomainEvent::started("go")).await;
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_tracks_state_for_failures() {
        let (sink, mut rx) = EventSink::channel(8);
        sink.emit(DomainEvent::state_changed(WorkflowState::Coding, "run"))
            .await;
        sink.emit_failure(&AssistFlowError::Cancelled, WorkflowState::Thinking)
            .await;

        let _ = rx.recv().await;
        match rx.recv().await {
            Some(DomainEvent::ProcessingFailed { stage, kind, details, .. }) => {
                assert_eq!(stage, WorkflowState::Coding);
                assert_eq!(kind, FailureKind::Cancelled);
                assert_eq!(details.as_deref(), Some("Workflow cancelled"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        let last = rx.recv().await.unwrap();
        assert_eq!(last.lifecycle_status(), Some(LifecycleStatus::Failed));
    }
}
