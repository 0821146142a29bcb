use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::anyhow;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{AssistFlowError, Result};
use crate::events::{DomainEvent, StreamingResult};

/// 领域事件流
///
/// 丢弃时 abort 生产任务；子进程以 `kill_on_drop` 启动，随任务一起结束。
pub struct DomainEventStream {
    rx: mpsc::Receiver<DomainEvent>,
    task: Option<JoinHandle<()>>,
}

impl DomainEventStream {
    pub fn new(rx: mpsc::Receiver<DomainEvent>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// 收集全部事件直到生产端结束
    pub async fn collect_all(mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for DomainEventStream {
    type Item = DomainEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for DomainEventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 单次调用：事件流 + 最终结果
pub struct InvocationStream {
    pub events: DomainEventStream,
    result: oneshot::Receiver<Result<StreamingResult>>,
}

impl InvocationStream {
    pub(crate) fn new(
        events: DomainEventStream,
        result: oneshot::Receiver<Result<StreamingResult>>,
    ) -> Self {
        Self { events, result }
    }

    pub async fn next_event(&mut self) -> Option<DomainEvent> {
        self.events.next().await
    }

    /// 消费全部事件后返回结果
    pub async fn collect(self) -> (Vec<DomainEvent>, Result<StreamingResult>) {
        let InvocationStream { mut events, result } = self;
        let mut collected = Vec::new();
        while let Some(event) = events.next().await {
            collected.push(event);
        }
        let result = result.await.unwrap_or_else(|_| {
            Err(AssistFlowError::Other(anyhow!(
                "invocation task ended without a result"
            )))
        });
        (collected, result)
    }
}
