// 流式调用运行时：子进程编排、事件发送与工作流

mod attempt;
pub mod orchestrator;
pub mod request;
pub mod sink;
pub mod stream;
pub mod workflow;

pub use orchestrator::StreamOrchestrator;
pub use request::{InvocationRequest, DEFAULT_AGENT};
pub use sink::{failure_events, EventSink};
pub use stream::{DomainEventStream, InvocationStream};
pub use workflow::{WorkflowRequest, WorkflowService, BRAINSTORM_SYSTEM, COMPRESS_SYSTEM};
