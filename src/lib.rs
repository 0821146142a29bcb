pub mod assistant;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod progress;
pub mod runtime;
pub mod session;
pub mod utils;

pub use assistant::{
    Assistant, AssistantRegistry, CodexAssistant, CommandSpec, CustomAssistant,
    CustomAssistantConfig, GeminiAssistant, ModelRoster, OpenCodeAssistant, StreamEvent,
    StreamKind,
};
pub use config::{HeartbeatConfig, StreamConfig};
pub use error::{AssistFlowError, Result};
pub use events::{
    DomainEvent, FailureKind, LifecycleStatus, ProgressPayload, ProgressUpdate, StreamingResult,
    WorkflowState,
};
pub use observability::{ObservabilityHub, Subscription};
pub use progress::{ProcessingStage, ProgressEstimator, ProgressReporter, StageTracker};
pub use runtime::{
    DomainEventStream, EventSink, InvocationRequest, InvocationStream, StreamOrchestrator,
    WorkflowRequest, WorkflowService,
};
pub use session::{ConversationTurn, MemorySessionStore, SessionPort};
pub use utils::logging;
