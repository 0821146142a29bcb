// 阶段、进度估算、心跳与进度上报

pub mod estimator;
pub mod heartbeat;
pub mod reporter;
pub mod stage;
pub mod tracker;

pub use estimator::{
    ComplexityLabel, ComplexityReport, Confidence, ProgressEstimator, ProgressSnapshot,
    TimingSample, DEFAULT_HISTORY_SIZE,
};
pub use heartbeat::{spawn_heartbeat, HeartbeatGuard, HeartbeatSource};
pub use reporter::{ProgressReport, ProgressReporter};
pub use stage::ProcessingStage;
pub use tracker::{StageMetrics, StageTracker};
