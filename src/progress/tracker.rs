use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};

use crate::events::Metadata;

use super::stage::ProcessingStage;

/// 单个阶段的度量
#[derive(Clone, Debug)]
pub struct StageMetrics {
    pub stage: ProcessingStage,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
    pub token_count: usize,
    pub metadata: Metadata,
}

impl StageMetrics {
    fn new(stage: ProcessingStage, metadata: Metadata) -> Self {
        Self {
            stage,
            started_at: Instant::now(),
            ended_at: None,
            token_count: 0,
            metadata,
        }
    }

    pub fn duration(&self) -> Duration {
        self.ended_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

// 跟踪器自己的权重表与阶段时长，与估算器相互独立
fn tracker_weight(stage: ProcessingStage) -> f64 {
    match stage {
        ProcessingStage::Compressing => 0.1,
        ProcessingStage::InvokingAssistant => 0.15,
        ProcessingStage::Thinking => 0.25,
        ProcessingStage::Writing => 0.2,
        ProcessingStage::ToolExecution => 0.15,
        ProcessingStage::ExecutingCode => 0.1,
        ProcessingStage::Summarizing => 0.05,
        _ => 0.1,
    }
}

fn tracker_duration_secs(stage: ProcessingStage) -> f64 {
    match stage {
        ProcessingStage::Compressing => 30.0,
        ProcessingStage::InvokingAssistant => 10.0,
        ProcessingStage::Thinking => 60.0,
        ProcessingStage::Writing => 45.0,
        ProcessingStage::ToolExecution => 30.0,
        ProcessingStage::ExecutingCode => 60.0,
        ProcessingStage::Summarizing => 15.0,
        _ => 30.0,
    }
}

/// 阶段跟踪器：记录阶段耗时、token 数，并通过 tracing 输出阶段日志
#[derive(Debug, Default)]
pub struct StageTracker {
    current: Option<StageMetrics>,
    history: Vec<StageMetrics>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新阶段，正在进行的阶段先归档
    pub fn start_stage(&mut self, stage: ProcessingStage, message: &str, metadata: Metadata) {
        self.finalize_current();
        info!(stage = %stage, message, "stage started");
        self.current = Some(StageMetrics::new(stage, metadata));
    }

    fn finalize_current(&mut self) {
        if let Some(mut metrics) = self.current.take() {
            metrics.ended_at = Some(Instant::now());
            info!(
                stage = %metrics.stage,
                duration_ms = metrics.duration().as_millis() as u64,
                tokens = metrics.token_count,
                "stage complete"
            );
            self.history.push(metrics);
        }
    }

    pub fn update_progress(&mut self, progress: f64, metadata: Metadata) {
        if let Some(metrics) = self.current.as_mut() {
            metrics.metadata.extend(metadata);
            tracing::debug!(stage = %metrics.stage, progress, "stage progress");
        }
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) {
        if let Some(metrics) = self.current.as_mut() {
            metrics.metadata.insert(key.to_string(), value);
        }
    }

    pub fn add_tokens(&mut self, count: usize) {
        if let Some(metrics) = self.current.as_mut() {
            metrics.token_count += count;
        }
    }

    pub fn complete_stage(&mut self) {
        self.finalize_current();
    }

    pub fn mark_error(&mut self, error: &str) {
        if let Some(metrics) = self.current.as_ref() {
            warn!(stage = %metrics.stage, error, "stage failed");
        }
        self.finalize_current();
    }

    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current.as_ref().map(|m| m.stage)
    }

    pub fn current_metrics(&self) -> Option<&StageMetrics> {
        self.current.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.current
            .as_ref()
            .map(StageMetrics::elapsed)
            .unwrap_or_default()
    }

    pub fn token_count(&self) -> usize {
        self.current.as_ref().map(|m| m.token_count).unwrap_or(0)
    }

    pub fn stage_weight(&self, stage: ProcessingStage) -> f64 {
        tracker_weight(stage)
    }

    pub fn estimate_overall_progress(&self) -> f64 {
        self.progress_with_elapsed(self.elapsed())
    }

    fn progress_with_elapsed(&self, elapsed: Duration) -> f64 {
        let mut progress: f64 = self.history.iter().map(|m| tracker_weight(m.stage)).sum();
        if let Some(current) = self.current.as_ref() {
            let estimate = tracker_duration_secs(current.stage);
            let stage_progress = (elapsed.as_secs_f64() / estimate).min(1.0);
            progress += tracker_weight(current.stage) * stage_progress;
        }
        progress.min(1.0)
    }

    pub fn history(&self) -> &[StageMetrics] {
        &self.history
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lifecycle() {
        let mut tracker = StageTracker::new();
        assert_eq!(tracker.current_stage(), None);

        tracker.start_stage(ProcessingStage::InvokingAssistant, "starting", Metadata::new());
        tracker.add_tokens(3);
        assert_eq!(tracker.token_count(), 3);

        tracker.start_stage(ProcessingStage::Thinking, "thinking", Metadata::new());
        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.history()[0].token_count, 3);
        assert_eq!(tracker.token_count(), 0);

        tracker.mark_error("boom");
        assert_eq!(tracker.current_stage(), None);
        assert_eq!(tracker.history().len(), 2);
    }

    #[test]
    fn test_overall_progress() {
        let mut tracker = StageTracker::new();
        tracker.start_stage(ProcessingStage::Compressing, "", Metadata::new());
        tracker.complete_stage();
        tracker.start_stage(ProcessingStage::Thinking, "", Metadata::new());

        let at_start = tracker.progress_with_elapsed(Duration::ZERO);
        assert!((at_start - 0.1).abs() < 1e-9);
        let later = tracker.progress_with_elapsed(Duration::from_secs(30));
        assert!((later - 0.225).abs() < 1e-9);
        let capped = tracker.progress_with_elapsed(Duration::from_secs(3600));
        assert!((capped - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_metadata_merge() {
        let mut tracker = StageTracker::new();
        tracker.start_stage(ProcessingStage::Writing, "", Metadata::new());
        tracker.set_metadata("tool", Value::from("bash"));
        let mut extra = Metadata::new();
        extra.insert("phase".into(), Value::from("writing"));
        tracker.update_progress(0.5, extra);
        let metrics = tracker.current_metrics().unwrap();
        assert_eq!(metrics.metadata.len(), 2);
    }
}
