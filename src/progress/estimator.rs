use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::stage::ProcessingStage;

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\s\S]*?```").expect("code block pattern"));
static TECH_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(function|class|import|def|const|let|var|async|await)\b")
        .expect("keyword pattern")
});
static FILE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\.\w+\b").expect("file ref pattern"));

const EWMA_ALPHA: f64 = 0.3;
const FALLBACK_WEIGHT: f64 = 0.1;
const FALLBACK_DURATION_SECS: f64 = 30.0;
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// 阶段权重（合计为 1）与默认时长（秒）
fn default_profile() -> Vec<(ProcessingStage, f64, f64)> {
    vec![
        (ProcessingStage::Compressing, 0.10, 30.0),
        (ProcessingStage::InvokingAssistant, 0.10, 10.0),
        (ProcessingStage::Thinking, 0.25, 45.0),
        (ProcessingStage::Writing, 0.25, 45.0),
        (ProcessingStage::ToolExecution, 0.15, 25.0),
        (ProcessingStage::ExecutingCode, 0.10, 45.0),
        (ProcessingStage::Summarizing, 0.05, 15.0),
    ]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    pub stage: ProcessingStage,
    pub duration_ms: u64,
    #[serde(default)]
    pub prompt_length: usize,
    #[serde(default)]
    pub output_length: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLabel {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityLabel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            ComplexityLabel::Simple
        } else if score < 0.4 {
            ComplexityLabel::Moderate
        } else if score < 0.6 {
            ComplexityLabel::Complex
        } else {
            ComplexityLabel::VeryComplex
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLabel::Simple => "simple",
            ComplexityLabel::Moderate => "moderate",
            ComplexityLabel::Complex => "complex",
            ComplexityLabel::VeryComplex => "very complex",
        }
    }
}

/// 历史样本数量决定的置信度，仅供参考
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    fn from_samples(count: usize) -> Self {
        match count {
            0 => Confidence::None,
            1 => Confidence::Low,
            2..=4 => Confidence::Medium,
            _ => Confidence::High,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexityReport {
    pub word_count: usize,
    pub char_count: usize,
    pub code_blocks: usize,
    pub has_tech_keywords: bool,
    pub file_refs: usize,
    pub score: f64,
    pub label: ComplexityLabel,
    /// 已按复杂度放大后的预计总时长（秒）
    pub estimated_duration_s: f64,
}

impl ComplexityReport {
    /// 线性放大系数，范围 [1.0, 1.5]
    pub fn multiplier(&self) -> f64 {
        1.0 + self.score * 0.5
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: Option<ProcessingStage>,
    pub progress: f64,
    pub stage_progress: f64,
    pub elapsed_s: u64,
    pub eta_seconds: Option<u64>,
    pub confidence: Confidence,
}

impl ProgressSnapshot {
    fn idle() -> Self {
        Self {
            stage: None,
            progress: 0.0,
            stage_progress: 0.0,
            elapsed_s: 0,
            eta_seconds: None,
            confidence: Confidence::None,
        }
    }
}

/// 进度与 ETA 估算
///
/// - 总时长 = Σ(阶段时长 × 权重) × 复杂度系数
/// - 进度 = 已完成阶段权重之和 + 当前阶段权重 × min(1, 已用时间 / 阶段时长)
/// - 阶段时长用 EWMA(α = 0.3) 吸收观测值
///
/// `snapshot` 返回的进度在同一次调用内只增不减。
#[derive(Clone, Debug)]
pub struct ProgressEstimator {
    weights: HashMap<ProcessingStage, f64>,
    durations: HashMap<ProcessingStage, f64>,
    history: VecDeque<TimingSample>,
    history_size: usize,
    recorded: Vec<TimingSample>,
    current: Option<ProcessingStage>,
    stage_started: Option<Instant>,
    completed: BTreeSet<ProcessingStage>,
    complexity_multiplier: f64,
    token_rate: f64,
    high_water: f64,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl ProgressEstimator {
    pub fn new(history_size: usize) -> Self {
        let profile = default_profile();
        Self {
            weights: profile.iter().map(|(s, w, _)| (*s, *w)).collect(),
            durations: profile.iter().map(|(s, _, d)| (*s, *d)).collect(),
            history: VecDeque::with_capacity(history_size),
            history_size: history_size.max(1),
            recorded: Vec::new(),
            current: None,
            stage_started: None,
            completed: BTreeSet::new(),
            complexity_multiplier: 1.0,
            token_rate: 0.0,
            high_water: 0.0,
        }
    }

    /// 为单次调用派生一份副本：共享历史，清空调用内状态
    pub fn fork(&self) -> Self {
        let mut forked = self.clone();
        forked.recorded.clear();
        forked.reset();
        forked
    }

    /// 取出本副本新记录的样本，用于合并回共享估算器
    pub fn take_recorded(&mut self) -> Vec<TimingSample> {
        std::mem::take(&mut self.recorded)
    }

    pub fn absorb(&mut self, samples: Vec<TimingSample>) {
        for sample in samples {
            self.push_sample(sample);
        }
    }

    pub fn record_sample(
        &mut self,
        stage: ProcessingStage,
        duration: Duration,
        prompt_length: usize,
        output_length: usize,
    ) {
        let sample = TimingSample {
            stage,
            duration_ms: duration.as_millis() as u64,
            prompt_length,
            output_length,
        };
        self.recorded.push(sample.clone());
        self.push_sample(sample);
    }

    fn push_sample(&mut self, sample: TimingSample) {
        let observed_s = sample.duration_ms as f64 / 1000.0;
        let existing = self.base_duration(sample.stage);
        self.durations.insert(
            sample.stage,
            EWMA_ALPHA * observed_s + (1.0 - EWMA_ALPHA) * existing,
        );
        if sample.output_length > 0 && sample.duration_ms > 0 {
            self.token_rate = sample.output_length as f64 / observed_s;
        }
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    /// 切换阶段；上一个阶段记为完成并记录耗时样本
    pub fn set_current_stage(&mut self, stage: ProcessingStage) {
        self.set_current_stage_at(stage, Instant::now());
    }

    pub fn set_current_stage_at(&mut self, stage: ProcessingStage, now: Instant) {
        if self.current == Some(stage) {
            return;
        }
        if let (Some(previous), Some(started)) = (self.current, self.stage_started) {
            if previous.is_work_stage() {
                self.completed.insert(previous);
                self.record_sample(previous, now.saturating_duration_since(started), 0, 0);
            }
        }
        self.completed.remove(&stage);
        self.current = Some(stage);
        self.stage_started = Some(now);
    }

    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current
    }

    pub fn stage_elapsed(&self) -> Duration {
        self.stage_started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn weight(&self, stage: ProcessingStage) -> f64 {
        self.weights.get(&stage).copied().unwrap_or(FALLBACK_WEIGHT)
    }

    pub fn base_duration(&self, stage: ProcessingStage) -> f64 {
        self.durations
            .get(&stage)
            .copied()
            .unwrap_or(FALLBACK_DURATION_SECS)
    }

    pub fn stage_weights(&self) -> HashMap<ProcessingStage, f64> {
        self.weights.clone()
    }

    /// 未按复杂度放大的总时长（秒）
    pub fn base_total_duration(&self) -> f64 {
        ProcessingStage::WORK_STAGES
            .iter()
            .map(|stage| self.base_duration(*stage) * self.weight(*stage))
            .sum()
    }

    pub fn estimated_total_duration(&self) -> f64 {
        self.base_total_duration() * self.complexity_multiplier
    }

    pub fn set_complexity(&mut self, report: &ComplexityReport) {
        self.complexity_multiplier = report.multiplier();
    }

    pub fn analyze_prompt_complexity(&self, prompt: &str) -> ComplexityReport {
        let word_count = prompt.split_whitespace().count();
        let char_count = prompt.chars().count();
        let code_blocks = CODE_BLOCK.find_iter(prompt).count();
        let has_tech_keywords = TECH_KEYWORD.is_match(prompt);
        let file_refs = FILE_REF.find_iter(prompt).count();

        let mut score = 0.0;
        score += (word_count as f64 / 100.0).min(1.0) * 0.3;
        score += (code_blocks as f64 / 5.0).min(1.0) * 0.3;
        score += if has_tech_keywords { 0.2 } else { 0.0 };
        score += (file_refs as f64 / 10.0).min(1.0) * 0.2;

        ComplexityReport {
            word_count,
            char_count,
            code_blocks,
            has_tech_keywords,
            file_refs,
            score,
            label: ComplexityLabel::from_score(score),
            estimated_duration_s: self.base_total_duration() * (1.0 + score * 0.5),
        }
    }

    /// 纯计算：给定当前阶段已用时间，不更新高水位
    pub fn progress_for_elapsed(&self, elapsed: Duration) -> ProgressSnapshot {
        let Some(stage) = self.current else {
            return ProgressSnapshot::idle();
        };

        let completed_weight: f64 = self
            .completed
            .iter()
            .filter(|s| **s != stage)
            .map(|s| self.weight(*s))
            .sum();
        let base = self.base_duration(stage);
        let elapsed_s = elapsed.as_secs_f64();
        let stage_progress = if base > 0.0 {
            (elapsed_s / base).min(1.0)
        } else {
            1.0
        };
        let progress = (completed_weight + self.weight(stage) * stage_progress).min(1.0);

        let remaining = self.estimated_total_duration() * (1.0 - progress);
        let eta_seconds = if remaining >= 1.0 {
            Some(remaining as u64)
        } else {
            None
        };

        ProgressSnapshot {
            stage: Some(stage),
            progress,
            stage_progress,
            elapsed_s: elapsed.as_secs(),
            eta_seconds,
            confidence: self.confidence_for(stage),
        }
    }

    /// 当前快照，进度取历史最大值
    pub fn snapshot(&mut self) -> ProgressSnapshot {
        let mut snapshot = self.progress_for_elapsed(self.stage_elapsed());
        if snapshot.stage.is_some() {
            self.high_water = self.high_water.max(snapshot.progress);
            snapshot.progress = self.high_water;
        }
        snapshot
    }

    /// 只读快照：与高水位取最大值，但不更新高水位
    pub fn peek(&self) -> ProgressSnapshot {
        let mut snapshot = self.progress_for_elapsed(self.stage_elapsed());
        if snapshot.stage.is_some() {
            snapshot.progress = snapshot.progress.max(self.high_water);
        }
        snapshot
    }

    fn confidence_for(&self, stage: ProcessingStage) -> Confidence {
        Confidence::from_samples(self.history.iter().filter(|s| s.stage == stage).count())
    }

    pub fn confidence(&self) -> Confidence {
        self.current
            .map(|stage| self.confidence_for(stage))
            .unwrap_or(Confidence::None)
    }

    pub fn update_tokens(&mut self, token_count: usize) {
        if self.current.is_none() || token_count == 0 {
            return;
        }
        let elapsed = self.stage_elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.token_rate = token_count as f64 / elapsed;
        }
    }

    pub fn token_rate(&self) -> f64 {
        self.token_rate
    }

    /// 粗略估计剩余 token 数
    pub fn estimate_remaining_tokens(&self) -> Option<u64> {
        if self.current.is_none() || self.token_rate <= 0.0 {
            return None;
        }
        let progress = self
            .high_water
            .max(self.progress_for_elapsed(self.stage_elapsed()).progress);
        let estimated_remaining = (1.0 - progress) * 1000.0;
        Some((estimated_remaining / (self.token_rate / 100.0).max(0.1)) as u64)
    }

    /// 至少两个样本时返回平均耗时（毫秒）
    pub fn historical_average(&self, stage: ProcessingStage) -> Option<f64> {
        let samples: Vec<u64> = self
            .history
            .iter()
            .filter(|s| s.stage == stage)
            .map(|s| s.duration_ms)
            .collect();
        if samples.len() >= 2 {
            Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
        } else {
            None
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// 清空调用内状态，保留历史与 EWMA 时长
    pub fn reset(&mut self) {
        self.current = None;
        self.stage_started = None;
        self.completed.clear();
        self.complexity_multiplier = 1.0;
        self.token_rate = 0.0;
        self.high_water = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_total_duration() {
        let estimator = ProgressEstimator::default();
        assert!((estimator.base_total_duration() - 35.5).abs() < 1e-9);
        let weights: f64 = estimator.stage_weights().values().sum();
        assert!((weights - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_complexity_scoring() {
        let estimator = ProgressEstimator::default();
        let simple = estimator.analyze_prompt_complexity("fix typo");
        assert_eq!(simple.label, ComplexityLabel::Simple);
        assert_eq!(simple.word_count, 2);

        let prompt = "refactor main.rs and lib.rs: make the async function await \
                      ```rust\nlet x = 1;\n``` ```py\ndef f(): pass\n```";
        let report = estimator.analyze_prompt_complexity(prompt);
        assert_eq!(report.code_blocks, 2);
        assert!(report.has_tech_keywords);
        assert!(report.file_refs >= 2);
        assert!(report.score > simple.score);
        assert!(report.multiplier() <= 1.5);
        assert!(report.estimated_duration_s >= estimator.base_total_duration());
    }

    #[test]
    fn test_labels() {
        assert_eq!(ComplexityLabel::from_score(0.19), ComplexityLabel::Simple);
        assert_eq!(ComplexityLabel::from_score(0.2), ComplexityLabel::Moderate);
        assert_eq!(ComplexityLabel::from_score(0.5), ComplexityLabel::Complex);
        assert_eq!(ComplexityLabel::from_score(0.6).as_str(), "very complex");
    }

    #[test]
    fn test_progress_monotonic_within_stage() {
        let mut estimator = ProgressEstimator::default();
        estimator.set_current_stage(ProcessingStage::Thinking);
        let mut last = -1.0;
        for secs in [0, 1, 5, 10, 30, 45, 60, 600] {
            let snapshot = estimator.progress_for_elapsed(Duration::from_secs(secs));
            assert!(snapshot.progress >= last, "progress went backwards at {secs}s");
            assert!((0.0..=1.0).contains(&snapshot.progress));
            last = snapshot.progress;
        }
        let capped = estimator.progress_for_elapsed(Duration::from_secs(600));
        assert!((capped.stage_progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_completed_stages_accumulate() {
        let mut estimator = ProgressEstimator::default();
        let start = Instant::now();
        estimator.set_current_stage_at(ProcessingStage::InvokingAssistant, start);
        estimator.set_current_stage_at(ProcessingStage::Thinking, start + Duration::from_secs(2));
        let snapshot = estimator.progress_for_elapsed(Duration::ZERO);
        assert!((snapshot.progress - 0.10).abs() < 1e-9);
        assert_eq!(estimator.history_len(), 1);
        assert_eq!(estimator.confidence(), Confidence::None);
    }

    #[test]
    fn test_ewma_and_confidence() {
        let mut estimator = ProgressEstimator::default();
        estimator.record_sample(ProcessingStage::Thinking, Duration::from_secs(15), 0, 0);
        // 0.3 * 15 + 0.7 * 45
        assert!((estimator.base_duration(ProcessingStage::Thinking) - 36.0).abs() < 1e-9);
        assert_eq!(estimator.historical_average(ProcessingStage::Thinking), None);
        estimator.record_sample(ProcessingStage::Thinking, Duration::from_secs(25), 0, 0);
        assert_eq!(
            estimator.historical_average(ProcessingStage::Thinking),
            Some(20_000.0)
        );
        estimator.set_current_stage(ProcessingStage::Thinking);
        assert_eq!(estimator.confidence(), Confidence::Medium);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut estimator = ProgressEstimator::new(3);
        for _ in 0..5 {
            estimator.record_sample(ProcessingStage::Writing, Duration::from_secs(1), 0, 0);
        }
        assert_eq!(estimator.history_len(), 3);
    }

    #[test]
    fn test_fork_and_absorb() {
        let mut shared = ProgressEstimator::default();
        let mut attempt = shared.fork();
        attempt.record_sample(ProcessingStage::Writing, Duration::from_secs(5), 10, 100);
        shared.absorb(attempt.take_recorded());
        assert_eq!(shared.history_len(), 1);
        assert!(attempt.take_recorded().is_empty());
        assert!(shared.token_rate() > 0.0);
    }

    #[test]
    fn test_peek_leaves_state_untouched() {
        let mut estimator = ProgressEstimator::default();
        estimator.set_current_stage(ProcessingStage::Writing);
        estimator.high_water = 0.9;
        let peeked = estimator.peek();
        assert!(peeked.progress >= 0.9);
        assert_eq!(peeked.stage, Some(ProcessingStage::Writing));
        assert_eq!(estimator.high_water, 0.9);
        assert_eq!(estimator.token_rate(), 0.0);

        estimator.high_water = 0.0;
        let fresh = estimator.peek();
        assert!(fresh.progress < 0.9);
        assert_eq!(estimator.high_water, 0.0);
    }

    #[test]
    fn test_idle_snapshot() {
        let mut estimator = ProgressEstimator::default();
        let snapshot = estimator.snapshot();
        assert_eq!(snapshot.stage, None);
        assert_eq!(snapshot.progress, 0.0);
        assert_eq!(estimator.estimate_remaining_tokens(), None);
    }
}
