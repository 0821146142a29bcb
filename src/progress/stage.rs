use serde::{Deserialize, Serialize};

use crate::events::WorkflowState;

/// 内部处理阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Idle,
    Compressing,
    InvokingAssistant,
    Thinking,
    Writing,
    ToolExecution,
    ExecutingCode,
    Summarizing,
    Complete,
    Error,
}

impl ProcessingStage {
    /// 参与进度估算的阶段，按执行顺序排列
    pub const WORK_STAGES: [ProcessingStage; 7] = [
        ProcessingStage::Compressing,
        ProcessingStage::InvokingAssistant,
        ProcessingStage::Thinking,
        ProcessingStage::Writing,
        ProcessingStage::ToolExecution,
        ProcessingStage::ExecutingCode,
        ProcessingStage::Summarizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Idle => "idle",
            ProcessingStage::Compressing => "compressing",
            ProcessingStage::InvokingAssistant => "invoking_assistant",
            ProcessingStage::Thinking => "thinking",
            ProcessingStage::Writing => "writing",
            ProcessingStage::ToolExecution => "tool_execution",
            ProcessingStage::ExecutingCode => "executing_code",
            ProcessingStage::Summarizing => "summarizing",
            ProcessingStage::Complete => "complete",
            ProcessingStage::Error => "error",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ProcessingStage::Idle => "Ready",
            ProcessingStage::Compressing => "Compressing conversation...",
            ProcessingStage::InvokingAssistant => "Invoking assistant...",
            ProcessingStage::Thinking => "Thinking...",
            ProcessingStage::Writing => "Writing response...",
            ProcessingStage::ToolExecution => "Executing tool...",
            ProcessingStage::ExecutingCode => "Running code...",
            ProcessingStage::Summarizing => "Generating summary...",
            ProcessingStage::Complete => "Done",
            ProcessingStage::Error => "Error occurred",
        }
    }

    /// 对外的工作流状态
    pub fn workflow_state(&self) -> WorkflowState {
        match self {
            ProcessingStage::Writing => WorkflowState::Coding,
            ProcessingStage::ToolExecution
            | ProcessingStage::ExecutingCode
            | ProcessingStage::Summarizing
            | ProcessingStage::Error => WorkflowState::Executing,
            _ => WorkflowState::Thinking,
        }
    }

    pub fn is_work_stage(&self) -> bool {
        Self::WORK_STAGES.contains(self)
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_mapping() {
        assert_eq!(
            ProcessingStage::Compressing.workflow_state(),
            WorkflowState::Thinking
        );
        assert_eq!(ProcessingStage::Writing.workflow_state(), WorkflowState::Coding);
        assert_eq!(
            ProcessingStage::Summarizing.workflow_state(),
            WorkflowState::Executing
        );
        assert_eq!(ProcessingStage::Error.workflow_state(), WorkflowState::Executing);
        assert_eq!(ProcessingStage::Idle.workflow_state(), WorkflowState::Thinking);
    }

    #[test]
    fn test_work_stages() {
        assert!(ProcessingStage::Thinking.is_work_stage());
        assert!(!ProcessingStage::Complete.is_work_stage());
    }
}
