mod common;

use std::sync::Arc;

use assistflow::session::SessionPort;
use assistflow::{
    ConversationTurn, DomainEvent, FailureKind, MemorySessionStore, WorkflowRequest,
    WorkflowService, WorkflowState,
};

use common::{assert_bracketed, content_of, fast_config, orchestrator, script_assistant};

// $2 为 agent：plan 负责压缩/头脑风暴，其余为编码
const AGENT_SCRIPT: &str = r#"if [ "$2" = "plan" ]; then
  echo '{"type":"reasoning","content":"condensing"}'
  echo '{"type":"text","content":"Build a tokenizer for arithmetic"}'
else
  echo '{"type":"text","content":"Tokenizer written"}'
fi
"#;

fn state_details(events: &[DomainEvent]) -> Vec<(WorkflowState, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            DomainEvent::StateChanged { state, details } => {
                Some((*state, details.clone().unwrap_or_default()))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_code_workflow_with_empty_window_fails() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(MemorySessionStore::new());
    let assistant = script_assistant(dir.path(), "wf", AGENT_SCRIPT, &[]);
    let service = WorkflowService::new(orchestrator(fast_config(dir.path()), assistant, session));

    let events = service
        .stream_code(WorkflowRequest::new(1, "#code"))
        .collect_all()
        .await;

    assert_bracketed(&events);
    assert_eq!(events.len(), 4, "events: {events:#?}");
    match &events[2] {
        DomainEvent::ProcessingFailed { error, stage, kind, .. } => {
            assert_eq!(error, "Nothing to compress yet, send some context before #code");
            assert_eq!(*stage, WorkflowState::Transcribing);
            assert_eq!(*kind, FailureKind::EmptyWindow);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_code_workflow_compresses_then_codes() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(MemorySessionStore::new().with_window(
        5,
        vec![
            ConversationTurn::user("we need a tokenizer"),
            ConversationTurn::assistant("for which grammar?"),
        ],
    ));
    let assistant = script_assistant(dir.path(), "wf", AGENT_SCRIPT, &[]);
    let service = WorkflowService::new(orchestrator(
        fast_config(dir.path()),
        assistant,
        session.clone(),
    ));

    let events = service
        .stream_code(WorkflowRequest::new(5, "#code arithmetic"))
        .collect_all()
        .await;

    assert_bracketed(&events);
    assert!(matches!(
        events.last(),
        Some(DomainEvent::Lifecycle { message: Some(m), .. }) if m == "Workflow finished"
    ));
    assert_eq!(
        state_details(&events),
        vec![
            (WorkflowState::Transcribing, "Capturing conversation window".to_string()),
            (WorkflowState::Thinking, "Compressing conversation into a prompt".to_string()),
            (WorkflowState::Coding, "Running the assistant".to_string()),
            (WorkflowState::Executing, "Execution complete".to_string()),
        ]
    );
    // 压缩阶段不转发内容
    assert_eq!(content_of(&events), "Tokenizer written");

    let complexity = events
        .iter()
        .find_map(|e| match e {
            DomainEvent::Progress(update)
                if update.metadata.get("phase").and_then(|v| v.as_str()) == Some("complexity") =>
            {
                Some(update.clone())
            }
            _ => None,
        })
        .expect("complexity progress");
    assert!(complexity.complexity_label.is_some());
    assert!(complexity.eta_seconds.is_some());
    assert!(complexity
        .message
        .as_deref()
        .unwrap_or_default()
        .starts_with("Prompt complexity: "));

    let compress_progress = events.iter().any(|e| {
        matches!(e, DomainEvent::Progress(update)
            if update.metadata.get("phase").and_then(|v| v.as_str()) == Some("compressing"))
    });
    assert!(compress_progress);

    let window = session.conversation_window(5).await.unwrap();
    assert_eq!(window.len(), 4);
    assert_eq!(window[2], ConversationTurn::user("#code arithmetic"));
    assert_eq!(window[3], ConversationTurn::assistant("Tokenizer written"));
}

#[tokio::test]
async fn test_brainstorm_emits_single_delta() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(MemorySessionStore::new().with_window(
        9,
        vec![ConversationTurn::user("thinking about parsers").solo()],
    ));
    let assistant = script_assistant(dir.path(), "wf", AGENT_SCRIPT, &[]);
    let service = WorkflowService::new(orchestrator(
        fast_config(dir.path()),
        assistant,
        session.clone(),
    ));

    let events = service
        .stream_brainstorm(WorkflowRequest::new(9, "what next?"))
        .collect_all()
        .await;

    assert_bracketed(&events);
    assert!(matches!(
        events.last(),
        Some(DomainEvent::Lifecycle { message: Some(m), .. }) if m == "Brainstorm complete"
    ));
    let deltas: Vec<&DomainEvent> = events
        .iter()
        .filter(|e| matches!(e, DomainEvent::ContentDelta { .. }))
        .collect();
    assert_eq!(deltas.len(), 1);
    assert!(matches!(
        deltas[0],
        DomainEvent::ContentDelta { text, state: WorkflowState::Thinking }
            if text == "condensingBuild a tokenizer for arithmetic"
    ));

    let window = session.conversation_window(9).await.unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[1].role, "assistant");
}

#[tokio::test]
async fn test_cancelled_workflow_reports_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(
        MemorySessionStore::new().with_window(3, vec![ConversationTurn::user("context")]),
    );
    let assistant = script_assistant(dir.path(), "wf", AGENT_SCRIPT, &[]);
    let service = WorkflowService::new(orchestrator(fast_config(dir.path()), assistant, session));

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let events = service
        .stream_code(WorkflowRequest::new(3, "#code").with_cancel(token))
        .collect_all()
        .await;

    assert_bracketed(&events);
    assert!(matches!(
        &events[events.len() - 2],
        DomainEvent::ProcessingFailed { kind: FailureKind::Cancelled, details: Some(d), .. }
            if d == "Workflow cancelled"
    ));
    assert!(matches!(
        events.last(),
        Some(DomainEvent::Lifecycle { message: Some(m), .. }) if m == "Workflow cancelled"
    ));
}
