// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end orchestrator tests over in-memory connectors.
//!
//! These exercise the prompt/question state machine the way peers drive it
//! in production: a UI connector subscribed to display events and an
//! assistant connector subscribed to `prompt`.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

use switchboard::agent::{AgentProfile, AgentRunner, DisabledAgent};
use switchboard::config::Settings;
use switchboard::connector::{Connector, ConnectorRegistry, ConnectorSink, TaskKey};
use switchboard::error::AgentError;
use switchboard::protocol::{Action, Envelope, EventKind};
use switchboard::task::{TaskOrchestrator, TaskPhase};
use switchboard::types::{
    ContextFile, ContextMessage, PromptContext, PromptMode, QuestionData, UsagePayload,
    UsageReport,
};
use switchboard::worktree::{
    MergeState, UnmergedWork, WorktreeDescriptor, WorktreeError, Worktrees,
};
use switchboard::{ConnectorError, Task, WorkingDirMode};

// ============================================================================
// Test doubles
// ============================================================================

/// Sink that forwards envelopes into an unbounded channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl ConnectorSink for ChannelSink {
    async fn send(&self, envelope: &Envelope) -> Result<(), ConnectorError> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| ConnectorError::ConnectionClosed)
    }
}

/// Worktree collaborator with canned responses.
#[derive(Default)]
struct FakeWorktrees {
    unmerged: StdMutex<UnmergedWork>,
    created: StdMutex<Vec<String>>,
    removed: StdMutex<Vec<String>>,
}

#[async_trait]
impl Worktrees for FakeWorktrees {
    async fn create_worktree(
        &self,
        base_dir: &std::path::Path,
        _task_id: &str,
        branch: &str,
    ) -> Result<WorktreeDescriptor, WorktreeError> {
        self.created.lock().unwrap().push(branch.to_string());
        Ok(WorktreeDescriptor {
            path: base_dir.join(format!("wt-{}", branch)),
            branch: branch.to_string(),
        })
    }

    async fn task_worktree(
        &self,
        _base_dir: &std::path::Path,
        _task_id: &str,
    ) -> Result<Option<WorktreeDescriptor>, WorktreeError> {
        Ok(None)
    }

    async fn remove_worktree(
        &self,
        _base_dir: &std::path::Path,
        descriptor: &WorktreeDescriptor,
    ) -> Result<(), WorktreeError> {
        self.removed.lock().unwrap().push(descriptor.branch.clone());
        Ok(())
    }

    async fn check_unmerged_work(
        &self,
        _base_dir: &std::path::Path,
        _path: &std::path::Path,
    ) -> Result<UnmergedWork, WorktreeError> {
        Ok(*self.unmerged.lock().unwrap())
    }

    async fn merge_to_main(
        &self,
        _base_dir: &std::path::Path,
        _task_id: &str,
        _path: &std::path::Path,
        squash: bool,
        _message: Option<&str>,
    ) -> Result<MergeState, WorktreeError> {
        Ok(MergeState {
            branch: "b".to_string(),
            previous_main_head: "old".to_string(),
            merged_head: "new".to_string(),
            squash,
            merged_at: 0,
        })
    }

    async fn revert_merge(
        &self,
        _base_dir: &std::path::Path,
        _task_id: &str,
        _path: &std::path::Path,
        _state: &MergeState,
    ) -> Result<(), WorktreeError> {
        Ok(())
    }

    async fn changes_diff(
        &self,
        _base_dir: &std::path::Path,
        _path: &std::path::Path,
    ) -> Result<Option<String>, WorktreeError> {
        Ok(Some("diff".to_string()))
    }
}

/// Agent collaborator returning canned messages.
struct FakeAgent {
    produced: Vec<ContextMessage>,
}

#[async_trait]
impl AgentRunner for FakeAgent {
    async fn run_agent(
        &self,
        _task: &Task,
        _profile: &AgentProfile,
        _prompt: &str,
        _prompt_context: Option<&PromptContext>,
        _context_messages: &[ContextMessage],
        _context_files: &[ContextFile],
        _system_prompt: Option<&str>,
        _cancel: watch::Receiver<bool>,
    ) -> Result<Vec<ContextMessage>, AgentError> {
        Ok(self.produced.clone())
    }

    async fn estimate_tokens(
        &self,
        _task: &Task,
        _profile: &AgentProfile,
    ) -> Result<u64, AgentError> {
        Ok(0)
    }

    async fn generate_text(
        &self,
        _profile: &AgentProfile,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<String, AgentError> {
        Ok(String::new())
    }

    fn interrupt(&self) {}
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: TempDir,
    key: TaskKey,
    orchestrator: Arc<TaskOrchestrator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_collaborators(Arc::new(FakeWorktrees::default()), Arc::new(DisabledAgent))
    }

    fn with_collaborators(
        worktrees: Arc<dyn Worktrees>,
        agent: Arc<dyn AgentRunner>,
    ) -> Self {
        let dir = tempdir().unwrap();
        let key = TaskKey::new(dir.path(), "task-1");
        let registry = Arc::new(ConnectorRegistry::new());
        let orchestrator = Arc::new(
            TaskOrchestrator::new(
                key.clone(),
                registry.clone(),
                agent,
                worktrees,
                Settings::default(),
            )
            .unwrap(),
        );
        Self {
            _dir: dir,
            key,
            orchestrator,
        }
    }

    /// Attach a connector with the given subscriptions and catch-up replay.
    async fn attach(&self, listen_to: Vec<EventKind>) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Connector::new(
            self.key.clone(),
            listen_to,
            None,
            Box::new(ChannelSink { tx }),
        ));
        self.orchestrator.register_connector(connector).await;
        rx
    }
}

/// Receive the next envelope, failing the test after two seconds.
async fn recv(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("channel closed")
}

/// Receive envelopes until one matches, failing the test after two seconds.
async fn recv_until<F>(rx: &mut mpsc::UnboundedReceiver<Envelope>, mut pred: F) -> Envelope
where
    F: FnMut(&Envelope) -> bool,
{
    loop {
        let envelope = recv(rx).await;
        if pred(&envelope) {
            return envelope;
        }
    }
}

fn prompt_context_of(envelope: &Envelope) -> PromptContext {
    match &envelope.action {
        Action::Prompt { prompt_context, .. } => prompt_context.clone().expect("context missing"),
        other => panic!("expected prompt envelope, got {:?}", other.kind()),
    }
}

// ============================================================================
// Prompt serialization and ordering
// ============================================================================

#[tokio::test]
async fn test_second_prompt_queues_until_first_finishes() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    let orchestrator = harness.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_prompt("one", PromptMode::Code).await });

    let dispatched = recv(&mut assistant).await;
    let context = prompt_context_of(&dispatched);
    assert_eq!(
        harness.orchestrator.phase().await,
        TaskPhase::AwaitingConnectorDispatch
    );

    let orchestrator = harness.orchestrator.clone();
    let second = tokio::spawn(async move { orchestrator.run_prompt("two", PromptMode::Code).await });

    // The second prompt must not dispatch while the first is in flight.
    sleep(Duration::from_millis(100)).await;
    assert!(assistant.try_recv().is_err());

    harness
        .orchestrator
        .process_response_completed("m1", Some(&context), "answer".to_string(), None, None, Some(1))
        .await;
    harness.orchestrator.prompt_finished(Some(&context.id)).await;

    let first_result = first.await.unwrap().unwrap();
    assert_eq!(first_result.len(), 1);
    assert_eq!(first_result[0].content, "answer");

    // Now the queued prompt dispatches.
    let second_dispatch = recv(&mut assistant).await;
    let second_context = prompt_context_of(&second_dispatch);
    assert_ne!(second_context.id, context.id);

    harness
        .orchestrator
        .prompt_finished(Some(&second_context.id))
        .await;
    let second_result = second.await.unwrap().unwrap();
    assert!(second_result.is_empty());
}

#[tokio::test]
async fn test_completions_are_returned_sorted_by_sequence_number() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_prompt("go", PromptMode::Code).await });

    let context = prompt_context_of(&recv(&mut assistant).await);

    // Sequence 2 arrives before sequence 1.
    harness
        .orchestrator
        .process_response_completed("m2", Some(&context), "second".to_string(), None, None, Some(2))
        .await;
    harness
        .orchestrator
        .process_response_completed("m1", Some(&context), "first".to_string(), None, None, Some(1))
        .await;
    harness.orchestrator.prompt_finished(Some(&context.id)).await;

    let responses = run.await.unwrap().unwrap();
    let order: Vec<&str> = responses.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(order, vec!["first", "second"]);
}

#[tokio::test]
async fn test_send_prompt_carries_context_snapshot_and_resolves_on_finish() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    harness
        .orchestrator
        .add_context_file("src/main.rs", true)
        .await
        .unwrap();

    let context = PromptContext::new();
    let orchestrator = harness.orchestrator.clone();
    let ctx = context.clone();
    let send = tokio::spawn(async move {
        orchestrator.send_prompt("direct", ctx, PromptMode::Ask).await
    });

    let dispatched = recv(&mut assistant).await;
    match &dispatched.action {
        Action::Prompt {
            mode,
            messages,
            files,
            ..
        } => {
            assert_eq!(*mode, PromptMode::Ask);
            assert!(messages.is_some());
            let files = files.as_ref().expect("file snapshot missing");
            assert_eq!(files.len(), 1);
            assert!(files[0].read_only);
        }
        other => panic!("expected prompt envelope, got {:?}", other.kind()),
    }

    harness
        .orchestrator
        .process_response_completed("m1", Some(&context), "ok".to_string(), None, None, None)
        .await;
    harness.orchestrator.prompt_finished(Some(&context.id)).await;

    let responses = send.await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].content, "ok");
}

#[tokio::test]
async fn test_stale_prompt_finished_is_ignored() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_prompt("go", PromptMode::Code).await });

    let context = prompt_context_of(&recv(&mut assistant).await);

    harness.orchestrator.prompt_finished(Some("superseded")).await;
    assert_ne!(harness.orchestrator.phase().await, TaskPhase::Idle);

    harness.orchestrator.prompt_finished(Some(&context.id)).await;
    run.await.unwrap().unwrap();
    assert_eq!(harness.orchestrator.phase().await, TaskPhase::Idle);
}

#[tokio::test]
async fn test_streaming_chunks_open_and_close_the_stream() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;
    let mut ui = harness
        .attach(vec![EventKind::ResponseChunk, EventKind::ResponseCompleted])
        .await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_prompt("go", PromptMode::Code).await });
    let context = prompt_context_of(&recv(&mut assistant).await);

    harness
        .orchestrator
        .process_response_chunk("m1", Some(&context), "hel")
        .await;
    assert_eq!(harness.orchestrator.phase().await, TaskPhase::Streaming);

    let chunk = recv(&mut ui).await;
    assert!(matches!(chunk.action, Action::ResponseChunk { .. }));

    // Finishing with the stream still open emits a synthetic empty
    // completion that closes it.
    harness.orchestrator.prompt_finished(Some(&context.id)).await;
    let close = recv(&mut ui).await;
    match close.action {
        Action::ResponseCompleted {
            message_id,
            content,
            ..
        } => {
            assert_eq!(message_id, "m1");
            assert!(content.is_empty());
        }
        other => panic!("expected synthetic completion, got {:?}", other.kind()),
    }

    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_usage_reports_update_cli_cost_totals() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_prompt("go", PromptMode::Code).await });
    let context = prompt_context_of(&recv(&mut assistant).await);

    let usage = UsagePayload::Report(UsageReport {
        model: "m".to_string(),
        sent_tokens: 100,
        received_tokens: 20,
        message_cost: 0.05,
        total_cost: 0.05,
    });
    harness
        .orchestrator
        .process_response_completed("m1", Some(&context), "done".to_string(), Some(usage), None, Some(1))
        .await;
    harness.orchestrator.prompt_finished(Some(&context.id)).await;
    run.await.unwrap().unwrap();

    let task = harness.orchestrator.task().await;
    assert!((task.cli_total_cost - 0.05).abs() < 1e-9);
    assert_eq!(task.agent_total_cost, 0.0);
}

// ============================================================================
// Questions
// ============================================================================

#[tokio::test]
async fn test_answer_question_without_pending_returns_false() {
    let harness = Harness::new();
    assert!(!harness.orchestrator.answer_question("y", None).await);
}

#[tokio::test]
async fn test_run_prompt_is_absorbed_by_pending_question() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;
    let mut ui = harness.attach(vec![EventKind::AskQuestion]).await;

    let orchestrator = harness.orchestrator.clone();
    let ask = tokio::spawn(async move {
        orchestrator
            .ask_question(QuestionData::new("Apply the edit?").with_default_answer("n"), true)
            .await
    });
    recv(&mut ui).await; // question displayed

    let absorbed = harness
        .orchestrator
        .run_prompt("hello", PromptMode::Code)
        .await
        .unwrap();
    assert!(absorbed.is_empty());

    // The prompt text became the free-text answer; no prompt dispatched.
    let response = ask.await.unwrap().unwrap();
    assert_eq!(response.answer, "n");
    assert_eq!(response.user_input.as_deref(), Some("hello"));
    assert!(assistant.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_asks_share_one_resolution() {
    let harness = Harness::new();
    let mut ui = harness.attach(vec![EventKind::AskQuestion]).await;

    let question = QuestionData::new("Proceed?");
    let orchestrator = harness.orchestrator.clone();
    let q = question.clone();
    let first = tokio::spawn(async move { orchestrator.ask_question(q, true).await });
    let orchestrator = harness.orchestrator.clone();
    let q = question.clone();
    let second = tokio::spawn(async move { orchestrator.ask_question(q, true).await });

    // Exactly one question event is broadcast.
    recv(&mut ui).await;
    sleep(Duration::from_millis(100)).await;
    assert!(ui.try_recv().is_err());

    assert!(harness.orchestrator.answer_question("y", None).await);

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.answer, "y");
    assert_eq!(second.answer, "y");
}

#[tokio::test]
async fn test_remembered_answer_auto_resolves_identical_question() {
    let harness = Harness::new();
    let mut ui = harness.attach(vec![EventKind::AskQuestion]).await;
    let mut answers = harness.attach(vec![EventKind::AnswerQuestion]).await;

    let question = QuestionData::new("Run the command?").with_subject("cargo test");

    let orchestrator = harness.orchestrator.clone();
    let q = question.clone();
    let ask = tokio::spawn(async move { orchestrator.ask_question(q, true).await });
    recv(&mut ui).await;

    // "a" = always: resolves to y and is remembered for this (text, subject).
    assert!(harness.orchestrator.answer_question("a", None).await);
    assert_eq!(ask.await.unwrap().unwrap().answer, "y");
    recv(&mut answers).await;

    // The identical question auto-resolves without a new broadcast.
    let response = harness
        .orchestrator
        .ask_question(question.clone(), true)
        .await
        .unwrap();
    assert_eq!(response.answer, "y");
    assert!(ui.try_recv().is_err());

    // The auto-resolution still broadcasts its answer.
    let answer = recv(&mut answers).await;
    assert!(matches!(answer.action, Action::AnswerQuestion { .. }));

    // A different subject is a different key and asks again.
    let orchestrator = harness.orchestrator.clone();
    let other = QuestionData::new("Run the command?").with_subject("cargo bench");
    let ask = tokio::spawn(async move { orchestrator.ask_question(other, true).await });
    recv(&mut ui).await;
    harness.orchestrator.answer_question("n", None).await;
    assert_eq!(ask.await.unwrap().unwrap().answer, "n");
}

#[tokio::test]
async fn test_ask_question_without_awaiting_returns_immediately() {
    let harness = Harness::new();
    let mut ui = harness.attach(vec![EventKind::AskQuestion]).await;

    let response = harness
        .orchestrator
        .ask_question(QuestionData::new("Notice me"), false)
        .await;
    assert!(response.is_none());

    // The question is still broadcast for asynchronous observers.
    let envelope = recv(&mut ui).await;
    match envelope.action {
        Action::AskQuestion { question } => {
            assert_eq!(question.text, "Notice me");
            // Group-style questions get the default four-way answer set.
            let answers = question.answers.expect("default answers missing");
            assert_eq!(answers.len(), 4);
        }
        other => panic!("expected ask-question, got {:?}", other.kind()),
    }

    assert!(harness.orchestrator.answer_question("y", None).await);
}

// ============================================================================
// Interruption
// ============================================================================

#[tokio::test]
async fn test_interrupt_releases_waiters_and_notifies_prompt_connectors() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_prompt("go", PromptMode::Code).await });
    recv(&mut assistant).await;

    harness.orchestrator.interrupt_response().await;

    let interrupt = recv(&mut assistant).await;
    assert!(matches!(interrupt.action, Action::Interrupt));

    let result = run.await.unwrap().unwrap();
    assert!(result.is_empty());
    assert_eq!(harness.orchestrator.phase().await, TaskPhase::Idle);
}

// ============================================================================
// Agent mode
// ============================================================================

#[tokio::test]
async fn test_agent_mode_appends_messages_and_tracks_cost() {
    let produced = vec![
        ContextMessage::assistant("thinking done").with_usage_report(UsageReport {
            model: "m".to_string(),
            sent_tokens: 10,
            received_tokens: 5,
            message_cost: 0.02,
            total_cost: 0.02,
        }),
        ContextMessage::tool("tool output"),
    ];
    let harness = Harness::with_collaborators(
        Arc::new(FakeWorktrees::default()),
        Arc::new(FakeAgent { produced }),
    );
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;
    let mut ui = harness.attach(vec![EventKind::AddMessage]).await;

    let result = harness
        .orchestrator
        .run_prompt("do it", PromptMode::Agent)
        .await
        .unwrap();
    assert!(result.is_empty());

    // Agent messages fan out as add-message; nothing goes to the prompt path.
    let first = recv(&mut ui).await;
    assert!(matches!(first.action, Action::AddMessage { .. }));
    let second = recv(&mut ui).await;
    assert!(matches!(second.action, Action::AddMessage { .. }));
    assert!(assistant.try_recv().is_err());

    let task = harness.orchestrator.task().await;
    assert!((task.agent_total_cost - 0.02).abs() < 1e-9);
    assert_eq!(task.cli_total_cost, 0.0);

    // user + assistant + tool
    assert_eq!(harness.orchestrator.context_messages().await.len(), 3);
    assert_eq!(harness.orchestrator.phase().await, TaskPhase::Idle);
}

#[tokio::test]
async fn test_failed_agent_run_degrades_to_error_log() {
    let harness = Harness::new(); // DisabledAgent fails every run
    let mut ui = harness.attach(vec![EventKind::Log]).await;

    let result = harness
        .orchestrator
        .run_prompt("do it", PromptMode::Agent)
        .await
        .unwrap();
    assert!(result.is_empty());

    let error = recv_until(&mut ui, |e| {
        matches!(
            &e.action,
            Action::Log {
                level: switchboard::LogLevel::Error,
                ..
            }
        )
    })
    .await;
    assert!(matches!(error.action, Action::Log { .. }));
    assert_eq!(harness.orchestrator.phase().await, TaskPhase::Idle);
}

// ============================================================================
// Worktree mode
// ============================================================================

#[tokio::test]
async fn test_worktree_mode_round_trip_restores_working_dir() {
    let worktrees = Arc::new(FakeWorktrees::default());
    let harness =
        Harness::with_collaborators(worktrees.clone(), Arc::new(DisabledAgent));
    let mut ui = harness.attach(vec![EventKind::Restart]).await;

    let base_dir = harness.orchestrator.task().await.base_dir.clone();

    let changed = harness
        .orchestrator
        .set_working_dir_mode(WorkingDirMode::Worktree)
        .await
        .unwrap();
    assert!(changed);
    recv(&mut ui).await; // restart signal

    let task = harness.orchestrator.task().await;
    assert_eq!(task.working_dir_mode, WorkingDirMode::Worktree);
    assert_ne!(task.effective_dir(), base_dir.as_path());

    let changed = harness
        .orchestrator
        .set_working_dir_mode(WorkingDirMode::Local)
        .await
        .unwrap();
    assert!(changed);
    recv(&mut ui).await;

    let task = harness.orchestrator.task().await;
    assert_eq!(task.working_dir_mode, WorkingDirMode::Local);
    assert_eq!(task.effective_dir(), base_dir.as_path());
    assert_eq!(worktrees.removed.lock().unwrap().len(), 1);

    // Same-mode transitions are no-ops.
    let changed = harness
        .orchestrator
        .set_working_dir_mode(WorkingDirMode::Local)
        .await
        .unwrap();
    assert!(!changed);
}

#[tokio::test]
async fn test_declining_unmerged_work_confirmation_keeps_worktree_mode() {
    let worktrees = Arc::new(FakeWorktrees::default());
    let harness =
        Harness::with_collaborators(worktrees.clone(), Arc::new(DisabledAgent));
    let mut ui = harness.attach(vec![EventKind::AskQuestion]).await;
    let mut answers = harness.attach(vec![EventKind::AnswerQuestion]).await;

    harness
        .orchestrator
        .set_working_dir_mode(WorkingDirMode::Worktree)
        .await
        .unwrap();

    *worktrees.unmerged.lock().unwrap() = UnmergedWork {
        has_uncommitted_changes: true,
        has_unmerged_commits: true,
        unmerged_commit_count: 2,
    };

    let orchestrator = harness.orchestrator.clone();
    let transition = tokio::spawn(async move {
        orchestrator.set_working_dir_mode(WorkingDirMode::Local).await
    });

    // The confirmation question is displayed, then declined.
    recv(&mut ui).await;
    assert!(harness.orchestrator.answer_question("n", None).await);

    let changed = transition.await.unwrap().unwrap();
    assert!(!changed);

    let task = harness.orchestrator.task().await;
    assert_eq!(task.working_dir_mode, WorkingDirMode::Worktree);
    assert!(worktrees.removed.lock().unwrap().is_empty());

    // Internal questions never broadcast their resolved answer.
    sleep(Duration::from_millis(100)).await;
    assert!(answers.try_recv().is_err());
}

#[tokio::test]
async fn test_merge_records_state_for_revert() {
    let harness = Harness::new();

    harness
        .orchestrator
        .set_working_dir_mode(WorkingDirMode::Worktree)
        .await
        .unwrap();

    harness.orchestrator.merge_worktree(true, None).await.unwrap();
    let task = harness.orchestrator.task().await;
    let state = task.last_merge_state.expect("merge state missing");
    assert_eq!(state.previous_main_head, "old");

    let diff = harness.orchestrator.worktree_diff().await.unwrap();
    assert_eq!(diff.as_deref(), Some("diff"));

    harness.orchestrator.revert_last_merge().await.unwrap();
    let task = harness.orchestrator.task().await;
    assert!(task.last_merge_state.is_none());
}

// ============================================================================
// Context files and catch-up
// ============================================================================

#[tokio::test]
async fn test_late_connector_receives_catch_up_replay() {
    let harness = Harness::new();
    let mut assistant = harness.attach(vec![EventKind::Prompt]).await;

    // Build up state: one context file, one completed exchange.
    harness
        .orchestrator
        .add_context_file("src/lib.rs", false)
        .await
        .unwrap();

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_prompt("go", PromptMode::Code).await });
    let context = prompt_context_of(&recv(&mut assistant).await);
    harness
        .orchestrator
        .process_response_completed("m1", Some(&context), "done".to_string(), None, None, Some(1))
        .await;
    harness.orchestrator.prompt_finished(Some(&context.id)).await;
    run.await.unwrap().unwrap();

    // A peer attaching now reconstructs state: files, then messages, then
    // the tokens-info request.
    let mut late = harness
        .attach(vec![
            EventKind::AddFile,
            EventKind::AddMessage,
            EventKind::RequestTokensInfo,
        ])
        .await;

    let first = recv(&mut late).await;
    match first.action {
        Action::AddFile { path, .. } => assert!(path.contains("lib.rs")),
        other => panic!("expected add-file first, got {:?}", other.kind()),
    }
    let second = recv(&mut late).await;
    match second.action {
        Action::AddMessage { message } => assert_eq!(message.content, "go"),
        other => panic!("expected add-message, got {:?}", other.kind()),
    }
    let third = recv(&mut late).await;
    match third.action {
        Action::AddMessage { message } => assert_eq!(message.content, "done"),
        other => panic!("expected add-message, got {:?}", other.kind()),
    }
    let fourth = recv(&mut late).await;
    assert!(matches!(fourth.action, Action::RequestTokensInfo));
}

#[tokio::test]
async fn test_invalid_file_search_pattern_reports_log_event() {
    let harness = Harness::new();
    let mut ui = harness.attach(vec![EventKind::Log, EventKind::FileList]).await;

    harness.orchestrator.file_search("[unclosed").await;

    let event = recv(&mut ui).await;
    match event.action {
        Action::Log { level, message, .. } => {
            assert_eq!(level, switchboard::LogLevel::Error);
            assert!(message.contains("File search failed"));
        }
        other => panic!("expected error log, got {:?}", other.kind()),
    }
}
