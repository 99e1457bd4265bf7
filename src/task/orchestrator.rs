// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-task orchestration state machine.
//!
//! One orchestrator owns one task: its context store, its in-flight prompt
//! state, its pending question, and its working-directory mode. Connectors
//! are borrowed from the shared registry and fanned events by subscription.
//!
//! Prompt execution moves `Idle -> AwaitingConnectorDispatch -> Streaming
//! -> Idle`, with `AwaitingQuestion` as an interrupt state reachable from
//! `Idle` or mid-prompt. Operations within one task are serialized through
//! the in-flight-prompt and pending-question guards; callers blocked on
//! either are queued FIFO as oneshot senders and released in order.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentRunner, CancelToken};
use crate::commands;
use crate::config::Settings;
use crate::connector::{Connector, ConnectorRegistry, TaskKey};
use crate::context::ContextStore;
use crate::error::{StoreError, TaskError};
use crate::history;
use crate::protocol::{Action, Envelope, EventKind, LogLevel};
use crate::task::prompt::{CompletedResponse, InFlightPrompt};
use crate::task::question::{
    default_group_answers, remember_key, resolve_answer, wants_remembering, PendingQuestion,
    QuestionResponse,
};
use crate::task::storage::TaskStore;
use crate::task::{Task, WorkingDirMode};
use crate::types::{
    ContextFile, ContextMessage, PromptContext, PromptMode, QuestionData, TokensInfo,
    UsagePayload,
};
use crate::worktree::{derive_branch_name, Worktrees};

/// Observable execution phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// No prompt in flight.
    Idle,
    /// A prompt was dispatched, no chunk received yet.
    AwaitingConnectorDispatch,
    /// A response is streaming.
    Streaming,
    /// An interactive question is pending.
    AwaitingQuestion,
}

/// Mutable orchestrator state, guarded by one lock per task.
struct TaskState {
    task: Task,
    context: ContextStore,
    in_flight: Option<InFlightPrompt>,
    question: Option<PendingQuestion>,
    remembered_answers: HashMap<(String, String), String>,
    open_command: Option<String>,
    tokens_info: Option<TokensInfo>,
    cancel: CancelToken,
}

/// Resolution of a pending question, carried out of the state lock.
struct AnswerOutcome {
    broadcast: Option<Action>,
    waiters: VecDeque<oneshot::Sender<QuestionResponse>>,
    response: QuestionResponse,
}

/// The per-task state machine.
pub struct TaskOrchestrator {
    key: TaskKey,
    registry: Arc<ConnectorRegistry>,
    store: TaskStore,
    agent: Arc<dyn AgentRunner>,
    worktrees: Arc<dyn Worktrees>,
    settings: Settings,
    state: Mutex<TaskState>,
}

impl TaskOrchestrator {
    /// Create an orchestrator for a task, loading its persisted record if
    /// one exists.
    pub fn new(
        key: TaskKey,
        registry: Arc<ConnectorRegistry>,
        agent: Arc<dyn AgentRunner>,
        worktrees: Arc<dyn Worktrees>,
        settings: Settings,
    ) -> Result<Self, StoreError> {
        let store = TaskStore::new(&key.base_dir);
        let task = match store.load(&key.task_id)? {
            Some(task) => {
                info!("Loaded task {} from disk", key.task_id);
                task
            }
            None => {
                let mut task = Task::new(&key.task_id, &key.base_dir, &key.task_id);
                task.compaction_threshold = settings.compaction_threshold;
                task
            }
        };

        Ok(Self {
            key,
            registry,
            store,
            agent,
            worktrees,
            settings,
            state: Mutex::new(TaskState {
                task,
                context: ContextStore::new(),
                in_flight: None,
                question: None,
                remembered_answers: HashMap::new(),
                open_command: None,
                tokens_info: None,
                cancel: CancelToken::new(),
            }),
        })
    }

    /// The task's routing key.
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Snapshot of the task record.
    pub async fn task(&self) -> Task {
        self.state.lock().await.task.clone()
    }

    /// Current execution phase.
    pub async fn phase(&self) -> TaskPhase {
        let state = self.state.lock().await;
        if state.question.is_some() {
            return TaskPhase::AwaitingQuestion;
        }
        match &state.in_flight {
            None => TaskPhase::Idle,
            Some(prompt) if prompt.open_stream_id.is_some() => TaskPhase::Streaming,
            Some(_) => TaskPhase::AwaitingConnectorDispatch,
        }
    }

    /// Snapshot of the context file set.
    pub async fn context_files(&self) -> Vec<ContextFile> {
        self.state.lock().await.context.files().to_vec()
    }

    /// Snapshot of the conversation.
    pub async fn context_messages(&self) -> Vec<ContextMessage> {
        self.state.lock().await.context.messages().to_vec()
    }

    // ------------------------------------------------------------------
    // Fan-out helpers
    // ------------------------------------------------------------------

    fn envelope(&self, action: Action) -> Envelope {
        Envelope::addressed(
            self.key.base_dir.to_string_lossy(),
            &self.key.task_id,
            action,
        )
    }

    /// Broadcast an action to connectors subscribed to its own kind.
    async fn broadcast(&self, action: Action) {
        if let Some(kind) = action.kind() {
            self.broadcast_as(kind, action).await;
        }
    }

    /// Broadcast an action under an explicit subscription kind.
    async fn broadcast_as(&self, kind: EventKind, action: Action) {
        let envelope = self.envelope(action);
        self.registry.broadcast(&self.key, kind, &envelope).await;
    }

    /// Fan an event produced by one peer out to the other subscribed
    /// connectors (log/tool passthrough).
    pub async fn relay_event(&self, action: Action) {
        self.broadcast(action).await;
    }

    async fn emit_log(&self, level: LogLevel, message: impl Into<String>) {
        self.broadcast(Action::Log {
            level,
            message: message.into(),
            finished: false,
        })
        .await;
    }

    /// Persist the task record; only started tasks are written. Failures
    /// degrade to an error log, they never poison the task.
    fn save_locked(&self, state: &mut TaskState) {
        if !state.task.is_started() {
            return;
        }
        if let Err(e) = self.store.save(&state.task) {
            error!("Failed to persist task {}: {}", self.key.task_id, e);
        }
    }

    // ------------------------------------------------------------------
    // Connector lifecycle
    // ------------------------------------------------------------------

    /// Register a connector and replay current state to it (files first,
    /// then messages, then a tokens-info request).
    pub async fn register_connector(&self, connector: Arc<Connector>) {
        self.registry.register(connector.clone()).await;
        let (files, messages) = {
            let state = self.state.lock().await;
            (
                state.context.files().to_vec(),
                state.context.serialized_messages(),
            )
        };
        self.registry.catch_up(&connector, &files, &messages).await;
    }

    /// Drop a connector after transport disconnect or explicit removal.
    /// Returns the number of connectors still attached to the task.
    pub async fn connector_closed(&self, connector_id: &str) -> usize {
        self.registry.remove(connector_id).await;
        self.registry.count_for(&self.key).await
    }

    // ------------------------------------------------------------------
    // Prompt execution
    // ------------------------------------------------------------------

    /// Run a prompt to completion.
    ///
    /// A pending question absorbs the call: the text becomes the question's
    /// free-text answer and no prompt is dispatched. A prompt already in
    /// flight queues the caller FIFO until `prompt_finished` releases it,
    /// after which the caller's own prompt runs.
    pub async fn run_prompt(
        &self,
        text: &str,
        mode: PromptMode,
    ) -> Result<Vec<CompletedResponse>, TaskError> {
        enum Claim {
            Absorbed(Option<AnswerOutcome>),
            Queued(oneshot::Receiver<Vec<CompletedResponse>>),
            Agent {
                context: PromptContext,
                task: Task,
                messages: Vec<ContextMessage>,
                files: Vec<ContextFile>,
            },
            Dispatch {
                context: PromptContext,
                rx: oneshot::Receiver<Vec<CompletedResponse>>,
                envelope_action: Action,
            },
        }

        let claim = loop {
            let mut state = self.state.lock().await;

            if state.question.is_some() {
                let outcome =
                    self.answer_question_locked(&mut state, "n", Some(text.to_string()));
                break Claim::Absorbed(outcome);
            }

            if let Some(prompt) = &mut state.in_flight {
                let (tx, rx) = oneshot::channel();
                prompt.waiters.push_back(tx);
                drop(state);
                break Claim::Queued(rx);
            }

            // Nothing in flight: claim execution while holding the lock.
            let context = PromptContext::new();
            state.task.start();
            self.save_locked(&mut state);
            state
                .context
                .append_message(ContextMessage::user(text).with_prompt_context(context.clone()));
            state.cancel = CancelToken::new();

            if mode == PromptMode::Agent {
                state.in_flight = Some(InFlightPrompt::new(&context.id));
                break Claim::Agent {
                    context,
                    task: state.task.clone(),
                    messages: state.context.messages().to_vec(),
                    files: state.context.files().to_vec(),
                };
            }

            let mut prompt = InFlightPrompt::new(&context.id);
            let (tx, rx) = oneshot::channel();
            prompt.waiters.push_back(tx);
            let envelope_action = Action::Prompt {
                prompt: text.to_string(),
                mode,
                prompt_context: Some(context.clone()),
                messages: Some(state.context.serialized_messages()),
                files: Some(state.context.files().to_vec()),
            };
            state.in_flight = Some(prompt);
            break Claim::Dispatch {
                context,
                rx,
                envelope_action,
            };
        };

        match claim {
            Claim::Absorbed(outcome) => {
                if let Some(outcome) = outcome {
                    self.deliver_answer(outcome).await;
                }
                Ok(Vec::new())
            }
            Claim::Queued(rx) => {
                // The previous prompt's results are not ours; retry once
                // released.
                let _ = rx.await;
                Box::pin(self.run_prompt(text, mode)).await
            }
            Claim::Agent {
                context,
                task,
                messages,
                files,
            } => {
                self.prompt_prelude(text, mode).await;
                let result = self.run_agent_prompt(&context, &task, text, messages, files).await;
                self.prompt_finished(Some(&context.id)).await;
                result?;
                Ok(Vec::new())
            }
            Claim::Dispatch {
                context,
                rx,
                envelope_action,
            } => {
                self.prompt_prelude(text, mode).await;
                self.broadcast(envelope_action).await;
                debug!(
                    "Dispatched prompt {} for task {}",
                    context.id, self.key.task_id
                );
                Ok(rx.await.unwrap_or_default())
            }
        }
    }

    /// Shared prelude for accepted prompts: input history, user-message
    /// event, loading log.
    async fn prompt_prelude(&self, text: &str, mode: PromptMode) {
        for connector in self.registry.task_connectors(&self.key).await {
            if let Some(path) = connector.input_history_file() {
                if let Err(e) = history::append_prompt(path, text) {
                    warn!("Failed to append input history {}: {}", path.display(), e);
                }
            }
        }

        self.broadcast(Action::UserMessage {
            content: text.to_string(),
            mode,
        })
        .await;
        self.emit_log(LogLevel::Loading, "Thinking...").await;
    }

    /// Reset in-flight state, dispatch a prompt envelope carrying the
    /// current context snapshot, and wait for `prompt_finished`.
    ///
    /// This is the single suspension point for prompt completion; there is
    /// no timeout; cancellation is explicit via [`interrupt_response`].
    ///
    /// [`interrupt_response`]: TaskOrchestrator::interrupt_response
    pub async fn send_prompt(
        &self,
        text: &str,
        context: PromptContext,
        mode: PromptMode,
    ) -> Vec<CompletedResponse> {
        let (rx, action) = {
            let mut state = self.state.lock().await;
            let mut prompt = InFlightPrompt::new(&context.id);
            let (tx, rx) = oneshot::channel();
            prompt.waiters.push_back(tx);
            state.in_flight = Some(prompt);
            let action = Action::Prompt {
                prompt: text.to_string(),
                mode,
                prompt_context: Some(context),
                messages: Some(state.context.serialized_messages()),
                files: Some(state.context.files().to_vec()),
            };
            (rx, action)
        };

        self.broadcast(action).await;
        rx.await.unwrap_or_default()
    }

    /// Agent-mode execution: delegate to the agent collaborator and append
    /// every produced message to the context store.
    async fn run_agent_prompt(
        &self,
        context: &PromptContext,
        task: &Task,
        text: &str,
        messages: Vec<ContextMessage>,
        files: Vec<ContextFile>,
    ) -> Result<(), TaskError> {
        let cancel = {
            let state = self.state.lock().await;
            state.cancel.subscribe()
        };
        let profile = self.settings.agent_profile.clone();

        let produced = match self
            .agent
            .run_agent(
                task,
                &profile,
                text,
                Some(context),
                &messages,
                &files,
                profile.system_prompt.as_deref(),
                cancel,
            )
            .await
        {
            Ok(produced) => produced,
            Err(e) => {
                error!("Agent run failed for task {}: {}", self.key.task_id, e);
                self.emit_log(LogLevel::Error, format!("Agent failed: {}", e))
                    .await;
                return Ok(());
            }
        };

        let serialized = {
            let mut state = self.state.lock().await;
            let mut serialized = Vec::with_capacity(produced.len());
            for message in produced {
                if let Some(report) = &message.usage_report {
                    state.task.add_agent_cost(report.message_cost);
                }
                serialized.push(message.serialized());
                state.context.append_message(message);
            }
            self.save_locked(&mut state);
            serialized
        };

        for message in serialized {
            self.broadcast(Action::AddMessage { message }).await;
        }
        Ok(())
    }

    /// Handle a streaming chunk from the external process.
    ///
    /// A chunk with a previously-unseen message id opens a new current
    /// response stream. Chunks for a superseded prompt are ignored.
    pub async fn process_response_chunk(
        &self,
        message_id: &str,
        prompt_context: Option<&PromptContext>,
        content: &str,
    ) {
        {
            let mut state = self.state.lock().await;
            let Some(prompt) = &mut state.in_flight else {
                debug!("Dropping response chunk with no prompt in flight");
                return;
            };
            if !prompt.matches(prompt_context.map(|c| c.id.as_str())) {
                debug!("Dropping stale response chunk for {:?}", prompt_context);
                return;
            }
            if prompt.open_stream_id.as_deref() != Some(message_id) {
                prompt.open_stream_id = Some(message_id.to_string());
            }
        }

        self.broadcast(Action::ResponseChunk {
            message_id: message_id.to_string(),
            prompt_context: prompt_context.cloned(),
            content: content.to_string(),
        })
        .await;
    }

    /// Handle a completed response from the external process.
    ///
    /// The usage payload is normalized (parsing the textual form against
    /// the active model), the turn is persisted for cost reporting, and the
    /// completion is re-sorted into the in-flight list by sequence number.
    pub async fn process_response_completed(
        &self,
        message_id: &str,
        prompt_context: Option<&PromptContext>,
        content: String,
        usage: Option<UsagePayload>,
        edited_files: Option<Vec<String>>,
        sequence_number: Option<u64>,
    ) {
        let completed = {
            let mut state = self.state.lock().await;
            let model = state
                .tokens_info
                .as_ref()
                .and_then(|info| info.model.clone())
                .unwrap_or_else(|| "unknown".to_string());

            let Some(prompt) = &mut state.in_flight else {
                debug!("Dropping completed response with no prompt in flight");
                return;
            };
            if !prompt.matches(prompt_context.map(|c| c.id.as_str())) {
                debug!("Dropping stale completed response for {:?}", prompt_context);
                return;
            }
            let context_id = prompt.context_id.clone();

            let report = usage.and_then(|payload| payload.normalize(&model));

            let completed = CompletedResponse {
                message_id: message_id.to_string(),
                prompt_context_id: context_id.clone(),
                content: content.clone(),
                usage_report: report.clone(),
                edited_files: edited_files.clone(),
                sequence_number,
            };
            prompt.push_completion(completed.clone());
            if prompt.open_stream_id.as_deref() == Some(message_id) {
                prompt.open_stream_id = None;
            }

            let mut message = ContextMessage::assistant(content)
                .with_prompt_context(PromptContext::with_id(context_id));
            message.edited_files = edited_files;
            if let Some(report) = &report {
                message.usage_report = Some(report.clone());
                state.task.add_cli_cost(report.message_cost);
            }
            state.context.append_message(message);
            self.save_locked(&mut state);

            completed
        };

        self.broadcast(Action::ResponseCompleted {
            message_id: completed.message_id.clone(),
            prompt_context: Some(PromptContext::with_id(&completed.prompt_context_id)),
            content: completed.content.clone(),
            usage_report: completed.usage_report.clone().map(UsagePayload::Report),
            edited_files: completed.edited_files.clone(),
            sequence_number: completed.sequence_number,
        })
        .await;
    }

    /// Finish the in-flight prompt and release every queued waiter, FIFO,
    /// with the drained completion list.
    ///
    /// A correlation id that does not match the tracked prompt is a stale
    /// completion from a superseded prompt and is ignored.
    pub async fn prompt_finished(&self, context_id: Option<&str>) {
        let (synthetic, command_close, waiters, drained) = {
            let mut state = self.state.lock().await;
            match &state.in_flight {
                None => return,
                Some(prompt) if !prompt.matches(context_id) => {
                    debug!(
                        "Ignoring stale prompt-finished for {:?} (active {})",
                        context_id, prompt.context_id
                    );
                    return;
                }
                Some(_) => {}
            }

            let Some(mut prompt) = state.in_flight.take() else {
                return;
            };

            // Close a still-open stream with a synthetic empty completion.
            let synthetic = prompt.open_stream_id.take().map(|id| Action::ResponseCompleted {
                message_id: id,
                prompt_context: Some(PromptContext::with_id(&prompt.context_id)),
                content: String::new(),
                usage_report: None,
                edited_files: None,
                sequence_number: None,
            });

            let command_close = state.open_command.take().map(|command| Action::CommandOutput {
                command,
                output: String::new(),
                finished: true,
            });

            let drained = prompt.drain_completions();
            let waiters = std::mem::take(&mut prompt.waiters);
            (synthetic, command_close, waiters, drained)
        };

        if let Some(action) = synthetic {
            self.broadcast(action).await;
        }
        if let Some(action) = command_close {
            self.broadcast(action).await;
        }
        for waiter in waiters {
            let _ = waiter.send(drained.clone());
        }
    }

    /// Suspend until no prompt is in flight.
    pub async fn wait_for_current_prompt_to_finish(&self) {
        loop {
            let rx = {
                let mut state = self.state.lock().await;
                match &mut state.in_flight {
                    Some(prompt) => {
                        let (tx, rx) = oneshot::channel();
                        prompt.waiters.push_back(tx);
                        rx
                    }
                    None => return,
                }
            };
            let _ = rx.await;
        }
    }

    // ------------------------------------------------------------------
    // Interactive questions
    // ------------------------------------------------------------------

    /// Put a question to the user.
    ///
    /// While a question is pending, further callers are queued and all
    /// released with the pending question's resolution. A remembered answer
    /// for a non-internal question auto-resolves without broadcasting a new
    /// question event. With `await_answer = false` the caller returns
    /// immediately while the question is still broadcast for asynchronous
    /// observers.
    pub async fn ask_question(
        &self,
        question: QuestionData,
        await_answer: bool,
    ) -> Option<QuestionResponse> {
        enum Asked {
            Queued(oneshot::Receiver<QuestionResponse>),
            Displayed(Option<oneshot::Receiver<QuestionResponse>>, Action),
            AutoResolved(AnswerOutcome),
        }

        let asked = {
            let mut state = self.state.lock().await;

            if let Some(pending) = &mut state.question {
                if !await_answer {
                    return None;
                }
                let (tx, rx) = oneshot::channel();
                pending.waiters.push_back(tx);
                Asked::Queued(rx)
            } else if let Some(remembered) = (!question.internal)
                .then(|| state.remembered_answers.get(&remember_key(&question)).cloned())
                .flatten()
            {
                let pending = PendingQuestion::new(question);
                let outcome = self.resolve_pending(&mut state, pending, &remembered, None);
                Asked::AutoResolved(outcome)
            } else {
                let mut pending = PendingQuestion::new(question.clone());
                let rx = await_answer.then(|| {
                    let (tx, rx) = oneshot::channel();
                    pending.waiters.push_back(tx);
                    rx
                });
                state.question = Some(pending);

                // Group-style questions get the default four-way answer set
                // for display; resolution still follows the plain yes/no
                // path.
                let mut display = question;
                if display.answers.is_none() {
                    display.answers = Some(default_group_answers());
                }
                Asked::Displayed(rx, Action::AskQuestion { question: display })
            }
        };

        match asked {
            Asked::Queued(rx) => rx.await.ok(),
            Asked::AutoResolved(outcome) => {
                let response = outcome.response.clone();
                self.deliver_answer(outcome).await;
                Some(response)
            }
            Asked::Displayed(rx, action) => {
                self.broadcast(action).await;
                match rx {
                    Some(rx) => rx.await.ok(),
                    None => None,
                }
            }
        }
    }

    /// Answer the pending question. Returns `false` when none is pending.
    pub async fn answer_question(&self, answer: &str, user_input: Option<String>) -> bool {
        let outcome = {
            let mut state = self.state.lock().await;
            self.answer_question_locked(&mut state, answer, user_input)
        };
        match outcome {
            Some(outcome) => {
                self.deliver_answer(outcome).await;
                true
            }
            None => false,
        }
    }

    fn answer_question_locked(
        &self,
        state: &mut TaskState,
        raw: &str,
        user_input: Option<String>,
    ) -> Option<AnswerOutcome> {
        let pending = state.question.take()?;
        Some(self.resolve_pending(state, pending, raw, user_input))
    }

    fn resolve_pending(
        &self,
        state: &mut TaskState,
        pending: PendingQuestion,
        raw: &str,
        user_input: Option<String>,
    ) -> AnswerOutcome {
        let resolved = resolve_answer(&pending.data, raw);

        if wants_remembering(raw, &resolved) {
            state
                .remembered_answers
                .insert(remember_key(&pending.data), resolved.clone());
        }

        let broadcast = (!pending.data.internal).then(|| Action::AnswerQuestion {
            answer: resolved.clone(),
            user_input: user_input.clone(),
            question: Some(pending.data),
        });

        AnswerOutcome {
            broadcast,
            waiters: pending.waiters,
            response: QuestionResponse {
                answer: resolved,
                user_input,
            },
        }
    }

    async fn deliver_answer(&self, outcome: AnswerOutcome) {
        if let Some(action) = outcome.broadcast {
            self.broadcast(action).await;
        }
        for waiter in outcome.waiters {
            let _ = waiter.send(outcome.response.clone());
        }
    }

    // ------------------------------------------------------------------
    // Interruption
    // ------------------------------------------------------------------

    /// Stop listening to the in-flight prompt and release its callers.
    ///
    /// Any pending question is answered `n`, an interrupt envelope goes to
    /// prompt-subscribed connectors, the agent cancellation token is
    /// signalled, and the prompt is finished immediately. There is no
    /// cooperative cancellation of an external process already executing.
    pub async fn interrupt_response(&self) {
        self.answer_question("n", None).await;
        self.broadcast_as(EventKind::Prompt, Action::Interrupt).await;
        {
            let state = self.state.lock().await;
            state.cancel.cancel();
        }
        self.agent.interrupt();
        self.prompt_finished(None).await;
    }

    // ------------------------------------------------------------------
    // Context file management
    // ------------------------------------------------------------------

    /// Add a path to the context set. A directory expands to its contained
    /// files. Returns the entries actually added.
    pub async fn add_context_file(
        &self,
        path: &str,
        read_only: bool,
    ) -> Result<Vec<ContextFile>, TaskError> {
        let effective_dir = {
            let state = self.state.lock().await;
            state.task.effective_dir().to_path_buf()
        };
        let expanded = expand_context_path(&effective_dir, path, read_only);

        let (added, snapshot) = {
            let mut state = self.state.lock().await;
            let added = state.context.add_files(expanded);
            (added, state.context.files().to_vec())
        };

        for file in &added {
            self.broadcast(Action::AddFile {
                path: file.path.clone(),
                read_only: file.read_only,
            })
            .await;
        }
        if !added.is_empty() {
            self.broadcast(Action::ContextFilesUpdated { files: snapshot })
                .await;
        }
        Ok(added)
    }

    /// Drop a path from the context set; a directory path drops every file
    /// under it. Returns the entries actually dropped.
    pub async fn drop_context_file(&self, path: &str) -> Vec<ContextFile> {
        let (dropped, snapshot) = {
            let mut state = self.state.lock().await;
            let dropped = state.context.drop_path(path);
            (dropped, state.context.files().to_vec())
        };

        if !dropped.is_empty() {
            self.broadcast(Action::DropFile {
                path: path.to_string(),
            })
            .await;
            self.broadcast(Action::ContextFilesUpdated { files: snapshot })
                .await;
        }
        dropped
    }

    /// Answer a `file-search` request. An invalid pattern is reported as an
    /// error log event and the operation aborted.
    pub async fn file_search(&self, pattern: &str) {
        match self.find_files(pattern).await {
            Ok(files) => self.broadcast(Action::FileList { files }).await,
            Err(e) => {
                warn!("File search failed for task {}: {}", self.key.task_id, e);
                self.emit_log(LogLevel::Error, format!("File search failed: {}", e))
                    .await;
            }
        }
    }

    async fn find_files(&self, pattern: &str) -> Result<Vec<String>, TaskError> {
        let regex = regex::Regex::new(pattern)
            .map_err(|e| TaskError::InvalidPattern(e.to_string()))?;
        let root = {
            let state = self.state.lock().await;
            state.task.effective_dir().to_path_buf()
        };

        let mut files: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .ok()
                    .map(|p| p.to_string_lossy().to_string())
            })
            .filter(|path| regex.is_match(path))
            .take(1000)
            .collect();
        files.sort();
        Ok(files)
    }

    // ------------------------------------------------------------------
    // Custom commands
    // ------------------------------------------------------------------

    /// Run a custom command. Resolution failures (unknown command, missing
    /// arguments) are reported as log events, not errors.
    pub async fn run_custom_command(
        &self,
        name: &str,
        args: &[String],
    ) -> Result<Vec<CompletedResponse>, TaskError> {
        match commands::resolve(&self.key.base_dir, name, args) {
            Ok((prompt, mode)) => self.run_prompt(&prompt, mode).await,
            Err(e) => {
                warn!("Custom command '{}' failed: {}", name, e);
                self.emit_log(LogLevel::Error, format!("Command failed: {}", e))
                    .await;
                Ok(Vec::new())
            }
        }
    }

    // ------------------------------------------------------------------
    // Token accounting and command output
    // ------------------------------------------------------------------

    /// Record and fan out a tokens-info update, warning when the context
    /// crosses the task's compaction threshold.
    pub async fn update_tokens_info(&self, info: TokensInfo) {
        let over_threshold = {
            let mut state = self.state.lock().await;
            state.tokens_info = Some(info.clone());
            let threshold = state.task.compaction_threshold;
            threshold > 0.0 && info.usage_ratio() >= threshold
        };

        self.broadcast(Action::UpdateTokensInfo { info: info.clone() })
            .await;
        if over_threshold {
            self.emit_log(
                LogLevel::Warning,
                format!(
                    "Context is {:.0}% full; consider compacting",
                    info.usage_ratio() * 100.0
                ),
            )
            .await;
        }
    }

    /// Track and fan out command output from the external process.
    pub async fn process_command_output(&self, command: String, output: String, finished: bool) {
        {
            let mut state = self.state.lock().await;
            if finished {
                state.open_command = None;
            } else {
                state.open_command = Some(command.clone());
            }
        }
        self.broadcast(Action::CommandOutput {
            command,
            output,
            finished,
        })
        .await;
    }

    // ------------------------------------------------------------------
    // Working-directory mode
    // ------------------------------------------------------------------

    /// Transition between local and worktree working-dir modes.
    ///
    /// Any in-flight prompt drains first. Leaving worktree mode with
    /// uncommitted or unmerged work pends an internal confirmation
    /// question; declining reverts the transition. Returns `true` when the
    /// mode actually changed.
    pub async fn set_working_dir_mode(&self, mode: WorkingDirMode) -> Result<bool, TaskError> {
        {
            let state = self.state.lock().await;
            if state.task.working_dir_mode == mode {
                return Ok(false);
            }
        }

        self.wait_for_current_prompt_to_finish().await;

        match mode {
            WorkingDirMode::Worktree => {
                let (name, task_id) = {
                    let state = self.state.lock().await;
                    (state.task.name.clone(), state.task.id.clone())
                };
                let branch = derive_branch_name(&name, &task_id);
                let descriptor = self
                    .worktrees
                    .create_worktree(&self.key.base_dir, &task_id, &branch)
                    .await?;

                let mut state = self.state.lock().await;
                state.task.worktree = Some(descriptor);
                state.task.working_dir_mode = WorkingDirMode::Worktree;
                state.task.touch();
                self.save_locked(&mut state);
            }
            WorkingDirMode::Local => {
                let descriptor = {
                    let state = self.state.lock().await;
                    state.task.worktree.clone()
                };

                if let Some(descriptor) = descriptor {
                    let work = self
                        .worktrees
                        .check_unmerged_work(&self.key.base_dir, &descriptor.path)
                        .await?;

                    if !work.is_clean() {
                        let question = QuestionData::new(
                            "The worktree has work not on the main branch. Remove it anyway?",
                        )
                        .with_subject(format!(
                            "{} unmerged commit(s){}",
                            work.unmerged_commit_count,
                            if work.has_uncommitted_changes {
                                ", plus uncommitted changes"
                            } else {
                                ""
                            }
                        ))
                        .with_default_answer("n")
                        .internal();

                        let response = self.ask_question(question, true).await;
                        if response.map(|r| r.answer).as_deref() != Some("y") {
                            info!(
                                "Keeping worktree for task {}; removal declined",
                                self.key.task_id
                            );
                            return Ok(false);
                        }
                    }

                    self.worktrees
                        .remove_worktree(&self.key.base_dir, &descriptor)
                        .await?;
                }

                let mut state = self.state.lock().await;
                state.task.worktree = None;
                state.task.working_dir_mode = WorkingDirMode::Local;
                state.task.touch();
                self.save_locked(&mut state);
            }
        }

        // The effective working directory changed; have the supervisor
        // restart the external-process integration.
        self.broadcast(Action::Restart).await;
        Ok(true)
    }

    /// Merge the task's worktree into the main branch, recording the merge
    /// state for revert. On failure the recorded state is left untouched so
    /// retry remains possible.
    pub async fn merge_worktree(
        &self,
        squash: bool,
        message: Option<&str>,
    ) -> Result<(), TaskError> {
        let descriptor = {
            let state = self.state.lock().await;
            state
                .task
                .worktree
                .clone()
                .ok_or(TaskError::NotInWorktreeMode)?
        };

        self.wait_for_current_prompt_to_finish().await;

        let merge_state = self
            .worktrees
            .merge_to_main(
                &self.key.base_dir,
                &self.key.task_id,
                &descriptor.path,
                squash,
                message,
            )
            .await?;

        let mut state = self.state.lock().await;
        state.task.last_merge_state = Some(merge_state);
        state.task.touch();
        self.save_locked(&mut state);
        Ok(())
    }

    /// Revert the most recent worktree merge.
    pub async fn revert_last_merge(&self) -> Result<(), TaskError> {
        let (descriptor, merge_state) = {
            let state = self.state.lock().await;
            let descriptor = state
                .task
                .worktree
                .clone()
                .ok_or(TaskError::NotInWorktreeMode)?;
            let merge_state = state
                .task
                .last_merge_state
                .clone()
                .ok_or(TaskError::NoMergeState)?;
            (descriptor, merge_state)
        };

        self.worktrees
            .revert_merge(
                &self.key.base_dir,
                &self.key.task_id,
                &descriptor.path,
                &merge_state,
            )
            .await?;

        let mut state = self.state.lock().await;
        state.task.last_merge_state = None;
        state.task.touch();
        self.save_locked(&mut state);
        Ok(())
    }

    /// Diff of the task's worktree against the main branch.
    pub async fn worktree_diff(&self) -> Result<Option<String>, TaskError> {
        let descriptor = {
            let state = self.state.lock().await;
            state
                .task
                .worktree
                .clone()
                .ok_or(TaskError::NotInWorktreeMode)?
        };
        Ok(self
            .worktrees
            .changes_diff(&self.key.base_dir, &descriptor.path)
            .await?)
    }

    /// Undo the last commit in the effective working directory.
    pub async fn undo_last_commit(&self) -> Result<Vec<String>, TaskError> {
        let dir = {
            let state = self.state.lock().await;
            state.task.effective_dir().to_path_buf()
        };
        Ok(crate::worktree::undo_last_commit(&dir).await?)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Close the task: delete the record if the task is still empty,
    /// otherwise stamp completion and persist.
    pub async fn close(&self) -> Result<(), TaskError> {
        let mut state = self.state.lock().await;
        if state.task.is_empty(state.context.is_empty()) {
            self.store.delete(&self.key.task_id)?;
            debug!("Deleted empty task {}", self.key.task_id);
        } else if state.task.is_started() {
            state.task.completed_at = Some(chrono::Utc::now().timestamp());
            state.task.touch();
            self.store.save(&state.task)?;
        }
        Ok(())
    }
}

/// Expand a context path: directories become their contained files,
/// relative to the effective working directory.
fn expand_context_path(
    effective_dir: &std::path::Path,
    path: &str,
    read_only: bool,
) -> Vec<ContextFile> {
    let absolute = {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            effective_dir.join(candidate)
        }
    };

    if !absolute.is_dir() {
        let file = if read_only {
            ContextFile::read_only(path)
        } else {
            ContextFile::new(path)
        };
        return vec![file];
    }

    walkdir::WalkDir::new(&absolute)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(effective_dir)
                .ok()
                .or_else(|| entry.path().strip_prefix(&absolute).ok())
                .map(|p| p.to_string_lossy().to_string())
        })
        .map(|p| ContextFile {
            path: p,
            read_only,
        })
        .collect()
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}
