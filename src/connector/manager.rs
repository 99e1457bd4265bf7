// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide connector manager.
//!
//! Accepts peer connections, performs the `init` handshake, and routes
//! decoded envelopes to the task orchestrator addressed by
//! `(base_dir, task_id)`, taken from the envelope when present and falling
//! back to the connector's registration. Malformed envelopes are logged
//! and dropped; they never take the manager down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::error::{ConnectorError, ConnectorResult};
use super::registry::{Connector, ConnectorRegistry, TaskKey};
use super::transport::{self, PeerListener, PeerStream, StreamSink};
use crate::agent::AgentRunner;
use crate::config::Settings;
use crate::protocol::{decode, Action};
use crate::task::TaskOrchestrator;
use crate::worktree::Worktrees;

/// Accepts transport connections and dispatches envelopes to per-task
/// orchestrators.
pub struct ConnectorManager {
    socket_path: PathBuf,
    listener: Option<PeerListener>,
    registry: Arc<ConnectorRegistry>,
    orchestrators: RwLock<HashMap<TaskKey, Arc<TaskOrchestrator>>>,
    agent: Arc<dyn AgentRunner>,
    worktrees: Arc<dyn Worktrees>,
    defaults: Settings,
}

impl ConnectorManager {
    /// Create a manager listening at `socket_path` once started.
    pub fn new(
        socket_path: impl AsRef<Path>,
        agent: Arc<dyn AgentRunner>,
        worktrees: Arc<dyn Worktrees>,
        defaults: Settings,
    ) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            registry: Arc::new(ConnectorRegistry::new()),
            orchestrators: RwLock::new(HashMap::new()),
            agent,
            worktrees,
            defaults,
        }
    }

    /// The endpoint path peers connect to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The shared connector registry.
    pub fn registry(&self) -> Arc<ConnectorRegistry> {
        self.registry.clone()
    }

    /// Bind the listening endpoint.
    pub async fn start(&mut self) -> ConnectorResult<()> {
        let listener = transport::bind(&self.socket_path)
            .await
            .map_err(|e| ConnectorError::BindFailed(e.to_string()))?;
        info!("Connector manager listening on {:?}", self.socket_path);
        self.listener = Some(listener);
        Ok(())
    }

    /// Stop listening and clean up the endpoint.
    pub fn stop(&mut self) {
        self.listener = None;
        transport::cleanup(&self.socket_path);
        info!("Connector manager stopped");
    }

    /// Accept one connection and spawn its handler.
    pub async fn accept(self: &Arc<Self>) -> ConnectorResult<()> {
        let listener = self.listener.as_ref().ok_or(ConnectorError::NotStarted)?;
        let stream = listener
            .accept()
            .await
            .map_err(|e| ConnectorError::AcceptFailed(e.to_string()))?;
        debug!("Accepted peer connection");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.handle_connection(stream).await;
        });
        Ok(())
    }

    /// Accept connections until the listener fails.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.accept().await {
                error!("Accept failed: {}", e);
                break;
            }
        }
    }

    /// Get or create the orchestrator for a task key.
    pub async fn orchestrator(
        &self,
        key: &TaskKey,
    ) -> Result<Arc<TaskOrchestrator>, crate::error::StoreError> {
        {
            let map = self.orchestrators.read().await;
            if let Some(existing) = map.get(key) {
                return Ok(existing.clone());
            }
        }

        let settings = match Settings::load(&key.base_dir) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "Falling back to default settings for {}: {}",
                    key.base_dir.display(),
                    e
                );
                self.defaults.clone()
            }
        };

        let orchestrator = Arc::new(TaskOrchestrator::new(
            key.clone(),
            self.registry.clone(),
            self.agent.clone(),
            self.worktrees.clone(),
            settings,
        )?);

        let mut map = self.orchestrators.write().await;
        Ok(map.entry(key.clone()).or_insert(orchestrator).clone())
    }

    /// Number of live orchestrators (for diagnostics).
    pub async fn task_count(&self) -> usize {
        self.orchestrators.read().await.len()
    }

    /// Serve one peer connection: handshake, then dispatch until EOF.
    async fn handle_connection(self: Arc<Self>, stream: PeerStream) {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        // The first envelope must be the handshake.
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            debug!("Peer disconnected before handshake");
            return;
        }
        let envelope = match decode(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping connection with undecodable handshake: {}", e);
                return;
            }
        };

        let Action::Init {
            listen_to,
            input_history_file,
        } = envelope.action
        else {
            warn!("Dropping connection: first envelope was not init");
            return;
        };
        let (Some(base_dir), Some(task_id)) = (envelope.base_dir, envelope.task_id) else {
            warn!("Dropping connection: init missing base_dir/task_id");
            return;
        };

        let key = TaskKey::new(base_dir, task_id);
        let orchestrator = match self.orchestrator(&key).await {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                error!("Failed to open task {}: {}", key, e);
                return;
            }
        };

        let connector = Arc::new(Connector::new(
            key.clone(),
            listen_to,
            input_history_file.map(PathBuf::from),
            Box::new(StreamSink::new(write_half)),
        ));
        let connector_id = connector.id().to_string();
        info!("Connector {} attached to {}", connector_id, key);
        orchestrator.register_connector(connector).await;

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("Connector {} disconnected", connector_id);
                    break;
                }
                Ok(_) => match decode(&line) {
                    Ok(envelope) => {
                        let target = match (&envelope.base_dir, &envelope.task_id) {
                            (Some(base_dir), Some(task_id)) => {
                                let addressed = TaskKey::new(base_dir, task_id.clone());
                                if addressed == key {
                                    orchestrator.clone()
                                } else {
                                    match self.orchestrator(&addressed).await {
                                        Ok(target) => target,
                                        Err(e) => {
                                            warn!("No task for {}: {}", addressed, e);
                                            continue;
                                        }
                                    }
                                }
                            }
                            _ => orchestrator.clone(),
                        };
                        self.dispatch(target, envelope.action).await;
                    }
                    Err(e) => {
                        error!("Dropping malformed envelope from {}: {}", connector_id, e);
                    }
                },
                Err(e) => {
                    error!("Read error on connector {}: {}", connector_id, e);
                    break;
                }
            }
        }

        let remaining = orchestrator.connector_closed(&connector_id).await;
        if remaining == 0 {
            if let Err(e) = orchestrator.close().await {
                warn!("Failed to close task {}: {}", key, e);
            }
            self.orchestrators.write().await.remove(&key);
            debug!("Released task {}", key);
        }
    }

    /// Route one decoded action to an orchestrator. Suspending operations
    /// run on their own tasks so the read loop stays responsive (an
    /// `answer-question` must be deliverable while `ask-question` blocks).
    async fn dispatch(&self, orchestrator: Arc<TaskOrchestrator>, action: Action) {
        match action {
            Action::Prompt { prompt, mode, .. } => {
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.run_prompt(&prompt, mode).await {
                        error!("Prompt failed: {}", e);
                    }
                });
            }
            Action::ResponseChunk {
                message_id,
                prompt_context,
                content,
            } => {
                orchestrator
                    .process_response_chunk(&message_id, prompt_context.as_ref(), &content)
                    .await;
            }
            Action::ResponseCompleted {
                message_id,
                prompt_context,
                content,
                usage_report,
                edited_files,
                sequence_number,
            } => {
                orchestrator
                    .process_response_completed(
                        &message_id,
                        prompt_context.as_ref(),
                        content,
                        usage_report,
                        edited_files,
                        sequence_number,
                    )
                    .await;
            }
            Action::PromptFinished { prompt_context } => {
                orchestrator
                    .prompt_finished(prompt_context.as_ref().map(|c| c.id.as_str()))
                    .await;
            }
            Action::AskQuestion { question } => {
                tokio::spawn(async move {
                    orchestrator.ask_question(question, true).await;
                });
            }
            Action::AnswerQuestion {
                answer, user_input, ..
            } => {
                orchestrator.answer_question(&answer, user_input).await;
            }
            Action::AddFile { path, read_only } => {
                if let Err(e) = orchestrator.add_context_file(&path, read_only).await {
                    warn!("add-file failed for {}: {}", path, e);
                }
            }
            Action::DropFile { path } => {
                orchestrator.drop_context_file(&path).await;
            }
            Action::CommandOutput {
                command,
                output,
                finished,
            } => {
                orchestrator
                    .process_command_output(command, output, finished)
                    .await;
            }
            Action::UpdateTokensInfo { info } => {
                orchestrator.update_tokens_info(info).await;
            }
            Action::Interrupt => {
                orchestrator.interrupt_response().await;
            }
            Action::RunCommand { name, args } => {
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.run_custom_command(&name, &args).await {
                        error!("Custom command '{}' failed: {}", name, e);
                    }
                });
            }
            Action::FileSearch { pattern } => {
                orchestrator.file_search(&pattern).await;
            }
            Action::SetWorkingDirMode { mode } => {
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.set_working_dir_mode(mode).await {
                        error!("Working-dir transition failed: {}", e);
                        orchestrator
                            .relay_event(Action::Log {
                                level: crate::protocol::LogLevel::Error,
                                message: format!("Working-dir transition failed: {}", e),
                                finished: false,
                            })
                            .await;
                    }
                });
            }
            // Pass-through events produced by one peer for the others.
            action @ (Action::Log { .. }
            | Action::Tool { .. }
            | Action::RequestTokensInfo) => {
                orchestrator.relay_event(action).await;
            }
            other => {
                warn!("Ignoring unroutable inbound action: {:?}", other.kind());
            }
        }
    }
}

impl Drop for ConnectorManager {
    fn drop(&mut self) {
        transport::cleanup(&self.socket_path);
    }
}
