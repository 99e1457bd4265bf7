// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent collaborator seam.
//!
//! "Agent mode" prompts bypass the external assistant process and run
//! through an internal tool-using LLM loop instead. That loop lives outside
//! this crate; the orchestrator talks to it through the [`AgentRunner`]
//! trait and awaits the finished message list.
//!
//! Cancellation is signalled through a `tokio::sync::watch` channel: the
//! orchestrator flips the [`CancelToken`] on interrupt and the runner is
//! expected to short-circuit at its next checkpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::AgentError;
use crate::task::Task;
use crate::types::{ContextFile, ContextMessage, PromptContext};

/// Profile selecting the model and limits an agent run uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Profile name.
    pub name: String,
    /// Provider identifier (e.g. "anthropic").
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Maximum agent-loop iterations.
    pub max_iterations: u32,
    /// Optional system prompt override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_iterations: 50,
            system_prompt: None,
        }
    }
}

/// Cancellation signal shared between the orchestrator and an agent run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to cancellation updates.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Signal cancellation to all subscribers.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Check whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool-using LLM loop invoked by the orchestrator for agent-mode prompts.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the agent loop for a prompt and return the produced messages.
    #[allow(clippy::too_many_arguments)]
    async fn run_agent(
        &self,
        task: &Task,
        profile: &AgentProfile,
        prompt: &str,
        prompt_context: Option<&PromptContext>,
        context_messages: &[ContextMessage],
        context_files: &[ContextFile],
        system_prompt: Option<&str>,
        cancel: watch::Receiver<bool>,
    ) -> Result<Vec<ContextMessage>, AgentError>;

    /// Estimate the token footprint of the task's current context.
    async fn estimate_tokens(
        &self,
        task: &Task,
        profile: &AgentProfile,
    ) -> Result<u64, AgentError>;

    /// One-shot text generation outside the agent loop (titles, summaries).
    async fn generate_text(
        &self,
        profile: &AgentProfile,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AgentError>;

    /// Interrupt any run in progress.
    fn interrupt(&self);
}

/// Placeholder runner used when no agent collaborator is linked in.
///
/// Agent-mode prompts fail with [`AgentError::NotConfigured`]; the task
/// stays usable for the external-process path.
#[derive(Debug, Default)]
pub struct DisabledAgent;

#[async_trait]
impl AgentRunner for DisabledAgent {
    async fn run_agent(
        &self,
        _task: &Task,
        profile: &AgentProfile,
        _prompt: &str,
        _prompt_context: Option<&PromptContext>,
        _context_messages: &[ContextMessage],
        _context_files: &[ContextFile],
        _system_prompt: Option<&str>,
        _cancel: watch::Receiver<bool>,
    ) -> Result<Vec<ContextMessage>, AgentError> {
        Err(AgentError::NotConfigured(format!(
            "agent profile '{}' has no runner",
            profile.name
        )))
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
        profile: &AgentProfile,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<String, AgentError> {
        Err(AgentError::NotConfigured(format!(
            "agent profile '{}' has no runner",
            profile.name
        )))
    }

    fn interrupt(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_signals_subscribers() {
        let token = CancelToken::new();
        let rx = token.subscribe();
        assert!(!*rx.borrow());
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_disabled_agent_reports_not_configured() {
        let agent = DisabledAgent;
        let task = Task::new("t-1", "/tmp/project", "test");
        let profile = AgentProfile::default();
        let token = CancelToken::new();

        let result = agent
            .run_agent(&task, &profile, "hi", None, &[], &[], None, token.subscribe())
            .await;
        assert!(matches!(result, Err(AgentError::NotConfigured(_))));

        assert_eq!(agent.estimate_tokens(&task, &profile).await.unwrap(), 0);
    }
}
