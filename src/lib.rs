// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Switchboard - session orchestration core for an AI coding-assistant
//! desktop shell.
//!
//! Switchboard drives an external coding-assistant CLI process and/or an
//! internal tool-using agent for multiple concurrently open projects, with
//! multiple parallel tasks (conversation threads) per project. Peers, the
//! renderer UI and the assistant process, attach over a message transport
//! and subscribe to the event kinds they care about; the core serializes
//! prompt execution per task, correlates streamed responses, and manages
//! the git-worktree-backed working-directory lifecycle.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (ContextMessage, UsageReport, QuestionData, ...)
//! - [`error`] - Error types and result aliases
//! - [`protocol`] - Typed NDJSON envelopes exchanged with peers
//! - [`context`] - Per-task conversation and file-context store
//! - [`connector`] - Transport, registry, and the connection manager
//! - [`task`] - Task records, persistence, and the orchestration state machine
//! - [`worktree`] - Git worktree lifecycle (create, remove, merge, revert)
//! - [`agent`] - Seam to the tool-using agent loop
//! - [`commands`] - Custom slash-command definitions
//! - [`history`] - Input-history files
//! - [`config`] - Daemon settings
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard::agent::DisabledAgent;
//! use switchboard::config::Settings;
//! use switchboard::connector::ConnectorManager;
//! use switchboard::worktree::GitWorktrees;
//!
//! let mut manager = ConnectorManager::new(
//!     "/run/user/1000/switchboard/daemon.sock",
//!     Arc::new(DisabledAgent),
//!     Arc::new(GitWorktrees::new()),
//!     Settings::default(),
//! );
//! manager.start().await?;
//! Arc::new(manager).run().await;
//! ```

pub mod agent;
pub mod commands;
pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod history;
pub mod protocol;
pub mod task;
pub mod types;
pub mod worktree;

// Re-export commonly used types at crate root
pub use connector::{
    Connector, ConnectorError, ConnectorManager, ConnectorRegistry, ConnectorSink, TaskKey,
};
pub use context::ContextStore;
pub use error::{AgentError, ConfigError, Result, StoreError, TaskError};
pub use protocol::{Action, Envelope, EventKind, LogLevel};
pub use task::{
    CompletedResponse, QuestionResponse, Task, TaskOrchestrator, TaskPhase, TaskStore,
    WorkingDirMode,
};
pub use types::{
    ContextFile, ContextMessage, PromptContext, PromptMode, QuestionData, Role,
    SerializedMessage, TokensInfo, UsagePayload, UsageReport,
};

/// Switchboard version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        // Verify key types are accessible
        let _msg = ContextMessage::user("test");
        let _ctx = PromptContext::new();
        let _store = ContextStore::new();
    }
}
