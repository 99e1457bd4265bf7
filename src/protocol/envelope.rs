// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Envelope and action definitions for the peer protocol.
//!
//! Uses newline-delimited JSON over a platform-specific transport. The
//! `action` field is a tagged union dispatched exhaustively at the routing
//! layer.

use serde::{Deserialize, Serialize};

use crate::types::{
    ContextFile, PromptContext, PromptMode, QuestionData, SerializedMessage, TokensInfo,
    UsagePayload,
};

// ============================================================================
// Envelope
// ============================================================================

/// One protocol unit, addressed to a task either explicitly via
/// `base_dir`/`task_id` or implicitly by the sending connector's
/// registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Owning project directory of the addressed task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    /// Addressed task id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// The action payload.
    #[serde(flatten)]
    pub action: Action,
}

impl Envelope {
    /// Create an unaddressed envelope (routing falls back to the connector's
    /// registered task).
    pub fn new(action: Action) -> Self {
        Self {
            base_dir: None,
            task_id: None,
            action,
        }
    }

    /// Create an envelope addressed to a specific task.
    pub fn addressed(
        base_dir: impl Into<String>,
        task_id: impl Into<String>,
        action: Action,
    ) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            task_id: Some(task_id.into()),
            action,
        }
    }

    /// Event kind of the carried action, if it is a broadcastable event.
    pub fn kind(&self) -> Option<EventKind> {
        self.action.kind()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Log levels carried by `log` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational message.
    Info,
    /// Warning message.
    Warning,
    /// Error message.
    Error,
    /// Spinner-style progress; closed by a `log` event with `finished`.
    Loading,
}

/// The discriminated action payload of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    /// Peer handshake: declares the task address, the event kinds the peer
    /// listens to, and optional connector metadata.
    Init {
        #[serde(default)]
        listen_to: Vec<EventKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        input_history_file: Option<String>,
    },

    /// Run (inbound) or dispatch (outbound) a prompt. The outbound form
    /// carries the task's context snapshot.
    Prompt {
        prompt: String,
        #[serde(default)]
        mode: PromptMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_context: Option<PromptContext>,
        #[serde(skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<SerializedMessage>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        files: Option<Vec<ContextFile>>,
    },

    /// A user turn was accepted for execution.
    UserMessage {
        content: String,
        #[serde(default)]
        mode: PromptMode,
    },

    /// Streaming fragment of an in-progress response.
    ResponseChunk {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_context: Option<PromptContext>,
        content: String,
    },

    /// A response finished streaming.
    ResponseCompleted {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_context: Option<PromptContext>,
        #[serde(default)]
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage_report: Option<UsagePayload>,
        #[serde(skip_serializing_if = "Option::is_none")]
        edited_files: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
    },

    /// The external process finished the whole prompt.
    PromptFinished {
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt_context: Option<PromptContext>,
    },

    /// Ask the user an interactive question.
    AskQuestion { question: QuestionData },

    /// Answer the pending question. Outbound envelopes include the question
    /// being answered.
    AnswerQuestion {
        answer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_input: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<QuestionData>,
    },

    /// Add a file to the task's context set.
    AddFile {
        path: String,
        #[serde(default)]
        read_only: bool,
    },

    /// Drop a path (file or directory) from the task's context set.
    DropFile { path: String },

    /// A message was appended to the conversation (also used for catch-up
    /// replay of the full history).
    AddMessage { message: SerializedMessage },

    /// The full context file set after a mutation.
    ContextFilesUpdated { files: Vec<ContextFile> },

    /// Log/progress event.
    Log {
        level: LogLevel,
        message: String,
        #[serde(default)]
        finished: bool,
    },

    /// Tool activity from the agent or external process.
    Tool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },

    /// Output of a command run by the external process. A `finished` event
    /// closes the open output buffer.
    CommandOutput {
        command: String,
        #[serde(default)]
        output: String,
        #[serde(default)]
        finished: bool,
    },

    /// Token/cost accounting pushed by the external process.
    UpdateTokensInfo { info: TokensInfo },

    /// Ask a peer to compute and push a tokens-info estimate.
    RequestTokensInfo,

    /// Interrupt the in-flight response.
    Interrupt,

    /// Invoke a custom command by name.
    RunCommand {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Search the working directory for files matching a regex.
    FileSearch { pattern: String },

    /// Result of a `file-search`.
    FileList { files: Vec<String> },

    /// Switch the task between local and worktree working-dir modes.
    SetWorkingDirMode { mode: crate::task::WorkingDirMode },

    /// The effective working directory changed; subscribed supervisors
    /// restart the external-process integration.
    Restart,
}

impl Action {
    /// The subscription kind a connector must hold to receive this action,
    /// or `None` for inbound-only actions that are never broadcast.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Prompt { .. } => Some(EventKind::Prompt),
            Self::UserMessage { .. } => Some(EventKind::UserMessage),
            Self::ResponseChunk { .. } => Some(EventKind::ResponseChunk),
            Self::ResponseCompleted { .. } => Some(EventKind::ResponseCompleted),
            Self::AskQuestion { .. } => Some(EventKind::AskQuestion),
            Self::AnswerQuestion { .. } => Some(EventKind::AnswerQuestion),
            Self::AddFile { .. } => Some(EventKind::AddFile),
            Self::DropFile { .. } => Some(EventKind::DropFile),
            Self::AddMessage { .. } => Some(EventKind::AddMessage),
            Self::ContextFilesUpdated { .. } => Some(EventKind::ContextFilesUpdated),
            Self::Log { .. } => Some(EventKind::Log),
            Self::Tool { .. } => Some(EventKind::Tool),
            Self::CommandOutput { .. } => Some(EventKind::CommandOutput),
            Self::UpdateTokensInfo { .. } => Some(EventKind::UpdateTokensInfo),
            Self::RequestTokensInfo => Some(EventKind::RequestTokensInfo),
            Self::Interrupt => Some(EventKind::Interrupt),
            Self::FileList { .. } => Some(EventKind::FileList),
            Self::Restart => Some(EventKind::Restart),
            Self::Init { .. }
            | Self::PromptFinished { .. }
            | Self::RunCommand { .. }
            | Self::FileSearch { .. }
            | Self::SetWorkingDirMode { .. } => None,
        }
    }

    /// Check if this is a handshake action.
    pub fn is_init(&self) -> bool {
        matches!(self, Self::Init { .. })
    }
}

// ============================================================================
// Event Kinds
// ============================================================================

/// Outbound event types a connector can subscribe to at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Prompt,
    UserMessage,
    ResponseChunk,
    ResponseCompleted,
    AskQuestion,
    AnswerQuestion,
    AddFile,
    DropFile,
    AddMessage,
    ContextFilesUpdated,
    Log,
    Tool,
    CommandOutput,
    UpdateTokensInfo,
    RequestTokensInfo,
    Interrupt,
    FileList,
    Restart,
}

// ============================================================================
// Serialization
// ============================================================================

/// Encode an envelope to a newline-delimited JSON string.
pub fn encode(env: &Envelope) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string(env)?;
    json.push('\n');
    Ok(json)
}

/// Decode an envelope from a JSON line.
pub fn decode(line: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Parse multiple newline-delimited envelopes from a buffer.
pub fn decode_lines(buffer: &str) -> Vec<Result<Envelope, serde_json::Error>> {
    buffer
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line.trim()))
        .collect()
}
