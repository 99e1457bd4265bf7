// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the Switchboard orchestration core.
//!
//! This module defines the fundamental data structures shared across the
//! crate: conversation messages, usage/cost reports, prompt correlation,
//! interactive questions, and token accounting.

use serde::{Deserialize, Serialize};

// ============================================================================
// Prompt Correlation
// ============================================================================

/// Correlation context binding a prompt, its streamed chunks, and its final
/// completions together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContext {
    /// Unique id for the prompt execution.
    pub id: String,
}

impl PromptContext {
    /// Create a fresh prompt context with a random id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Create a prompt context with a known id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for PromptContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution path selector for a prompt.
///
/// `Agent` routes through the internal tool-using agent loop; every other
/// mode is forwarded to prompt-subscribed connectors (the external
/// assistant process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Agent,
    Code,
    Ask,
    Architect,
    Context,
}

impl Default for PromptMode {
    fn default() -> Self {
        Self::Code
    }
}

impl std::fmt::Display for PromptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Agent => "agent",
            Self::Code => "code",
            Self::Ask => "ask",
            Self::Architect => "architect",
            Self::Context => "context",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PromptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "code" => Ok(Self::Code),
            "ask" => Ok(Self::Ask),
            "architect" => Ok(Self::Architect),
            "context" => Ok(Self::Context),
            other => Err(format!("unknown prompt mode: {}", other)),
        }
    }
}

// ============================================================================
// Context Messages
// ============================================================================

/// Role of a message within a task's conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One turn in a task's conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    /// Unique message id.
    pub id: String,
    /// Sender role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Usage/cost report attached to the turn, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_report: Option<UsageReport>,
    /// Files edited while producing this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_files: Option<Vec<String>>,
    /// Prompt this message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_context: Option<PromptContext>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

impl ContextMessage {
    /// Create a message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            usage_report: None,
            edited_files: None,
            prompt_context: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Attach a prompt context.
    pub fn with_prompt_context(mut self, ctx: PromptContext) -> Self {
        self.prompt_context = Some(ctx);
        self
    }

    /// Attach a usage report.
    pub fn with_usage_report(mut self, report: UsageReport) -> Self {
        self.usage_report = Some(report);
        self
    }

    /// Peer-facing view of this message, stripped of internal metadata.
    pub fn serialized(&self) -> SerializedMessage {
        SerializedMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Peer-facing message view: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMessage {
    pub role: Role,
    pub content: String,
}

/// A file tracked in a task's context set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    /// Path, normalized to the platform separator.
    pub path: String,
    /// Whether the file is attached read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl ContextFile {
    /// Create a writable context file entry.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
        }
    }

    /// Create a read-only context file entry.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            read_only: true,
        }
    }
}

// ============================================================================
// Usage Reports
// ============================================================================

/// Normalized usage/cost report for one completed response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Model that produced the response.
    pub model: String,
    /// Prompt tokens sent.
    pub sent_tokens: u64,
    /// Completion tokens received.
    pub received_tokens: u64,
    /// Cost of this message in USD.
    pub message_cost: f64,
    /// Running session cost in USD as reported by the producer.
    pub total_cost: f64,
}

/// Usage payload attached to a completed response envelope.
///
/// The external process sends either a pre-structured report or the textual
/// report it prints to its own terminal; the textual form is parsed against
/// the active model name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UsagePayload {
    Report(UsageReport),
    Text(String),
}

impl UsagePayload {
    /// Normalize into a [`UsageReport`], parsing the textual form if needed.
    pub fn normalize(&self, model: &str) -> Option<UsageReport> {
        match self {
            Self::Report(report) => Some(report.clone()),
            Self::Text(text) => parse_usage_text(text, model),
        }
    }
}

/// Parse a textual usage report of the form emitted by the external process:
///
/// ```text
/// Tokens: 2.4k sent, 600 received. Cost: $0.0084 message, $0.052 session.
/// ```
///
/// Returns `None` when the text carries no token counts.
pub fn parse_usage_text(text: &str, model: &str) -> Option<UsageReport> {
    let tokens_re =
        regex::Regex::new(r"Tokens:\s*([\d.,]+k?)\s*sent,\s*([\d.,]+k?)\s*received").ok()?;
    let cost_re =
        regex::Regex::new(r"Cost:\s*\$([\d.]+)\s*message,\s*\$([\d.]+)\s*session").ok()?;

    let tokens = tokens_re.captures(text)?;
    let sent_tokens = parse_token_count(&tokens[1])?;
    let received_tokens = parse_token_count(&tokens[2])?;

    let (message_cost, total_cost) = match cost_re.captures(text) {
        Some(costs) => (
            costs[1].parse::<f64>().unwrap_or(0.0),
            costs[2].parse::<f64>().unwrap_or(0.0),
        ),
        None => (0.0, 0.0),
    };

    Some(UsageReport {
        model: model.to_string(),
        sent_tokens,
        received_tokens,
        message_cost,
        total_cost,
    })
}

/// Parse a token count such as `600`, `1,234` or `2.4k`.
fn parse_token_count(raw: &str) -> Option<u64> {
    let cleaned = raw.trim().replace(',', "");
    if let Some(thousands) = cleaned.strip_suffix('k') {
        let value: f64 = thousands.parse().ok()?;
        Some((value * 1000.0).round() as u64)
    } else {
        cleaned.parse().ok()
    }
}

// ============================================================================
// Interactive Questions
// ============================================================================

/// One selectable answer for an interactive question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Display text (e.g. "Yes to all").
    pub text: String,
    /// One-character shortcut matched case-insensitively.
    pub shortcut: String,
}

impl Answer {
    /// Create an answer with a shortcut.
    pub fn new(text: impl Into<String>, shortcut: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            shortcut: shortcut.into(),
        }
    }
}

/// An interactive question put to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionData {
    /// Question text.
    pub text: String,
    /// Optional subject detail (e.g. a file path or command line).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Default answer shortcut applied on plain confirmation.
    #[serde(default = "default_answer_yes")]
    pub default_answer: String,
    /// Enumerated answers; `None` selects the group-style default set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Vec<Answer>>,
    /// Internal questions never broadcast their resolved answer.
    #[serde(default)]
    pub internal: bool,
}

fn default_answer_yes() -> String {
    "y".to_string()
}

impl QuestionData {
    /// Create a plain yes/no question.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            subject: None,
            default_answer: default_answer_yes(),
            answers: None,
            internal: false,
        }
    }

    /// Set the subject detail.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the default answer shortcut.
    pub fn with_default_answer(mut self, answer: impl Into<String>) -> Self {
        self.default_answer = answer.into();
        self
    }

    /// Set an explicit answer set.
    pub fn with_answers(mut self, answers: Vec<Answer>) -> Self {
        self.answers = Some(answers);
        self
    }

    /// Mark the question internal (answer never broadcast to connectors).
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

// ============================================================================
// Token Accounting
// ============================================================================

/// Context-window accounting reported by the external process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokensInfo {
    /// Active model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tokens currently held by the chat history.
    #[serde(default)]
    pub chat_tokens: u64,
    /// Tokens held by the attached context files.
    #[serde(default)]
    pub files_tokens: u64,
    /// Context window size of the active model.
    #[serde(default)]
    pub max_tokens: u64,
}

impl TokensInfo {
    /// Fraction of the context window in use, in `0.0..=1.0`.
    pub fn usage_ratio(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.chat_tokens + self.files_tokens) as f64 / self.max_tokens as f64
    }
}
