// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-flight prompt state.
//!
//! At most one prompt executes per task. The state tracks the active
//! correlation id, the currently-streaming response message (if any), the
//! accumulating completions, and the FIFO queue of callers waiting for the
//! prompt to finish.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::types::UsageReport;

/// One completed response record, as returned to `run_prompt` callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedResponse {
    /// Response message id.
    pub message_id: String,
    /// Correlation id of the prompt that produced it.
    pub prompt_context_id: String,
    /// Response text.
    pub content: String,
    /// Normalized usage report, if one was attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_report: Option<UsageReport>,
    /// Files edited while producing the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_files: Option<Vec<String>>,
    /// Explicit ordering key; completions may arrive out of order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

/// State of the prompt currently executing for a task.
pub struct InFlightPrompt {
    /// Correlation id of the active prompt.
    pub context_id: String,
    /// Message id of the response currently streaming, if a chunk is in
    /// progress.
    pub open_stream_id: Option<String>,
    /// Completions accumulated so far, kept sorted by sequence number.
    completions: Vec<CompletedResponse>,
    /// Callers released when the prompt finishes, in arrival order.
    pub waiters: VecDeque<oneshot::Sender<Vec<CompletedResponse>>>,
}

impl InFlightPrompt {
    /// Start tracking a prompt with the given correlation id.
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            open_stream_id: None,
            completions: Vec::new(),
            waiters: VecDeque::new(),
        }
    }

    /// Check whether a correlation id addresses this prompt. A missing id
    /// addresses the current prompt unconditionally.
    pub fn matches(&self, context_id: Option<&str>) -> bool {
        match context_id {
            Some(id) => id == self.context_id,
            None => true,
        }
    }

    /// Record a completion, keeping the list sorted by sequence number
    /// rather than arrival order. Unnumbered completions sort ahead by
    /// arrival order.
    pub fn push_completion(&mut self, response: CompletedResponse) {
        self.completions.push(response);
        self.completions
            .sort_by_key(|r| r.sequence_number.unwrap_or(0));
    }

    /// The completions accumulated so far.
    pub fn completions(&self) -> &[CompletedResponse] {
        &self.completions
    }

    /// Take the accumulated completions, leaving the state empty.
    pub fn drain_completions(&mut self) -> Vec<CompletedResponse> {
        std::mem::take(&mut self.completions)
    }
}
