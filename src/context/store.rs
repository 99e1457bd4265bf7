// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ordered message list and file-context set for one task.

use crate::types::{ContextFile, ContextMessage, Role, SerializedMessage};

/// Conversation context owned by a single task orchestrator.
///
/// Invariants: file paths are stored normalized to the platform separator
/// and de-duplicated; dropping a path that names a directory removes every
/// file under it.
#[derive(Debug, Default, Clone)]
pub struct ContextStore {
    messages: Vec<ContextMessage>,
    files: Vec<ContextFile>,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message to the conversation.
    pub fn append_message(&mut self, message: ContextMessage) {
        self.messages.push(message);
    }

    /// Remove and return the last message, regardless of role.
    pub fn remove_last_message(&mut self) -> Option<ContextMessage> {
        self.messages.pop()
    }

    /// Remove the last user message and return its content, for redo.
    ///
    /// Messages after it (assistant/tool turns it produced) are removed
    /// with it.
    pub fn remove_last_user_message(&mut self) -> Option<String> {
        let idx = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)?;
        let content = self.messages[idx].content.clone();
        self.messages.truncate(idx);
        Some(content)
    }

    /// Replace the whole message list.
    pub fn set_messages(&mut self, messages: Vec<ContextMessage>) {
        self.messages = messages;
    }

    /// Clear all messages.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// The ordered message list.
    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    /// Peer-facing serialization of the conversation, stripped of internal
    /// metadata.
    pub fn serialized_messages(&self) -> Vec<SerializedMessage> {
        self.messages.iter().map(|m| m.serialized()).collect()
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Add files to the context set, normalizing paths and skipping
    /// duplicates. Returns the entries actually added.
    pub fn add_files(&mut self, files: Vec<ContextFile>) -> Vec<ContextFile> {
        let mut added = Vec::new();
        for mut file in files {
            file.path = normalize_path(&file.path);
            if self.files.iter().any(|f| f.path == file.path) {
                continue;
            }
            self.files.push(file.clone());
            added.push(file);
        }
        added
    }

    /// Drop a path from the context set. A path matching a directory
    /// removes every file under it. Returns the entries actually dropped.
    pub fn drop_path(&mut self, path: &str) -> Vec<ContextFile> {
        let normalized = normalize_path(path);
        let prefix = format!("{}{}", normalized, std::path::MAIN_SEPARATOR);

        let mut dropped = Vec::new();
        self.files.retain(|file| {
            if file.path == normalized || file.path.starts_with(&prefix) {
                dropped.push(file.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Clear the file set.
    pub fn clear_files(&mut self) {
        self.files.clear();
    }

    /// The active file-context set.
    pub fn files(&self) -> &[ContextFile] {
        &self.files
    }

    /// Check whether the store holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Normalize a path string to the platform separator and strip any
/// trailing separator.
pub fn normalize_path(path: &str) -> String {
    let sep = std::path::MAIN_SEPARATOR;
    let other = if sep == '/' { '\\' } else { '/' };
    let normalized = path.replace(other, &sep.to_string());
    normalized.trim_end_matches(sep).to_string()
}
