// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Switchboard orchestration core.
//!
//! This module provides strongly-typed errors for the different parts of the
//! application, using `thiserror` for ergonomic error definitions and
//! `anyhow` for error propagation in the binary.

use thiserror::Error;

use crate::worktree::WorktreeError;

/// Errors that can occur during task orchestration.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid file-search pattern: {0}")]
    InvalidPattern(String),

    #[error("Task is not in worktree mode")]
    NotInWorktreeMode,

    #[error("No merge to revert")]
    NoMergeState,

    #[error("Worktree error: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while persisting task records.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Failed to save task: {0}")]
    SaveFailed(String),

    #[error("Failed to load task: {0}")]
    LoadFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::LoadFailed(err.to_string())
    }
}

/// Errors that can occur during agent collaborator calls.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No agent collaborator configured: {0}")]
    NotConfigured(String),

    #[error("Agent run was interrupted")]
    Interrupted,

    #[error("Agent run failed: {0}")]
    RunFailed(String),
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("IO error reading config: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
