// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task record types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::worktree::{MergeState, WorktreeDescriptor};

/// Working-directory mode of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingDirMode {
    /// Task operates on the shared project checkout.
    Local,
    /// Task operates in an isolated git worktree.
    Worktree,
}

impl Default for WorkingDirMode {
    fn default() -> Self {
        Self::Local
    }
}

/// One conversation thread bound to a project.
///
/// Created on first reference and persisted to a JSON document on every
/// mutation once started; a task closed while still empty is deleted from
/// disk instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, unique within the project.
    pub id: String,
    /// Owning project directory.
    pub base_dir: PathBuf,
    /// Human-readable name.
    pub name: String,
    /// Set when the task is started; gates persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last mutation timestamp.
    pub updated_at: i64,
    /// When the first prompt ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// When the task was closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Accumulated cost of the external-process execution path (USD).
    #[serde(default)]
    pub cli_total_cost: f64,
    /// Accumulated cost of the agent execution path (USD).
    #[serde(default)]
    pub agent_total_cost: f64,
    /// Current working-directory mode.
    #[serde(default)]
    pub working_dir_mode: WorkingDirMode,
    /// Worktree backing the task while in worktree mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeDescriptor>,
    /// Snapshot of the most recent worktree merge, kept for revert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_merge_state: Option<MergeState>,
    /// Context-usage ratio above which compaction is suggested.
    pub compaction_threshold: f64,
}

impl Task {
    /// Create a fresh, not-yet-started task.
    pub fn new(
        id: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_dir: base_dir.into(),
            name: name.into(),
            created_at: None,
            updated_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            cli_total_cost: 0.0,
            agent_total_cost: 0.0,
            working_dir_mode: WorkingDirMode::Local,
            worktree: None,
            last_merge_state: None,
            compaction_threshold: 0.85,
        }
    }

    /// Whether the task has been started (and therefore persists).
    pub fn is_started(&self) -> bool {
        self.created_at.is_some()
    }

    /// Mark the task started, if it is not already.
    pub fn start(&mut self) {
        let now = chrono::Utc::now().timestamp();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Bump the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Add cost from the external-process execution path.
    pub fn add_cli_cost(&mut self, cost: f64) {
        self.cli_total_cost += cost;
        self.touch();
    }

    /// Add cost from the agent execution path.
    pub fn add_agent_cost(&mut self, cost: f64) {
        self.agent_total_cost += cost;
        self.touch();
    }

    /// Total accumulated cost across both execution paths.
    pub fn total_cost(&self) -> f64 {
        self.cli_total_cost + self.agent_total_cost
    }

    /// Whether the task accumulated nothing worth keeping.
    ///
    /// `context_empty` is supplied by the orchestrator, which owns the
    /// context store.
    pub fn is_empty(&self, context_empty: bool) -> bool {
        context_empty && self.cli_total_cost == 0.0 && self.agent_total_cost == 0.0
    }

    /// The directory prompts execute in: the worktree while in worktree
    /// mode, the project directory otherwise.
    pub fn effective_dir(&self) -> &Path {
        match (&self.working_dir_mode, &self.worktree) {
            (WorkingDirMode::Worktree, Some(descriptor)) => &descriptor.path,
            _ => &self.base_dir,
        }
    }
}
