// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git-worktree lifecycle management for tasks.
//!
//! A task can run against the shared project checkout (`local` mode) or an
//! isolated git worktree on its own branch (`worktree` mode). The
//! [`Worktrees`] trait is the seam the orchestrator calls on mode
//! transitions; [`GitWorktrees`] is the `git worktree`-backed
//! implementation.
//!
//! # Directory Structure
//!
//! ```text
//! /project/                       # Main repo
//! ├── .git/
//! └── ...
//!
//! /switchboard-fix-login-flow/    # Task worktree (sibling directory)
//! ├── .git                        # Worktree link file
//! └── ...
//! ```

mod git;

pub use git::{undo_last_commit, GitWorktrees};

use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the worktree subsystem.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// A git command failed.
    #[error("Git error: {0}")]
    Git(String),

    /// The branch is already checked out somewhere.
    #[error("Branch already in use: {0}")]
    BranchInUse(String),

    /// Worktree creation failed.
    #[error("Failed to create worktree: {0}")]
    CreationFailed(String),

    /// The descriptor does not point at a usable worktree.
    #[error("Invalid worktree: {0}")]
    InvalidWorktree(String),

    /// Merging the worktree into the main branch failed.
    #[error("Merge failed: {0}")]
    MergeFailed(String),

    /// Reverting a previous merge failed.
    #[error("Revert failed: {0}")]
    RevertFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Location of a task's worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeDescriptor {
    /// Absolute path of the worktree directory.
    pub path: std::path::PathBuf,
    /// Branch checked out in the worktree.
    pub branch: String,
}

/// Snapshot taken when a worktree is merged into the main branch, kept so
/// the merge can be reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeState {
    /// Branch that was merged.
    pub branch: String,
    /// Main-branch head before the merge.
    pub previous_main_head: String,
    /// Main-branch head produced by the merge.
    pub merged_head: String,
    /// Whether the merge was squashed.
    pub squash: bool,
    /// Merge timestamp (Unix epoch seconds).
    pub merged_at: i64,
}

/// Result of checking a worktree for work not present on the main branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnmergedWork {
    /// The worktree has uncommitted changes.
    pub has_uncommitted_changes: bool,
    /// The worktree branch has commits not on the main branch.
    pub has_unmerged_commits: bool,
    /// Number of unmerged commits.
    pub unmerged_commit_count: u32,
}

impl UnmergedWork {
    /// Check whether the worktree can be removed without losing work.
    pub fn is_clean(&self) -> bool {
        !self.has_uncommitted_changes && !self.has_unmerged_commits
    }
}

/// Worktree lifecycle operations consumed by the task orchestrator.
#[async_trait]
pub trait Worktrees: Send + Sync {
    /// Create a worktree for a task on the given branch.
    async fn create_worktree(
        &self,
        base_dir: &Path,
        task_id: &str,
        branch: &str,
    ) -> Result<WorktreeDescriptor, WorktreeError>;

    /// Look up the worktree previously created for a task, if any.
    async fn task_worktree(
        &self,
        base_dir: &Path,
        task_id: &str,
    ) -> Result<Option<WorktreeDescriptor>, WorktreeError>;

    /// Remove a task's worktree and delete its branch.
    async fn remove_worktree(
        &self,
        base_dir: &Path,
        descriptor: &WorktreeDescriptor,
    ) -> Result<(), WorktreeError>;

    /// Check a worktree for uncommitted changes or unmerged commits
    /// relative to the main branch.
    async fn check_unmerged_work(
        &self,
        base_dir: &Path,
        path: &Path,
    ) -> Result<UnmergedWork, WorktreeError>;

    /// Merge the worktree (including uncommitted changes) into the main
    /// branch, returning a snapshot that allows the merge to be reverted.
    async fn merge_to_main(
        &self,
        base_dir: &Path,
        task_id: &str,
        path: &Path,
        squash: bool,
        message: Option<&str>,
    ) -> Result<MergeState, WorktreeError>;

    /// Revert a previous merge recorded in `state`.
    async fn revert_merge(
        &self,
        base_dir: &Path,
        task_id: &str,
        path: &Path,
        state: &MergeState,
    ) -> Result<(), WorktreeError>;

    /// Diff of the worktree against the main branch, or `None` when there
    /// are no changes.
    async fn changes_diff(
        &self,
        base_dir: &Path,
        path: &Path,
    ) -> Result<Option<String>, WorktreeError>;
}

/// Derive a branch name from a task name.
///
/// Takes the first seven whitespace-delimited words, lowercased with
/// special characters stripped, joined by dashes. Falls back to the task id
/// when nothing usable remains.
pub fn derive_branch_name(task_name: &str, task_id: &str) -> String {
    let words: Vec<String> = task_name
        .split_whitespace()
        .take(7)
        .map(|word| {
            word.to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
                .collect()
        })
        .collect();

    let mut branch = words.join("-");
    while branch.contains("--") {
        branch = branch.replace("--", "-");
    }
    let branch = branch
        .trim_start_matches(['.', '-'])
        .trim_end_matches(['.', '-']);

    if branch.is_empty() {
        task_id.to_string()
    } else {
        branch.to_string()
    }
}
