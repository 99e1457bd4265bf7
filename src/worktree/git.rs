// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `git worktree`-backed implementation of the [`Worktrees`] trait, plus
//! git helpers used directly by the orchestrator (diffs, undo).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{MergeState, UnmergedWork, WorktreeDescriptor, WorktreeError, Worktrees};

/// Default prefix for worktree directories.
const WORKTREE_PREFIX: &str = "switchboard-";

/// Run a git command in `dir` and return stdout.
pub(crate) async fn git(dir: &Path, args: &[&str]) -> Result<String, WorktreeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(WorktreeError::Git(stderr.trim().to_string()))
    }
}

/// Git worktree manager for task isolation.
pub struct GitWorktrees {
    /// Prefix for worktree directories.
    prefix: String,
    /// Created worktrees by `(base_dir, task_id)`.
    tracked: Arc<RwLock<HashMap<(PathBuf, String), WorktreeDescriptor>>>,
}

impl Default for GitWorktrees {
    fn default() -> Self {
        Self::new()
    }
}

impl GitWorktrees {
    /// Create a new worktree manager with the default directory prefix.
    pub fn new() -> Self {
        Self {
            prefix: WORKTREE_PREFIX.to_string(),
            tracked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set a custom prefix for worktree directories.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The sibling directory a worktree for `branch` lives in.
    fn worktree_path(&self, base_dir: &Path, branch: &str) -> PathBuf {
        let dir_name = format!("{}{}", self.prefix, branch.replace('/', "-"));
        match base_dir.parent() {
            Some(parent) => parent.join(dir_name),
            None => base_dir.join(dir_name),
        }
    }

    /// Check if a branch exists locally.
    async fn branch_exists(&self, base_dir: &Path, branch: &str) -> bool {
        git(base_dir, &["rev-parse", "--verify", branch]).await.is_ok()
    }

    /// Check if a branch is checked out in any worktree.
    async fn is_branch_checked_out(&self, base_dir: &Path, branch: &str) -> bool {
        if let Ok(output) = git(base_dir, &["worktree", "list", "--porcelain"]).await {
            for line in output.lines() {
                if let Some(checked) = line.strip_prefix("branch refs/heads/") {
                    if checked == branch {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// The main branch of the base checkout.
    async fn main_branch(&self, base_dir: &Path) -> Result<String, WorktreeError> {
        let branch = git(base_dir, &["branch", "--show-current"]).await?;
        if branch.is_empty() {
            return Err(WorktreeError::Git(
                "base checkout is in detached HEAD state".to_string(),
            ));
        }
        Ok(branch)
    }
}

#[async_trait]
impl Worktrees for GitWorktrees {
    async fn create_worktree(
        &self,
        base_dir: &Path,
        task_id: &str,
        branch: &str,
    ) -> Result<WorktreeDescriptor, WorktreeError> {
        if self.is_branch_checked_out(base_dir, branch).await {
            return Err(WorktreeError::BranchInUse(branch.to_string()));
        }

        let path = self.worktree_path(base_dir, branch);
        if path.exists() {
            return Err(WorktreeError::InvalidWorktree(format!(
                "directory already exists: {}",
                path.display()
            )));
        }

        info!("Creating worktree for task {} on {}", task_id, branch);
        let path_str = path.to_string_lossy().to_string();

        let result = if self.branch_exists(base_dir, branch).await {
            git(base_dir, &["worktree", "add", &path_str, branch]).await
        } else {
            git(base_dir, &["worktree", "add", "-b", branch, &path_str]).await
        };
        result.map_err(|e| WorktreeError::CreationFailed(e.to_string()))?;

        let descriptor = WorktreeDescriptor {
            path,
            branch: branch.to_string(),
        };
        self.tracked.write().await.insert(
            (base_dir.to_path_buf(), task_id.to_string()),
            descriptor.clone(),
        );

        debug!("Created worktree at {}", descriptor.path.display());
        Ok(descriptor)
    }

    async fn task_worktree(
        &self,
        base_dir: &Path,
        task_id: &str,
    ) -> Result<Option<WorktreeDescriptor>, WorktreeError> {
        let tracked = self.tracked.read().await;
        Ok(tracked
            .get(&(base_dir.to_path_buf(), task_id.to_string()))
            .cloned())
    }

    async fn remove_worktree(
        &self,
        base_dir: &Path,
        descriptor: &WorktreeDescriptor,
    ) -> Result<(), WorktreeError> {
        info!(
            "Removing worktree {} ({})",
            descriptor.path.display(),
            descriptor.branch
        );

        let path_str = descriptor.path.to_string_lossy().to_string();
        if let Err(e) = git(base_dir, &["worktree", "remove", "--force", &path_str]).await {
            warn!("git worktree remove failed, falling back: {}", e);
            if descriptor.path.exists() {
                std::fs::remove_dir_all(&descriptor.path)?;
            }
            let _ = git(base_dir, &["worktree", "prune"]).await;
        }

        let _ = git(base_dir, &["branch", "-D", &descriptor.branch]).await;

        let mut tracked = self.tracked.write().await;
        tracked.retain(|_, desc| desc.path != descriptor.path);
        Ok(())
    }

    async fn check_unmerged_work(
        &self,
        base_dir: &Path,
        path: &Path,
    ) -> Result<UnmergedWork, WorktreeError> {
        let status = git(path, &["status", "--porcelain"]).await?;
        let has_uncommitted_changes = !status.is_empty();

        let main = self.main_branch(base_dir).await?;
        let count = git(path, &["rev-list", "--count", &format!("{}..HEAD", main)]).await?;
        let unmerged_commit_count: u32 = count.parse().unwrap_or(0);

        Ok(UnmergedWork {
            has_uncommitted_changes,
            has_unmerged_commits: unmerged_commit_count > 0,
            unmerged_commit_count,
        })
    }

    async fn merge_to_main(
        &self,
        base_dir: &Path,
        task_id: &str,
        path: &Path,
        squash: bool,
        message: Option<&str>,
    ) -> Result<MergeState, WorktreeError> {
        let main = self.main_branch(base_dir).await?;
        let previous_main_head = git(base_dir, &["rev-parse", "HEAD"]).await?;
        let branch = git(path, &["branch", "--show-current"]).await?;

        // Fold uncommitted work into the branch before merging.
        let status = git(path, &["status", "--porcelain"]).await?;
        if !status.is_empty() {
            git(path, &["add", "-A"]).await?;
            git(path, &["commit", "-m", "wip: task changes"]).await?;
        }

        let commit_message = message
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("Merge task {} ({})", task_id, branch));

        let merge = if squash {
            match git(base_dir, &["merge", "--squash", &branch]).await {
                Ok(_) => git(base_dir, &["commit", "-m", &commit_message, "--allow-empty"]).await,
                Err(e) => Err(e),
            }
        } else {
            git(base_dir, &["merge", "--no-ff", &branch, "-m", &commit_message]).await
        };

        if let Err(e) = merge {
            // Leave the base checkout the way we found it so retry works.
            let _ = git(base_dir, &["merge", "--abort"]).await;
            let _ = git(base_dir, &["reset", "--hard", &previous_main_head]).await;
            return Err(WorktreeError::MergeFailed(e.to_string()));
        }

        let merged_head = git(base_dir, &["rev-parse", "HEAD"]).await?;
        info!(
            "Merged {} into {} ({} -> {})",
            branch, main, previous_main_head, merged_head
        );

        Ok(MergeState {
            branch,
            previous_main_head,
            merged_head,
            squash,
            merged_at: chrono::Utc::now().timestamp(),
        })
    }

    async fn revert_merge(
        &self,
        base_dir: &Path,
        task_id: &str,
        _path: &Path,
        state: &MergeState,
    ) -> Result<(), WorktreeError> {
        let head = git(base_dir, &["rev-parse", "HEAD"]).await?;
        if head != state.merged_head {
            return Err(WorktreeError::RevertFailed(format!(
                "main branch moved since the merge (expected {}, found {})",
                state.merged_head, head
            )));
        }

        git(base_dir, &["reset", "--hard", &state.previous_main_head])
            .await
            .map_err(|e| WorktreeError::RevertFailed(e.to_string()))?;

        info!(
            "Reverted merge of {} for task {} back to {}",
            state.branch, task_id, state.previous_main_head
        );
        Ok(())
    }

    async fn changes_diff(
        &self,
        base_dir: &Path,
        path: &Path,
    ) -> Result<Option<String>, WorktreeError> {
        let main = self.main_branch(base_dir).await?;
        let diff = git(path, &["diff", &main]).await?;
        if diff.is_empty() {
            Ok(None)
        } else {
            Ok(Some(diff))
        }
    }
}

/// Undo the last commit in `dir`, restoring the working tree file by file.
///
/// Best-effort per file: a file that did not exist in the previous commit is
/// deleted instead of checked out, and a failure on one file is logged
/// without aborting the remaining files.
pub async fn undo_last_commit(dir: &Path) -> Result<Vec<String>, WorktreeError> {
    let listing = git(
        dir,
        &["diff-tree", "--no-commit-id", "--name-only", "-r", "HEAD"],
    )
    .await?;
    let files: Vec<String> = listing.lines().map(|l| l.to_string()).collect();

    // Move the branch pointer back; the working tree is fixed up below.
    git(dir, &["reset", "HEAD~1"]).await?;

    let mut restored = Vec::new();
    for file in &files {
        let existed = git(dir, &["cat-file", "-e", &format!("HEAD:{}", file)])
            .await
            .is_ok();

        let result = if existed {
            git(dir, &["checkout", "HEAD", "--", file]).await.map(|_| ())
        } else {
            tokio::fs::remove_file(dir.join(file))
                .await
                .map_err(WorktreeError::Io)
        };

        match result {
            Ok(()) => restored.push(file.clone()),
            Err(e) => warn!("Failed to restore {} while undoing commit: {}", file, e),
        }
    }

    Ok(restored)
}
