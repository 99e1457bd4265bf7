// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-document persistence for task records.
//!
//! One document per task under `<base_dir>/.switchboard/tasks/`, written on
//! every mutating save once the task has been started.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StoreError;
use crate::task::Task;

/// Subdirectory holding task documents.
const TASKS_DIR: &str = ".switchboard/tasks";

/// Task record storage for one project directory.
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    /// Create a store rooted at a project directory.
    pub fn new(base_dir: &Path) -> Self {
        Self {
            dir: base_dir.join(TASKS_DIR),
        }
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    /// Persist a task record. Callers gate this on [`Task::is_started`].
    pub fn save(&self, task: &Task) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::SaveFailed(e.to_string()))?;

        let json = serde_json::to_string_pretty(task)
            .map_err(|e| StoreError::SaveFailed(e.to_string()))?;
        let path = self.task_path(&task.id);
        std::fs::write(&path, json).map_err(|e| StoreError::SaveFailed(e.to_string()))?;

        debug!("Saved task {} to {}", task.id, path.display());
        Ok(())
    }

    /// Load a task record, or `None` when it was never persisted.
    pub fn load(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let path = self.task_path(task_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::LoadFailed(err.to_string())),
        };
        let task = serde_json::from_str(&text)?;
        Ok(Some(task))
    }

    /// Delete a task record. Missing documents are not an error.
    pub fn delete(&self, task_id: &str) -> Result<(), StoreError> {
        let path = self.task_path(task_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted task record {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::IoError(err.to_string())),
        }
    }

    /// List all persisted tasks for the project, newest first.
    pub fn list(&self) -> Result<Vec<Task>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::IoError(err.to_string())),
        };

        let mut tasks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text =
                std::fs::read_to_string(&path).map_err(|e| StoreError::LoadFailed(e.to_string()))?;
            match serde_json::from_str::<Task>(&text) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!("Skipping corrupt task record {}: {}", path.display(), e)
                }
            }
        }

        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(tasks)
    }
}
