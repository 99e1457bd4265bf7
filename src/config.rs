// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Daemon settings.
//!
//! Settings are read from `<base_dir>/.switchboard/config.yaml` when
//! present, falling back to defaults. Every field is optional in the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::AgentProfile;
use crate::error::ConfigError;
use crate::types::PromptMode;

/// Name of the per-project settings file.
const CONFIG_FILE: &str = ".switchboard/config.yaml";

/// Daemon and per-project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Transport endpoint the daemon listens on. Defaults to a per-user
    /// runtime path.
    pub socket_path: Option<PathBuf>,
    /// Prompt mode used when an envelope does not name one.
    pub default_mode: PromptMode,
    /// Context-usage ratio above which a compaction warning is emitted.
    pub compaction_threshold: f64,
    /// Directory prefix for task worktrees.
    pub worktree_prefix: String,
    /// Agent profile used for agent-mode prompts.
    pub agent_profile: AgentProfile,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_path: None,
            default_mode: PromptMode::Code,
            compaction_threshold: 0.85,
            worktree_prefix: "switchboard-".to_string(),
            agent_profile: AgentProfile::default(),
        }
    }
}

impl Settings {
    /// Load settings for a project, falling back to defaults when the file
    /// does not exist.
    pub fn load(base_dir: &Path) -> Result<Self, ConfigError> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Resolve the socket path, defaulting to the per-user runtime
    /// directory.
    pub fn resolved_socket_path(&self) -> PathBuf {
        if let Some(path) = &self.socket_path {
            return path.clone();
        }
        let dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir);
        dir.join("switchboard").join("daemon.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.default_mode, PromptMode::Code);
        assert!((settings.compaction_threshold - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(".switchboard");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.yaml"),
            "default_mode: ask\ncompaction_threshold: 0.5\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.default_mode, PromptMode::Ask);
        assert!((settings.compaction_threshold - 0.5).abs() < 1e-9);
        assert_eq!(settings.worktree_prefix, "switchboard-");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(".switchboard");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.yaml"), "default_mode: [nope").unwrap();

        assert!(matches!(
            Settings::load(dir.path()),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_resolved_socket_path_prefers_explicit() {
        let settings = Settings {
            socket_path: Some(PathBuf::from("/tmp/custom.sock")),
            ..Default::default()
        };
        assert_eq!(
            settings.resolved_socket_path(),
            PathBuf::from("/tmp/custom.sock")
        );
    }
}
