// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Custom slash-command definitions.
//!
//! Commands are YAML files under `<base_dir>/.switchboard/commands/`, one
//! per command, named after the command:
//!
//! ```yaml
//! description: Run the test suite and fix failures
//! args:
//!   - name: target
//!   - name: extra
//!     required: false
//! template: "Run the tests for {{target}}. {{extra}}"
//! ```
//!
//! Invocations arrive over the protocol as `run-command` actions; argument
//! validation failures are reported back as log events instead of failing
//! the task.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::PromptMode;

/// Subdirectory holding command definitions.
const COMMANDS_DIR: &str = ".switchboard/commands";

/// Errors raised while resolving a command invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Command '{command}' is missing required argument '{arg}'")]
    MissingArgument { command: String, arg: String },
}

/// One declared command argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandArg {
    /// Argument name, referenced from the template as `{{name}}`.
    pub name: String,
    /// Whether the argument must be supplied.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A custom command definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCommand {
    /// Human-readable description.
    pub description: String,
    /// Ordered argument declarations.
    #[serde(default)]
    pub args: Vec<CommandArg>,
    /// Prompt template with `{{name}}` placeholders.
    pub template: String,
    /// Prompt mode the expanded prompt runs in.
    #[serde(default)]
    pub mode: PromptMode,
}

impl CustomCommand {
    /// Expand the template with positional arguments.
    ///
    /// Arguments map onto the declared names in order; a missing required
    /// argument is an error, a missing optional one expands to the empty
    /// string, and surplus arguments are appended to the last declared one.
    pub fn expand(&self, name: &str, supplied: &[String]) -> Result<String, CommandError> {
        let mut values: Vec<String> = Vec::with_capacity(self.args.len());
        for (i, arg) in self.args.iter().enumerate() {
            match supplied.get(i) {
                Some(value) => values.push(value.clone()),
                None if arg.required => {
                    return Err(CommandError::MissingArgument {
                        command: name.to_string(),
                        arg: arg.name.clone(),
                    });
                }
                None => values.push(String::new()),
            }
        }

        if supplied.len() > self.args.len() {
            let surplus = supplied[self.args.len()..].join(" ");
            match values.last_mut() {
                Some(last) if !last.is_empty() => {
                    last.push(' ');
                    last.push_str(&surplus);
                }
                Some(last) => *last = surplus,
                None => {}
            }
        }

        let mut expanded = self.template.clone();
        for (arg, value) in self.args.iter().zip(values.iter()) {
            expanded = expanded.replace(&format!("{{{{{}}}}}", arg.name), value);
        }
        Ok(expanded.trim().to_string())
    }
}

/// Load all command definitions for a project directory.
///
/// Files that fail to parse are skipped with a warning; they never abort
/// the load.
pub fn load_commands(base_dir: &Path) -> HashMap<String, CustomCommand> {
    let dir = base_dir.join(COMMANDS_DIR);
    let mut commands = HashMap::new();

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return commands,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        if !is_yaml {
            continue;
        }

        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };

        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_yaml::from_str::<CustomCommand>(&text).map_err(|e| e.to_string()))
        {
            Ok(command) => {
                commands.insert(name, command);
            }
            Err(e) => warn!("Skipping command definition {}: {}", path.display(), e),
        }
    }

    commands
}

/// Look up and expand a command invocation.
pub fn resolve(
    base_dir: &Path,
    name: &str,
    args: &[String],
) -> Result<(String, PromptMode), CommandError> {
    let commands = load_commands(base_dir);
    let command = commands
        .get(name)
        .ok_or_else(|| CommandError::Unknown(name.to_string()))?;
    let prompt = command.expand(name, args)?;
    Ok((prompt, command.mode))
}
