// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pending-question state and answer resolution.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::types::{Answer, QuestionData};

/// Resolution delivered to `ask_question` callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionResponse {
    /// Resolved answer shortcut.
    pub answer: String,
    /// Free text supplied alongside the answer, if any.
    pub user_input: Option<String>,
}

/// The single outstanding interactive question for a task.
///
/// Callers asking while a question is pending are queued here and all
/// released with the pending question's resolution.
pub struct PendingQuestion {
    /// The question being displayed.
    pub data: QuestionData,
    /// Queued resolutions, released FIFO on answer.
    pub waiters: VecDeque<oneshot::Sender<QuestionResponse>>,
}

impl PendingQuestion {
    /// Track a new pending question.
    pub fn new(data: QuestionData) -> Self {
        Self {
            data,
            waiters: VecDeque::new(),
        }
    }
}

/// The default answer set given to group-style questions (those supplied
/// without an explicit set).
pub fn default_group_answers() -> Vec<Answer> {
    vec![
        Answer::new("Yes", "y"),
        Answer::new("No", "n"),
        Answer::new("Yes to all", "a"),
        Answer::new("Skip all", "s"),
    ]
}

/// Key under which a resolved answer is remembered.
///
/// Two questions rendering identical text and subject share a stored
/// answer; this mirrors the product behavior and is kept as-is.
pub fn remember_key(question: &QuestionData) -> (String, String) {
    (
        question.text.clone(),
        question.subject.clone().unwrap_or_default(),
    )
}

/// Resolve a raw short answer against a question.
///
/// With an explicit answer set, the input is matched case-insensitively
/// against each answer's shortcut; without one, `a`/`y` resolve to `y` and
/// everything else to `n`.
pub fn resolve_answer(question: &QuestionData, raw: &str) -> String {
    if let Some(answers) = &question.answers {
        if let Some(matched) = answers
            .iter()
            .find(|a| a.shortcut.eq_ignore_ascii_case(raw))
        {
            return matched.shortcut.to_lowercase();
        }
    }

    match raw.to_ascii_lowercase().as_str() {
        "a" | "y" => "y".to_string(),
        _ => "n".to_string(),
    }
}

/// Whether a raw input asks for the resolution to be remembered for future
/// identical questions (`d` = don't ask again, `a` = always).
pub fn wants_remembering(raw: &str, resolved: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "d" | "a")
        && matches!(resolved, "y" | "n")
}
