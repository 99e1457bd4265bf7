// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation context for one task.
//!
//! The [`ContextStore`] holds the ordered message list and the active
//! file-context set. It is pure data plus a mutation API: directory
//! expansion and any other filesystem work happen in the orchestrator
//! before paths reach the store.

mod store;

pub use store::{normalize_path, ContextStore};
