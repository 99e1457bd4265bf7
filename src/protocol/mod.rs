// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message protocol between the orchestration core and its peers.
//!
//! Peers (the renderer UI and the external assistant process) exchange typed
//! envelopes with the core over a long-lived, bidirectional transport.
//! Messages are newline-delimited JSON (NDJSON): each envelope is a complete
//! JSON object followed by a newline character.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐                       ┌───────────────────┐
//! │ UI peer  │◄──socket/pipe────────►│                   │
//! └──────────┘                       │  ConnectorManager │──► TaskOrchestrator
//! ┌──────────┐                       │                   │      (per task)
//! │ ext proc │◄──socket/pipe────────►│                   │
//! └──────────┘                       └───────────────────┘
//! ```
//!
//! Every envelope carries a discriminated `action` field plus optional
//! `base_dir`/`task_id` routing fields. The first envelope on a connection
//! must be `init`, declaring the task address and the event kinds the peer
//! wants to receive.

pub mod envelope;

pub use envelope::{
    decode, decode_lines, encode, Action, Envelope, EventKind, LogLevel,
};
