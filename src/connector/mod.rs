// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connector subsystem: transport, registry, and the process-wide manager.
//!
//! A **connector** is a registered transport endpoint (the renderer UI or
//! the external assistant process) subscribed to a subset of outbound
//! event kinds for one task. Multiple connectors may be registered to the
//! same task simultaneously.
//!
//! The [`ConnectorManager`] accepts connections, decodes envelopes, and
//! dispatches them to the [`TaskOrchestrator`] addressed by the routing key
//! carried in the envelope or established at handshake.
//!
//! [`TaskOrchestrator`]: crate::task::TaskOrchestrator

pub mod error;
pub mod manager;
pub mod registry;
pub mod transport;

pub use error::{ConnectorError, ConnectorResult};
pub use manager::ConnectorManager;
pub use registry::{Connector, ConnectorRegistry, ConnectorSink, TaskKey};
pub use transport::{PeerListener, PeerStream, StreamSink};
