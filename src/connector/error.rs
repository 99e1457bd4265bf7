// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connector and transport error types.

use std::io;
use thiserror::Error;

/// Errors that can occur in the connector subsystem.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Failed to bind the listening endpoint.
    #[error("Failed to bind endpoint: {0}")]
    BindFailed(String),

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(String),

    /// Failed to connect to the endpoint.
    #[error("Failed to connect to endpoint: {0}")]
    ConnectFailed(String),

    /// The first envelope on a connection was not a valid handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// An envelope could not be encoded or decoded.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// No connector is registered for the addressed task.
    #[error("No connector registered for task: {0}")]
    NoConnector(String),

    /// The manager has not been started.
    #[error("Connector manager not started")]
    NotStarted,

    /// The peer went away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// General transport failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectorError {
    /// Create a transport error from an IO error with context.
    pub fn from_io_error(context: &str, err: io::Error) -> Self {
        Self::Transport(format!("{}: {}", context, err))
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
