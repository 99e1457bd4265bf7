// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-platform peer transport.
//!
//! Unix domain sockets on Unix, named pipes on Windows. Envelopes flow as
//! newline-delimited JSON in both directions.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;

use super::error::ConnectorError;
use super::registry::ConnectorSink;
use crate::protocol::{encode, Envelope};

pub trait PeerIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> PeerIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A connected peer stream.
pub type PeerStream = Box<dyn PeerIo>;

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, ServerOptions};

/// Listening endpoint for peer connections.
pub struct PeerListener {
    #[cfg(unix)]
    inner: UnixListener,
    #[cfg(windows)]
    name: String,
}

/// Bind a listening endpoint at the given path.
pub async fn bind(path: &Path) -> io::Result<PeerListener> {
    #[cfg(unix)]
    {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(PeerListener {
            inner: UnixListener::bind(path)?,
        })
    }

    #[cfg(windows)]
    {
        Ok(PeerListener {
            name: pipe_name(path),
        })
    }
}

/// Connect to a listening endpoint.
pub async fn connect(path: &Path) -> io::Result<PeerStream> {
    #[cfg(unix)]
    {
        let stream = UnixStream::connect(path).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    {
        let name = pipe_name(path);
        let mut attempts = 0u32;
        loop {
            match ClientOptions::new().open(&name) {
                Ok(client) => return Ok(Box::new(client)),
                Err(_) if attempts < 50 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl PeerListener {
    /// Accept the next peer connection.
    pub async fn accept(&self) -> io::Result<PeerStream> {
        #[cfg(unix)]
        {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(Box::new(stream))
        }

        #[cfg(windows)]
        {
            let server = ServerOptions::new().create(&self.name)?;
            server.connect().await?;
            Ok(Box::new(server))
        }
    }
}

/// Remove a stale endpoint from disk.
pub fn cleanup(path: &Path) {
    #[cfg(unix)]
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }

    #[cfg(windows)]
    let _ = path;
}

#[cfg(windows)]
fn pipe_name(path: &Path) -> String {
    let name = path.to_string_lossy().to_string();
    if name.starts_with(r"\\.\pipe\") {
        name
    } else {
        format!(r"\\.\pipe\{}", name)
    }
}

/// Outbound half of a peer connection, shared by the registry.
pub struct StreamSink {
    writer: Mutex<WriteHalf<PeerStream>>,
}

impl StreamSink {
    /// Wrap the write half of a split peer stream.
    pub fn new(writer: WriteHalf<PeerStream>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl ConnectorSink for StreamSink {
    async fn send(&self, envelope: &Envelope) -> Result<(), ConnectorError> {
        let encoded =
            encode(envelope).map_err(|e| ConnectorError::InvalidEnvelope(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| ConnectorError::from_io_error("writing envelope", e))?;
        writer
            .flush()
            .await
            .map_err(|e| ConnectorError::from_io_error("flushing envelope", e))?;
        Ok(())
    }
}
