// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connector registry and fan-out.
//!
//! Maps each task to its registered connectors and the event kinds they
//! subscribed to at handshake. New registrations receive a catch-up replay
//! so a peer (re)connecting mid-session reconstructs state without a
//! separate sync protocol.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::error::ConnectorError;
use crate::protocol::{Action, Envelope, EventKind};
use crate::types::{ContextFile, SerializedMessage};

/// Routing key addressing one task within one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    /// Owning project directory.
    pub base_dir: PathBuf,
    /// Task identifier.
    pub task_id: String,
}

impl TaskKey {
    /// Create a routing key.
    pub fn new(base_dir: impl Into<PathBuf>, task_id: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            task_id: task_id.into(),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.base_dir.display(), self.task_id)
    }
}

/// Outbound side of a connector. The production implementation writes to a
/// peer transport; tests substitute channel-backed sinks.
#[async_trait]
pub trait ConnectorSink: Send + Sync {
    /// Deliver one envelope to the peer.
    async fn send(&self, envelope: &Envelope) -> Result<(), ConnectorError>;
}

/// A registered transport endpoint for a task.
pub struct Connector {
    id: String,
    key: TaskKey,
    listen_to: HashSet<EventKind>,
    input_history_file: Option<PathBuf>,
    sink: Box<dyn ConnectorSink>,
}

impl Connector {
    /// Create a connector from handshake data.
    pub fn new(
        key: TaskKey,
        listen_to: Vec<EventKind>,
        input_history_file: Option<PathBuf>,
        sink: Box<dyn ConnectorSink>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            listen_to: listen_to.into_iter().collect(),
            input_history_file,
            sink,
        }
    }

    /// Unique connector id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The task this connector is registered to.
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Whether the connector subscribed to an event kind.
    pub fn wants(&self, kind: EventKind) -> bool {
        self.listen_to.contains(&kind)
    }

    /// Input-history file supplied at registration, if any.
    pub fn input_history_file(&self) -> Option<&PathBuf> {
        self.input_history_file.as_ref()
    }

    /// Deliver an envelope to the peer.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ConnectorError> {
        self.sink.send(envelope).await
    }
}

/// Registry mapping tasks to their connectors.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<TaskKey, Vec<Arc<Connector>>>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its task key.
    pub async fn register(&self, connector: Arc<Connector>) {
        let mut map = self.connectors.write().await;
        map.entry(connector.key().clone())
            .or_default()
            .push(connector.clone());
        debug!(
            "Registered connector {} for {}",
            connector.id(),
            connector.key()
        );
    }

    /// Remove a connector by id, returning it if it was registered.
    pub async fn remove(&self, connector_id: &str) -> Option<Arc<Connector>> {
        let mut map = self.connectors.write().await;
        let mut found: Option<(TaskKey, usize)> = None;
        for (key, list) in map.iter() {
            if let Some(idx) = list.iter().position(|c| c.id() == connector_id) {
                found = Some((key.clone(), idx));
                break;
            }
        }

        let (key, idx) = found?;
        let list = map.get_mut(&key)?;
        let removed = list.remove(idx);
        if list.is_empty() {
            map.remove(&key);
        }
        debug!("Removed connector {} from {}", connector_id, key);
        Some(removed)
    }

    /// Connectors registered for a task that subscribed to `kind`.
    pub async fn connectors_for(&self, key: &TaskKey, kind: EventKind) -> Vec<Arc<Connector>> {
        let map = self.connectors.read().await;
        map.get(key)
            .map(|list| {
                list.iter()
                    .filter(|c| c.wants(kind))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All connectors registered for a task.
    pub async fn task_connectors(&self, key: &TaskKey) -> Vec<Arc<Connector>> {
        let map = self.connectors.read().await;
        map.get(key).cloned().unwrap_or_default()
    }

    /// Number of connectors registered for a task.
    pub async fn count_for(&self, key: &TaskKey) -> usize {
        let map = self.connectors.read().await;
        map.get(key).map(|list| list.len()).unwrap_or(0)
    }

    /// Fan an envelope out to every connector of the task subscribed to
    /// `kind`. Per-connector delivery failures are logged, never raised.
    pub async fn broadcast(&self, key: &TaskKey, kind: EventKind, envelope: &Envelope) {
        for connector in self.connectors_for(key, kind).await {
            if let Err(e) = connector.send(envelope).await {
                warn!(
                    "Failed to deliver {:?} to connector {}: {}",
                    kind,
                    connector.id(),
                    e
                );
            }
        }
    }

    /// Catch-up replay for a newly registered connector: context files
    /// first, then the serialized history, then a tokens-info request.
    pub async fn catch_up(
        &self,
        connector: &Connector,
        files: &[ContextFile],
        messages: &[SerializedMessage],
    ) {
        let key = connector.key();

        if connector.wants(EventKind::AddFile) {
            for file in files {
                let envelope = Envelope::addressed(
                    key.base_dir.to_string_lossy(),
                    &key.task_id,
                    Action::AddFile {
                        path: file.path.clone(),
                        read_only: file.read_only,
                    },
                );
                if let Err(e) = connector.send(&envelope).await {
                    warn!("Catch-up add-file failed for {}: {}", connector.id(), e);
                }
            }
        }

        if connector.wants(EventKind::AddMessage) {
            for message in messages {
                let envelope = Envelope::addressed(
                    key.base_dir.to_string_lossy(),
                    &key.task_id,
                    Action::AddMessage {
                        message: message.clone(),
                    },
                );
                if let Err(e) = connector.send(&envelope).await {
                    warn!("Catch-up add-message failed for {}: {}", connector.id(), e);
                }
            }
        }

        if connector.wants(EventKind::RequestTokensInfo) {
            let envelope = Envelope::addressed(
                key.base_dir.to_string_lossy(),
                &key.task_id,
                Action::RequestTokensInfo,
            );
            if let Err(e) = connector.send(&envelope).await {
                warn!(
                    "Catch-up request-tokens-info failed for {}: {}",
                    connector.id(),
                    e
                );
            }
        }
    }
}
