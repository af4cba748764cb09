//! Remote source loader.
//!
//! # Data Flow
//! ```text
//! startup (sequential, each bounded by fetch_timeout):
//!     fetch(data_id) → env substitution → parse → SectionIndex::install_document
//!     subscribe(data_id) → one DocumentWatcher task per document
//!
//! on push:
//!     DocumentWatcher → parse → SectionIndex::replace_document (write lock)
//!     → SectionChange on the change channel → facade dispatcher
//! ```
//!
//! # Design Decisions
//! - Any startup failure aborts loading; there is no partial view
//! - A pushed document that fails to parse is logged and dropped, the
//!   current sections stay
//! - Updates for one document are applied in arrival order by its own task

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::error::{ConfigError, ConfigResult};
use crate::format::{Document, Format};
use crate::index::{SectionChange, SectionIndex};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::source::settings::{RemoteSettings, SourceKind};
use crate::source::{env, SourceLoader};

/// Coordinates of one remote document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub namespace: String,
    pub group: String,
    pub data_id: String,
}

impl DocumentKey {
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        data_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            data_id: data_id.into(),
        }
    }

    fn for_settings(settings: &RemoteSettings, data_id: &str) -> Self {
        Self::new(&settings.namespace, &settings.group, data_id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.group, self.data_id)
        } else {
            write!(f, "{}/{}/{}", self.namespace, self.group, self.data_id)
        }
    }
}

/// Transport failures of the remote configuration service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("document {0} does not exist")]
    NotFound(DocumentKey),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// What the loader needs from a remote configuration service.
#[async_trait]
pub trait RemoteConfigService: Send + Sync {
    /// Fetch the current content of a document.
    async fn fetch(&self, key: &DocumentKey) -> Result<String, RemoteError>;

    /// Subscribe to content pushes for a document. `current` is the content
    /// the caller already holds; only content different from it is pushed.
    async fn subscribe(
        &self,
        key: &DocumentKey,
        current: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, RemoteError>;
}

fn parse_payload(format: Format, data_id: &str, payload: &[u8]) -> ConfigResult<Document> {
    let bytes = env::expand(payload);
    format
        .parse_document(&bytes)
        .map_err(|e| ConfigError::MalformedDocument {
            origin: data_id.to_string(),
            format,
            reason: e.message,
        })
}

/// Applies pushed content for one document.
struct DocumentWatcher {
    data_id: String,
    format: Format,
    index: Arc<SectionIndex>,
    changes: mpsc::UnboundedSender<SectionChange>,
}

impl DocumentWatcher {
    async fn run(
        self,
        mut updates: mpsc::UnboundedReceiver<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                payload = updates.recv() => match payload {
                    Some(payload) => self.apply(&payload),
                    None => {
                        tracing::warn!(data_id = %self.data_id, "Remote update stream closed");
                        break;
                    }
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!(data_id = %self.data_id, "Document watcher stopped");
    }

    fn apply(&self, payload: &str) {
        metrics::record_change_event(&self.data_id);
        let document = match parse_payload(self.format, &self.data_id, payload.as_bytes()) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(
                    data_id = %self.data_id,
                    error = %e,
                    "Failed to parse pushed document, keeping current sections"
                );
                return;
            }
        };

        let change = self.index.replace_document(&self.data_id, document);
        metrics::record_sections_loaded(self.index.len());
        tracing::info!(
            data_id = %self.data_id,
            updated = ?change.updated,
            removed = ?change.removed,
            rejected = ?change.rejected,
            "Received configuration update"
        );

        if !change.updated.is_empty() && self.changes.send(change).is_err() {
            tracing::debug!(data_id = %self.data_id, "No dispatcher for configuration changes");
        }
    }
}

/// Loads named documents from a remote service and follows their updates.
pub struct RemoteLoader {
    settings: RemoteSettings,
    index: Arc<SectionIndex>,
    changes: Mutex<Option<mpsc::UnboundedReceiver<SectionChange>>>,
    shutdown: Shutdown,
}

impl RemoteLoader {
    /// Fetch every configured document, then subscribe to each of them.
    ///
    /// Must run inside a Tokio runtime; one watcher task is spawned per
    /// document.
    pub async fn connect(
        settings: RemoteSettings,
        service: Arc<dyn RemoteConfigService>,
    ) -> ConfigResult<Self> {
        let format = settings.format;
        let index = Arc::new(SectionIndex::new());
        let mut fetched = Vec::with_capacity(settings.data_ids.len());

        for data_id in &settings.data_ids {
            let key = DocumentKey::for_settings(&settings, data_id);
            let payload = match timeout(settings.fetch_timeout, service.fetch(&key)).await {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    return Err(ConfigError::SourceNotFound(format!("remote document {key}: {e}")))
                }
                Err(_) => {
                    return Err(ConfigError::SourceNotFound(format!(
                        "remote document {key}: timed out after {:?}",
                        settings.fetch_timeout
                    )))
                }
            };
            let document = parse_payload(format, data_id, payload.as_bytes())?;
            tracing::info!(
                data_id = %data_id,
                format = %format,
                sections = document.len(),
                "Remote document loaded"
            );
            index.install_document(data_id, document);
            fetched.push((key, payload));
        }
        metrics::record_sections_loaded(index.len());

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let shutdown = Shutdown::new();
        for (key, payload) in fetched {
            let updates = match timeout(settings.fetch_timeout, service.subscribe(&key, &payload)).await {
                Ok(result) => result?,
                Err(_) => return Err(RemoteError::Timeout(settings.fetch_timeout).into()),
            };
            let watcher = DocumentWatcher {
                data_id: key.data_id.clone(),
                format,
                index: Arc::clone(&index),
                changes: changes_tx.clone(),
            };
            tokio::spawn(watcher.run(updates, shutdown.subscribe()));
            tracing::debug!(document = %key, "Subscribed to remote document");
        }

        Ok(Self {
            settings,
            index,
            changes: Mutex::new(Some(changes_rx)),
            shutdown,
        })
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }
}

impl SourceLoader for RemoteLoader {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    fn format(&self) -> Format {
        self.settings.format
    }

    fn index(&self) -> Arc<SectionIndex> {
        Arc::clone(&self.index)
    }

    fn take_changes(&self) -> Option<mpsc::UnboundedReceiver<SectionChange>> {
        self.changes
            .lock()
            .expect("change receiver mutex poisoned")
            .take()
    }

    fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

impl Drop for RemoteLoader {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl fmt::Debug for RemoteLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLoader")
            .field("server_addr", &self.settings.server_addr)
            .field("group", &self.settings.group)
            .field("data_ids", &self.settings.data_ids)
            .field("format", &self.settings.format)
            .finish()
    }
}
