//! In-process remote configuration service.
//!
//! Holds documents in memory and pushes every `publish` to current
//! subscribers. Useful for embedding a remote-style source in one process
//! and for exercising the remote loader without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::source::remote::{DocumentKey, RemoteConfigService, RemoteError};

#[derive(Default)]
struct Inner {
    documents: DashMap<DocumentKey, String>,
    subscribers: Mutex<HashMap<DocumentKey, Vec<mpsc::UnboundedSender<String>>>>,
    fetches: AtomicUsize,
}

/// A cloneable handle to an in-memory document store.
#[derive(Clone, Default)]
pub struct InMemoryConfigService {
    inner: Arc<Inner>,
}

impl InMemoryConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store new content for a document and push it to its subscribers.
    pub fn publish(&self, key: &DocumentKey, content: impl Into<String>) {
        let content = content.into();
        // Stored under the subscriber lock; `subscribe` compares against it.
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber mutex poisoned");
        self.inner.documents.insert(key.clone(), content.clone());
        if let Some(senders) = subscribers.get_mut(key) {
            senders.retain(|tx| tx.send(content.clone()).is_ok());
        }
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConfigService for InMemoryConfigService {
    async fn fetch(&self, key: &DocumentKey) -> Result<String, RemoteError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner
            .documents
            .get(key)
            .map(|doc| doc.value().clone())
            .ok_or_else(|| RemoteError::NotFound(key.clone()))
    }

    async fn subscribe(
        &self,
        key: &DocumentKey,
        current: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber mutex poisoned");
        if let Some(stored) = self.inner.documents.get(key) {
            if stored.value() != current {
                let _ = tx.send(stored.value().clone());
            }
        }
        subscribers.entry(key.clone()).or_default().push(tx);
        Ok(rx)
    }
}
