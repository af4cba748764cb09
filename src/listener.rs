//! Change listener registry.
//!
//! At most one listener per section name; registering again replaces the
//! previous listener. The registry has its own lock, separate from the
//! section index and the resolution cache, and callers clone a listener
//! out before invoking it so no lock is held while user code runs.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::{decode_erased, Decoder, ErasedValue};
use crate::format::{Format, FormatError};

type Callback = Box<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

/// A type-erased callback expecting one concrete section type.
pub struct Listener {
    type_id: TypeId,
    type_name: &'static str,
    decoder: Decoder,
    callback: Callback,
}

impl Listener {
    pub fn new<T, F>(callback: F) -> Self
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            decoder: decode_erased::<T>,
            callback: Box::new(move |value| {
                if let Some(typed) = value.downcast_ref::<T>() {
                    callback(typed.clone());
                }
            }),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Decode a generic value into the type this listener expects.
    pub fn decode(&self, format: Format, raw: &Value) -> Result<ErasedValue, FormatError> {
        (self.decoder)(format, raw)
    }

    /// Invoke the callback. Values of any other type are ignored.
    pub fn invoke(&self, value: &ErasedValue) {
        (self.callback)(value.as_ref());
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Mapping from section name to its single listener.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, Arc<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a listener, returning the one it replaced.
    pub fn register(&self, name: &str, listener: Listener) -> Option<Arc<Listener>> {
        let previous = self.listeners.insert(name.to_string(), Arc::new(listener));
        if previous.is_some() {
            tracing::debug!(section = %name, "Replaced existing change listener");
        }
        previous
    }

    pub fn remove(&self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    /// Clone out the listener for `name`, releasing the shard lock.
    pub fn get(&self, name: &str) -> Option<Arc<Listener>> {
        self.listeners.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}
