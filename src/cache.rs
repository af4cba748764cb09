//! Resolution cache.
//!
//! # Responsibilities
//! - Keep the decoded value of every section resolved so far
//! - Reject a second resolution of the same name into a different type
//! - Re-decode cached sections in place when their raw content changes
//!
//! # Design Decisions
//! - Entries are type-erased (`Arc<dyn Any>`) and tagged with a `TypeId`;
//!   lookups check the tag before downcasting and fail explicitly on mismatch
//! - Each entry remembers a monomorphized decoder for its own type, so a
//!   change event can refresh it without knowing the concrete type
//! - One mutex covers lookup-or-insert, including the decode on a miss, so two
//!   racing first calls for a name decode once
//! - Entries are never removed; a refresh only swaps the value

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::format::{Format, FormatError};

/// A decoded section behind a type-erased handle.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Decodes a generic value into a fixed concrete type.
pub(crate) type Decoder = fn(Format, &Value) -> Result<ErasedValue, FormatError>;

pub(crate) fn decode_erased<T>(format: Format, value: &Value) -> Result<ErasedValue, FormatError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let decoded: T = format.transcode(value)?;
    Ok(Arc::new(decoded))
}

/// A freshly re-decoded cache entry.
#[derive(Clone)]
pub(crate) struct Refreshed {
    pub type_id: TypeId,
    pub value: ErasedValue,
}

struct CachedSection {
    type_id: TypeId,
    type_name: &'static str,
    value: ErasedValue,
    decoder: Decoder,
}

impl CachedSection {
    fn new<T>(value: T) -> Self
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Arc::new(value),
            decoder: decode_erased::<T>,
        }
    }

    fn ensure_type<T: 'static>(&self, section: &str) -> ConfigResult<()> {
        if self.type_id == TypeId::of::<T>() {
            Ok(())
        } else {
            Err(ConfigError::ConflictingSectionType {
                section: section.to_string(),
                cached: self.type_name,
                requested: type_name::<T>(),
            })
        }
    }

    fn get<T: Clone + 'static>(&self, section: &str) -> ConfigResult<T> {
        self.ensure_type::<T>(section)?;
        self.value
            .as_ref()
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ConfigError::ConflictingSectionType {
                section: section.to_string(),
                cached: self.type_name,
                requested: type_name::<T>(),
            })
    }
}

/// Per-section decode cache keyed by section name.
#[derive(Default)]
pub struct ResolutionCache {
    entries: Mutex<HashMap<String, CachedSection>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `name`, or run `decode` and cache its
    /// result. Nothing is cached when `decode` fails.
    pub fn get_or_decode<T, F>(&self, name: &str, decode: F) -> ConfigResult<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> ConfigResult<T>,
    {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(name) {
            return entry.get::<T>(name);
        }
        let value = decode()?;
        entries.insert(name.to_string(), CachedSection::new(value.clone()));
        Ok(value)
    }

    /// Check that `name` is either unresolved or resolved as `T`, then run
    /// `then` before any other resolution can start.
    pub fn ensure_type_then<T, R, F>(&self, name: &str, then: F) -> ConfigResult<R>
    where
        T: 'static,
        F: FnOnce() -> R,
    {
        let entries = self.lock();
        if let Some(entry) = entries.get(name) {
            entry.ensure_type::<T>(name)?;
        }
        Ok(then())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Re-decode the entry for `name` from a new generic value and swap it in.
    ///
    /// Returns `None` when the name was never resolved. On a decode failure
    /// the previous value stays in place.
    pub(crate) fn refresh(
        &self,
        name: &str,
        format: Format,
        raw: &Value,
    ) -> Option<Result<Refreshed, FormatError>> {
        let mut entries = self.lock();
        let entry = entries.get_mut(name)?;
        let result = (entry.decoder)(format, raw).map(|value| {
            entry.value = value.clone();
            Refreshed {
                type_id: entry.type_id,
                value,
            }
        });
        Some(result)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedSection>> {
        self.entries.lock().expect("resolution cache mutex poisoned")
    }
}
