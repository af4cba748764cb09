//! Public facade.
//!
//! # Data Flow
//! ```text
//! get_config(&mut dest)
//!     → validate section name
//!     → ResolutionCache (hit: type check + clone)
//!     → miss: SectionIndex → Format::transcode → cache insert
//!
//! remote push
//!     → SectionIndex updated by the loader
//!     → dispatcher task: refresh cache entry → clone listener → invoke
//! ```
//!
//! # Design Decisions
//! - Lock order is cache, then index or listener registry; listeners are
//!   invoked with no lock held
//! - A registered listener pins the type a section is first resolved as
//! - A failed decode while delivering a change drops that one section's
//!   notification and keeps its previous cached value
//! - One process-wide instance can be installed once and is never torn down

use std::any::{type_name, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cache::ResolutionCache;
use crate::error::{ConfigError, ConfigResult};
use crate::format::{plain_value, Format};
use crate::index::{SectionChange, SectionIndex};
use crate::listener::{Listener, ListenerRegistry};
use crate::observability::metrics;
use crate::section::{validate_section_name, Section};
use crate::source::{self, LocalLoader, LocalSettings, SourceKind, SourceLoader, SourceSettings};

struct Shared {
    source: Box<dyn SourceLoader>,
    format: Format,
    index: Arc<SectionIndex>,
    cache: ResolutionCache,
    listeners: ListenerRegistry,
    decodes: AtomicU64,
}

impl Shared {
    fn record_decode(&self, section: &str) {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        metrics::record_section_decode(section);
    }

    fn apply_change(&self, change: &SectionChange) {
        for name in &change.updated {
            let Some(raw) = self.index.get(name) else {
                continue;
            };

            let refreshed = match self.cache.refresh(name, self.format, &raw) {
                Some(Ok(refreshed)) => {
                    self.record_decode(name);
                    Some(refreshed)
                }
                Some(Err(e)) => {
                    tracing::error!(
                        section = %name,
                        error = %e,
                        "Failed to decode updated section, keeping previous value"
                    );
                    metrics::record_change_failure(name);
                    continue;
                }
                None => None,
            };

            let Some(listener) = self.listeners.get(name) else {
                continue;
            };
            let value = match refreshed {
                Some(refreshed) if refreshed.type_id == listener.type_id() => refreshed.value,
                _ => match listener.decode(self.format, &raw) {
                    Ok(value) => {
                        self.record_decode(name);
                        value
                    }
                    Err(e) => {
                        tracing::error!(
                            section = %name,
                            expected = listener.type_name(),
                            error = %e,
                            "Failed to decode updated section for listener, notification dropped"
                        );
                        metrics::record_change_failure(name);
                        continue;
                    }
                },
            };

            tracing::debug!(section = %name, "Notifying change listener");
            listener.invoke(&value);
        }
    }
}

async fn dispatch(shared: Weak<Shared>, mut changes: mpsc::UnboundedReceiver<SectionChange>) {
    while let Some(change) = changes.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.apply_change(&change);
    }
    tracing::debug!("Configuration change dispatcher stopped");
}

/// The configuration facility: one source, one cache, one listener registry.
#[derive(Clone)]
pub struct Configuration {
    inner: Arc<Shared>,
}

impl Configuration {
    /// Build from environment settings (`CONFIG_SOURCE` and friends).
    pub async fn from_env() -> ConfigResult<Self> {
        Self::from_settings(SourceSettings::from_env()?).await
    }

    pub async fn from_settings(settings: SourceSettings) -> ConfigResult<Self> {
        let source = source::load(settings).await?;
        Ok(Self::with_source(source))
    }

    /// Build from a local file without needing a runtime.
    pub fn local(settings: &LocalSettings) -> ConfigResult<Self> {
        Ok(Self::with_source(Box::new(LocalLoader::load(settings)?)))
    }

    /// Wrap an already loaded source. When the source pushes changes a
    /// dispatcher task is spawned, so this must then run inside a Tokio
    /// runtime.
    pub fn with_source(source: Box<dyn SourceLoader>) -> Self {
        let changes = source.take_changes();
        let inner = Arc::new(Shared {
            format: source.format(),
            index: source.index(),
            source,
            cache: ResolutionCache::new(),
            listeners: ListenerRegistry::new(),
            decodes: AtomicU64::new(0),
        });
        if let Some(changes) = changes {
            tokio::spawn(dispatch(Arc::downgrade(&inner), changes));
        }
        Self { inner }
    }

    /// Fill `destination` with the section it names.
    ///
    /// The first successful call for a name decodes and caches the section;
    /// later calls with the same type get the cached value, and calls with a
    /// different type fail with [`ConfigError::ConflictingSectionType`].
    pub fn get_config<T: Section>(&self, destination: &mut T) -> ConfigResult<()> {
        let name = validate_section_name(destination.section_name())?.to_string();
        *destination = self.resolve::<T>(&name)?;
        Ok(())
    }

    /// Construct `T::default()` and fill it from its section.
    pub fn load<T: Section + Default>(&self) -> ConfigResult<T> {
        let mut value = T::default();
        self.get_config(&mut value)?;
        Ok(value)
    }

    /// Like [`load`](Self::load), but a missing section yields `T::default()`.
    pub fn get_or_default<T: Section + Default>(&self) -> ConfigResult<T> {
        match self.load::<T>() {
            Err(ConfigError::SectionNotFound(name)) => {
                tracing::info!(section = %name, "Section not configured, using defaults");
                Ok(T::default())
            }
            other => other,
        }
    }

    fn resolve<T>(&self, name: &str) -> ConfigResult<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let shared = &self.inner;
        shared.cache.get_or_decode(name, || {
            if let Some(listener) = shared.listeners.get(name) {
                if listener.type_id() != TypeId::of::<T>() {
                    return Err(ConfigError::ConflictingSectionType {
                        section: name.to_string(),
                        cached: listener.type_name(),
                        requested: type_name::<T>(),
                    });
                }
            }
            let raw = shared
                .index
                .get(name)
                .ok_or_else(|| ConfigError::SectionNotFound(name.to_string()))?;
            let decoded = shared
                .format
                .transcode::<T>(&raw)
                .map_err(|e| ConfigError::Decode {
                    section: name.to_string(),
                    reason: e.message,
                })?;
            shared.record_decode(name);
            tracing::debug!(section = %name, type_name = type_name::<T>(), "Section resolved");
            Ok(decoded)
        })
    }

    /// Register the single change listener for a section, replacing any
    /// previous one. Fails if the section is already resolved as another
    /// type; while registered, the listener's type is also the only type
    /// the section can first be resolved as.
    pub fn register_change_listener<T, F>(&self, name: &str, callback: F) -> ConfigResult<()>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = validate_section_name(name)?;
        if self.inner.source.kind() == SourceKind::Local {
            tracing::debug!(section = %name, "Local sources never push changes");
        }
        let listeners = &self.inner.listeners;
        self.inner
            .cache
            .ensure_type_then::<T, _, _>(name, || listeners.register(name, Listener::new(callback)))?;
        Ok(())
    }

    /// Remove the listener for a section; `false` if there was none.
    pub fn remove_change_listener(&self, name: &str) -> bool {
        self.inner.listeners.remove(name.trim())
    }

    /// The generic, still undecoded value of a section, with TOML datetimes
    /// shown as strings.
    pub fn raw_section(&self, name: &str) -> ConfigResult<Value> {
        let name = validate_section_name(name)?;
        self.inner
            .index
            .get(name)
            .map(plain_value)
            .ok_or_else(|| ConfigError::SectionNotFound(name.to_string()))
    }

    /// Names of all sections in the current snapshot, sorted.
    pub fn section_names(&self) -> Vec<String> {
        self.inner.index.names()
    }

    pub fn kind(&self) -> SourceKind {
        self.inner.source.kind()
    }

    pub fn format(&self) -> Format {
        self.inner.format
    }

    /// Whether a section has been resolved into a typed value.
    pub fn is_resolved(&self, name: &str) -> bool {
        self.inner.cache.contains(name.trim())
    }

    /// Number of resolved sections.
    pub fn resolved_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Total section decodes performed, including change refreshes.
    pub fn decode_count(&self) -> u64 {
        self.inner.decodes.load(Ordering::Relaxed)
    }

    /// Stop background subscription work of the source.
    pub fn shutdown(&self) {
        self.inner.source.shutdown();
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("kind", &self.kind())
            .field("format", &self.format())
            .field("sections", &self.inner.index.len())
            .field("resolved", &self.resolved_count())
            .finish()
    }
}

static GLOBAL: OnceCell<Configuration> = OnceCell::new();

/// Build the process-wide instance from the environment.
pub async fn init_global() -> ConfigResult<&'static Configuration> {
    if GLOBAL.get().is_some() {
        return Err(ConfigError::AlreadyInitialized);
    }
    install_global(Configuration::from_env().await?)
}

/// Install an already built instance as the process-wide one.
pub fn install_global(configuration: Configuration) -> ConfigResult<&'static Configuration> {
    GLOBAL
        .set(configuration)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    global()
}

/// The process-wide instance.
pub fn global() -> ConfigResult<&'static Configuration> {
    GLOBAL.get().ok_or(ConfigError::NotInitialized)
}

/// [`Configuration::get_config`] on the process-wide instance.
pub fn get_config<T: Section>(destination: &mut T) -> ConfigResult<()> {
    global()?.get_config(destination)
}

/// [`Configuration::register_change_listener`] on the process-wide instance.
pub fn register_change_listener<T, F>(name: &str, callback: F) -> ConfigResult<()>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    global()?.register_change_listener(name, callback)
}

/// [`Configuration::remove_change_listener`] on the process-wide instance.
pub fn remove_change_listener(name: &str) -> ConfigResult<bool> {
    Ok(global()?.remove_change_listener(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// Serves a fixed document without touching the filesystem.
    struct StaticSource {
        format: Format,
        index: Arc<SectionIndex>,
    }

    impl SourceLoader for StaticSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Local
        }

        fn format(&self) -> Format {
            self.format
        }

        fn index(&self) -> Arc<SectionIndex> {
            Arc::clone(&self.index)
        }
    }

    fn configuration(sections: Value) -> Configuration {
        let document: BTreeMap<String, Value> = serde_json::from_value(sections).unwrap();
        Configuration::with_source(Box::new(StaticSource {
            format: Format::Yaml,
            index: Arc::new(SectionIndex::from_document(document)),
        }))
    }

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    struct Server {
        #[serde(default)]
        addresses: Vec<String>,
    }

    impl Section for Server {
        fn section_name(&self) -> &str {
            "server"
        }
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    struct Endpoint {
        host: String,
        port: u16,
    }

    impl Section for Endpoint {
        fn section_name(&self) -> &str {
            "server"
        }
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    struct Named {
        #[serde(skip)]
        name: String,
        #[serde(default)]
        enabled: bool,
    }

    impl Section for Named {
        fn section_name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn test_get_config_decodes_section() {
        let config = configuration(json!({"server": {"addresses": ["a", "b"]}}));
        let mut server = Server::default();
        config.get_config(&mut server).unwrap();
        assert_eq!(server.addresses, vec!["a", "b"]);
        assert!(config.is_resolved("server"));
    }

    #[test]
    fn test_missing_section_has_no_side_effect() {
        let config = configuration(json!({"other": {}}));
        let err = config.load::<Server>().unwrap_err();
        assert!(matches!(err, ConfigError::SectionNotFound(name) if name == "server"));
        assert_eq!(config.resolved_count(), 0);
        assert_eq!(config.decode_count(), 0);
    }

    #[test]
    fn test_repeated_calls_decode_once() {
        let config = configuration(json!({"server": {"addresses": ["a"]}}));
        let first = config.load::<Server>().unwrap();
        for _ in 0..5 {
            assert_eq!(config.load::<Server>().unwrap(), first);
        }
        assert_eq!(config.decode_count(), 1);
    }

    #[test]
    fn test_conflicting_type_leaves_first_value() {
        let config = configuration(json!({"server": {"addresses": ["a"], "host": "h", "port": 1}}));
        let first = config.load::<Server>().unwrap();

        let mut endpoint = Endpoint::default();
        let err = config.get_config(&mut endpoint).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingSectionType { .. }));
        assert_eq!(endpoint.port, 0);

        assert_eq!(config.load::<Server>().unwrap(), first);
    }

    #[test]
    fn test_malformed_name_rejected_before_lookup() {
        let config = configuration(json!({"bad name": {}}));
        let mut named = Named {
            name: "bad name".into(),
            enabled: false,
        };
        assert!(matches!(
            config.get_config(&mut named),
            Err(ConfigError::MalformedSectionName(_))
        ));
        assert!(matches!(
            config.raw_section(""),
            Err(ConfigError::MalformedSectionName(_))
        ));
    }

    #[test]
    fn test_runtime_named_section() {
        let config = configuration(json!({"feature/search": {"enabled": true}}));
        let mut named = Named {
            name: "feature/search".into(),
            enabled: false,
        };
        config.get_config(&mut named).unwrap();
        assert!(named.enabled);
    }

    #[test]
    fn test_decode_error_not_cached() {
        let config = configuration(json!({"server": {"addresses": "not-a-list"}}));
        let err = config.load::<Server>().unwrap_err();
        assert!(matches!(err, ConfigError::Decode { section, .. } if section == "server"));
        assert!(!config.is_resolved("server"));
    }

    #[test]
    fn test_get_or_default() {
        let config = configuration(json!({}));
        assert_eq!(config.get_or_default::<Server>().unwrap(), Server::default());

        let config = configuration(json!({"server": {"addresses": 5}}));
        assert!(config.get_or_default::<Server>().is_err());
    }

    #[test]
    fn test_listener_registration_checks_type() {
        let config = configuration(json!({"server": {"addresses": []}}));
        config.load::<Server>().unwrap();

        let err = config
            .register_change_listener("server", |_: Endpoint| {})
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingSectionType { .. }));

        config
            .register_change_listener("server", |_: Server| {})
            .unwrap();
        assert_eq!(config.listener_count(), 1);
        assert!(config.remove_change_listener("server"));
        assert_eq!(config.listener_count(), 0);
    }

    #[test]
    fn test_listener_pins_type_before_first_resolution() {
        let config = configuration(json!({"server": {"addresses": ["a"], "host": "h", "port": 1}}));
        config
            .register_change_listener("server", |_: Server| {})
            .unwrap();

        let err = config.load::<Endpoint>().unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingSectionType { cached, .. } if cached.ends_with("Server")));
        assert!(!config.is_resolved("server"));
        assert_eq!(config.load::<Server>().unwrap().addresses, vec!["a"]);

        let fresh = configuration(json!({"server": {"host": "h", "port": 1}}));
        fresh.register_change_listener("server", |_: Server| {}).unwrap();
        fresh.remove_change_listener("server");
        assert_eq!(fresh.load::<Endpoint>().unwrap().port, 1);
    }

    #[test]
    fn test_apply_change_refreshes_and_notifies() {
        let index = Arc::new(SectionIndex::new());
        index.install_document("svc", serde_json::from_value(json!({"server": {"addresses": ["a"]}})).unwrap());
        let config = Configuration::with_source(Box::new(StaticSource {
            format: Format::Json,
            index: Arc::clone(&index),
        }));
        config.load::<Server>().unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        config
            .register_change_listener("server", move |s: Server| sink.lock().unwrap().push(s))
            .unwrap();

        let change = index.replace_document(
            "svc",
            serde_json::from_value(json!({"server": {"addresses": ["b"]}})).unwrap(),
        );
        config.inner.apply_change(&change);

        assert_eq!(*seen.lock().unwrap(), vec![Server { addresses: vec!["b".into()] }]);
        assert_eq!(config.load::<Server>().unwrap().addresses, vec!["b"]);
        assert_eq!(config.decode_count(), 2);
    }
}
