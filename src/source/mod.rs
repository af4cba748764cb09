//! Configuration sources.
//!
//! # Data Flow
//! ```text
//! SourceSettings (environment, read once)
//!     → local.rs  (one file, parsed eagerly, never watched)
//!     → remote.rs (named documents + push subscriptions)
//!         → nacos.rs  (HTTP transport)
//!         → memory.rs (in-process transport)
//!     → SectionIndex shared with the facade
//! ```
//!
//! # Design Decisions
//! - Exactly one loader per process view
//! - Loaders are the only writers of their section index
//! - Placeholder substitution (env.rs) runs on raw bytes before parsing

pub mod env;
pub mod local;
pub mod memory;
pub mod nacos;
pub mod remote;
pub mod settings;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ConfigResult;
use crate::format::Format;
use crate::index::{SectionChange, SectionIndex};

pub use local::LocalLoader;
pub use memory::InMemoryConfigService;
pub use nacos::NacosClient;
pub use remote::{DocumentKey, RemoteConfigService, RemoteError, RemoteLoader};
pub use settings::{LocalSettings, RemoteSettings, SourceKind, SourceSettings};

/// A loaded configuration source.
pub trait SourceLoader: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Format every document of this source is parsed with.
    fn format(&self) -> Format;

    /// The section index this loader writes.
    fn index(&self) -> Arc<SectionIndex>;

    /// Take the stream of applied section changes. Only the first call on a
    /// source that pushes changes returns a receiver.
    fn take_changes(&self) -> Option<mpsc::UnboundedReceiver<SectionChange>> {
        None
    }

    /// Stop any background work.
    fn shutdown(&self) {}
}

/// Build the loader selected by `settings`.
///
/// The remote variant talks to a Nacos-compatible server and must run
/// inside a Tokio runtime.
pub async fn load(settings: SourceSettings) -> ConfigResult<Box<dyn SourceLoader>> {
    match settings {
        SourceSettings::Local(local) => Ok(Box::new(LocalLoader::load(&local)?)),
        SourceSettings::Remote(remote) => {
            let client = NacosClient::new(&remote)?;
            let loader = RemoteLoader::connect(remote, Arc::new(client)).await?;
            Ok(Box::new(loader))
        }
    }
}
