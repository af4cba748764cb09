//! Process-wide application configuration.
//!
//! Loads one configuration source (a local file or named documents from a
//! remote config service), indexes it by top-level section name, decodes
//! sections into caller types on demand and notifies listeners when a
//! remote section changes.

pub mod error;
pub mod facade;
pub mod format;
pub mod index;
pub mod lifecycle;
pub mod observability;
pub mod section;
pub mod source;

mod cache;
mod listener;
mod resilience;

pub use error::{ConfigError, ConfigResult};
pub use facade::{
    get_config, global, init_global, install_global, register_change_listener,
    remove_change_listener, Configuration,
};
pub use format::Format;
pub use section::Section;
pub use source::{SourceKind, SourceSettings};
