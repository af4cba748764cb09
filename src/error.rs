//! Error taxonomy for the configuration facility.
//!
//! # Propagation
//! - Source errors (`SourceNotFound`, `MalformedDocument`, `UnsupportedFormat`,
//!   settings errors) happen at startup and are fatal to the process.
//! - Facade errors (`MalformedSectionName`, `SectionNotFound`,
//!   `ConflictingSectionType`, `Decode`) go back to the one caller that asked.

use thiserror::Error;

use crate::format::Format;
use crate::source::remote::RemoteError;

/// Errors returned by the configuration facility.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No local file matched, or a remote document could not be fetched.
    #[error("configuration source not found: {0}")]
    SourceNotFound(String),

    /// The whole raw document failed to parse into a section mapping.
    #[error("malformed {format} document '{origin}': {reason}")]
    MalformedDocument {
        origin: String,
        format: Format,
        reason: String,
    },

    /// A file suffix or declared format name is not registered.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// A required environment setting is absent.
    #[error("missing required setting {0}")]
    MissingSetting(&'static str),

    /// An environment setting is present but unusable.
    #[error("invalid value for setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// The declared section name is empty, too long or outside the grammar.
    #[error(
        "malformed section name '{0}': must be at most 512 characters and match ^([A-Za-z0-9._~-]+/)*[A-Za-z0-9._~-]+$"
    )]
    MalformedSectionName(String),

    /// The section name is well-formed but absent from the loaded document.
    #[error("section '{0}' not found")]
    SectionNotFound(String),

    /// The section was already resolved into a different concrete type.
    #[error("section '{section}' is already resolved as {cached}, cannot resolve it as {requested}")]
    ConflictingSectionType {
        section: String,
        cached: &'static str,
        requested: &'static str,
    },

    /// The section exists but does not fit the requested type.
    #[error("failed to decode section '{section}': {reason}")]
    Decode { section: String, reason: String },

    /// The remote configuration service failed.
    #[error("remote configuration service error: {0}")]
    Remote(#[from] RemoteError),

    /// The process-wide instance has not been initialized yet.
    #[error("configuration facility is not initialized")]
    NotInitialized,

    /// The process-wide instance was already initialized.
    #[error("configuration facility is already initialized")]
    AlreadyInitialized,
}

/// Result alias used throughout the crate.
pub type ConfigResult<T> = Result<T, ConfigError>;
