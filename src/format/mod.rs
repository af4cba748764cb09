//! Format registry.
//!
//! # Responsibilities
//! - Map file suffixes and declared format names to a known format
//! - Provide the marshal/unmarshal pair for each format
//! - Parse a whole raw document into its top-level section mapping
//! - Re-encode a generic section value into a caller-chosen type
//!
//! # Design Decisions
//! - One format per loaded source; documents never mix formats
//! - The generic value is `serde_json::Value` regardless of format
//! - Decoding always goes back through the active format's own codec, so
//!   format-specific serde behaviour (YAML tags, TOML datetimes) still applies

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ConfigError;

/// Top-level mapping of section name to generic value.
pub type Document = BTreeMap<String, Value>;

/// A marshal or unmarshal failure inside one format codec.
#[derive(Debug, Error)]
#[error("{format} codec error: {message}")]
pub struct FormatError {
    pub format: Format,
    pub message: String,
}

impl FormatError {
    fn new(format: Format, err: impl fmt::Display) -> Self {
        Self {
            format,
            message: err.to_string(),
        }
    }
}

/// A serialization format the facility understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

/// Wraps a section so every format sees a table at the document root.
#[derive(Serialize)]
struct Envelope<'a> {
    section: &'a Value,
}

#[derive(Deserialize)]
struct Unwrapped<T> {
    section: T,
}

impl Format {
    /// All known formats, in local file discovery priority order.
    pub const ALL: [Format; 3] = [Format::Json, Format::Yaml, Format::Toml];

    pub fn name(self) -> &'static str {
        match self {
            Format::Json => "JSON",
            Format::Yaml => "YAML",
            Format::Toml => "TOML",
        }
    }

    /// File suffixes (without the dot) that identify this format.
    pub fn suffixes(self) -> &'static [&'static str] {
        match self {
            Format::Json => &["json"],
            Format::Yaml => &["yml", "yaml"],
            Format::Toml => &["toml"],
        }
    }

    /// Detect a format from a file suffix such as `yaml` or `.json`.
    pub fn from_suffix(suffix: &str) -> Result<Format, ConfigError> {
        let wanted = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.suffixes().contains(&wanted.as_str()))
            .ok_or_else(|| ConfigError::UnsupportedFormat(suffix.to_string()))
    }

    /// Detect a format from a declared name; accepts either the format name
    /// (`YAML`) or one of its suffixes (`yml`), case-insensitively.
    pub fn from_name(name: &str) -> Result<Format, ConfigError> {
        let trimmed = name.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(trimmed))
            .map(Ok)
            .unwrap_or_else(|| Self::from_suffix(trimmed))
            .map_err(|_| ConfigError::UnsupportedFormat(name.to_string()))
    }

    /// Serialize a value with this format.
    pub fn marshal<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, FormatError> {
        match self {
            Format::Json => serde_json::to_vec(value).map_err(|e| FormatError::new(self, e)),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| FormatError::new(self, e)),
            Format::Toml => toml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| FormatError::new(self, e)),
        }
    }

    /// Deserialize bytes produced by this format.
    pub fn unmarshal<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, FormatError> {
        match self {
            Format::Json => serde_json::from_slice(bytes).map_err(|e| FormatError::new(self, e)),
            Format::Yaml => serde_yaml::from_slice(bytes).map_err(|e| FormatError::new(self, e)),
            Format::Toml => {
                let text = std::str::from_utf8(bytes).map_err(|e| FormatError::new(self, e))?;
                toml::from_str(text).map_err(|e| FormatError::new(self, e))
            }
        }
    }

    /// Parse a whole raw document into its section mapping.
    ///
    /// A blank document (or, for YAML, one holding only comments) yields an
    /// empty mapping rather than an error.
    pub fn parse_document(self, bytes: &[u8]) -> Result<Document, FormatError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::new());
        }
        match self {
            Format::Yaml => self
                .unmarshal::<Option<Document>>(bytes)
                .map(Option::unwrap_or_default),
            _ => self.unmarshal(bytes),
        }
    }

    /// Decode a generic section value into `T` by re-encoding it with this
    /// format and unmarshalling the result.
    pub fn transcode<T: DeserializeOwned>(self, value: &Value) -> Result<T, FormatError> {
        let bytes = self.marshal(&Envelope { section: value })?;
        let unwrapped: Unwrapped<T> = self.unmarshal(&bytes)?;
        Ok(unwrapped.section)
    }
}

/// Key under which the `toml` crate carries a datetime through serde.
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

/// Turn a generic value into its presentation form.
///
/// TOML datetimes are held in the index as single-key wrapper objects so they
/// still decode into `toml::value::Datetime`; here they become plain strings.
pub fn plain_value(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if map.len() == 1 {
                if let Some(Value::String(datetime)) = map.remove(TOML_DATETIME_KEY) {
                    return Value::String(datetime);
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, plain_value(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(plain_value).collect()),
        other => other,
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
