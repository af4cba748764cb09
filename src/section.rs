//! The section capability and section-name validation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{ConfigError, ConfigResult};

/// Longest accepted section name, in bytes.
pub const MAX_SECTION_NAME_LEN: usize = 512;

static SECTION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9._~-]+/)*[A-Za-z0-9._~-]+$").expect("section name pattern is valid")
});

/// A typed configuration section.
///
/// The value declares the name of the top-level entry it is decoded from;
/// that name is the only handle used for lookup, caching and change
/// notification.
///
/// ```
/// use app_config::Section;
/// use serde::Deserialize;
///
/// #[derive(Debug, Clone, Default, Deserialize)]
/// struct HttpServer {
///     host: String,
///     port: u16,
/// }
///
/// impl Section for HttpServer {
///     fn section_name(&self) -> &str {
///         "httpServer"
///     }
/// }
/// ```
pub trait Section: DeserializeOwned + Clone + Send + Sync + 'static {
    fn section_name(&self) -> &str;
}

/// Validate a section name, returning it trimmed.
pub fn validate_section_name(name: &str) -> ConfigResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.len() > MAX_SECTION_NAME_LEN
        || !SECTION_NAME.is_match(trimmed)
    {
        return Err(ConfigError::MalformedSectionName(name.to_string()));
    }
    Ok(trimmed)
}
