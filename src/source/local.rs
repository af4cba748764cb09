//! Local file source loader.
//!
//! Looks for `<dir>/<base>[-<profile>].<suffix>`, trying every known format's
//! suffixes in priority order; the first file that exists wins. The file is
//! read once, placeholders are substituted, and the whole document is parsed
//! eagerly. Local files are never watched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ConfigError, ConfigResult};
use crate::format::Format;
use crate::index::SectionIndex;
use crate::observability::metrics;
use crate::source::settings::{LocalSettings, SourceKind};
use crate::source::{env, SourceLoader};

/// A configuration snapshot loaded from one local file.
#[derive(Debug)]
pub struct LocalLoader {
    path: PathBuf,
    format: Format,
    index: Arc<SectionIndex>,
}

impl LocalLoader {
    pub fn load(settings: &LocalSettings) -> ConfigResult<Self> {
        let (path, format, raw) = locate(settings)?;
        let bytes = env::expand(&raw);
        let document = format
            .parse_document(&bytes)
            .map_err(|e| ConfigError::MalformedDocument {
                origin: path.display().to_string(),
                format,
                reason: e.message,
            })?;

        tracing::info!(
            path = %path.display(),
            format = %format,
            sections = document.len(),
            "Configuration file loaded"
        );
        metrics::record_sections_loaded(document.len());

        Ok(Self {
            path,
            format,
            index: Arc::new(SectionIndex::from_document(document)),
        })
    }

    /// The file that was loaded.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceLoader for LocalLoader {
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

fn locate(settings: &LocalSettings) -> ConfigResult<(PathBuf, Format, Vec<u8>)> {
    let candidates = settings.candidates();
    for (path, format) in &candidates {
        match fs::read(path) {
            Ok(raw) => return Ok((path.clone(), *format, raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %path.display(), "Config file candidate not found");
            }
            Err(e) => {
                return Err(ConfigError::SourceNotFound(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        }
    }

    let tried: Vec<String> = candidates
        .iter()
        .map(|(p, _)| p.display().to_string())
        .collect();
    Err(ConfigError::SourceNotFound(format!(
        "no configuration file found, tried {}",
        tried.join(", ")
    )))
}
