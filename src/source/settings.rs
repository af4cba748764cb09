//! Loader settings read from the process environment.
//!
//! Everything here is read once at startup. Each settings type has a
//! `from_lookup` constructor taking an arbitrary variable lookup, and a
//! `from_env` wrapper over `std::env::var`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::format::Format;

pub const CONFIG_SOURCE: &str = "CONFIG_SOURCE";
pub const CONF_PROFILE: &str = "CONF_PROFILE";
pub const CONF_DIR: &str = "CONF_DIR";

pub const NACOS_SERVER_ADDR: &str = "NACOS_SERVER_ADDR";
pub const NACOS_SERVER_PORT: &str = "NACOS_SERVER_PORT";
pub const NACOS_NAMESPACE_ID: &str = "NACOS_NAMESPACE_ID";
pub const NACOS_GROUP: &str = "NACOS_GROUP";
pub const NACOS_DATA_IDS: &str = "NACOS_DATA_IDS";
pub const NACOS_CONFIG_FORMAT: &str = "NACOS_CONFIG_FORMAT";
pub const NACOS_USERNAME: &str = "NACOS_USERNAME";
pub const NACOS_PASSWORD: &str = "NACOS_PASSWORD";
pub const NACOS_APP_NAME: &str = "NACOS_APP_NAME";
pub const NACOS_TIMEOUT_MS: &str = "NACOS_TIMEOUT_MS";

const DEFAULT_DIR: &str = "./resource/cfg/";
const DEFAULT_BASE_NAME: &str = "app";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Which source loader is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Local,
    Remote,
}

impl SourceKind {
    pub fn parse(value: &str) -> ConfigResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(SourceKind::Local),
            "remote" | "nacos" => Ok(SourceKind::Remote),
            other => Err(ConfigError::InvalidSetting {
                name: CONFIG_SOURCE,
                reason: format!("expected 'local' or 'remote', got '{other}'"),
            }),
        }
    }
}

/// Settings for the local file loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSettings {
    /// Directory searched for the configuration file.
    pub dir: PathBuf,
    /// Base file name, before the optional profile and the suffix.
    pub base_name: String,
    /// Optional profile appended as `-<profile>`.
    pub profile: Option<String>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            base_name: DEFAULT_BASE_NAME.to_string(),
            profile: None,
        }
    }
}

impl LocalSettings {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = lookup(CONF_PROFILE)
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty());
        if profile.is_none() {
            tracing::warn!(
                variable = CONF_PROFILE,
                "Profile not set, the default configuration file will be used"
            );
        }
        let dir = lookup(CONF_DIR)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR));

        Self {
            dir,
            base_name: DEFAULT_BASE_NAME.to_string(),
            profile,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Candidate file paths in discovery order.
    pub fn candidates(&self) -> Vec<(PathBuf, Format)> {
        let stem = match &self.profile {
            Some(profile) => format!("{}-{}", self.base_name, profile),
            None => self.base_name.clone(),
        };
        let stem = stem.as_str();
        Format::ALL
            .into_iter()
            .flat_map(|format| {
                format
                    .suffixes()
                    .iter()
                    .map(move |suffix| (format!("{stem}.{suffix}"), format))
            })
            .map(|(file, format)| (self.dir.join(file), format))
            .collect()
    }
}

/// Coordinates of the remote configuration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub server_addr: String,
    pub server_port: u16,
    pub namespace: String,
    pub group: String,
    /// Document ids in merge order; later documents win at startup.
    pub data_ids: Vec<String>,
    pub format: Format,
    pub username: Option<String>,
    pub password: Option<String>,
    pub app_name: Option<String>,
    /// Bound on each startup fetch.
    pub fetch_timeout: Duration,
}

impl RemoteSettings {
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingSetting(name))
        };
        let optional = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let server_addr = required(NACOS_SERVER_ADDR)?;
        let server_port = required(NACOS_SERVER_PORT)?
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidSetting {
                name: NACOS_SERVER_PORT,
                reason: e.to_string(),
            })?;
        let group = required(NACOS_GROUP)?;
        let data_ids: Vec<String> = required(NACOS_DATA_IDS)?
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if data_ids.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: NACOS_DATA_IDS,
                reason: "no document ids listed".to_string(),
            });
        }
        let format = Format::from_name(&required(NACOS_CONFIG_FORMAT)?)?;
        let fetch_timeout = match optional(NACOS_TIMEOUT_MS) {
            Some(ms) => Duration::from_millis(ms.parse::<u64>().map_err(|e| {
                ConfigError::InvalidSetting {
                    name: NACOS_TIMEOUT_MS,
                    reason: e.to_string(),
                }
            })?),
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        Ok(Self {
            server_addr,
            server_port,
            namespace: optional(NACOS_NAMESPACE_ID).unwrap_or_default(),
            group,
            data_ids,
            format,
            username: optional(NACOS_USERNAME),
            password: optional(NACOS_PASSWORD),
            app_name: optional(NACOS_APP_NAME),
            fetch_timeout,
        })
    }

    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_lookup)
    }
}

/// Full source selection, as read at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSettings {
    Local(LocalSettings),
    Remote(RemoteSettings),
}

impl SourceSettings {
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match lookup(CONFIG_SOURCE) {
            Some(value) => SourceKind::parse(&value)?,
            None => SourceKind::default(),
        };
        match kind {
            SourceKind::Local => Ok(SourceSettings::Local(LocalSettings::from_lookup(lookup))),
            SourceKind::Remote => Ok(SourceSettings::Remote(RemoteSettings::from_lookup(lookup)?)),
        }
    }

    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSettings::Local(_) => SourceKind::Local,
            SourceSettings::Remote(_) => SourceKind::Remote,
        }
    }
}
