use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reserved name for a private in-memory database.
pub const MEMORY_DB: &str = ":memory:";

/// Where a named database lives, relative to `BridgeConfig::base_dir`.
///
/// Accepts the names the JavaScript API uses (`"default"`, `"Documents"`,
/// `"Library"`) as well as the legacy numeric form `0`, `1`, `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "LocationRepr")]
pub enum DatabaseLocation {
    #[default]
    Default,
    Documents,
    Library,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationRepr {
    Name(String),
    Index(u8),
}

impl TryFrom<LocationRepr> for DatabaseLocation {
    type Error = ConfigError;

    fn try_from(repr: LocationRepr) -> Result<Self, Self::Error> {
        match repr {
            LocationRepr::Name(name) => DatabaseLocation::from_name(&name),
            LocationRepr::Index(0) => Ok(DatabaseLocation::Documents),
            LocationRepr::Index(1) => Ok(DatabaseLocation::Library),
            LocationRepr::Index(2) => Ok(DatabaseLocation::Default),
            LocationRepr::Index(other) => Err(ConfigError::Location(other.to_string())),
        }
    }
}

impl DatabaseLocation {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "default" => Ok(DatabaseLocation::Default),
            "Documents" => Ok(DatabaseLocation::Documents),
            "Library" => Ok(DatabaseLocation::Library),
            other => Err(ConfigError::Location(other.to_string())),
        }
    }

    /// Sub-directory under the base directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            DatabaseLocation::Default => "nosync",
            DatabaseLocation::Documents => "docs",
            DatabaseLocation::Library => "libs",
        }
    }
}

/// Process-level settings for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Root directory that holds every location sub-directory.
    pub base_dir: PathBuf,
    /// Busy timeout applied to connections whose options leave it unset.
    pub busy_timeout_ms: u64,
    /// Create the location directory on open when it is missing.
    pub create_dirs: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            busy_timeout_ms: 5000,
            create_dirs: true,
        }
    }
}

impl BridgeConfig {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// File path for database `name` at `location`. The in-memory marker is
    /// passed through untouched.
    pub fn resolve(&self, name: &str, location: DatabaseLocation) -> PathBuf {
        if name == MEMORY_DB {
            return PathBuf::from(MEMORY_DB);
        }
        self.base_dir.join(location.dir_name()).join(name)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Options for opening one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub read_only: bool,
    pub create_if_missing: bool,
    pub busy_timeout: Option<Duration>,
    /// Pre-populated database copied into place when the target is missing.
    pub create_from: Option<PathBuf>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            create_if_missing: true,
            busy_timeout: None,
            create_from: None,
        }
    }
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            create_if_missing: false,
            ..Self::default()
        }
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn create_from(mut self, template: impl Into<PathBuf>) -> Self {
        self.create_from = Some(template.into());
        self
    }
}

pub fn is_memory_path(path: &Path) -> bool {
    path.as_os_str() == MEMORY_DB
}
