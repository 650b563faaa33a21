use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Gateway address used when neither the config file nor the CLI sets one.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:6969/";

/// Console config, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the reflection gateway.
    pub server: String,
    /// Target to connect to on start.
    pub target: Option<String>,
    /// Metadata sent with every request (usually a JSON object).
    pub metadata: Option<String>,
    /// Ask the gateway to dial targets over TLS.
    pub use_tls: bool,
    /// Seconds between active-connection refreshes.
    pub refresh_secs: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Local proto files. Non-empty enables local-proto mode.
    pub protos: Vec<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            target: None,
            metadata: None,
            use_tls: false,
            refresh_secs: 10,
            timeout_secs: 30,
            protos: Vec::new(),
        }
    }
}

impl ConsoleConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        // Metadata often carries auth tokens.
        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate(path)?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.refresh_secs == 0 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "refresh_secs must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `$XDG_CONFIG_HOME/rpcdeck/config.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rpcdeck").join("config.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(path, detail) => {
                write!(f, "Invalid config {}: {}", path.display(), detail)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Warn if a config file is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It may contain metadata tokens -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

/// Returns true if the given file mode has the world-readable bit set.
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
