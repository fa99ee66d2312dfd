//! Bridge Configuration
//!
//! Handles parsing and management of telio-bridge.toml configuration files.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File searched for in the working directory and its parents.
pub const CONFIG_FILE: &str = "telio-bridge.toml";

/// Overrides `[logging] level`.
pub const ENV_LOG: &str = "TELIO_BRIDGE_LOG";
/// Overrides `[library] path`.
pub const ENV_LIBRARY: &str = "TELIO_BRIDGE_LIBRARY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching telio-bridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Call boundary limits and gate strictness
    #[serde(default)]
    pub bridge: BridgeSection,

    /// Where `verify` finds a scaffolding library
    #[serde(default)]
    pub library: LibraryConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir()?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    ///
    /// Defaults are returned when no file exists up to the root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TELIO_BRIDGE_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.is_empty()) {
            self.logging.level = level;
        }
        if let Some(path) = lookup(ENV_LIBRARY).filter(|v| !v.is_empty()) {
            self.library.path = Some(PathBuf::from(path));
        }
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `telio_bridge=debug`
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Call boundary settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Fail `verify` on a checksum mismatch instead of warning
    #[serde(default = "default_true")]
    pub strict_checksums: bool,

    /// Live handles allowed per handle table
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_handles() -> usize {
    65_536
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            strict_checksums: true,
            max_handles: default_max_handles(),
        }
    }
}

/// Scaffolding library location.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LibraryConfig {
    /// Library file or name to verify
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Searched before the platform defaults
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

static GLOBAL: Lazy<BridgeConfig> = Lazy::new(|| match BridgeConfig::load_from_cwd() {
    Ok(config) => config.with_env_overrides(),
    Err(e) => {
        tracing::warn!(error = %e, "ignoring unreadable {CONFIG_FILE}, using defaults");
        BridgeConfig::default().with_env_overrides()
    }
});

/// Process-wide configuration, loaded on first use.
pub fn global() -> &'static BridgeConfig {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(config.bridge.strict_checksums);
        assert_eq!(config.bridge.max_handles, 65_536);
        assert!(config.library.path.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[logging]
level = "debug"

[bridge]
strict_checksums = false

[library]
path = "target/release/libtelio.so"
search_paths = ["/opt/telio/lib"]
"#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(!config.bridge.strict_checksums);
        assert_eq!(config.bridge.max_handles, 65_536);
        assert_eq!(
            config.library.path,
            Some(PathBuf::from("target/release/libtelio.so"))
        );
        assert_eq!(config.library.search_paths.len(), 1);
    }

    #[test]
    fn test_env_overrides() {
        let config = BridgeConfig::default().with_overrides(|name| match name {
            ENV_LOG => Some("trace".to_string()),
            ENV_LIBRARY => Some("/tmp/libtelio.so".to_string()),
            _ => None,
        });
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.library.path, Some(PathBuf::from("/tmp/libtelio.so")));

        let untouched = BridgeConfig::default().with_overrides(|_| Some(String::new()));
        assert_eq!(untouched, BridgeConfig::default());
    }

    #[test]
    fn test_save_and_find() {
        let root = std::env::temp_dir().join(format!("telio-bridge-cfg-{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = BridgeConfig::default();
        config.bridge.max_handles = 16;
        config.save(&root.join(CONFIG_FILE)).unwrap();

        let found = BridgeConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = BridgeConfig::load(Path::new("/nonexistent/telio-bridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
