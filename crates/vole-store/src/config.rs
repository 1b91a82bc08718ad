//! Store configuration loaded from environment variables.
//!
//! Every setting has a default so the store can be opened with zero
//! configuration on a desktop machine.

use std::path::PathBuf;

use directories::BaseDirs;

use crate::error::{Result, StoreError};

/// Schema version tag used when `VOLE_VERSION` is unset.
pub const DEFAULT_VERSION: &str = "v1";

/// Number of posts per page when the caller gives no limit.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Maximum staged upload size in bytes (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root storage directory.
    /// Env: `VOLE_DIR`
    /// Default: `~/Vole`
    pub root: PathBuf,

    /// Schema version tag; data lives under `<root>/<version>/`.
    /// Env: `VOLE_VERSION`
    /// Default: `v1`
    pub version: String,

    /// Staging area for uploads that no post references yet.
    /// Env: `VOLE_STAGING_DIR`
    /// Default: `<root>/<version>/staging`
    pub staging_dir: Option<PathBuf>,

    /// Largest accepted upload in bytes.
    /// Env: `VOLE_MAX_FILE_SIZE`
    pub max_file_size: u64,

    /// Default page size for post listings.
    /// Env: `VOLE_PAGE_SIZE`
    pub page_size: usize,
}

impl StoreConfig {
    /// Configuration rooted at an explicit directory, all else default.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            version: DEFAULT_VERSION.to_string(),
            staging_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Default configuration rooted at `~/Vole`.
    pub fn default_root() -> Result<Self> {
        let dirs = BaseDirs::new().ok_or(StoreError::NoDataDir)?;
        Ok(Self::at(dirs.home_dir().join("Vole")))
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("VOLE_DIR") {
            Ok(dir) if !dir.is_empty() => Self::at(dir),
            _ => Self::default_root()?,
        };

        if let Ok(version) = std::env::var("VOLE_VERSION") {
            if is_valid_version(&version) {
                config.version = version;
            } else {
                tracing::warn!(value = %version, "Invalid VOLE_VERSION, using default");
            }
        }

        if let Ok(dir) = std::env::var("VOLE_STAGING_DIR") {
            if !dir.is_empty() {
                config.staging_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(val) = std::env::var("VOLE_MAX_FILE_SIZE") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.max_file_size = n,
                _ => tracing::warn!(value = %val, "Invalid VOLE_MAX_FILE_SIZE, using default"),
            }
        }

        if let Ok(val) = std::env::var("VOLE_PAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid VOLE_PAGE_SIZE, using default"),
            }
        }

        Ok(config)
    }

    /// `<root>/<version>`
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(&self.version)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("staging"))
    }
}

// The version tag becomes a path component.
fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && version != "."
        && version != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = StoreConfig::at("/tmp/vole-test");
        assert_eq!(config.version, "v1");
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/vole-test/v1"));
        assert_eq!(
            config.staging_dir(),
            PathBuf::from("/tmp/vole-test/v1/staging")
        );
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_explicit_staging_dir() {
        let mut config = StoreConfig::at("/tmp/vole-test");
        config.staging_dir = Some(PathBuf::from("/var/tmp/uploads"));
        assert_eq!(config.staging_dir(), PathBuf::from("/var/tmp/uploads"));
    }

    #[test]
    fn test_version_validation() {
        assert!(is_valid_version("v2"));
        assert!(!is_valid_version(""));
        assert!(!is_valid_version(".."));
        assert!(!is_valid_version("v1/../x"));
    }
}
