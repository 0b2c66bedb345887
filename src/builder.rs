//! Store builder for flexible configuration
//!
//! This module provides a builder pattern for opening tiled feature stores
//! with a working directory and custom configuration.

use crate::error::Result;
use crate::tiled::TiledFeatureDataStore;
use crate::types::Config;
use std::path::PathBuf;

/// Builder for [`TiledFeatureDataStore`] instances.
///
/// The `TiledStoreBuilder` configures:
/// - The MBTiles archive to serve
/// - A working directory for persisted feature-set visibility
/// - Full configuration control
///
/// # Examples
///
/// ## Persisted visibility
/// ```rust,no_run
/// use spatio_features::TiledStoreBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = TiledStoreBuilder::new("basemap.mbtiles")
///     .working_dir(std::env::temp_dir())
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// ## Full configuration
/// ```rust,no_run
/// use spatio_features::{Config, TiledStoreBuilder};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default()
///     .with_exact_spatial_filter(true)
///     .with_feature_name_attribute("name:en");
///
/// let store = TiledStoreBuilder::new("basemap.mbtiles")
///     .config(config)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TiledStoreBuilder {
    archive_path: PathBuf,
    working_dir: Option<PathBuf>,
    config: Config,
}

impl TiledStoreBuilder {
    /// Start building a store over the archive at `archive_path`.
    ///
    /// Without a working directory, visibility changes are kept in memory
    /// only.
    pub fn new<P: Into<PathBuf>>(archive_path: P) -> Self {
        Self {
            archive_path: archive_path.into(),
            working_dir: None,
            config: Config::default(),
        }
    }

    /// Directory holding the visibility log. Created on build if missing.
    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Post-filter decoded features against the query geometry.
    pub fn exact_spatial_filter(mut self, enabled: bool) -> Self {
        self.config.exact_spatial_filter = enabled;
        self
    }

    /// Open the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the working
    /// directory cannot be created or its visibility log cannot be read.
    /// An unreadable archive is not an error; the store is built unavailable.
    pub fn build(self) -> Result<TiledFeatureDataStore> {
        if let Some(dir) = &self.working_dir {
            std::fs::create_dir_all(dir)?;
        }
        TiledFeatureDataStore::open(&self.archive_path, self.working_dir.as_deref(), self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FeatureDataStore;
    use tempfile::TempDir;

    #[test]
    fn test_missing_archive_builds_unavailable_store() {
        let dir = TempDir::new().unwrap();
        let store = TiledStoreBuilder::new(dir.path().join("missing.mbtiles"))
            .working_dir(dir.path().join("state"))
            .build()
            .unwrap();
        assert!(!store.is_available());
        assert!(dir.path().join("state").is_dir());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = TiledStoreBuilder::new(dir.path().join("a.mbtiles"))
            .config(Config::default().with_max_tile_bytes(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_exact_filter_toggle() {
        let builder = TiledStoreBuilder::new("a.mbtiles").exact_spatial_filter(true);
        assert!(builder.config.exact_spatial_filter);
    }
}
