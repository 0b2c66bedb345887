use crate::error::{FeatureError, Result};
use serde::{Deserialize, Serialize};

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File name of the feature-set visibility log inside the working directory
    pub visibility_log_name: String,

    /// Post-filter decoded tile features against the query's spatial filter.
    /// When disabled the tiled store answers at tile granularity.
    pub exact_spatial_filter: bool,

    /// Attribute whose string value becomes a decoded feature's name
    pub feature_name_attribute: String,

    /// Tile payloads larger than this (after inflation) are skipped
    pub max_tile_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            visibility_log_name: "fsvis".to_string(),
            exact_spatial_filter: false,
            feature_name_attribute: "name".to_string(),
            max_tile_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl Config {
    pub fn with_exact_spatial_filter(mut self, enabled: bool) -> Self {
        self.exact_spatial_filter = enabled;
        self
    }

    pub fn with_visibility_log_name(mut self, name: impl Into<String>) -> Self {
        self.visibility_log_name = name.into();
        self
    }

    pub fn with_feature_name_attribute(mut self, name: impl Into<String>) -> Self {
        self.feature_name_attribute = name.into();
        self
    }

    pub fn with_max_tile_bytes(mut self, bytes: usize) -> Self {
        self.max_tile_bytes = bytes;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.visibility_log_name.is_empty() {
            return Err(FeatureError::invalid("visibility_log_name must not be empty"));
        }
        if self.visibility_log_name.contains(['/', '\\']) {
            return Err(FeatureError::invalid(
                "visibility_log_name must be a bare file name",
            ));
        }
        if self.max_tile_bytes == 0 {
            return Err(FeatureError::invalid("max_tile_bytes must be positive"));
        }
        Ok(())
    }

    /// Parse configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| FeatureError::invalid(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "toml")]
    /// # {
    /// use spatio_features::Config;
    ///
    /// let config = Config::from_toml_str("exact_spatial_filter = true").unwrap();
    /// assert!(config.exact_spatial_filter);
    /// assert_eq!(config.visibility_log_name, "fsvis");
    /// # }
    /// ```
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| FeatureError::invalid(format!("invalid config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    #[cfg(feature = "toml")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
