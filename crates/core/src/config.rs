//! Application configuration handling.
//!
//! Prices, fees, and the verification threshold are configuration
//! rather than literals spread across screens; defaults are layered
//! under an optional TOML file and `JMART_*` environment overrides.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// A purchasable bundle of tokens at a fixed price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPack {
    /// Number of tokens in the bundle.
    pub tokens: u32,
    /// Bundle price in currency units.
    pub price: f64,
}

/// Runtime configuration for the marketplace client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the backend API.
    pub api_base_url: String,
    /// Price of a single token in currency units.
    pub token_price: f64,
    /// Fraction of the gross sale value retained as a fee.
    pub sell_fee_rate: f64,
    /// Prediction confidence at or above which a category mismatch
    /// blocks submission outright instead of offering an override.
    pub verify_confidence_threshold: f64,
    /// Fixed token bundles offered in the shop.
    pub token_packs: Vec<TokenPack>,
    /// Directory holding the persisted session mirror.
    pub session_root: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            token_price: 0.5,
            sell_fee_rate: 0.04,
            verify_confidence_threshold: 0.95,
            token_packs: vec![
                TokenPack {
                    tokens: 10,
                    price: 5.0,
                },
                TokenPack {
                    tokens: 25,
                    price: 12.0,
                },
                TokenPack {
                    tokens: 50,
                    price: 24.0,
                },
                TokenPack {
                    tokens: 100,
                    price: 48.0,
                },
            ],
            session_root: default_session_root(),
        }
    }
}

impl AppConfig {
    /// Load configuration, layering the config file and `JMART_*`
    /// environment variables over the built-in defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    fn load_from(path: PathBuf) -> Result<Self> {
        let defaults =
            Config::try_from(&AppConfig::default()).context("failed to seed default config")?;
        let mut builder = Config::builder().add_source(defaults);
        if path.exists() {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(Environment::with_prefix("JMART").try_parsing(true));

        let settings = builder.build().context("failed to assemble configuration")?;
        settings
            .try_deserialize()
            .context("failed to deserialize configuration")
    }
}

/// Location of the user-editable configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jmart/config.toml")
}

fn default_session_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jmart")
}

const DEFAULT_CONFIG: &str = r#"# JMART client configuration.

api_base_url = "http://127.0.0.1:8000"

# 1 token costs this much; selling deducts the fee fraction below.
token_price = 0.5
sell_fee_rate = 0.04

# At or above this prediction confidence a category mismatch blocks
# the upload instead of offering a manual override.
verify_confidence_threshold = 0.95

[[token_packs]]
tokens = 10
price = 5.0

[[token_packs]]
tokens = 25
price = 12.0

[[token_packs]]
tokens = 50
price = 24.0

[[token_packs]]
tokens = 100
price = 48.0
"#;

/// Write the default configuration file if none exists yet.
pub fn ensure_default_config() -> Result<()> {
    let path = config_path();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_without_a_config_file() -> Result<()> {
        let dir = tempdir()?;
        let config = AppConfig::load_from(dir.path().join("missing.toml"))?;
        assert_eq!(config.token_price, 0.5);
        assert_eq!(config.sell_fee_rate, 0.04);
        assert_eq!(config.verify_confidence_threshold, 0.95);
        assert_eq!(config.token_packs.len(), 4);
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
token_price = 10.0
api_base_url = "http://localhost:9000"
"#,
        )?;
        let config = AppConfig::load_from(path)?;
        assert_eq!(config.token_price, 10.0);
        assert_eq!(config.api_base_url, "http://localhost:9000");
        // untouched keys keep their defaults
        assert_eq!(config.sell_fee_rate, 0.04);
        Ok(())
    }

    #[test]
    fn default_file_parses_to_the_default_config() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, DEFAULT_CONFIG)?;
        let config = AppConfig::load_from(path)?;
        let defaults = AppConfig::default();
        assert_eq!(config.token_price, defaults.token_price);
        assert_eq!(config.token_packs, defaults.token_packs);
        Ok(())
    }
}
