//! Configuration management for the Monocle CLI
//!
//! Settings are layered with figment, later sources winning:
//! - Built-in defaults
//! - `monocle.toml` in the working directory
//! - `monocle/config.toml` in the user configuration directory
//! - Environment variables (`MONOCLE_SESSION__MTU=180`)
//! - The file passed with `--config`

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use monocle_ble::BleTransportConfig;
use monocle_core::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Configuration Types
// ----------------------------------------------------------------------------

/// Complete CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub ble: BleTransportConfig,
    pub cli: CliConfig,
}

/// Settings that only concern the command line tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Device directory that directory uploads land in when none is given
    pub upload_root: String,
    /// File and directory names skipped when uploading a tree
    pub upload_ignore: Vec<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            upload_root: "/".to_string(),
            upload_ignore: vec![
                ".git".to_string(),
                "__pycache__".to_string(),
                ".DS_Store".to_string(),
            ],
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load every layer, with `explicit` merged last
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::figment(Self::user_config_path(), explicit)
            .extract::<Self>()
            .map_err(CliError::from)
            .and_then(Self::validated)
    }

    fn figment(user_config: Option<PathBuf>, explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("monocle.toml"));
        if let Some(path) = user_config {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("MONOCLE_").split("__"));
        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }
        figment
    }

    /// `monocle/config.toml` under the platform configuration directory
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("monocle").join("config.toml"))
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.ble.scan_timeout_ms == 0 {
            return Err(CliError::InvalidConfig(
                "ble.scan_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !self.cli.upload_root.starts_with('/') {
            return Err(CliError::InvalidConfig(format!(
                "cli.upload_root must be absolute, got {}",
                self.cli.upload_root
            )));
        }
        Ok(())
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn extract(jail: &Jail, explicit: Option<&str>) -> AppConfig {
        let explicit = explicit.map(|name| jail.directory().join(name));
        AppConfig::figment(None, explicit.as_deref())
            .extract()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            let config = extract(jail, None);
            assert_eq!(config, AppConfig::default());
            assert_eq!(config.session.mtu, 100);
            assert_eq!(config.cli.upload_root, "/");
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_working_directory_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "monocle.toml",
                r#"
                [session]
                mtu = 180

                [ble]
                device_name_prefix = "monocle"
                "#,
            )?;
            let config = extract(jail, None);
            assert_eq!(config.session.mtu, 180);
            assert_eq!(config.session.response_timeout_ms, 5_000);
            assert_eq!(config.ble.device_name_prefix.as_deref(), Some("monocle"));
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("monocle.toml", "[session]\nmtu = 180\n")?;
            jail.set_env("MONOCLE_SESSION__MTU", "120");
            jail.set_env("MONOCLE_BLE__ADAPTER_INDEX", "1");
            let config = extract(jail, None);
            assert_eq!(config.session.mtu, 120);
            assert_eq!(config.ble.adapter_index, 1);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("MONOCLE_SESSION__MTU", "120");
            jail.create_file("dev.toml", "[session]\nmtu = 60\n\n[cli]\nupload_root = \"/app\"\n")?;
            let config = extract(jail, Some("dev.toml"));
            assert_eq!(config.session.mtu, 60);
            assert_eq!(config.cli.upload_root, "/app");
            Ok(())
        });
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.session.mtu = 0;
        assert!(matches!(config.validate(), Err(CliError::Device(_))));

        let mut config = AppConfig::default();
        config.cli.upload_root = "app".to_string();
        assert!(matches!(config.validate(), Err(CliError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_rendering() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[session]"));
        assert!(rendered.contains("mtu = 100"));
        assert!(rendered.contains("[cli]"));
    }
}
