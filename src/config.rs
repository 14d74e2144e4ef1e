use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stageloop::runner::{DEFAULT_RETRY_DELAY_MS, LoopControllerConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    #[serde(rename = "loop")]
    pub loop_: LoopConfig,
    pub catalog: CatalogConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Overrides the catalog's default iteration ceiling
    pub max_iterations: Option<u32>,
    pub retry_delay_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog used when the command line does not name one
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stageloop")
                .join("audit")
                .join("loops.jsonl"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values the controller cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.loop_.max_iterations == Some(0) {
            eyre::bail!("loop.max_iterations must be greater than 0");
        }
        Ok(())
    }

    /// Controller settings derived from the `loop` section
    pub fn controller_config(&self) -> LoopControllerConfig {
        LoopControllerConfig {
            max_iterations: self.loop_.max_iterations,
            retry_delay: Duration::from_millis(self.loop_.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.log_level.is_none());
        assert_eq!(config.loop_.max_iterations, None);
        assert_eq!(config.loop_.retry_delay_ms, 1000);
        assert!(config.audit.enabled);
        assert!(config.audit.jsonl_path.ends_with("loops.jsonl"));
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stageloop.yml");
        fs::write(
            &path,
            r#"
log_level: debug
loop:
  max_iterations: 4
  retry_delay_ms: 0
catalog:
  path: /etc/stageloop/catalog.yml
audit:
  enabled: false
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.loop_.max_iterations, Some(4));
        assert_eq!(config.catalog.path, Some(PathBuf::from("/etc/stageloop/catalog.yml")));
        assert!(!config.audit.enabled);

        let controller = config.controller_config();
        assert_eq!(controller.max_iterations, Some(4));
        assert!(controller.retry_delay.is_zero());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stageloop.yml");
        fs::write(&path, "log_level: info\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.loop_.retry_delay_ms, 1000);
        assert!(config.audit.enabled);
    }

    #[test]
    fn test_zero_max_iterations_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stageloop.yml");
        fs::write(&path, "loop:\n  max_iterations: 0\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let path = PathBuf::from("/nonexistent/stageloop.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
