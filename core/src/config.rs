//! Live directory configuration, persisted as versioned JSON

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::sort::{group::GroupOptions, SortOptions};

const CONFIG_FILE_NAME: &str = "live_directory.json";

/// Configuration migration support
pub trait Migrate {
	fn current_version(&self) -> u32;

	fn target_version() -> u32;

	fn migrate(&mut self) -> Result<()>;
}

#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum CaseSensitivity {
	/// Follow the platform convention
	#[default]
	Auto,
	Sensitive,
	Insensitive,
}

impl CaseSensitivity {
	pub fn is_insensitive(self) -> bool {
		match self {
			Self::Auto => cfg!(any(target_os = "windows", target_os = "macos")),
			Self::Sensitive => false,
			Self::Insensitive => true,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationConfig {
	/// Entries gathered before a chunk is handed over for publication
	pub batch_size: usize,
	/// Minimum time between intermediate publications while enumerating
	pub progress_interval_ms: u64,
	/// Upper bound for acquiring the native directory handle
	pub handle_timeout_ms: u64,
	/// Roots that are backed by a storage provider (sync clients, mounted cloud drives)
	pub storage_roots: Vec<PathBuf>,
}

impl Default for EnumerationConfig {
	fn default() -> Self {
		Self {
			batch_size: 32,
			progress_interval_ms: 200,
			handle_timeout_ms: 5_000,
			storage_roots: Vec::new(),
		}
	}
}

impl EnumerationConfig {
	pub fn progress_interval(&self) -> Duration {
		Duration::from_millis(self.progress_interval_ms)
	}

	pub fn handle_timeout(&self) -> Duration {
		Duration::from_millis(self.handle_timeout_ms)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
	/// Maximum number of pending modifications refreshed at once
	pub update_batch_size: usize,
	/// Minimum time between publications caused by change notifications
	pub publish_interval_ms: u64,
	/// How long the processor waits for operations before flushing pending work
	pub idle_wait_ms: u64,
}

impl Default for ProcessorConfig {
	fn default() -> Self {
		Self {
			update_batch_size: 32,
			publish_interval_ms: 200,
			idle_wait_ms: 200,
		}
	}
}

impl ProcessorConfig {
	pub fn publish_interval(&self) -> Duration {
		Duration::from_millis(self.publish_interval_ms)
	}

	pub fn idle_wait(&self) -> Duration {
		Duration::from_millis(self.idle_wait_ms)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
	/// Request extended properties for every entry once a load completes
	pub auto_enrich: bool,
	pub metadata_concurrency: usize,
	pub thumbnail_concurrency: usize,
	pub thumbnail_size: u32,
}

impl Default for EnrichmentConfig {
	fn default() -> Self {
		Self {
			auto_enrich: true,
			metadata_concurrency: 4,
			thumbnail_concurrency: 1,
			thumbnail_size: 96,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
	pub show_hidden: bool,
	/// Only honored together with `show_hidden`
	pub show_system_files: bool,
	pub show_dot_files: bool,
}

impl Default for VisibilityConfig {
	fn default() -> Self {
		Self {
			show_hidden: false,
			show_system_files: false,
			show_dot_files: true,
		}
	}
}

impl VisibilityConfig {
	pub fn allows(&self, is_hidden: bool, is_system: bool, is_dot_file: bool) -> bool {
		(!is_hidden || (self.show_hidden && (!is_system || self.show_system_files)))
			&& (!is_dot_file || self.show_dot_files)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
	pub sort: SortOptions,
	pub group: GroupOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	/// Default filter directive, overridden by `RUST_LOG`
	pub level: String,
	/// Also write a daily-rolling log file under this directory
	pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			directory: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveDirectoryConfig {
	/// Config schema version
	pub version: u32,

	#[serde(default)]
	pub enumeration: EnumerationConfig,

	#[serde(default)]
	pub processor: ProcessorConfig,

	#[serde(default)]
	pub enrichment: EnrichmentConfig,

	#[serde(default)]
	pub visibility: VisibilityConfig,

	#[serde(default)]
	pub case_sensitivity: CaseSensitivity,

	#[serde(default)]
	pub view: ViewConfig,

	#[serde(default)]
	pub logging: LoggingConfig,
}

impl Default for LiveDirectoryConfig {
	fn default() -> Self {
		Self {
			version: Self::target_version(),
			enumeration: EnumerationConfig::default(),
			processor: ProcessorConfig::default(),
			enrichment: EnrichmentConfig::default(),
			visibility: VisibilityConfig::default(),
			case_sensitivity: CaseSensitivity::default(),
			view: ViewConfig::default(),
			logging: LoggingConfig::default(),
		}
	}
}

impl LiveDirectoryConfig {
	/// Load configuration from a directory, creating a default one if missing
	pub fn load_from(config_dir: &Path) -> Result<Self> {
		let config_path = config_dir.join(CONFIG_FILE_NAME);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: LiveDirectoryConfig = serde_json::from_str(&json)?;

			if config.current_version() < Self::target_version() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save_to(config_dir)?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default();
			config.save_to(config_dir)?;
			Ok(config)
		}
	}

	pub fn save_to(&self, config_dir: &Path) -> Result<()> {
		fs::create_dir_all(config_dir)?;

		let config_path = config_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}
}

impl Migrate for LiveDirectoryConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		2
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				self.migrate()
			}
			1 => {
				// v1 predates visibility settings and always showed everything
				self.visibility = VisibilityConfig {
					show_hidden: true,
					show_system_files: true,
					show_dot_files: true,
				};
				self.version = 2;
				Ok(())
			}
			2 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn default_config_is_created_and_reloaded() {
		let dir = tempdir().unwrap();

		let created = LiveDirectoryConfig::load_from(dir.path()).unwrap();
		assert!(dir.path().join(CONFIG_FILE_NAME).exists());
		assert_eq!(created.enumeration.batch_size, 32);

		let reloaded = LiveDirectoryConfig::load_from(dir.path()).unwrap();
		assert_eq!(reloaded.version, LiveDirectoryConfig::target_version());
		assert_eq!(reloaded.processor.update_batch_size, 32);
	}

	#[test]
	fn v1_config_is_migrated() {
		let dir = tempdir().unwrap();
		fs::write(
			dir.path().join(CONFIG_FILE_NAME),
			r#"{ "version": 1, "processor": { "update_batch_size": 8 } }"#,
		)
		.unwrap();

		let config = LiveDirectoryConfig::load_from(dir.path()).unwrap();
		assert_eq!(config.version, 2);
		assert_eq!(config.processor.update_batch_size, 8);
		assert_eq!(config.processor.idle_wait_ms, 200);
		assert!(config.visibility.show_hidden);

		let saved = fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
		assert!(saved.contains("\"version\": 2"));
	}

	#[test]
	fn unknown_version_fails() {
		let mut config = LiveDirectoryConfig {
			version: 9,
			..Default::default()
		};
		assert!(config.migrate().is_err());
	}

	#[test]
	fn visibility_rules() {
		let defaults = VisibilityConfig::default();
		assert!(defaults.allows(false, false, false));
		assert!(!defaults.allows(true, false, false));
		assert!(defaults.allows(false, false, true));

		let hidden = VisibilityConfig {
			show_hidden: true,
			..Default::default()
		};
		assert!(hidden.allows(true, false, false));
		assert!(!hidden.allows(true, true, false));

		let no_dots = VisibilityConfig {
			show_dot_files: false,
			..Default::default()
		};
		assert!(!no_dots.allows(false, false, true));
	}
}
