//! Unified configuration for vaultsync
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (~/.config/vaultsync/config.toml, or .json/.json5)
//! 3. Environment variables (VAULTSYNC_* prefix)
//! 4. CLI flags (highest priority, applied by the binary)

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::SyncError;
use crate::validation::{self, ValidationError, Validator};

/// Application name used for default directories
pub const APP_NAME: &str = "vaultsync";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "VAULTSYNC_";

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Unified configuration for vaultsync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	// ========================================================================
	// VAULT & STATE
	// ========================================================================
	/// Root of the local vault
	pub vault_path: PathBuf,

	/// Directory holding the state snapshot (defaults to the config dir)
	pub state_dir: Option<PathBuf>,

	// ========================================================================
	// EXCLUSION & INCLUSION
	// ========================================================================
	/// Glob patterns to exclude from sync
	pub ignore_patterns: Vec<String>,

	/// If non-empty, only paths matching one of these are synced
	pub include_patterns: Vec<String>,

	// ========================================================================
	// NESTED SECTIONS
	// ========================================================================
	pub sync: SyncSettings,

	pub database: DatabaseSettings,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			vault_path: PathBuf::new(),
			state_dir: None,
			ignore_patterns: vec![
				".obsidian/**".to_string(),
				".trash/**".to_string(),
				".git/**".to_string(),
				"**/.DS_Store".to_string(),
				"**/node_modules/**".to_string(),
			],
			include_patterns: Vec::new(),
			sync: SyncSettings::default(),
			database: DatabaseSettings::default(),
		}
	}
}

// ============================================================================
// SYNC SETTINGS
// ============================================================================

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
	/// Quiet period before a path's pending event settles
	pub debounce_ms: u64,

	/// Attachments larger than this are not uploaded
	pub max_binary_size_mb: u64,

	/// Paths per batched remote delete
	pub batch_size: usize,

	/// Retries before a failed path is dropped
	pub retry_attempts: u32,

	/// Base delay before a failed path is retried (multiplied by attempt count)
	pub retry_delay_ms: u64,

	/// Capacity of the settled-event queue
	pub queue_capacity: usize,

	/// Period of the state save / retry sweep task
	pub save_interval_secs: u64,
}

impl Default for SyncSettings {
	fn default() -> Self {
		Self {
			debounce_ms: 2000,
			max_binary_size_mb: 50,
			batch_size: 100,
			retry_attempts: 3,
			retry_delay_ms: 1000,
			queue_capacity: 100,
			save_interval_secs: 30,
		}
	}
}

impl SyncSettings {
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	pub fn save_interval(&self) -> Duration {
		Duration::from_secs(self.save_interval_secs)
	}

	pub fn max_binary_size_bytes(&self) -> u64 {
		self.max_binary_size_mb.saturating_mul(1024 * 1024)
	}
}

// ============================================================================
// DATABASE SETTINGS
// ============================================================================

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
	/// SQLite database file (defaults to `<state_dir>/vault.db`)
	pub path: Option<PathBuf>,

	/// Maximum pooled connections
	pub pool_size: usize,

	/// Connections older than this are recycled
	pub max_lifetime_secs: u64,

	/// Connections unused for this long are recycled
	pub idle_timeout_secs: u64,

	/// Deadline for a single remote operation
	pub op_timeout_secs: u64,
}

impl Default for DatabaseSettings {
	fn default() -> Self {
		Self {
			path: None,
			pool_size: 10,
			max_lifetime_secs: 3600,
			idle_timeout_secs: 1800,
			op_timeout_secs: 30,
		}
	}
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
	/// Load configuration following the priority chain
	///
	/// With no explicit path, `<config dir>/config.toml` is used when it
	/// exists; a missing default file is not an error.
	pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
		let mut config = match path {
			Some(p) => Self::from_file(p)?,
			None => {
				let default_path = default_config_dir().join("config.toml");
				if default_path.exists() {
					Self::from_file(&default_path)?
				} else {
					Self::default()
				}
			}
		};

		config.apply_env_overrides(std::env::vars())?;
		config.expand_paths();
		Ok(config)
	}

	/// Parse a config file; `.json`/`.json5` use JSON5, anything else TOML
	pub fn from_file(path: &Path) -> Result<Self, SyncError> {
		let content = std::fs::read_to_string(path).map_err(|e| SyncError::InvalidConfig {
			message: format!("cannot read {}: {}", path.display(), e),
		})?;
		let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
		match ext.as_str() {
			"json" | "json5" => Self::from_json5_str(&content),
			_ => Self::from_toml_str(&content),
		}
	}

	pub fn from_toml_str(content: &str) -> Result<Self, SyncError> {
		toml::from_str(content).map_err(|e| SyncError::InvalidConfig { message: e.to_string() })
	}

	pub fn from_json5_str(content: &str) -> Result<Self, SyncError> {
		json5::from_str(content).map_err(|e| SyncError::InvalidConfig { message: e.to_string() })
	}

	/// Apply `VAULTSYNC_*` overrides from an environment snapshot
	pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), SyncError>
	where
		I: IntoIterator<Item = (String, String)>,
	{
		for (key, value) in vars {
			let Some(name) = key.strip_prefix(ENV_PREFIX) else {
				continue;
			};
			match name {
				"VAULT_PATH" => self.vault_path = PathBuf::from(value),
				"STATE_DIR" => self.state_dir = Some(PathBuf::from(value)),
				"DATABASE_PATH" => self.database.path = Some(PathBuf::from(value)),
				"DATABASE_POOL_SIZE" => self.database.pool_size = parse_env(&key, &value)?,
				"DATABASE_OP_TIMEOUT_SECS" => {
					self.database.op_timeout_secs = parse_env(&key, &value)?
				}
				"SYNC_DEBOUNCE_MS" => self.sync.debounce_ms = parse_env(&key, &value)?,
				"SYNC_MAX_BINARY_SIZE_MB" => {
					self.sync.max_binary_size_mb = parse_env(&key, &value)?
				}
				"SYNC_BATCH_SIZE" => self.sync.batch_size = parse_env(&key, &value)?,
				"SYNC_RETRY_ATTEMPTS" => self.sync.retry_attempts = parse_env(&key, &value)?,
				"SYNC_RETRY_DELAY_MS" => self.sync.retry_delay_ms = parse_env(&key, &value)?,
				_ => {}
			}
		}
		Ok(())
	}

	/// Expand `~` and `$VAR` in every path setting
	pub fn expand_paths(&mut self) {
		self.vault_path = expand_path(&self.vault_path);
		self.state_dir = self.state_dir.as_deref().map(expand_path);
		self.database.path = self.database.path.as_deref().map(expand_path);
	}

	/// Effective state directory
	pub fn resolved_state_dir(&self) -> PathBuf {
		self.state_dir.clone().unwrap_or_else(default_config_dir)
	}

	/// Effective SQLite database file
	pub fn resolved_database_path(&self) -> PathBuf {
		self.database
			.path
			.clone()
			.unwrap_or_else(|| self.resolved_state_dir().join("vault.db"))
	}
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ValidationError> {
		validation::validate_root_dir(&self.vault_path)?;
		validation::validate_debounce_ms(self.sync.debounce_ms)?;
		validation::validate_batch_size(self.sync.batch_size)?;
		validation::validate_retry_count(self.sync.retry_attempts)?;
		validation::validate_capacity("queue_capacity", self.sync.queue_capacity)?;
		validation::validate_capacity("pool_size", self.database.pool_size)?;
		validation::validate_seconds("op_timeout_secs", self.database.op_timeout_secs)?;
		validation::validate_seconds("save_interval_secs", self.sync.save_interval_secs)?;
		validation::check_range("max_binary_size_mb", self.sync.max_binary_size_mb, 1, u64::MAX / (1024 * 1024))?;
		Ok(())
	}
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SyncError> {
	value.trim().parse().map_err(|_| SyncError::InvalidConfig {
		message: format!("{} has invalid value '{}'", key, value),
	})
}

// ============================================================================
// PATH HELPERS
// ============================================================================

/// `$XDG_CONFIG_HOME/vaultsync`, or the platform equivalent
pub fn default_config_dir() -> PathBuf {
	dirs::config_dir()
		.or_else(|| dirs::home_dir().map(|h| h.join(".config")))
		.unwrap_or_else(|| PathBuf::from("."))
		.join(APP_NAME)
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references
pub fn expand_path(path: &Path) -> PathBuf {
	PathBuf::from(expand_str(&path.to_string_lossy(), |name| std::env::var(name).ok()))
}

/// String form of [`expand_path`] with an injectable variable lookup
pub fn expand_str<F>(input: &str, lookup: F) -> String
where
	F: Fn(&str) -> Option<String>,
{
	static VAR_RE: OnceLock<Option<Regex>> = OnceLock::new();

	let mut s = input.to_string();
	if s == "~" || s.starts_with("~/") {
		if let Some(home) = dirs::home_dir() {
			s = format!("{}{}", home.display(), &s[1..]);
		}
	}

	let re = VAR_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").ok());
	match re {
		Some(re) => re
			.replace_all(&s, |caps: &regex::Captures| {
				let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
				lookup(name).unwrap_or_default()
			})
			.into_owned(),
		None => s,
	}
}


// vim: ts=4
