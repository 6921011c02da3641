// SPDX-License-Identifier: GPL-3.0-only
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::{
	fs, io,
	path::{Path, PathBuf},
};
use thiserror::Error;

const CONFIG_DIR: &str = "session-manager";
const CONFIG_FILE: &str = "session.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Ask for confirmation on a normal logout.
	pub logout_prompt: bool,
	/// Save registered clients when the session ends.
	pub autosave: bool,
	pub disable_log_out: bool,
	pub disable_user_switching: bool,
	/// Components whose id contains any of these are never loaded.
	pub blacklist: Vec<String>,
	pub systemd_target: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			logout_prompt: true,
			autosave: false,
			disable_log_out: false,
			disable_user_switching: false,
			blacklist: Vec::new(),
			systemd_target: None,
		}
	}
}

impl Settings {
	pub fn is_blacklisted(&self, id: &str) -> bool {
		self.blacklist
			.iter()
			.any(|entry| !entry.is_empty() && id.contains(entry.as_str()))
	}
}

/// Static description of one session component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
	pub id: String,
	pub app_id: String,
	pub exec: Vec<String>,
	pub phase: Phase,
	pub autorestart: bool,
	/// Seconds to wait before starting.
	pub autostart_delay: u32,
	pub provides: Vec<String>,
	pub required: bool,
	pub enabled: bool,
	/// `if-exists <file>` or `unless-exists <file>`, relative to the user
	/// config directory.
	pub condition: Option<String>,
}

impl Default for ComponentConfig {
	fn default() -> Self {
		Self {
			id: String::new(),
			app_id: String::new(),
			exec: Vec::new(),
			phase: Phase::Application,
			autorestart: false,
			autostart_delay: 0,
			provides: Vec::new(),
			required: false,
			enabled: true,
			condition: None,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
	pub settings: Settings,
	#[serde(rename = "component")]
	pub components: Vec<ComponentConfig>,
}

impl SessionConfig {
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(path, &contents)
	}

	/// Loads `path`, treating a missing file as an empty session.
	pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
		match Self::load(path) {
			Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
				warn!("no session file at {}, starting an empty session", path.display());
				Ok(Self::default())
			}
			result => result,
		}
	}

	fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
		toml::from_str(contents).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}
}
