// SPDX-License-Identifier: GPL-3.0-only
use crate::{client::RestartStyle, config::ComponentConfig, phase::Phase};
use serde::{Deserialize, Serialize};
use std::{
	fs, io,
	path::{Path, PathBuf},
};
use thiserror::Error;

const SAVED_SESSION_FILE: &str = "saved-session.toml";
const TEMPORARY_FILE: &str = ".saved-session.toml.tmp";

#[derive(Debug, Error)]
pub enum SaveError {
	#[error("failed to access {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to serialize saved session: {0}")]
	Serialize(#[from] toml::ser::Error),
	#[error("failed to parse {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
}

/// One registered client as remembered across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedClient {
	pub app_id: String,
	pub startup_id: String,
	pub restart_style: RestartStyle,
	pub exec: Vec<String>,
}

impl SavedClient {
	/// Component that relaunches this client in the application phase.
	pub fn to_component(&self) -> ComponentConfig {
		ComponentConfig {
			id: format!("saved-{}", self.app_id),
			app_id: self.app_id.clone(),
			exec: self.exec.clone(),
			phase: Phase::Application,
			..ComponentConfig::default()
		}
	}
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedSession {
	#[serde(default, rename = "client")]
	clients: Vec<SavedClient>,
}

#[derive(Debug, Clone)]
pub struct SessionSave {
	dir: PathBuf,
}

impl SessionSave {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn path(&self) -> PathBuf {
		self.dir.join(SAVED_SESSION_FILE)
	}

	/// Replaces the saved session. The file is written next to its final
	/// location and renamed over it.
	pub fn save(&self, clients: &[SavedClient]) -> Result<(), SaveError> {
		let contents = toml::to_string(&SavedSession {
			clients: clients.to_vec(),
		})?;
		fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))?;
		let temporary = self.dir.join(TEMPORARY_FILE);
		fs::write(&temporary, contents).map_err(|source| io_error(&temporary, source))?;
		let path = self.path();
		fs::rename(&temporary, &path).map_err(|source| io_error(&path, source))?;
		debug!("saved {} clients to {}", clients.len(), path.display());
		Ok(())
	}

	pub fn clear(&self) -> Result<(), SaveError> {
		let path = self.path();
		match fs::remove_file(&path) {
			Err(source) if source.kind() != io::ErrorKind::NotFound => Err(io_error(&path, source)),
			_ => Ok(()),
		}
	}

	/// Clients of the last saved session, empty when nothing was saved.
	pub fn load(&self) -> Result<Vec<SavedClient>, SaveError> {
		let path = self.path();
		let contents = match fs::read_to_string(&path) {
			Ok(contents) => contents,
			Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(source) => return Err(io_error(&path, source)),
		};
		let session: SavedSession =
			toml::from_str(&contents).map_err(|source| SaveError::Parse { path, source })?;
		Ok(session.clients)
	}
}

fn io_error(path: &Path, source: io::Error) -> SaveError {
	SaveError::Io {
		path: path.to_path_buf(),
		source,
	}
}
