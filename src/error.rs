// SPDX-License-Identifier: GPL-3.0-only
use std::io;
use thiserror::Error;

/// Errors returned synchronously to callers of the manager interface. None
/// of them leave any state behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
	#[error("{0}")]
	General(String),
	#[error("{0}")]
	NotInInitialization(String),
	#[error("{0}")]
	NotInRunning(String),
	#[error("Unable to register client: already registered")]
	AlreadyRegistered,
	#[error("Unable to unregister client: not registered")]
	NotRegistered,
	#[error("{0}")]
	InvalidOption(String),
	#[error("Logout has been locked down")]
	LockedDown,
}

impl ManagerError {
	pub fn general(message: impl Into<String>) -> Self {
		Self::General(message.into())
	}

	pub fn not_in_running(message: impl Into<String>) -> Self {
		Self::NotInRunning(message.into())
	}
}

#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("component '{0}' has no command to run")]
	NoCommand(String),
	#[error("failed to launch '{command}': {source}")]
	Spawn {
		command: String,
		#[source]
		source: io::Error,
	},
	#[error("component '{0}' crashing too quickly")]
	RestartLimit(String),
	#[error("component '{0}' is not running")]
	NotRunning(String),
	#[error("failed to stop process {pid}: {source}")]
	Kill {
		pid: u32,
		#[source]
		source: io::Error,
	},
}

/// Failure to deliver a callback to a single client. Logged by the manager,
/// never fatal for the phase in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
	#[error("client '{0}' is not registered")]
	NotRegistered(String),
	#[error("client '{id}' is unreachable: {reason}")]
	Unreachable { id: String, reason: String },
}
