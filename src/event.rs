// SPDX-License-Identifier: GPL-3.0-only
use crate::{
	backend::{LoginManagerAction, LogoutResponse},
	manager::Manager,
	timer::TimerId,
};

pub type Call = Box<dyn FnOnce(&mut Manager) + Send>;

/// Everything that can drive the session manager. Events are handled one at
/// a time, to completion.
pub enum Event {
	/// A method call from a bus client.
	Call(Call),
	Timer(TimerId),
	ProcessExited {
		app: String,
		pid: u32,
		code: i32,
	},
	ProcessDied {
		app: String,
		pid: u32,
		signal: i32,
	},
	/// A bus name lost its owner.
	NameVanished(String),
	ConditionChanged {
		app: String,
		value: bool,
	},
	LogoutResponse(LogoutResponse),
	InhibitResponse {
		accepted: bool,
	},
	SystemRequestFailed(LoginManagerAction),
	/// SIGTERM, SIGINT, or a logout picked from the failure notification.
	Terminate,
}
