// SPDX-License-Identifier: GPL-3.0-only
//! Collaborators the session manager drives. Production implementations live
//! in `process`, `timer`, `system`, `shell` and `service`.

use crate::{
	client::Client,
	error::LaunchError,
	inhibitor::{Inhibitor, InhibitorFlags},
	timer::Scheduler,
};

/// Everything needed to spawn one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest<'a> {
	/// Store id of the app, echoed back in process events.
	pub app: &'a str,
	pub argv: &'a [String],
	pub startup_id: &'a str,
	pub environment: &'a [(String, String)],
}

pub trait Launcher {
	/// Spawns the process and returns its pid. Exit and death are reported
	/// later as events.
	fn launch(&mut self, request: LaunchRequest<'_>) -> Result<u32, LaunchError>;
	/// Sends SIGTERM to a process started by [`Launcher::launch`].
	fn terminate(&mut self, pid: u32) -> Result<(), LaunchError>;
}

/// Action left to the display manager once the session process is gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoginManagerAction {
	#[default]
	None,
	Reboot,
	Shutdown,
}

pub trait System {
	fn can_shutdown(&self) -> bool;
	fn can_suspend(&self) -> bool;
	fn can_hibernate(&self) -> bool;
	/// Greeter sessions never save state and cannot log out from a failure.
	fn is_login_session(&self) -> bool;
	/// Asynchronous; a failure comes back as `Event::SystemRequestFailed`.
	fn attempt_stop(&mut self);
	/// Asynchronous; a failure comes back as `Event::SystemRequestFailed`.
	fn attempt_restart(&mut self);
	fn suspend(&mut self);
	fn hibernate(&mut self);
	fn switch_user(&mut self);
	fn set_idle_enabled(&mut self, enabled: bool);
	fn set_logout_action(&mut self, action: LoginManagerAction);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutDialogKind {
	Logout,
	Shutdown,
	Reboot,
}

/// What the user picked in the logout or shutdown confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutResponse {
	Cancel,
	Logout,
	Shutdown,
	Reboot,
	Suspend,
	Hibernate,
	SwitchUser,
}

/// Action held back by inhibitors while the inhibit dialog is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InhibitAction {
	Logout,
	SwitchUser,
	Hibernate,
	Suspend,
	Shutdown,
	Reboot,
}

pub trait Dialogs {
	fn open_logout(&mut self, kind: LogoutDialogKind);
	fn open_inhibit(&mut self, action: InhibitAction, inhibitors: Vec<String>);
	/// Raises the inhibit dialog that is already open.
	fn present_inhibit(&mut self, inhibitors: Vec<String>);
	fn close_inhibit(&mut self);
	/// Tells the user a required component failed.
	fn fail_whale(&mut self, allow_logout: bool);
}

/// Outward notifications about session state.
pub trait SessionSignals {
	fn session_running(&mut self);
	fn client_added(&mut self, client: &Client);
	fn client_removed(&mut self, id: &str);
	fn inhibitor_added(&mut self, inhibitor: &Inhibitor);
	fn inhibitor_removed(&mut self, id: &str);
	fn inhibited_actions_changed(&mut self, flags: InhibitorFlags);
}

pub struct Backends {
	pub launcher: Box<dyn Launcher>,
	pub scheduler: Box<dyn Scheduler>,
	pub system: Box<dyn System>,
	pub dialogs: Box<dyn Dialogs>,
	pub signals: Box<dyn SessionSignals>,
}
