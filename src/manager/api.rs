// SPDX-License-Identifier: GPL-3.0-only
//! Operations exposed to bus callers and to the confirmation dialogs.

use super::{LogoutMode, LogoutType, Manager};
use crate::{
	backend::{InhibitAction, LogoutDialogKind, LogoutResponse},
	client::{Client, ClientChannel, ClientKind, ClientStatus},
	error::ManagerError,
	ids,
	inhibitor::{self, Inhibitor, InhibitorFlags},
	phase::Phase,
	session_save::SavedClient,
};

impl Manager {
	/// Registers a client and returns its id. `channel` builds the callback
	/// channel once the id is known.
	pub fn register_client(
		&mut self,
		app_id: &str,
		startup_id: &str,
		kind: ClientKind,
		channel: impl FnOnce(&str) -> Box<dyn ClientChannel>,
	) -> Result<String, ManagerError> {
		debug!("register client: app id '{}' startup id '{}'", app_id, startup_id);
		if self.phase >= Phase::QueryEndSession {
			return Err(ManagerError::not_in_running("Unable to register client"));
		}
		if kind == ClientKind::Xsmp && startup_id.is_empty() && !self.accepting_new_clients {
			warn!("refusing new legacy client before the session is running");
			return Err(ManagerError::general("Unable to register client"));
		}

		let startup_id = if startup_id.is_empty() {
			ids::generate_startup_id()
		} else {
			startup_id.to_string()
		};
		if self
			.clients
			.find(|_, client| client.has_startup_id(&startup_id))
			.is_some()
		{
			debug!("a client with startup id '{}' is already registered", startup_id);
			return Err(ManagerError::AlreadyRegistered);
		}

		let mut app = self.find_app_for_startup_id(&startup_id);
		if app.is_none() && !app_id.is_empty() {
			app = self.find_app_for_app_id(app_id);
		}
		let app_id = app
			.as_deref()
			.and_then(|app| self.apps.lookup(app))
			.map_or(app_id, |app| app.app_id())
			.to_string();

		let id = self.ids.next_client();
		let mut client = Client::new(id.clone(), startup_id, kind, channel(&id));
		client.set_app_id(Some(app_id));
		client.set_status(ClientStatus::Registered);
		self.clients.add(id.clone(), client);

		if let Some(app) = app {
			self.app_registered(&app);
		}
		self.flush();
		Ok(id)
	}

	pub fn unregister_client(&mut self, id: &str) -> Result<(), ManagerError> {
		let client = self
			.clients
			.lookup_mut(id)
			.ok_or(ManagerError::NotRegistered)?;
		debug!("unregister client: {}", id);
		client.set_status(ClientStatus::Unregistered);
		Ok(())
	}

	/// Adds an inhibitor and returns its cookie.
	pub fn inhibit(
		&mut self,
		app_id: &str,
		toplevel_xid: u32,
		reason: &str,
		flags: u32,
		bus_name: Option<String>,
	) -> Result<u32, ManagerError> {
		debug!(
			"inhibit: app id '{}' xid {} reason '{}' flags {}",
			app_id, toplevel_xid, reason, flags
		);
		if self.logout_mode == LogoutMode::Force {
			return Err(ManagerError::general("Forced logout cannot be inhibited"));
		}
		if app_id.is_empty() {
			return Err(ManagerError::general("Application ID not specified"));
		}
		if reason.is_empty() {
			return Err(ManagerError::general("Reason not specified"));
		}
		let flags = InhibitorFlags::from_bits(flags);
		if flags.is_empty() {
			return Err(ManagerError::general("Invalid inhibit flags"));
		}

		let cookie = inhibitor::generate_unique_cookie(&self.inhibitors, &mut self.rng);
		let id = self.ids.next_inhibitor();
		let inhibitor = Inhibitor::new(
			id.clone(),
			app_id.to_string(),
			toplevel_xid,
			flags,
			reason.to_string(),
			bus_name,
			cookie,
		);
		self.inhibitors.add(id, inhibitor);
		self.flush();
		Ok(cookie)
	}

	pub fn uninhibit(&mut self, cookie: u32) -> Result<(), ManagerError> {
		debug!("uninhibit: {}", cookie);
		let removed = self
			.inhibitors
			.remove_where(|_, inhibitor| inhibitor.cookie() == cookie);
		if removed.is_empty() {
			return Err(ManagerError::general("Unable to uninhibit: Invalid cookie"));
		}
		self.flush();
		Ok(())
	}

	pub fn is_inhibited(&self, flags: u32) -> bool {
		let flags = InhibitorFlags::from_bits(flags);
		!flags.is_empty() && self.is_inhibited_by(flags)
	}

	pub fn get_clients(&self) -> Vec<String> {
		self.clients.ids()
	}

	pub fn get_inhibitors(&self) -> Vec<String> {
		self.inhibitors.ids()
	}

	pub fn is_autostart_condition_handled(&self, condition: &str) -> bool {
		self.apps
			.find(|_, app| app.has_autostart_condition(condition) && !app.is_disabled())
			.is_some()
	}

	fn check_running(&self, method: &str) -> Result<(), ManagerError> {
		if self.phase != Phase::Running {
			return Err(ManagerError::not_in_running(format!(
				"{} interface is only available during the Running phase",
				method
			)));
		}
		Ok(())
	}

	fn check_logout_allowed(&self) -> Result<(), ManagerError> {
		if self.settings.disable_log_out {
			return Err(ManagerError::LockedDown);
		}
		Ok(())
	}

	/// Asks the user to confirm a shutdown.
	pub fn shutdown(&mut self) -> Result<(), ManagerError> {
		debug!("shutdown called");
		self.check_running("Shutdown")?;
		self.check_logout_allowed()?;
		self.show_logout_dialog(LogoutDialogKind::Shutdown);
		Ok(())
	}

	/// Asks the user to confirm a reboot.
	pub fn reboot(&mut self) -> Result<(), ManagerError> {
		debug!("reboot called");
		self.check_running("Reboot")?;
		self.check_logout_allowed()?;
		self.show_logout_dialog(LogoutDialogKind::Reboot);
		Ok(())
	}

	pub fn can_shutdown(&self) -> bool {
		!self.settings.disable_log_out
			&& (self.system.can_shutdown() || self.system.can_suspend() || self.system.can_hibernate())
	}

	pub fn logout(&mut self, mode: u32) -> Result<(), ManagerError> {
		debug!("logout called with mode {}", mode);
		self.check_running("Logout")?;
		self.check_logout_allowed()?;
		let mode = LogoutMode::try_from(mode)?;
		self.user_logout(mode);
		Ok(())
	}

	/// Shuts down without asking for confirmation.
	pub fn request_shutdown(&mut self) -> Result<(), ManagerError> {
		debug!("request shutdown called");
		self.check_running("RequestShutdown")?;
		self.check_logout_allowed()?;
		self.request_end(LogoutType::ShutdownInteract);
		Ok(())
	}

	/// Reboots without asking for confirmation.
	pub fn request_reboot(&mut self) -> Result<(), ManagerError> {
		debug!("request reboot called");
		self.check_running("RequestReboot")?;
		self.check_logout_allowed()?;
		self.request_end(LogoutType::RebootInteract);
		Ok(())
	}

	pub fn is_session_running(&self) -> bool {
		self.phase == Phase::Running
	}

	fn show_logout_dialog(&mut self, kind: LogoutDialogKind) {
		if self.phase >= Phase::QueryEndSession {
			debug!("already shutting down, not showing the {:?} dialog", kind);
			return;
		}
		self.logout_mode = LogoutMode::Normal;
		self.dialogs.open_logout(kind);
	}

	fn user_logout(&mut self, mode: LogoutMode) {
		if self.phase >= Phase::QueryEndSession {
			debug!("already shutting down, ignoring logout request");
			return;
		}
		if mode == LogoutMode::Normal && self.settings.logout_prompt {
			self.show_logout_dialog(LogoutDialogKind::Logout);
		} else {
			self.request_logout(mode);
		}
	}

	fn request_logout(&mut self, mode: LogoutMode) {
		self.logout_mode = mode;
		self.request_end(LogoutType::Logout);
	}

	fn request_end(&mut self, logout_type: LogoutType) {
		info!("ending the session: {:?} ({:?})", logout_type, self.logout_mode);
		self.logout_type = Some(logout_type);
		self.end_phase();
	}

	pub fn request_suspend(&mut self) {
		if self.is_inhibited_by(InhibitorFlags::SUSPEND) {
			self.show_inhibit_dialog(InhibitAction::Suspend, InhibitorFlags::SUSPEND);
		} else {
			self.attempt_suspend();
		}
	}

	pub fn request_hibernate(&mut self) {
		if self.is_inhibited_by(InhibitorFlags::SUSPEND) {
			self.show_inhibit_dialog(InhibitAction::Hibernate, InhibitorFlags::SUSPEND);
		} else {
			self.attempt_hibernate();
		}
	}

	pub fn request_switch_user(&mut self) {
		if self.settings.disable_user_switching {
			warn!("unable to switch user: user switching has been locked down");
			return;
		}
		if self.is_inhibited_by(InhibitorFlags::SWITCH_USER) {
			self.show_inhibit_dialog(InhibitAction::SwitchUser, InhibitorFlags::SWITCH_USER);
		} else {
			self.system.switch_user();
		}
	}

	fn attempt_suspend(&mut self) {
		if self.system.can_suspend() {
			self.system.suspend();
		} else {
			warn!("suspend is not available");
		}
	}

	fn attempt_hibernate(&mut self) {
		if self.system.can_hibernate() {
			self.system.hibernate();
		} else {
			warn!("hibernate is not available");
		}
	}

	fn show_inhibit_dialog(&mut self, action: InhibitAction, flags: InhibitorFlags) {
		let inhibitors = self.inhibitor_ids_for(flags);
		if self.inhibit_dialog.is_some() {
			self.dialogs.present_inhibit(inhibitors);
			return;
		}
		self.inhibit_dialog = Some(action);
		self.dialogs.open_inhibit(action, inhibitors);
	}

	pub(super) fn logout_dialog_response(&mut self, response: LogoutResponse) {
		if self.phase != Phase::Running {
			debug!("ignoring logout dialog response outside the running phase");
			return;
		}
		debug!("logout dialog response: {:?}", response);
		match response {
			LogoutResponse::Cancel => {}
			LogoutResponse::Logout => self.request_logout(LogoutMode::NoConfirmation),
			LogoutResponse::Shutdown => self.request_end(LogoutType::Shutdown),
			LogoutResponse::Reboot => self.request_end(LogoutType::Reboot),
			LogoutResponse::Suspend => self.request_suspend(),
			LogoutResponse::Hibernate => self.request_hibernate(),
			LogoutResponse::SwitchUser => self.request_switch_user(),
		}
	}

	pub(super) fn inhibit_dialog_response(&mut self, accepted: bool) {
		let Some(action) = self.inhibit_dialog.take() else {
			debug!("inhibit dialog response without an open dialog");
			return;
		};
		debug!("inhibit dialog response for {:?}: accepted={}", action, accepted);

		let ends_session = matches!(
			action,
			InhibitAction::Logout | InhibitAction::Shutdown | InhibitAction::Reboot
		);
		if !accepted {
			if ends_session {
				self.cancel_end_session();
			}
			return;
		}

		match action {
			InhibitAction::SwitchUser => self.system.switch_user(),
			InhibitAction::Suspend => self.attempt_suspend(),
			InhibitAction::Hibernate => self.attempt_hibernate(),
			InhibitAction::Logout | InhibitAction::Shutdown | InhibitAction::Reboot => {
				if self.phase == Phase::QueryEndSession {
					self.logout_mode = LogoutMode::Force;
					self.end_phase();
				}
			}
		}
	}

	/// SIGTERM and SIGINT: a forced logout, or an immediate exit before the
	/// session is up.
	pub(super) fn terminate(&mut self) {
		info!("terminating the session in phase {}", self.phase);
		match self.phase {
			Phase::Startup
			| Phase::EarlyInitialization
			| Phase::PreDisplayServer
			| Phase::Initialization
			| Phase::WindowManager
			| Phase::Panel
			| Phase::Desktop
			| Phase::Application
			| Phase::Exit => self.quit = true,
			Phase::Running => {
				self.logout_mode = LogoutMode::Force;
				self.logout_type = Some(LogoutType::Logout);
				self.phase = Phase::QueryEndSession;
				self.start_phase();
			}
			Phase::QueryEndSession => {
				self.logout_mode = LogoutMode::Force;
				self.close_inhibit_dialog();
				self.end_phase();
			}
			Phase::EndSession => self.end_phase(),
		}
	}

	/// Adds or replaces a variable in the environment of launched components.
	pub fn setenv(&mut self, variable: &str, value: &str) -> Result<(), ManagerError> {
		if self.phase > Phase::Initialization {
			return Err(ManagerError::NotInInitialization(
				"Setenv interface is only available during the Initialization phase".into(),
			));
		}
		debug!("setenv {}={}", variable, value);
		match self.environment.iter_mut().find(|(name, _)| name == variable) {
			Some((_, current)) => *current = value.to_string(),
			None => self
				.environment
				.push((variable.to_string(), value.to_string())),
		}
		Ok(())
	}

	pub fn initialization_error(&mut self, message: &str, fatal: bool) -> Result<(), ManagerError> {
		if self.phase > Phase::Initialization {
			return Err(ManagerError::NotInInitialization(
				"InitializationError interface is only available during the Initialization phase"
					.into(),
			));
		}
		warn!("initialization error: {}", message);
		if fatal {
			let allow_logout = self.allow_logout_on_failure();
			self.dialogs.fail_whale(allow_logout);
		}
		Ok(())
	}

	pub fn client_stop(&mut self, id: &str) -> Result<(), ManagerError> {
		let client = self
			.clients
			.lookup(id)
			.ok_or_else(|| ManagerError::general("Unable to stop client: not registered"))?;
		client
			.stop()
			.map_err(|error| ManagerError::general(error.to_string()))
	}

	/// Writes the registered clients out for the next session, or clears the
	/// saved session when autosave is off.
	pub(super) fn maybe_save_session(&mut self) {
		if self.system.is_login_session() {
			return;
		}
		let Some(session_save) = &self.session_save else {
			return;
		};
		if !self.settings.autosave {
			if let Err(error) = session_save.clear() {
				warn!("failed to clear the saved session: {}", error);
			}
			return;
		}

		let clients: Vec<SavedClient> = self
			.clients
			.values()
			.filter_map(|client| {
				let app_id = client.app_id()?;
				let app = self
					.apps
					.find(|_, app| app.has_startup_id(client.startup_id()))
					.or_else(|| self.apps.find(|_, app| app.app_id() == app_id))?;
				if app.exec().is_empty() {
					return None;
				}
				Some(SavedClient {
					app_id: app_id.to_string(),
					startup_id: client.startup_id().to_string(),
					restart_style: client.restart_style_hint(),
					exec: app.exec().to_vec(),
				})
			})
			.collect();
		if let Err(error) = session_save.save(&clients) {
			warn!("failed to save the session: {}", error);
		}
	}
}
