// SPDX-License-Identifier: GPL-3.0-only
use super::{LogoutType, Manager, PHASE_TIMEOUT};
use crate::{backend::LoginManagerAction, client::EndSessionResponse, phase::Phase};
use std::time::Duration;

impl Manager {
	/// Clears everything that only lives for the duration of one phase.
	fn reset_phase_state(&mut self) {
		self.pending_apps.clear();
		self.query_clients.clear();
		self.next_query_clients.clear();
		self.end_session_part_two = false;
		self.cancel_query_timer();
		self.cancel_phase_timer();
	}

	pub(super) fn start_phase(&mut self) {
		debug!("starting phase {}", self.phase);
		self.reset_phase_state();

		match self.phase {
			Phase::Startup
			| Phase::EarlyInitialization
			| Phase::PreDisplayServer
			| Phase::Initialization
			| Phase::WindowManager
			| Phase::Panel
			| Phase::Desktop
			| Phase::Application => self.do_phase_startup(),
			Phase::Running => {
				self.accepting_new_clients = true;
				self.signals.session_running();
				self.update_idle();
			}
			Phase::QueryEndSession => {
				self.accepting_new_clients = false;
				self.do_phase_query_end_session();
			}
			Phase::EndSession => self.do_phase_end_session(),
			Phase::Exit => self.do_phase_exit(),
		}
	}

	/// Leaves the current phase and starts the next one, unless the session
	/// is locked into running or has reached its end.
	pub(super) fn end_phase(&mut self) {
		debug!("ending phase {}", self.phase);
		self.reset_phase_state();

		let start_next_phase = match self.phase {
			Phase::Startup
			| Phase::EarlyInitialization
			| Phase::PreDisplayServer
			| Phase::Initialization
			| Phase::WindowManager
			| Phase::Panel
			| Phase::Desktop
			| Phase::Application => true,
			Phase::Running => {
				if self.settings.disable_log_out {
					warn!("unable to logout: logout has been locked down");
					false
				} else {
					true
				}
			}
			Phase::QueryEndSession => {
				self.close_inhibit_dialog();
				true
			}
			Phase::EndSession => {
				self.maybe_save_session();
				true
			}
			Phase::Exit => {
				self.quit_session();
				false
			}
		};

		if start_next_phase {
			if let Some(next) = self.phase.next() {
				self.phase = next;
				self.start_phase();
			}
		}
	}

	fn do_phase_startup(&mut self) {
		let phase = self.phase;
		let ids: Vec<String> = self
			.apps
			.values()
			.filter(|app| app.phase() == phase)
			.map(|app| app.id().to_string())
			.collect();
		for id in ids {
			self.start_app_for_phase(&id);
		}

		if self.pending_apps.is_empty() {
			self.end_phase();
		} else if self.phase < Phase::Application {
			self.phase_timer = Some(self.scheduler.schedule(PHASE_TIMEOUT));
		}
	}

	fn start_app_for_phase(&mut self, id: &str) {
		let Some(app) = self.apps.lookup(id) else {
			return;
		};
		if app.is_disabled() || app.is_conditionally_disabled() {
			debug!("skipping disabled app '{}'", id);
			return;
		}

		let delay = app.autostart_delay();
		if delay > 0 {
			let timer = self.scheduler.schedule(Duration::from_secs(delay.into()));
			self.delayed_starts.insert(timer, id.to_string());
			debug!("'{}' is scheduled to start in {} seconds", id, delay);
			return;
		}

		if !self.start_app_or_warn(id) {
			return;
		}

		if self.phase < Phase::Application {
			if let Some(app) = self.apps.lookup_mut(id) {
				app.set_monitored();
			}
			self.pending_apps.push(id.to_string());
		}
	}

	fn do_phase_exit(&mut self) {
		for client in self.clients.values() {
			if let Err(error) = client.stop() {
				warn!("unable to stop client: {}", error);
			}
		}
		self.end_phase();
	}

	pub(super) fn start_app_or_warn(&mut self, id: &str) -> bool {
		let Some(app) = self.apps.lookup_mut(id) else {
			return false;
		};
		debug!("starting app '{}'", id);
		match app.start(self.launcher.as_mut(), &self.environment) {
			Ok(()) => true,
			Err(error) => {
				warn!("failed to start app: {}", error);
				false
			}
		}
	}

	pub(super) fn delayed_start(&mut self, id: &str) {
		let Some(app) = self.apps.lookup(id) else {
			return;
		};
		if app.is_disabled() || app.is_conditionally_disabled() {
			return;
		}
		self.start_app_or_warn(id);
	}

	pub(super) fn phase_timeout(&mut self) {
		match self.phase {
			Phase::Startup
			| Phase::EarlyInitialization
			| Phase::PreDisplayServer
			| Phase::Initialization
			| Phase::WindowManager
			| Phase::Panel
			| Phase::Desktop
			| Phase::Application => {
				for id in self.pending_apps.clone() {
					let app_id = self.apps.lookup(&id).map_or(id.as_str(), |app| app.app_id());
					warn!("application '{}' failed to register before timeout", app_id);
					if self.is_app_required(&id) {
						self.on_required_app_failure(&id);
					}
				}
				self.end_phase();
			}
			Phase::Running => {}
			Phase::QueryEndSession => {
				if self.inhibit_dialog.is_some() {
					debug!("query phase timed out while the inhibit dialog is up");
					return;
				}
				self.query_clients.clear();
				self.query_end_session_complete();
			}
			Phase::EndSession | Phase::Exit => self.end_phase(),
		}
	}

	/// Removes `id` from the pending set of the current startup phase and
	/// moves on once nothing is pending anymore.
	fn app_event_during_startup(&mut self, id: &str) {
		if self.phase >= Phase::Application {
			return;
		}
		let pending = self.pending_apps.len();
		self.pending_apps.retain(|pending| pending != id);
		if self.pending_apps.len() == pending {
			return;
		}
		if self.pending_apps.is_empty() {
			self.cancel_phase_timer();
			self.end_phase();
		}
	}

	fn restart_app(&mut self, id: &str) {
		let now = self.scheduler.now();
		let Some(app) = self.apps.lookup_mut(id) else {
			return;
		};
		if let Err(error) = app.restart(self.launcher.as_mut(), &self.environment, now) {
			if self.is_app_required(id) {
				self.on_required_app_failure(id);
			} else {
				warn!("error restarting session managed app: {}", error);
			}
			self.app_event_during_startup(id);
		}
	}

	pub(super) fn app_exited(&mut self, id: &str, pid: u32, code: i32) {
		let Some(app) = self.apps.lookup_mut(id) else {
			debug!("exit of unknown app '{}'", id);
			return;
		};
		if !app.process_ended(pid) {
			debug!("ignoring exit of replaced process {} of '{}'", pid, id);
			return;
		}
		debug!("app '{}' exited with {}", id, code);
		if !app.is_monitored() {
			return;
		}
		let autorestart = app.autorestart();

		if code != 0 && self.is_app_required(id) {
			if autorestart {
				debug!("component '{}' is autorestart, ignoring non-successful exit", id);
				return;
			}
			if self.phase >= Phase::QueryEndSession {
				debug!("in shutdown, not restarting '{}'", id);
				return;
			}
			self.restart_app(id);
		} else {
			self.app_event_during_startup(id);
		}
	}

	pub(super) fn app_died(&mut self, id: &str, pid: u32, signal: i32) {
		let Some(app) = self.apps.lookup_mut(id) else {
			return;
		};
		if !app.process_ended(pid) {
			return;
		}
		warn!("application '{}' killed by signal {}", app.app_id(), signal);
		if !app.is_monitored() {
			return;
		}
		if app.autorestart() {
			debug!("component '{}' is autorestart, ignoring died signal", id);
			return;
		}
		if self.phase >= Phase::QueryEndSession {
			debug!("in shutdown, not restarting '{}'", id);
			return;
		}
		self.restart_app(id);
	}

	pub(super) fn app_registered(&mut self, id: &str) {
		debug!("app '{}' registered", id);
		if self.apps.lookup(id).is_some_and(|app| app.is_monitored()) {
			self.app_event_during_startup(id);
		}
	}

	pub(super) fn app_condition_changed(&mut self, id: &str, value: bool) {
		let phase = self.phase;
		let Some(app) = self.apps.lookup_mut(id) else {
			return;
		};
		if !app.set_condition(value) {
			return;
		}
		debug!("app '{}' condition changed: {}", id, value);
		if app.phase() > phase {
			return;
		}

		let startup_id = app.startup_id().to_string();
		let running = app.is_running();
		let client = self
			.clients
			.find(|_, client| client.has_startup_id(&startup_id))
			.map(|client| client.id().to_string());

		if value {
			if !running && client.is_none() {
				self.start_app_or_warn(id);
			} else {
				debug!("not starting '{}': still running", id);
			}
		} else if let Some(client) = client {
			debug!("stopping client {} of app '{}'", client, id);
			self.condition_clients.insert(client.clone());
			if let Some(Err(error)) = self.clients.lookup(&client).map(|client| client.stop()) {
				warn!("not able to stop app client from its condition: {}", error);
			}
		} else if running {
			debug!("stopping app '{}'", id);
			if let Some(Err(error)) = self
				.apps
				.lookup_mut(id)
				.map(|app| app.stop(self.launcher.as_mut()))
			{
				warn!("not able to stop app from its condition: {}", error);
			}
		}
	}

	/// Tears down a client whose connection is gone.
	fn disconnect_client(&mut self, id: &str) {
		let Some(mut client) = self.clients.remove(id) else {
			return;
		};
		debug!("disconnect client: {}", id);
		client.set_status(crate::client::ClientStatus::Finished);
		let is_condition_client = self.condition_clients.remove(id);
		self.inhibitors
			.remove_where(|_, inhibitor| inhibitor.client_id() == Some(id));

		let mut app = None;
		if !client.startup_id().is_empty() {
			app = self.find_app_for_startup_id(client.startup_id());
		}
		if app.is_none() {
			if let Some(app_id) = client.app_id() {
				debug!("disconnect for app '{}'", app_id);
				app = self.find_app_for_app_id(app_id);
			}
		}

		if matches!(self.phase, Phase::QueryEndSession | Phase::EndSession) {
			self.next_query_clients.retain(|pending| pending != id);
			self.handle_end_session_response(id, EndSessionResponse::ok());
		}

		let Some(app) = app else {
			debug!("unable to find application for client, not restarting");
			return;
		};
		if self.phase >= Phase::QueryEndSession {
			debug!("in shutdown, not restarting application");
			return;
		}
		let autorestart = self.apps.lookup(&app).is_some_and(|app| app.autorestart());
		if !autorestart && client.restart_style_hint() != crate::client::RestartStyle::Immediately {
			debug!("autorestart not set, not restarting application");
			return;
		}
		if is_condition_client {
			debug!("app conditionally disabled, not restarting application");
			return;
		}
		debug!("restarting app '{}'", app);
		self.restart_app(&app);
	}

	/// Called when the transport reports that a client went away.
	pub fn client_disconnected(&mut self, id: &str) {
		let phase = self.phase;
		self.disconnect_client(id);
		self.end_phase_if_last_client_gone(phase);
		self.flush();
	}

	pub(super) fn name_vanished(&mut self, name: &str) {
		let clients: Vec<String> = self
			.clients
			.iter()
			.filter(|(_, client)| client.bus_name() == Some(name))
			.map(|(id, _)| id.to_string())
			.collect();
		for id in clients {
			self.client_disconnected(&id);
		}

		let removed = self
			.inhibitors
			.remove_where(|_, inhibitor| inhibitor.bus_name() == Some(name));
		for inhibitor in removed {
			debug!(
				"removed inhibitor from {} for reason '{}' on connection {}",
				inhibitor.app_id(),
				inhibitor.reason(),
				name
			);
		}
	}

	fn end_phase_if_last_client_gone(&mut self, phase: Phase) {
		if self.phase == phase
			&& matches!(phase, Phase::QueryEndSession | Phase::EndSession)
			&& self.clients.is_empty()
		{
			debug!("last client disconnected, ending phase");
			self.end_phase();
		}
	}

	pub(super) fn find_app_for_startup_id(&self, startup_id: &str) -> Option<String> {
		if self.phase < Phase::Application {
			self.pending_apps
				.iter()
				.find(|id| {
					self.apps
						.lookup(id)
						.is_some_and(|app| app.has_startup_id(startup_id))
				})
				.cloned()
		} else {
			self.apps
				.find(|_, app| app.has_startup_id(startup_id))
				.map(|app| app.id().to_string())
		}
	}

	pub(super) fn find_app_for_app_id(&self, app_id: &str) -> Option<String> {
		self.apps
			.find(|_, app| app.app_id() == app_id)
			.map(|app| app.id().to_string())
	}

	/// Performs the action the session was ended for.
	fn quit_session(&mut self) {
		match self.logout_type.unwrap_or(LogoutType::Logout) {
			LogoutType::Logout => self.quit = true,
			LogoutType::Reboot | LogoutType::RebootInteract => {
				warn!("requesting system restart");
				self.system.set_logout_action(LoginManagerAction::None);
				self.system.attempt_restart();
			}
			LogoutType::RebootViaLoginManager => {
				self.system.set_logout_action(LoginManagerAction::Reboot);
				self.quit = true;
			}
			LogoutType::Shutdown | LogoutType::ShutdownInteract => {
				warn!("requesting system shutdown");
				self.system.set_logout_action(LoginManagerAction::None);
				self.system.attempt_stop();
			}
			LogoutType::ShutdownViaLoginManager => {
				self.system.set_logout_action(LoginManagerAction::Shutdown);
				self.quit = true;
			}
		}
	}

	pub(super) fn system_request_failed(&mut self, action: LoginManagerAction) {
		warn!("using a login manager action ({:?}) to end the session", action);
		self.logout_type = match action {
			LoginManagerAction::Reboot => Some(LogoutType::RebootViaLoginManager),
			LoginManagerAction::Shutdown => Some(LogoutType::ShutdownViaLoginManager),
			LoginManagerAction::None => Some(LogoutType::Logout),
		};
		self.quit_session();
	}
}
