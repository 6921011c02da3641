// SPDX-License-Identifier: GPL-3.0-only
//! The session state machine.
//!
//! A single [`Manager`] owns every client, app and inhibitor of the session
//! and is only ever touched from the event loop, one [`Event`] at a time.

mod api;
mod negotiation;
mod startup;
#[cfg(test)]
mod tests;

use crate::{
	app::App,
	backend::{Backends, Dialogs, InhibitAction, Launcher, SessionSignals, System},
	client::Client,
	config::{ComponentConfig, Settings},
	error::ManagerError,
	event::Event,
	ids::ObjectIds,
	inhibitor::{self, Inhibitor, InhibitorFlags},
	phase::Phase,
	session_save::SessionSave,
	store::{Store, StoreEvent},
	timer::{Scheduler, TimerId},
};
use rand::{rngs::StdRng, SeedableRng};
use std::{
	collections::{HashMap, HashSet},
	path::Path,
	time::Duration,
};

/// Hard limit for every phase that waits on other processes.
pub const PHASE_TIMEOUT: Duration = Duration::from_secs(30);
/// How long clients get to answer a query before being shown as blocking.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogoutMode {
	/// Prompt according to the user's settings.
	#[default]
	Normal,
	NoConfirmation,
	/// Cannot be inhibited and never prompts.
	Force,
}

impl TryFrom<u32> for LogoutMode {
	type Error = ManagerError;

	fn try_from(mode: u32) -> Result<Self, Self::Error> {
		match mode {
			0 => Ok(LogoutMode::Normal),
			1 => Ok(LogoutMode::NoConfirmation),
			2 => Ok(LogoutMode::Force),
			_ => Err(ManagerError::InvalidOption("Unknown logout mode flag".into())),
		}
	}
}

/// What happens to the machine once the session has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutType {
	Logout,
	Reboot,
	RebootInteract,
	RebootViaLoginManager,
	Shutdown,
	ShutdownInteract,
	ShutdownViaLoginManager,
}

impl LogoutType {
	fn inhibit_action(self) -> InhibitAction {
		match self {
			LogoutType::Logout => InhibitAction::Logout,
			LogoutType::Reboot | LogoutType::RebootInteract | LogoutType::RebootViaLoginManager => {
				InhibitAction::Reboot
			}
			LogoutType::Shutdown
			| LogoutType::ShutdownInteract
			| LogoutType::ShutdownViaLoginManager => InhibitAction::Shutdown,
		}
	}
}

pub struct Manager {
	phase: Phase,
	settings: Settings,
	failsafe: bool,

	clients: Store<Client>,
	apps: Store<App>,
	inhibitors: Store<Inhibitor>,
	required_apps: HashSet<String>,

	/// Apps of the current startup phase that have neither registered nor
	/// exited yet.
	pending_apps: Vec<String>,
	/// Clients that still owe an answer in the current end-session round.
	query_clients: Vec<String>,
	/// Clients that asked to be asked again last.
	next_query_clients: Vec<String>,
	end_session_part_two: bool,
	/// Clients stopped because their app's condition became false.
	condition_clients: HashSet<String>,

	phase_timer: Option<TimerId>,
	query_timer: Option<TimerId>,
	delayed_starts: HashMap<TimerId, String>,

	logout_mode: LogoutMode,
	logout_type: Option<LogoutType>,
	inhibited_actions: InhibitorFlags,
	accepting_new_clients: bool,
	inhibit_dialog: Option<InhibitAction>,
	environment: Vec<(String, String)>,
	quit: bool,

	ids: ObjectIds,
	rng: StdRng,
	launcher: Box<dyn Launcher>,
	scheduler: Box<dyn Scheduler>,
	system: Box<dyn System>,
	dialogs: Box<dyn Dialogs>,
	signals: Box<dyn SessionSignals>,
	session_save: Option<SessionSave>,
}

impl Manager {
	pub fn new(settings: Settings, backends: Backends) -> Self {
		Self {
			phase: Phase::Startup,
			settings,
			failsafe: false,
			clients: Store::new(),
			apps: Store::new(),
			inhibitors: Store::new(),
			required_apps: HashSet::new(),
			pending_apps: Vec::new(),
			query_clients: Vec::new(),
			next_query_clients: Vec::new(),
			end_session_part_two: false,
			condition_clients: HashSet::new(),
			phase_timer: None,
			query_timer: None,
			delayed_starts: HashMap::new(),
			logout_mode: LogoutMode::Normal,
			logout_type: None,
			inhibited_actions: InhibitorFlags::empty(),
			accepting_new_clients: false,
			inhibit_dialog: None,
			environment: Vec::new(),
			quit: false,
			ids: ObjectIds::default(),
			rng: StdRng::from_entropy(),
			launcher: backends.launcher,
			scheduler: backends.scheduler,
			system: backends.system,
			dialogs: backends.dialogs,
			signals: backends.signals,
			session_save: None,
		}
	}

	pub fn with_session_save(mut self, session_save: SessionSave) -> Self {
		self.session_save = Some(session_save);
		self
	}

	/// Only required components are loaded in failsafe mode.
	pub fn set_failsafe(&mut self, failsafe: bool) {
		self.failsafe = failsafe;
	}

	pub fn should_quit(&self) -> bool {
		self.quit
	}

	pub fn client(&self, id: &str) -> Option<&Client> {
		self.clients.lookup(id)
	}

	/// Apps whose autostart condition needs watching, with the raw condition.
	pub fn watched_conditions(&self) -> Vec<(String, String)> {
		self.apps
			.values()
			.filter(|app| !app.is_disabled())
			.filter_map(|app| Some((app.id().to_string(), app.condition()?.to_string())))
			.collect()
	}

	/// Loads the session's components. `config_dir` anchors file-based
	/// autostart conditions.
	pub fn fill(&mut self, components: &[ComponentConfig], config_dir: &Path) {
		for component in components {
			if self.failsafe && !component.required {
				debug!("failsafe session, skipping '{}'", component.id);
				continue;
			}
			self.add_autostart_app(component, config_dir);
		}
		self.flush();
	}

	/// Adds one component to the session. Returns `false` when it was
	/// dropped, in which case an app already playing its role inherits its
	/// provided services and required mark.
	pub fn add_autostart_app(&mut self, component: &ComponentConfig, config_dir: &Path) -> bool {
		let id = component.id.as_str();
		if id.is_empty() {
			debug!("not adding app: no id");
			return false;
		}
		if self.settings.is_blacklisted(id) {
			debug!("not adding app '{}': blacklisted", id);
			return false;
		}

		for service in &component.provides {
			let duplicate = self
				.apps
				.find(|_, app| app.provides(service))
				.map(|app| app.id().to_string());
			if let Some(duplicate) = duplicate {
				debug!("service '{}' is already provided by '{}'", service, duplicate);
				if component.required {
					self.mark_required(&duplicate);
				}
				return false;
			}
		}

		if self.apps.contains(id) {
			debug!("not adding app '{}': already added", id);
			return false;
		}
		if component.app_id.is_empty() {
			debug!("not adding app '{}': no app id", id);
			return false;
		}

		let duplicate = self
			.apps
			.find_mut(|_, app| app.app_id() == component.app_id);
		if let Some(duplicate) = duplicate {
			debug!("not adding app: app id '{}' already exists", component.app_id);
			duplicate.add_provides(&component.provides);
			let duplicate = duplicate.id().to_string();
			if component.required {
				self.mark_required(&duplicate);
			}
			return false;
		}

		let mut app = App::new(component);
		app.evaluate_condition(config_dir);
		self.apps.add(id, app);
		if component.required {
			self.mark_required(id);
		}
		true
	}

	fn mark_required(&mut self, id: &str) {
		if self.required_apps.insert(id.to_string()) {
			debug!("app '{}' is required", id);
		}
	}

	fn is_app_required(&self, id: &str) -> bool {
		self.required_apps.contains(id)
	}

	/// Begins managing the session from its first phase.
	pub fn start(&mut self) {
		info!("starting to manage the session");
		for app in self.apps.values() {
			debug!(
				"app '{}' phase {} disabled={} conditionally-disabled={}",
				app.id(),
				app.phase(),
				app.is_disabled(),
				app.is_conditionally_disabled()
			);
		}
		self.phase = Phase::Startup;
		self.start_phase();
		self.flush();
	}

	pub fn handle(&mut self, event: Event) {
		match event {
			Event::Call(call) => call(self),
			Event::Timer(timer) => self.timer_expired(timer),
			Event::ProcessExited { app, pid, code } => self.app_exited(&app, pid, code),
			Event::ProcessDied { app, pid, signal } => self.app_died(&app, pid, signal),
			Event::NameVanished(name) => self.name_vanished(&name),
			Event::ConditionChanged { app, value } => self.app_condition_changed(&app, value),
			Event::LogoutResponse(response) => self.logout_dialog_response(response),
			Event::InhibitResponse { accepted } => self.inhibit_dialog_response(accepted),
			Event::SystemRequestFailed(action) => self.system_request_failed(action),
			Event::Terminate => self.terminate(),
		}
		self.flush();
	}

	fn timer_expired(&mut self, timer: TimerId) {
		self.scheduler.cancel(timer);
		if self.phase_timer == Some(timer) {
			self.phase_timer = None;
			self.phase_timeout();
		} else if self.query_timer == Some(timer) {
			self.query_timer = None;
			self.query_timeout();
		} else if let Some(app) = self.delayed_starts.remove(&timer) {
			self.delayed_start(&app);
		} else {
			debug!("ignoring stale timer {:?}", timer);
		}
	}

	fn cancel_phase_timer(&mut self) {
		if let Some(timer) = self.phase_timer.take() {
			self.scheduler.cancel(timer);
		}
	}

	fn cancel_query_timer(&mut self) {
		if let Some(timer) = self.query_timer.take() {
			self.scheduler.cancel(timer);
		}
	}

	/// Delivers the change notifications queued by the stores.
	fn flush(&mut self) {
		for event in self.apps.drain_events() {
			trace!("app store: {:?}", event);
		}
		for event in self.clients.drain_events() {
			match event {
				StoreEvent::Added(id) => {
					debug!("client added: {}", id);
					if let Some(client) = self.clients.lookup(&id) {
						self.signals.client_added(client);
					}
				}
				StoreEvent::Removed(id) => {
					debug!("client removed: {}", id);
					self.signals.client_removed(&id);
				}
			}
		}
		for event in self.inhibitors.drain_events() {
			match event {
				StoreEvent::Added(id) => {
					debug!("inhibitor added: {}", id);
					let Some(inhibitor) = self.inhibitors.lookup(&id) else {
						continue;
					};
					let flags = self.inhibited_actions | inhibitor.flags();
					self.signals.inhibitor_added(inhibitor);
					self.update_inhibited_actions(flags);
				}
				StoreEvent::Removed(id) => {
					debug!("inhibitor removed: {}", id);
					self.signals.inhibitor_removed(&id);
					self.update_inhibited_actions(inhibitor::collect_flags(&self.inhibitors));
				}
			}
			self.update_idle();
		}
	}

	fn update_inhibited_actions(&mut self, flags: InhibitorFlags) {
		if self.inhibited_actions == flags {
			return;
		}
		debug!("new inhibited actions: {}", flags);
		self.inhibited_actions = flags;
		self.signals.inhibited_actions_changed(flags);
	}

	fn is_inhibited_by(&self, flags: InhibitorFlags) -> bool {
		self.inhibitors
			.find(|_, inhibitor| inhibitor.flags().intersects(flags))
			.is_some()
	}

	fn is_logout_inhibited(&self) -> bool {
		self.logout_mode != LogoutMode::Force && self.is_inhibited_by(InhibitorFlags::LOGOUT)
	}

	fn update_idle(&mut self) {
		let idle_inhibited = self.is_inhibited_by(InhibitorFlags::IDLE);
		self.system.set_idle_enabled(!idle_inhibited);
	}

	fn inhibitor_ids_for(&self, flags: InhibitorFlags) -> Vec<String> {
		self.inhibitors
			.iter()
			.filter(|(_, inhibitor)| inhibitor.flags().intersects(flags))
			.map(|(id, _)| id.to_string())
			.collect()
	}

	fn close_inhibit_dialog(&mut self) {
		if self.inhibit_dialog.take().is_some() {
			self.dialogs.close_inhibit();
		}
	}

	fn allow_logout_on_failure(&self) -> bool {
		!self.system.is_login_session() && !self.settings.disable_log_out
	}

	fn on_required_app_failure(&mut self, id: &str) {
		error!("required component '{}' failed", id);
		let allow_logout = self.allow_logout_on_failure();
		self.dialogs.fail_whale(allow_logout);
	}
}

/// Read access for tests.
#[cfg(test)]
impl Manager {
	pub fn phase(&self) -> Phase {
		self.phase
	}

	pub fn logout_mode(&self) -> LogoutMode {
		self.logout_mode
	}

	pub fn logout_type(&self) -> Option<LogoutType> {
		self.logout_type
	}

	pub fn inhibited_actions(&self) -> InhibitorFlags {
		self.inhibited_actions
	}

	pub fn app(&self, id: &str) -> Option<&App> {
		self.apps.lookup(id)
	}

	pub fn inhibitor(&self, id: &str) -> Option<&Inhibitor> {
		self.inhibitors.lookup(id)
	}
}
