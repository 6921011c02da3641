// SPDX-License-Identifier: GPL-3.0-only
use crate::{
	backend::{LaunchRequest, Launcher},
	config::ComponentConfig,
	error::LaunchError,
	event::Event,
	ids,
	phase::Phase,
};
use std::{
	path::{Path, PathBuf},
	time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Minimum time between two restarts of the same component.
pub const RESTART_RATE_LIMIT: Duration = Duration::from_secs(60);
const CONDITION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Parsed autostart condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
	IfExists(String),
	UnlessExists(String),
}

impl Condition {
	/// `None` for conditions this session manager cannot evaluate.
	pub fn parse(condition: &str) -> Option<Self> {
		let (kind, key) = condition.trim().split_once(char::is_whitespace)?;
		let key = key.trim();
		if key.is_empty() {
			return None;
		}
		if kind.eq_ignore_ascii_case("if-exists") {
			Some(Condition::IfExists(key.to_string()))
		} else if kind.eq_ignore_ascii_case("unless-exists") {
			Some(Condition::UnlessExists(key.to_string()))
		} else {
			None
		}
	}

	pub fn evaluate(&self, config_dir: &Path) -> bool {
		match self {
			Condition::IfExists(key) => config_dir.join(key).exists(),
			Condition::UnlessExists(key) => !config_dir.join(key).exists(),
		}
	}
}

/// A launchable session component.
#[derive(Debug, Clone)]
pub struct App {
	id: String,
	app_id: String,
	exec: Vec<String>,
	phase: Phase,
	startup_id: String,
	disabled: bool,
	conditionally_disabled: bool,
	condition: Option<String>,
	autorestart: bool,
	autostart_delay: u32,
	provides: Vec<String>,
	pid: Option<u32>,
	last_restart: Option<Instant>,
	monitored: bool,
}

impl App {
	pub fn new(config: &ComponentConfig) -> Self {
		Self {
			id: config.id.clone(),
			app_id: config.app_id.clone(),
			exec: config.exec.clone(),
			phase: config.phase,
			startup_id: String::new(),
			disabled: !config.enabled,
			conditionally_disabled: false,
			condition: config.condition.clone(),
			autorestart: config.autorestart,
			autostart_delay: config.autostart_delay,
			provides: config.provides.clone(),
			pid: None,
			last_restart: None,
			monitored: false,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	pub fn exec(&self) -> &[String] {
		&self.exec
	}

	pub fn phase(&self) -> Phase {
		self.phase
	}

	pub fn startup_id(&self) -> &str {
		&self.startup_id
	}

	pub fn has_startup_id(&self, startup_id: &str) -> bool {
		!self.startup_id.is_empty() && self.startup_id == startup_id
	}

	pub fn is_disabled(&self) -> bool {
		self.disabled
	}

	pub fn is_conditionally_disabled(&self) -> bool {
		self.conditionally_disabled
	}

	pub fn autorestart(&self) -> bool {
		self.autorestart
	}

	pub fn autostart_delay(&self) -> u32 {
		self.autostart_delay
	}

	pub fn provides(&self, service: &str) -> bool {
		self.provides.iter().any(|provided| provided == service)
	}

	pub fn add_provides(&mut self, services: &[String]) {
		for service in services {
			if !self.provides(service) {
				self.provides.push(service.clone());
			}
		}
	}

	pub fn condition(&self) -> Option<&str> {
		self.condition.as_deref()
	}

	pub fn has_autostart_condition(&self, condition: &str) -> bool {
		self.condition.as_deref() == Some(condition)
	}

	/// Computes the initial conditional state. Unknown conditions disable the
	/// app for the whole session.
	pub fn evaluate_condition(&mut self, config_dir: &Path) {
		self.conditionally_disabled = match self.condition.as_deref() {
			None => false,
			Some(condition) => match Condition::parse(condition) {
				Some(condition) => !condition.evaluate(config_dir),
				None => {
					warn!("app '{}' has an unsupported condition '{}'", self.id, condition);
					true
				}
			},
		};
	}

	/// Records a new condition value, returning whether it changed.
	pub fn set_condition(&mut self, value: bool) -> bool {
		let changed = self.conditionally_disabled == value;
		self.conditionally_disabled = !value;
		changed
	}

	pub fn is_running(&self) -> bool {
		self.pid.is_some()
	}

	#[cfg(test)]
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Whether exit, death and registration of this app are tracked by the
	/// manager. Set for apps started before the application phase.
	pub fn is_monitored(&self) -> bool {
		self.monitored
	}

	pub fn set_monitored(&mut self) {
		self.monitored = true;
	}

	pub fn start(
		&mut self,
		launcher: &mut dyn Launcher,
		environment: &[(String, String)],
	) -> Result<(), LaunchError> {
		if self.exec.is_empty() {
			return Err(LaunchError::NoCommand(self.id.clone()));
		}
		self.startup_id = ids::generate_startup_id();
		debug!(
			"starting app '{}': command={:?} startup-id={}",
			self.id, self.exec, self.startup_id
		);
		let pid = launcher.launch(LaunchRequest {
			app: &self.id,
			argv: &self.exec,
			startup_id: &self.startup_id,
			environment,
		})?;
		self.pid = Some(pid);
		Ok(())
	}

	/// Stops and starts again, refusing when the last restart was less than
	/// [`RESTART_RATE_LIMIT`] ago.
	pub fn restart(
		&mut self,
		launcher: &mut dyn Launcher,
		environment: &[(String, String)],
		now: Instant,
	) -> Result<(), LaunchError> {
		debug!("restarting app '{}'", self.id);
		if let Some(last) = self.last_restart {
			if now.saturating_duration_since(last) < RESTART_RATE_LIMIT {
				warn!("app '{}' respawning too quickly", self.app_id);
				return Err(LaunchError::RestartLimit(self.app_id.clone()));
			}
		}
		self.last_restart = Some(now);

		if let Err(error) = self.stop(launcher) {
			debug!("couldn't stop app '{}': {}", self.id, error);
		}
		self.start(launcher, environment)
	}

	pub fn stop(&mut self, launcher: &mut dyn Launcher) -> Result<(), LaunchError> {
		let pid = self
			.pid
			.take()
			.ok_or_else(|| LaunchError::NotRunning(self.id.clone()))?;
		launcher.terminate(pid)
	}

	/// Clears the running state if `pid` is the current process. Returns
	/// `false` for events about a process that has since been replaced.
	pub fn process_ended(&mut self, pid: u32) -> bool {
		if self.pid == Some(pid) {
			self.pid = None;
			true
		} else {
			false
		}
	}
}

/// Polls the file-based autostart conditions of `conditions` (app id, raw
/// condition) and reports every change as `Event::ConditionChanged`.
pub async fn watch_conditions(
	tx: mpsc::UnboundedSender<Event>,
	conditions: Vec<(String, String)>,
	config_dir: PathBuf,
	token: CancellationToken,
) {
	let mut watched: Vec<(String, Condition, bool)> = conditions
		.into_iter()
		.filter_map(|(app, condition)| {
			let condition = Condition::parse(&condition)?;
			let value = condition.evaluate(&config_dir);
			Some((app, condition, value))
		})
		.collect();
	if watched.is_empty() {
		return;
	}
	debug!("watching {} autostart conditions", watched.len());

	let mut interval = tokio::time::interval(CONDITION_POLL_INTERVAL);
	loop {
		tokio::select! {
			_ = interval.tick() => {}
			_ = token.cancelled() => return,
		}
		for (app, condition, value) in &mut watched {
			let current = condition.evaluate(&config_dir);
			if current == *value {
				continue;
			}
			*value = current;
			let event = Event::ConditionChanged {
				app: app.clone(),
				value: current,
			};
			if tx.send(event).is_err() {
				return;
			}
		}
	}
}
