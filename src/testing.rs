// SPDX-License-Identifier: GPL-3.0-only
//! In-memory collaborators for driving the manager deterministically.

use crate::{
	backend::{
		Backends, Dialogs, InhibitAction, LaunchRequest, Launcher, LoginManagerAction,
		LogoutDialogKind, SessionSignals, System,
	},
	client::Client,
	error::LaunchError,
	inhibitor::{Inhibitor, InhibitorFlags},
	timer::{Scheduler, TimerId},
};
use std::{
	cell::RefCell,
	collections::BTreeMap,
	io,
	rc::Rc,
	time::{Duration, Instant},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLaunch {
	pub app: String,
	pub argv: Vec<String>,
	pub startup_id: String,
	pub environment: Vec<(String, String)>,
	pub pid: u32,
}

#[derive(Debug, Default)]
struct LauncherState {
	next_pid: u32,
	launches: Vec<RecordedLaunch>,
	terminated: Vec<u32>,
	failing: Vec<String>,
	failed: Vec<String>,
}

/// Launcher that hands out increasing pids and never spawns anything.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher(Rc<RefCell<LauncherState>>);

impl FakeLauncher {
	pub fn launches(&self) -> Vec<RecordedLaunch> {
		self.0.borrow().launches.clone()
	}

	pub fn launches_of(&self, app: &str) -> Vec<RecordedLaunch> {
		self.launches()
			.into_iter()
			.filter(|launch| launch.app == app)
			.collect()
	}

	pub fn terminated(&self) -> Vec<u32> {
		self.0.borrow().terminated.clone()
	}

	/// Launches of `app` refused by [`FakeLauncher::fail`].
	pub fn failed_launches_of(&self, app: &str) -> usize {
		self.0.borrow().failed.iter().filter(|failed| *failed == app).count()
	}

	/// Makes every further launch of `app` fail.
	pub fn fail(&self, app: &str) {
		self.0.borrow_mut().failing.push(app.to_string());
	}
}

impl Launcher for FakeLauncher {
	fn launch(&mut self, request: LaunchRequest<'_>) -> Result<u32, LaunchError> {
		let mut state = self.0.borrow_mut();
		if state.failing.iter().any(|app| app == request.app) {
			state.failed.push(request.app.to_string());
			return Err(LaunchError::Spawn {
				command: request.argv.join(" "),
				source: io::Error::from(io::ErrorKind::NotFound),
			});
		}
		state.next_pid += 1;
		let pid = 1000 + state.next_pid;
		state.launches.push(RecordedLaunch {
			app: request.app.to_string(),
			argv: request.argv.to_vec(),
			startup_id: request.startup_id.to_string(),
			environment: request.environment.to_vec(),
			pid,
		});
		Ok(pid)
	}

	fn terminate(&mut self, pid: u32) -> Result<(), LaunchError> {
		self.0.borrow_mut().terminated.push(pid);
		Ok(())
	}
}

#[derive(Debug)]
struct SchedulerState {
	start: Instant,
	elapsed: Duration,
	next: u64,
	pending: BTreeMap<TimerId, Duration>,
}

/// Scheduler whose clock only moves when a test advances it.
#[derive(Debug, Clone)]
pub struct ManualScheduler(Rc<RefCell<SchedulerState>>);

impl Default for ManualScheduler {
	fn default() -> Self {
		Self(Rc::new(RefCell::new(SchedulerState {
			start: Instant::now(),
			elapsed: Duration::ZERO,
			next: 0,
			pending: BTreeMap::new(),
		})))
	}
}

impl ManualScheduler {
	/// Moves the clock forward and returns the timers that expired, in
	/// expiry order.
	pub fn advance(&self, by: Duration) -> Vec<TimerId> {
		let mut state = self.0.borrow_mut();
		state.elapsed += by;
		let now = state.elapsed;
		let mut expired: Vec<(Duration, TimerId)> = state
			.pending
			.iter()
			.filter(|(_, deadline)| **deadline <= now)
			.map(|(timer, deadline)| (*deadline, *timer))
			.collect();
		expired.sort();
		for (_, timer) in &expired {
			state.pending.remove(timer);
		}
		expired.into_iter().map(|(_, timer)| timer).collect()
	}

	pub fn pending(&self) -> usize {
		self.0.borrow().pending.len()
	}
}

impl Scheduler for ManualScheduler {
	fn schedule(&mut self, delay: Duration) -> TimerId {
		let mut state = self.0.borrow_mut();
		state.next += 1;
		let timer = TimerId(state.next);
		let deadline = state.elapsed + delay;
		state.pending.insert(timer, deadline);
		timer
	}

	fn cancel(&mut self, timer: TimerId) {
		self.0.borrow_mut().pending.remove(&timer);
	}

	fn now(&self) -> Instant {
		let state = self.0.borrow();
		state.start + state.elapsed
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemCall {
	AttemptStop,
	AttemptRestart,
	Suspend,
	Hibernate,
	SwitchUser,
	IdleEnabled(bool),
	LogoutAction(LoginManagerAction),
}

#[derive(Debug, Default)]
struct SystemState {
	calls: Vec<SystemCall>,
	login_session: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSystem(Rc<RefCell<SystemState>>);

impl RecordingSystem {
	pub fn calls(&self) -> Vec<SystemCall> {
		self.0.borrow().calls.clone()
	}

	pub fn set_login_session(&self, login_session: bool) {
		self.0.borrow_mut().login_session = login_session;
	}

	fn record(&self, call: SystemCall) {
		self.0.borrow_mut().calls.push(call);
	}
}

impl System for RecordingSystem {
	fn can_shutdown(&self) -> bool {
		true
	}

	fn can_suspend(&self) -> bool {
		true
	}

	fn can_hibernate(&self) -> bool {
		true
	}

	fn is_login_session(&self) -> bool {
		self.0.borrow().login_session
	}

	fn attempt_stop(&mut self) {
		self.record(SystemCall::AttemptStop);
	}

	fn attempt_restart(&mut self) {
		self.record(SystemCall::AttemptRestart);
	}

	fn suspend(&mut self) {
		self.record(SystemCall::Suspend);
	}

	fn hibernate(&mut self) {
		self.record(SystemCall::Hibernate);
	}

	fn switch_user(&mut self) {
		self.record(SystemCall::SwitchUser);
	}

	fn set_idle_enabled(&mut self, enabled: bool) {
		self.record(SystemCall::IdleEnabled(enabled));
	}

	fn set_logout_action(&mut self, action: LoginManagerAction) {
		self.record(SystemCall::LogoutAction(action));
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogCall {
	Logout(LogoutDialogKind),
	OpenInhibit(InhibitAction, Vec<String>),
	PresentInhibit(Vec<String>),
	CloseInhibit,
	FailWhale { allow_logout: bool },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingDialogs(Rc<RefCell<Vec<DialogCall>>>);

impl RecordingDialogs {
	pub fn calls(&self) -> Vec<DialogCall> {
		self.0.borrow().clone()
	}

	pub fn fail_whales(&self) -> usize {
		self.calls()
			.iter()
			.filter(|call| matches!(call, DialogCall::FailWhale { .. }))
			.count()
	}
}

impl Dialogs for RecordingDialogs {
	fn open_logout(&mut self, kind: LogoutDialogKind) {
		self.0.borrow_mut().push(DialogCall::Logout(kind));
	}

	fn open_inhibit(&mut self, action: InhibitAction, inhibitors: Vec<String>) {
		self.0
			.borrow_mut()
			.push(DialogCall::OpenInhibit(action, inhibitors));
	}

	fn present_inhibit(&mut self, inhibitors: Vec<String>) {
		self.0
			.borrow_mut()
			.push(DialogCall::PresentInhibit(inhibitors));
	}

	fn close_inhibit(&mut self) {
		self.0.borrow_mut().push(DialogCall::CloseInhibit);
	}

	fn fail_whale(&mut self, allow_logout: bool) {
		self.0
			.borrow_mut()
			.push(DialogCall::FailWhale { allow_logout });
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
	SessionRunning,
	ClientAdded(String),
	ClientRemoved(String),
	InhibitorAdded(String),
	InhibitorRemoved(String),
	InhibitedActions(u32),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSignals(Rc<RefCell<Vec<Signal>>>);

impl RecordingSignals {
	pub fn signals(&self) -> Vec<Signal> {
		self.0.borrow().clone()
	}

	pub fn count(&self, signal: &Signal) -> usize {
		self.0.borrow().iter().filter(|s| *s == signal).count()
	}
}

impl SessionSignals for RecordingSignals {
	fn session_running(&mut self) {
		self.0.borrow_mut().push(Signal::SessionRunning);
	}

	fn client_added(&mut self, client: &Client) {
		self.0
			.borrow_mut()
			.push(Signal::ClientAdded(client.id().to_string()));
	}

	fn client_removed(&mut self, id: &str) {
		self.0.borrow_mut().push(Signal::ClientRemoved(id.to_string()));
	}

	fn inhibitor_added(&mut self, inhibitor: &Inhibitor) {
		self.0
			.borrow_mut()
			.push(Signal::InhibitorAdded(inhibitor.id().to_string()));
	}

	fn inhibitor_removed(&mut self, id: &str) {
		self.0
			.borrow_mut()
			.push(Signal::InhibitorRemoved(id.to_string()));
	}

	fn inhibited_actions_changed(&mut self, flags: InhibitorFlags) {
		self.0
			.borrow_mut()
			.push(Signal::InhibitedActions(flags.bits()));
	}
}

/// Handles on every fake plugged into a manager under test.
#[derive(Clone, Default)]
pub struct Fakes {
	pub launcher: FakeLauncher,
	pub scheduler: ManualScheduler,
	pub system: RecordingSystem,
	pub dialogs: RecordingDialogs,
	pub signals: RecordingSignals,
}

impl Fakes {
	pub fn backends(&self) -> Backends {
		Backends {
			launcher: Box::new(self.launcher.clone()),
			scheduler: Box::new(self.scheduler.clone()),
			system: Box::new(self.system.clone()),
			dialogs: Box::new(self.dialogs.clone()),
			signals: Box::new(self.signals.clone()),
		}
	}
}
