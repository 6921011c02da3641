// SPDX-License-Identifier: GPL-3.0-only
use super::*;
use crate::{
	backend::{InhibitAction, LoginManagerAction, LogoutDialogKind, LogoutResponse},
	client::{
		testing::{Call, RecordingChannel},
		ClientKind, EndSessionFlags, EndSessionResponse, RestartStyle,
	},
	session_save::SavedClient,
	testing::{DialogCall, Fakes, Signal, SystemCall},
};
use std::time::Duration;

fn component(id: &str, phase: Phase) -> ComponentConfig {
	ComponentConfig {
		id: id.into(),
		app_id: format!("{id}.desktop"),
		exec: vec![id.into()],
		phase,
		..ComponentConfig::default()
	}
}

fn no_prompt() -> Settings {
	Settings {
		logout_prompt: false,
		..Settings::default()
	}
}

struct Session {
	fakes: Fakes,
	manager: Manager,
	next_bus_name: u32,
}

impl Session {
	fn new(settings: Settings, components: &[ComponentConfig]) -> Self {
		Self::with_config_dir(settings, components, Path::new("/nonexistent"))
	}

	fn with_config_dir(settings: Settings, components: &[ComponentConfig], dir: &Path) -> Self {
		let fakes = Fakes::default();
		let mut manager = Manager::new(settings, fakes.backends());
		manager.fill(components, dir);
		Self {
			fakes,
			manager,
			next_bus_name: 0,
		}
	}

	/// Started session with no components, already running.
	fn running(settings: Settings) -> Self {
		let mut session = Self::new(settings, &[]);
		session.manager.start();
		assert_eq!(session.manager.phase(), Phase::Running);
		session
	}

	fn advance(&mut self, secs: u64) {
		for timer in self.fakes.scheduler.advance(Duration::from_secs(secs)) {
			self.manager.handle(Event::Timer(timer));
		}
	}

	fn register(&mut self, app_id: &str, startup_id: &str) -> (String, RecordingChannel) {
		self.next_bus_name += 1;
		let channel = RecordingChannel::default();
		let handle = channel.clone();
		let id = self
			.manager
			.register_client(
				app_id,
				startup_id,
				ClientKind::Bus {
					bus_name: format!(":1.{}", self.next_bus_name),
				},
				move |_| Box::new(channel),
			)
			.unwrap();
		(id, handle)
	}

	fn launch(&self, app: &str) -> crate::testing::RecordedLaunch {
		self.fakes.launcher.launches_of(app).pop().unwrap()
	}

	fn respond(&mut self, id: &str, response: EndSessionResponse) {
		let id = id.to_string();
		self.manager.handle(Event::Call(Box::new(move |manager: &mut Manager| {
			manager.end_session_response(&id, response)
		})));
	}
}

#[test]
fn startup_phases_run_in_order_and_reach_running() {
	let mut session = Session::new(Settings::default(), &[
		component("wm", Phase::WindowManager),
		component("panel", Phase::Panel),
		component("editor", Phase::Application),
	]);
	session.manager.start();
	assert_eq!(session.manager.phase(), Phase::WindowManager);
	assert!(session.fakes.launcher.launches_of("panel").is_empty());

	let wm = session.launch("wm");
	session.register("wm.desktop", &wm.startup_id);
	assert_eq!(session.manager.phase(), Phase::Panel);

	let panel = session.launch("panel");
	session.manager.handle(Event::ProcessExited {
		app: "panel".into(),
		pid: panel.pid,
		code: 0,
	});
	assert_eq!(session.manager.phase(), Phase::Running);
	assert_eq!(session.fakes.launcher.launches_of("editor").len(), 1);
	assert_eq!(session.fakes.signals.count(&Signal::SessionRunning), 1);
	assert_eq!(session.fakes.scheduler.pending(), 0);
	assert!(session.manager.is_session_running());
}

#[test]
fn empty_session_runs_immediately() {
	let session = Session::running(Settings::default());
	assert!(session.fakes.launcher.launches().is_empty());
	assert!(session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::IdleEnabled(true)));
}

#[test]
fn required_app_missing_registration_shows_failure() {
	let mut wm = component("wm", Phase::WindowManager);
	wm.required = true;
	let mut session = Session::new(Settings::default(), &[wm]);
	session.manager.start();

	session.advance(29);
	assert_eq!(session.manager.phase(), Phase::WindowManager);
	session.advance(1);
	assert_eq!(session.manager.phase(), Phase::Running);
	assert_eq!(session.fakes.dialogs.calls(), vec![DialogCall::FailWhale {
		allow_logout: true
	}]);
	assert_eq!(session.fakes.launcher.launches_of("wm").len(), 1);
}

#[test]
fn failed_relaunch_of_required_app_shows_failure_and_moves_on() {
	let mut wm = component("wm", Phase::WindowManager);
	wm.required = true;
	let mut session = Session::new(Settings::default(), &[wm]);
	session.manager.start();
	let first = session.launch("wm");

	session.fakes.launcher.fail("wm");
	session.manager.handle(Event::ProcessExited {
		app: "wm".into(),
		pid: first.pid,
		code: 1,
	});

	assert_eq!(session.fakes.launcher.failed_launches_of("wm"), 1);
	assert_eq!(session.fakes.launcher.launches_of("wm").len(), 1);
	assert_eq!(session.fakes.dialogs.fail_whales(), 1);
	assert_eq!(session.manager.phase(), Phase::Running);
}

#[test]
fn optional_app_missing_registration_is_only_logged() {
	let mut session = Session::new(Settings::default(), &[component("wm", Phase::WindowManager)]);
	session.manager.start();
	session.advance(30);
	assert_eq!(session.manager.phase(), Phase::Running);
	assert_eq!(session.fakes.dialogs.fail_whales(), 0);
}

#[test]
fn crashing_app_is_restarted_once_then_escalated() {
	let mut wm = component("wm", Phase::WindowManager);
	wm.required = true;
	let mut session = Session::new(Settings::default(), &[wm]);
	session.manager.start();

	let first = session.launch("wm");
	session.manager.handle(Event::ProcessDied {
		app: "wm".into(),
		pid: first.pid,
		signal: libc::SIGSEGV,
	});
	assert_eq!(session.manager.phase(), Phase::WindowManager);
	assert_eq!(session.fakes.launcher.launches_of("wm").len(), 2);
	assert_eq!(session.fakes.dialogs.fail_whales(), 0);

	let second = session.launch("wm");
	assert_ne!(first.startup_id, second.startup_id);
	session.manager.handle(Event::ProcessDied {
		app: "wm".into(),
		pid: second.pid,
		signal: libc::SIGSEGV,
	});
	assert_eq!(session.fakes.launcher.launches_of("wm").len(), 2);
	assert_eq!(session.fakes.dialogs.fail_whales(), 1);
	assert_eq!(session.manager.phase(), Phase::Running);
}

#[test]
fn failed_exit_of_optional_app_ends_the_wait() {
	let mut session = Session::new(Settings::default(), &[component("wm", Phase::WindowManager)]);
	session.manager.start();
	let wm = session.launch("wm");

	session.manager.handle(Event::ProcessExited {
		app: "wm".into(),
		pid: 4242,
		code: 1,
	});
	assert_eq!(session.manager.phase(), Phase::WindowManager);

	session.manager.handle(Event::ProcessExited {
		app: "wm".into(),
		pid: wm.pid,
		code: 1,
	});
	assert_eq!(session.manager.phase(), Phase::Running);
	assert_eq!(session.fakes.launcher.launches_of("wm").len(), 1);
}

#[test]
fn failed_exit_of_required_autorestart_app_is_left_alone() {
	let mut wm = component("wm", Phase::WindowManager);
	wm.required = true;
	wm.autorestart = true;
	let mut session = Session::new(Settings::default(), &[wm]);
	session.manager.start();
	let launch = session.launch("wm");

	session.manager.handle(Event::ProcessExited {
		app: "wm".into(),
		pid: launch.pid,
		code: 1,
	});
	assert_eq!(session.manager.phase(), Phase::WindowManager);
	assert_eq!(session.fakes.launcher.launches_of("wm").len(), 1);
}

#[test]
fn delayed_app_starts_after_its_delay() {
	let mut editor = component("editor", Phase::Application);
	editor.autostart_delay = 5;
	let mut session = Session::new(Settings::default(), &[editor]);
	session.manager.start();
	assert_eq!(session.manager.phase(), Phase::Running);
	assert!(session.fakes.launcher.launches().is_empty());

	session.advance(4);
	assert!(session.fakes.launcher.launches().is_empty());
	session.advance(1);
	assert_eq!(session.fakes.launcher.launches_of("editor").len(), 1);
}

#[test]
fn disabled_apps_are_not_started() {
	let dir = tempfile::tempdir().unwrap();
	let mut disabled = component("disabled", Phase::Application);
	disabled.enabled = false;
	let mut conditional = component("conditional", Phase::Application);
	conditional.condition = Some("if-exists enable-conditional".into());
	let mut unknown = component("unknown", Phase::Application);
	unknown.condition = Some("GSettings org.example key".into());

	let mut session = Session::with_config_dir(
		Settings::default(),
		&[disabled, conditional, unknown],
		dir.path(),
	);
	session.manager.start();
	assert_eq!(session.manager.phase(), Phase::Running);
	assert!(session.fakes.launcher.launches().is_empty());
	assert!(session.manager.app("disabled").unwrap().is_disabled());
	assert!(session
		.manager
		.app("conditional")
		.unwrap()
		.is_conditionally_disabled());
}

#[test]
fn condition_changes_start_and_stop_apps() {
	let dir = tempfile::tempdir().unwrap();
	let mut editor = component("editor", Phase::Application);
	editor.condition = Some("if-exists editor-enabled".into());
	let mut session = Session::with_config_dir(Settings::default(), &[editor], dir.path());
	session.manager.start();
	assert!(session.fakes.launcher.launches().is_empty());
	assert_eq!(session.manager.watched_conditions(), vec![(
		"editor".to_string(),
		"if-exists editor-enabled".to_string()
	)]);

	session.manager.handle(Event::ConditionChanged {
		app: "editor".into(),
		value: true,
	});
	let launch = session.launch("editor");

	// Repeating the same value does nothing.
	session.manager.handle(Event::ConditionChanged {
		app: "editor".into(),
		value: true,
	});
	assert_eq!(session.fakes.launcher.launches().len(), 1);

	session.manager.handle(Event::ConditionChanged {
		app: "editor".into(),
		value: false,
	});
	assert_eq!(session.fakes.launcher.terminated(), vec![launch.pid]);
	assert!(!session.manager.app("editor").unwrap().is_running());
}

#[test]
fn client_stopped_by_condition_is_not_restarted() {
	let dir = tempfile::tempdir().unwrap();
	let mut editor = component("editor", Phase::Application);
	editor.condition = Some("if-exists editor-enabled".into());
	editor.autorestart = true;
	let mut session = Session::with_config_dir(Settings::default(), &[editor], dir.path());
	session.manager.start();
	session.manager.handle(Event::ConditionChanged {
		app: "editor".into(),
		value: true,
	});
	let launch = session.launch("editor");
	let (client, channel) = session.register("editor.desktop", &launch.startup_id);

	session.manager.handle(Event::ConditionChanged {
		app: "editor".into(),
		value: false,
	});
	assert_eq!(channel.calls(), vec![Call::Stop]);

	session.manager.client_disconnected(&client);
	assert!(session.manager.client(&client).is_none());
	assert_eq!(session.fakes.launcher.launches().len(), 1);
}

#[test]
fn disconnected_autorestart_client_is_restarted() {
	let mut editor = component("editor", Phase::Application);
	editor.autorestart = true;
	let mut session = Session::new(Settings::default(), &[editor, component(
		"viewer",
		Phase::Application,
	)]);
	session.manager.start();

	let editor = session.launch("editor");
	let (editor_client, _) = session.register("editor.desktop", &editor.startup_id);
	let viewer = session.launch("viewer");
	let (viewer_client, _) = session.register("viewer.desktop", &viewer.startup_id);

	session.manager.client_disconnected(&editor_client);
	session.manager.client_disconnected(&viewer_client);
	assert_eq!(session.fakes.launcher.launches_of("editor").len(), 2);
	assert_eq!(session.fakes.launcher.launches_of("viewer").len(), 1);
	assert_eq!(
		session
			.fakes
			.signals
			.count(&Signal::ClientRemoved(editor_client.clone())),
		1
	);
}

#[test]
fn fill_drops_duplicates_and_blacklisted_components() {
	let settings = Settings {
		blacklist: vec!["tracker".into(), String::new()],
		..Settings::default()
	};
	let mut first_wm = component("wm1", Phase::WindowManager);
	first_wm.provides = vec!["windowmanager".into()];
	let mut second_wm = component("wm2", Phase::WindowManager);
	second_wm.provides = vec!["windowmanager".into()];
	second_wm.required = true;
	let mut same = component("same", Phase::Application);
	same.app_id = "shared.desktop".into();
	let mut other = component("other", Phase::Application);
	other.app_id = "shared.desktop".into();
	other.provides = vec!["notifications".into()];
	other.required = true;
	let mut nameless = component("nameless", Phase::Application);
	nameless.app_id = String::new();

	let session = Session::new(settings, &[
		component("tracker-miner", Phase::Application),
		first_wm,
		second_wm,
		same,
		other,
		nameless,
	]);
	let manager = &session.manager;
	assert!(manager.app("tracker-miner").is_none());
	assert!(manager.app("wm2").is_none());
	assert!(manager.is_app_required("wm1"));
	assert!(manager.app("other").is_none());
	assert!(manager.app("same").unwrap().provides("notifications"));
	assert!(manager.is_app_required("same"));
	assert!(manager.app("nameless").is_none());
}

#[test]
fn failsafe_only_loads_required_components() {
	let fakes = Fakes::default();
	let mut manager = Manager::new(Settings::default(), fakes.backends());
	manager.set_failsafe(true);
	let mut wm = component("wm", Phase::WindowManager);
	wm.required = true;
	manager.fill(
		&[wm, component("editor", Phase::Application)],
		Path::new("/nonexistent"),
	);
	assert!(manager.app("wm").is_some());
	assert!(manager.app("editor").is_none());
}

#[test]
fn inhibit_validates_arguments_and_tracks_flags() {
	let mut session = Session::running(Settings::default());
	let manager = &mut session.manager;
	let logout = InhibitorFlags::LOGOUT.bits();

	assert_eq!(
		manager.inhibit("", 0, "reason", logout, None),
		Err(ManagerError::general("Application ID not specified"))
	);
	assert_eq!(
		manager.inhibit("player", 0, "", logout, None),
		Err(ManagerError::general("Reason not specified"))
	);
	assert_eq!(
		manager.inhibit("player", 0, "reason", 0, None),
		Err(ManagerError::general("Invalid inhibit flags"))
	);
	assert!(manager.get_inhibitors().is_empty());

	let cookie = manager
		.inhibit("player", 7, "Playing music", logout, Some(":1.5".into()))
		.unwrap();
	assert!(cookie > 0);
	assert!(manager.is_inhibited(logout));
	assert!(!manager.is_inhibited(InhibitorFlags::SUSPEND.bits()));
	assert_eq!(manager.inhibited_actions(), InhibitorFlags::LOGOUT);

	let id = manager.get_inhibitors().pop().unwrap();
	let inhibitor = manager.inhibitor(&id).unwrap();
	assert_eq!(inhibitor.cookie(), cookie);
	assert_eq!(inhibitor.toplevel_xid(), 7);
	assert!(!inhibitor.is_jit());

	manager.uninhibit(cookie).unwrap();
	assert_eq!(
		manager.uninhibit(cookie),
		Err(ManagerError::general("Unable to uninhibit: Invalid cookie"))
	);
	assert_eq!(manager.inhibited_actions(), InhibitorFlags::empty());
	let signals = session.fakes.signals.signals();
	assert!(signals.contains(&Signal::InhibitorAdded(id.clone())));
	assert!(signals.contains(&Signal::InhibitorRemoved(id)));
	assert_eq!(
		session
			.fakes
			.signals
			.count(&Signal::InhibitedActions(logout)),
		1
	);
	assert_eq!(session.fakes.signals.count(&Signal::InhibitedActions(0)), 1);
}

#[test]
fn cookies_are_unique_among_live_inhibitors() {
	let mut session = Session::running(Settings::default());
	let mut cookies: Vec<u32> = (0..50)
		.map(|_| {
			session
				.manager
				.inhibit("app", 0, "reason", InhibitorFlags::IDLE.bits(), None)
				.unwrap()
		})
		.collect();
	cookies.sort_unstable();
	cookies.dedup();
	assert_eq!(cookies.len(), 50);
}

#[test]
fn idle_inhibitor_disables_idle_tracking() {
	let mut session = Session::running(Settings::default());
	let cookie = session
		.manager
		.inhibit("player", 0, "Watching", InhibitorFlags::IDLE.bits(), None)
		.unwrap();
	assert_eq!(
		session.fakes.system.calls().last(),
		Some(&SystemCall::IdleEnabled(false))
	);
	session.manager.uninhibit(cookie).unwrap();
	assert_eq!(
		session.fakes.system.calls().last(),
		Some(&SystemCall::IdleEnabled(true))
	);
}

#[test]
fn setenv_only_during_initialization() {
	let mut session = Session::new(Settings::default(), &[
		component("settings-daemon", Phase::Initialization),
		component("editor", Phase::Application),
	]);
	session.manager.start();
	assert_eq!(session.manager.phase(), Phase::Initialization);
	session.manager.setenv("GTK_MODULES", "canberra").unwrap();
	session.manager.setenv("GTK_MODULES", "canberra:bridge").unwrap();
	session.manager.initialization_error("no keyring", false).unwrap();
	assert_eq!(session.fakes.dialogs.fail_whales(), 0);
	session.manager.initialization_error("no display", true).unwrap();
	assert_eq!(session.fakes.dialogs.fail_whales(), 1);

	let daemon = session.launch("settings-daemon");
	session.register("settings-daemon.desktop", &daemon.startup_id);
	assert_eq!(session.manager.phase(), Phase::Running);
	assert_eq!(session.launch("editor").environment, vec![(
		"GTK_MODULES".to_string(),
		"canberra:bridge".to_string()
	)]);

	assert!(matches!(
		session.manager.setenv("LANG", "C"),
		Err(ManagerError::NotInInitialization(_))
	));
	assert!(matches!(
		session.manager.initialization_error("late", true),
		Err(ManagerError::NotInInitialization(_))
	));
}

#[test]
fn session_requests_need_the_running_phase() {
	let mut session = Session::new(Settings::default(), &[component("wm", Phase::WindowManager)]);
	session.manager.start();
	assert_eq!(
		session.manager.shutdown(),
		Err(ManagerError::not_in_running(
			"Shutdown interface is only available during the Running phase"
		))
	);
	assert!(matches!(
		session.manager.logout(0),
		Err(ManagerError::NotInRunning(_))
	));
	assert!(matches!(
		session.manager.request_reboot(),
		Err(ManagerError::NotInRunning(_))
	));
	assert!(session.fakes.dialogs.calls().is_empty());
}

#[test]
fn lockdown_refuses_logout_and_shutdown() {
	let settings = Settings {
		disable_log_out: true,
		..Settings::default()
	};
	let mut session = Session::running(settings);
	assert_eq!(session.manager.logout(1), Err(ManagerError::LockedDown));
	assert_eq!(session.manager.shutdown(), Err(ManagerError::LockedDown));
	assert_eq!(session.manager.reboot(), Err(ManagerError::LockedDown));
	assert_eq!(session.manager.request_shutdown(), Err(ManagerError::LockedDown));
	assert!(!session.manager.can_shutdown());
	assert_eq!(session.manager.phase(), Phase::Running);
	assert!(session.fakes.dialogs.calls().is_empty());
}

#[test]
fn unknown_logout_mode_is_rejected() {
	let mut session = Session::running(Settings::default());
	assert_eq!(
		session.manager.logout(7),
		Err(ManagerError::InvalidOption("Unknown logout mode flag".into()))
	);
	assert_eq!(session.manager.phase(), Phase::Running);
	assert!(session.manager.can_shutdown());
}

#[test]
fn confirmed_logout_ends_the_session() {
	let mut session = Session::running(Settings::default());
	session.manager.logout(0).unwrap();
	assert_eq!(session.fakes.dialogs.calls(), vec![DialogCall::Logout(
		LogoutDialogKind::Logout
	)]);
	assert_eq!(session.manager.phase(), Phase::Running);

	session
		.manager
		.handle(Event::LogoutResponse(LogoutResponse::Logout));
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);
	assert_eq!(session.manager.logout_mode(), LogoutMode::NoConfirmation);

	session.advance(1);
	assert_eq!(session.manager.phase(), Phase::Exit);
	assert!(session.manager.should_quit());
	assert!(!session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::AttemptStop));
}

#[test]
fn cancelled_logout_dialog_keeps_running() {
	let mut session = Session::running(Settings::default());
	session.manager.logout(0).unwrap();
	session
		.manager
		.handle(Event::LogoutResponse(LogoutResponse::Cancel));
	assert_eq!(session.manager.phase(), Phase::Running);
	assert!(!session.manager.should_quit());
}

#[test]
fn clients_negotiate_in_two_steps() {
	let mut session = Session::running(no_prompt());
	let (first, first_channel) = session.register("editor.desktop", "");
	let (second, second_channel) = session.register("terminal.desktop", "");
	assert_eq!(session.manager.get_clients().len(), 2);

	session.manager.logout(0).unwrap();
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);
	session.respond(&first, EndSessionResponse::ok());
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);
	session.respond(&second, EndSessionResponse::ok());
	assert_eq!(session.manager.phase(), Phase::EndSession);

	session.respond(&first, EndSessionResponse::ok());
	session.respond(&second, EndSessionResponse::ok());
	assert!(session.manager.should_quit());

	let expected = vec![
		Call::QueryEndSession(EndSessionFlags::empty()),
		Call::EndSession(EndSessionFlags::empty()),
		Call::Stop,
	];
	assert_eq!(first_channel.calls(), expected);
	assert_eq!(second_channel.calls(), expected);
}

#[test]
fn refusing_client_blocks_logout_until_confirmed() {
	let mut session = Session::running(no_prompt());
	let (client, channel) = session.register("editor.desktop", "");
	session.manager.logout(0).unwrap();

	session.respond(&client, EndSessionResponse::refuse("Unsaved document"));
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);
	let inhibitors = session.manager.get_inhibitors();
	assert_eq!(inhibitors.len(), 1);
	let inhibitor = session.manager.inhibitor(&inhibitors[0]).unwrap();
	assert_eq!(inhibitor.reason(), "Unsaved document");
	assert_eq!(inhibitor.client_id(), Some(client.as_str()));
	assert_eq!(inhibitor.app_id(), "editor.desktop");
	assert_eq!(inhibitor.bus_name(), Some(":1.1"));
	assert_eq!(session.fakes.dialogs.calls(), vec![DialogCall::OpenInhibit(
		InhibitAction::Logout,
		inhibitors.clone()
	)]);

	// The dialog holds the phase open past its timeout.
	session.advance(30);
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);

	session
		.manager
		.handle(Event::InhibitResponse { accepted: true });
	assert_eq!(session.manager.phase(), Phase::EndSession);
	assert_eq!(session.manager.logout_mode(), LogoutMode::Force);
	assert_eq!(
		channel.calls().last(),
		Some(&Call::EndSession(EndSessionFlags::FORCEFUL))
	);
}

#[test]
fn cancelling_the_inhibit_dialog_returns_to_running() {
	let mut session = Session::running(no_prompt());
	let (client, channel) = session.register("editor.desktop", "");
	session.manager.logout(0).unwrap();
	session.respond(&client, EndSessionResponse::refuse(""));
	let inhibitor = session.manager.get_inhibitors().pop().unwrap();
	assert_eq!(
		session.manager.inhibitor(&inhibitor).unwrap().reason(),
		"Not responding"
	);

	session
		.manager
		.handle(Event::InhibitResponse { accepted: false });
	assert_eq!(session.manager.phase(), Phase::Running);
	assert!(session.manager.get_inhibitors().is_empty());
	assert_eq!(session.manager.logout_mode(), LogoutMode::Normal);
	assert_eq!(session.manager.logout_type(), None);
	assert_eq!(channel.calls().last(), Some(&Call::CancelEndSession));
	assert_eq!(session.fakes.signals.count(&Signal::SessionRunning), 2);
	assert!(session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::LogoutAction(LoginManagerAction::None)));

	// A fresh logout starts a new round.
	session.manager.logout(0).unwrap();
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);
}

#[test]
fn explicit_inhibitors_survive_cancellation() {
	let mut session = Session::running(no_prompt());
	let (client, _) = session.register("editor.desktop", "");
	session
		.manager
		.inhibit("player", 0, "Playing", InhibitorFlags::LOGOUT.bits(), None)
		.unwrap();
	session.manager.logout(0).unwrap();
	session.respond(&client, EndSessionResponse::cancel());

	assert_eq!(session.manager.phase(), Phase::Running);
	assert_eq!(session.manager.get_inhibitors().len(), 1);
}

#[test]
fn unresponsive_client_becomes_an_inhibitor() {
	let mut session = Session::running(no_prompt());
	let (client, _) = session.register("slow.desktop", "");
	session.manager.logout(0).unwrap();

	session.advance(1);
	let inhibitors = session.manager.get_inhibitors();
	assert_eq!(inhibitors.len(), 1);
	let inhibitor = session.manager.inhibitor(&inhibitors[0]).unwrap();
	assert_eq!(inhibitor.reason(), "Not responding");
	assert!(inhibitor.is_jit());
	assert!(matches!(
		session.fakes.dialogs.calls().last(),
		Some(DialogCall::OpenInhibit(InhibitAction::Logout, _))
	));

	// A late answer withdraws the inhibitor and lets the logout through.
	session.respond(&client, EndSessionResponse::ok());
	assert!(session.manager.get_inhibitors().is_empty());
	assert_eq!(session.manager.phase(), Phase::EndSession);
	assert_eq!(
		session.fakes.dialogs.calls().last(),
		Some(&DialogCall::CloseInhibit)
	);
}

#[test]
fn forced_logout_cannot_be_inhibited() {
	let mut session = Session::running(no_prompt());
	let (_, channel) = session.register("slow.desktop", "");
	session
		.manager
		.inhibit("player", 0, "Playing", InhibitorFlags::LOGOUT.bits(), None)
		.unwrap();

	session.manager.handle(Event::Terminate);
	assert_eq!(session.manager.phase(), Phase::QueryEndSession);
	assert_eq!(session.manager.logout_mode(), LogoutMode::Force);
	assert_eq!(
		session
			.manager
			.inhibit("other", 0, "Busy", InhibitorFlags::LOGOUT.bits(), None),
		Err(ManagerError::general("Forced logout cannot be inhibited"))
	);

	session.advance(1);
	assert_eq!(session.manager.phase(), Phase::EndSession);
	assert_eq!(session.manager.get_inhibitors().len(), 1);
	assert_eq!(channel.calls(), vec![
		Call::QueryEndSession(EndSessionFlags::FORCEFUL),
		Call::EndSession(EndSessionFlags::FORCEFUL),
	]);
	assert!(session
		.fakes
		.dialogs
		.calls()
		.iter()
		.all(|call| !matches!(call, DialogCall::OpenInhibit(..))));
}

#[test]
fn do_last_clients_are_asked_again() {
	let mut session = Session::running(no_prompt());
	let (first, first_channel) = session.register("editor.desktop", "");
	let (second, second_channel) = session.register("terminal.desktop", "");
	session.manager.logout(0).unwrap();
	session.respond(&first, EndSessionResponse::ok());
	session.respond(&second, EndSessionResponse::ok());
	assert_eq!(session.manager.phase(), Phase::EndSession);

	let last = EndSessionResponse {
		is_ok: true,
		do_last: true,
		..EndSessionResponse::default()
	};
	session.respond(&first, last.clone());
	session.respond(&second, EndSessionResponse::ok());
	assert_eq!(session.manager.phase(), Phase::EndSession);

	session.respond(&first, last);
	assert!(session.manager.should_quit());
	assert_eq!(first_channel.calls(), vec![
		Call::QueryEndSession(EndSessionFlags::empty()),
		Call::EndSession(EndSessionFlags::empty()),
		Call::EndSession(EndSessionFlags::LAST),
		Call::Stop,
	]);
	assert_eq!(second_channel.calls(), vec![
		Call::QueryEndSession(EndSessionFlags::empty()),
		Call::EndSession(EndSessionFlags::empty()),
		Call::Stop,
	]);
}

#[test]
fn end_session_phase_times_out() {
	let mut session = Session::running(no_prompt());
	let (client, _) = session.register("editor.desktop", "");
	session.manager.logout(0).unwrap();
	session.respond(&client, EndSessionResponse::ok());
	assert_eq!(session.manager.phase(), Phase::EndSession);

	session.advance(30);
	assert!(session.manager.should_quit());
}

#[test]
fn disconnecting_during_end_session_counts_as_agreement() {
	let mut session = Session::running(no_prompt());
	let (first, first_channel) = session.register("editor.desktop", "");
	let (second, _) = session.register("terminal.desktop", "");
	session.manager.logout(0).unwrap();
	session.respond(&first, EndSessionResponse::ok());
	session.respond(&second, EndSessionResponse::ok());

	session.respond(&first, EndSessionResponse::ok());
	session.manager.client_disconnected(&second);
	assert!(session.manager.should_quit());
	assert_eq!(first_channel.calls().last(), Some(&Call::Stop));
	assert_eq!(
		session.fakes.signals.count(&Signal::ClientRemoved(second)),
		1
	);
}

#[test]
fn vanished_bus_name_drops_its_clients_and_inhibitors() {
	let mut session = Session::running(Settings::default());
	let (client, _) = session.register("editor.desktop", "");
	session
		.manager
		.inhibit("editor", 0, "Saving", InhibitorFlags::LOGOUT.bits(), Some(":1.1".into()))
		.unwrap();
	session
		.manager
		.inhibit("player", 0, "Playing", InhibitorFlags::IDLE.bits(), Some(":1.9".into()))
		.unwrap();

	session.manager.handle(Event::NameVanished(":1.1".into()));
	assert!(session.manager.client(&client).is_none());
	let inhibitors = session.manager.get_inhibitors();
	assert_eq!(inhibitors.len(), 1);
	assert_eq!(
		session.manager.inhibitor(&inhibitors[0]).unwrap().bus_name(),
		Some(":1.9")
	);
	assert_eq!(session.manager.inhibited_actions(), InhibitorFlags::IDLE);
}

#[test]
fn registration_rules() {
	let mut session = Session::running(no_prompt());
	let (client, _) = session.register("editor.desktop", "startup-1");
	assert_eq!(
		session.manager.register_client(
			"other.desktop",
			"startup-1",
			ClientKind::Xsmp,
			|_| Box::new(RecordingChannel::default())
		),
		Err(ManagerError::AlreadyRegistered)
	);
	assert_eq!(
		session.manager.client(&client).unwrap().status(),
		crate::client::ClientStatus::Registered
	);

	session.manager.unregister_client(&client).unwrap();
	assert_eq!(
		session.manager.client(&client).unwrap().status(),
		crate::client::ClientStatus::Unregistered
	);
	assert_eq!(
		session.manager.unregister_client("/org/gnome/SessionManager/Client99"),
		Err(ManagerError::NotRegistered)
	);

	session.manager.handle(Event::Terminate);
	assert_eq!(
		session.manager.register_client(
			"late.desktop",
			"",
			ClientKind::Xsmp,
			|_| Box::new(RecordingChannel::default())
		),
		Err(ManagerError::not_in_running("Unable to register client"))
	);
}

#[test]
fn legacy_clients_need_a_startup_id_before_running() {
	let mut session = Session::new(Settings::default(), &[component("wm", Phase::WindowManager)]);
	session.manager.start();
	assert!(session
		.manager
		.register_client("legacy", "", ClientKind::Xsmp, |_| {
			Box::new(RecordingChannel::default())
		})
		.is_err());
	assert!(session.manager.get_clients().is_empty());
}

#[test]
fn reboot_falls_back_to_the_login_manager() {
	let mut session = Session::running(no_prompt());
	session.manager.request_reboot().unwrap();
	assert_eq!(session.manager.logout_type(), Some(LogoutType::RebootInteract));
	session.advance(1);
	assert_eq!(session.manager.phase(), Phase::Exit);
	assert!(!session.manager.should_quit());
	assert!(session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::AttemptRestart));

	session
		.manager
		.handle(Event::SystemRequestFailed(LoginManagerAction::Reboot));
	assert!(session.manager.should_quit());
	assert_eq!(
		session.manager.logout_type(),
		Some(LogoutType::RebootViaLoginManager)
	);
	assert_eq!(
		session.fakes.system.calls().last(),
		Some(&SystemCall::LogoutAction(LoginManagerAction::Reboot))
	);
}

#[test]
fn failed_power_off_is_left_to_the_login_manager() {
	let mut session = Session::running(no_prompt());
	session.manager.request_shutdown().unwrap();
	session.advance(1);
	assert!(session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::AttemptStop));
	assert!(!session.manager.should_quit());

	session
		.manager
		.handle(Event::SystemRequestFailed(LoginManagerAction::Shutdown));
	assert_eq!(
		session.manager.logout_type(),
		Some(LogoutType::ShutdownViaLoginManager)
	);
	assert!(session.manager.should_quit());
	assert_eq!(
		session.fakes.system.calls().last(),
		Some(&SystemCall::LogoutAction(LoginManagerAction::Shutdown))
	);
}

#[test]
fn shutdown_dialog_response_stops_the_system() {
	let mut session = Session::running(Settings::default());
	session.manager.shutdown().unwrap();
	assert_eq!(session.fakes.dialogs.calls(), vec![DialogCall::Logout(
		LogoutDialogKind::Shutdown
	)]);
	session
		.manager
		.handle(Event::LogoutResponse(LogoutResponse::Shutdown));
	assert_eq!(session.manager.logout_type(), Some(LogoutType::Shutdown));
	session.advance(1);
	assert!(session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::AttemptStop));
}

#[test]
fn terminate_before_running_quits_at_once() {
	let mut session = Session::new(Settings::default(), &[component("wm", Phase::WindowManager)]);
	session.manager.start();
	session.manager.handle(Event::Terminate);
	assert!(session.manager.should_quit());
}

#[test]
fn terminate_bypasses_lockdown() {
	let settings = Settings {
		disable_log_out: true,
		..Settings::default()
	};
	let mut session = Session::running(settings);
	session.manager.handle(Event::Terminate);
	session.advance(1);
	assert!(session.manager.should_quit());
}

#[test]
fn suspend_respects_inhibitors() {
	let mut session = Session::running(Settings::default());
	session.manager.request_suspend();
	assert_eq!(session.fakes.system.calls().last(), Some(&SystemCall::Suspend));

	session
		.manager
		.inhibit("burner", 0, "Burning disc", InhibitorFlags::SUSPEND.bits(), None)
		.unwrap();
	let inhibitors = session.manager.get_inhibitors();
	session.manager.request_hibernate();
	session.manager.request_hibernate();
	assert_eq!(session.fakes.dialogs.calls(), vec![
		DialogCall::OpenInhibit(InhibitAction::Hibernate, inhibitors.clone()),
		DialogCall::PresentInhibit(inhibitors),
	]);

	session
		.manager
		.handle(Event::InhibitResponse { accepted: true });
	assert_eq!(session.fakes.system.calls().last(), Some(&SystemCall::Hibernate));
	assert_eq!(session.manager.phase(), Phase::Running);
}

#[test]
fn user_switching_can_be_locked_down() {
	let settings = Settings {
		disable_user_switching: true,
		..Settings::default()
	};
	let mut session = Session::running(settings);
	session.manager.request_switch_user();
	assert!(!session
		.fakes
		.system
		.calls()
		.contains(&SystemCall::SwitchUser));

	let mut session = Session::running(Settings::default());
	session
		.manager
		.handle(Event::LogoutResponse(LogoutResponse::SwitchUser));
	assert_eq!(session.fakes.system.calls().last(), Some(&SystemCall::SwitchUser));
}

#[test]
fn autostart_conditions_are_reported_as_handled() {
	let dir = tempfile::tempdir().unwrap();
	let mut editor = component("editor", Phase::Application);
	editor.condition = Some("if-exists editor-enabled".into());
	let mut disabled = component("disabled", Phase::Application);
	disabled.condition = Some("unless-exists quiet".into());
	disabled.enabled = false;
	let session = Session::with_config_dir(Settings::default(), &[editor, disabled], dir.path());

	assert!(session
		.manager
		.is_autostart_condition_handled("if-exists editor-enabled"));
	assert!(!session
		.manager
		.is_autostart_condition_handled("unless-exists quiet"));
	assert!(!session.manager.is_autostart_condition_handled("if-exists other"));
}

fn save_session(login_session: bool) -> (tempfile::TempDir, Vec<SavedClient>) {
	let dir = tempfile::tempdir().unwrap();
	let settings = Settings {
		autosave: true,
		logout_prompt: false,
		..Settings::default()
	};
	let fakes = Fakes::default();
	fakes.system.set_login_session(login_session);
	let mut manager = Manager::new(settings, fakes.backends())
		.with_session_save(SessionSave::new(dir.path()));
	manager.fill(
		&[component("editor", Phase::Application)],
		Path::new("/nonexistent"),
	);
	let mut session = Session {
		fakes,
		manager,
		next_bus_name: 0,
	};
	session.manager.start();
	let launch = session.launch("editor");
	let (client, channel) = session.register("editor.desktop", &launch.startup_id);

	session.manager.logout(0).unwrap();
	session.respond(&client, EndSessionResponse::ok());
	assert_eq!(
		channel.calls().last(),
		Some(&Call::EndSession(EndSessionFlags::SAVE))
	);
	session.respond(&client, EndSessionResponse::ok());
	assert!(session.manager.should_quit());

	let saved = SessionSave::new(dir.path()).load().unwrap();
	(dir, saved)
}

#[test]
fn registered_clients_are_saved_at_exit() {
	let (_dir, saved) = save_session(false);
	assert_eq!(saved.len(), 1);
	assert_eq!(saved[0].app_id, "editor.desktop");
	assert_eq!(saved[0].exec, vec!["editor"]);
	assert_eq!(saved[0].restart_style, RestartStyle::Never);
	assert!(!saved[0].startup_id.is_empty());
}

#[test]
fn login_sessions_are_never_saved() {
	let (_dir, saved) = save_session(true);
	assert!(saved.is_empty());
}

#[test]
fn failure_notification_hides_logout_for_login_sessions() {
	let mut wm = component("wm", Phase::WindowManager);
	wm.required = true;
	let fakes = Fakes::default();
	fakes.system.set_login_session(true);
	let mut manager = Manager::new(Settings::default(), fakes.backends());
	manager.fill(&[wm], Path::new("/nonexistent"));
	manager.start();
	for timer in fakes.scheduler.advance(PHASE_TIMEOUT) {
		manager.handle(Event::Timer(timer));
	}
	assert_eq!(fakes.dialogs.calls(), vec![DialogCall::FailWhale {
		allow_logout: false
	}]);
}
