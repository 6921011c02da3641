// SPDX-License-Identifier: GPL-3.0-only
//! Power management and seat handling through logind and the display
//! manager.

use crate::{
	backend::{LoginManagerAction, System},
	event::Event,
};
use color_eyre::{eyre::WrapErr, Result};
use std::env;
use tokio::sync::{mpsc, watch};
use zbus::{dbus_proxy, zvariant::OwnedFd, Connection};

const SESSION_CLASS_VARIABLE: &str = "XDG_SESSION_CLASS";
const SEAT_PATH_VARIABLE: &str = "XDG_SEAT_PATH";

#[dbus_proxy(
	interface = "org.freedesktop.login1.Manager",
	default_service = "org.freedesktop.login1",
	default_path = "/org/freedesktop/login1"
)]
trait LoginManager {
	fn can_power_off(&self) -> zbus::Result<String>;
	fn can_reboot(&self) -> zbus::Result<String>;
	fn can_suspend(&self) -> zbus::Result<String>;
	fn can_hibernate(&self) -> zbus::Result<String>;
	fn power_off(&self, interactive: bool) -> zbus::Result<()>;
	fn reboot(&self, interactive: bool) -> zbus::Result<()>;
	fn suspend(&self, interactive: bool) -> zbus::Result<()>;
	fn hibernate(&self, interactive: bool) -> zbus::Result<()>;
	fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;
}

#[dbus_proxy(
	interface = "org.freedesktop.DisplayManager.Seat",
	default_service = "org.freedesktop.DisplayManager"
)]
trait DisplayManagerSeat {
	fn switch_to_greeter(&self) -> zbus::Result<()>;
}

/// logind answers "yes", "no", "challenge" or "na".
fn capability_allowed(answer: &str) -> bool {
	matches!(answer, "yes" | "challenge")
}

fn is_greeter(session_class: Option<&str>) -> bool {
	session_class == Some("greeter")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Capabilities {
	power_off: bool,
	reboot: bool,
	suspend: bool,
	hibernate: bool,
}

impl Capabilities {
	async fn query(proxy: &LoginManagerProxy<'_>) -> Self {
		async fn allowed(answer: zbus::Result<String>, what: &str) -> bool {
			match answer {
				Ok(answer) => capability_allowed(&answer),
				Err(error) => {
					warn!("failed to query whether {} is possible: {}", what, error);
					false
				}
			}
		}
		Self {
			power_off: allowed(proxy.can_power_off().await, "power off").await,
			reboot: allowed(proxy.can_reboot().await, "reboot").await,
			suspend: allowed(proxy.can_suspend().await, "suspend").await,
			hibernate: allowed(proxy.can_hibernate().await, "hibernate").await,
		}
	}
}

pub struct LoginSystem {
	conn: Connection,
	proxy: LoginManagerProxy<'static>,
	tx: mpsc::UnboundedSender<Event>,
	capabilities: Capabilities,
	login_session: bool,
	idle: mpsc::UnboundedSender<bool>,
	logout_action: watch::Sender<LoginManagerAction>,
}

impl LoginSystem {
	/// Connects to logind on `conn`, the system bus. The returned receiver
	/// holds the action left to the login manager once the session ends.
	pub async fn new(
		conn: Connection,
		tx: mpsc::UnboundedSender<Event>,
	) -> Result<(Self, watch::Receiver<LoginManagerAction>)> {
		let proxy = LoginManagerProxy::new(&conn)
			.await
			.wrap_err("failed to connect to org.freedesktop.login1.Manager")?;
		let capabilities = Capabilities::query(&proxy).await;
		debug!("system capabilities: {:?}", capabilities);

		let (idle, idle_rx) = mpsc::unbounded_channel();
		tokio::spawn(run_idle_inhibitor(proxy.clone(), idle_rx));
		let (logout_action, logout_action_rx) = watch::channel(LoginManagerAction::None);
		let login_session = is_greeter(env::var(SESSION_CLASS_VARIABLE).ok().as_deref());

		Ok((
			Self {
				conn,
				proxy,
				tx,
				capabilities,
				login_session,
				idle,
				logout_action,
			},
			logout_action_rx,
		))
	}

	/// Runs `request` in the background, reporting failure as `fallback`.
	fn request<F>(&self, what: &'static str, fallback: LoginManagerAction, request: F)
	where
		F: std::future::Future<Output = zbus::Result<()>> + Send + 'static,
	{
		let tx = self.tx.clone();
		tokio::spawn(async move {
			if let Err(error) = request.await {
				warn!("failed to {}: {}", what, error);
				if fallback != LoginManagerAction::None
					&& tx.send(Event::SystemRequestFailed(fallback)).is_err()
				{
					debug!("event loop gone before {} failed", what);
				}
			}
		});
	}
}

impl System for LoginSystem {
	fn can_shutdown(&self) -> bool {
		self.capabilities.power_off || self.capabilities.reboot
	}

	fn can_suspend(&self) -> bool {
		self.capabilities.suspend
	}

	fn can_hibernate(&self) -> bool {
		self.capabilities.hibernate
	}

	fn is_login_session(&self) -> bool {
		self.login_session
	}

	fn attempt_stop(&mut self) {
		let proxy = self.proxy.clone();
		self.request("power off", LoginManagerAction::Shutdown, async move {
			proxy.power_off(true).await
		});
	}

	fn attempt_restart(&mut self) {
		let proxy = self.proxy.clone();
		self.request("reboot", LoginManagerAction::Reboot, async move {
			proxy.reboot(true).await
		});
	}

	fn suspend(&mut self) {
		let proxy = self.proxy.clone();
		self.request("suspend", LoginManagerAction::None, async move {
			proxy.suspend(true).await
		});
	}

	fn hibernate(&mut self) {
		let proxy = self.proxy.clone();
		self.request("hibernate", LoginManagerAction::None, async move {
			proxy.hibernate(true).await
		});
	}

	fn switch_user(&mut self) {
		let Ok(seat) = env::var(SEAT_PATH_VARIABLE) else {
			warn!("unable to switch user: {} is not set", SEAT_PATH_VARIABLE);
			return;
		};
		let conn = self.conn.clone();
		self.request("switch user", LoginManagerAction::None, async move {
			DisplayManagerSeatProxy::builder(&conn)
				.path(seat)?
				.build()
				.await?
				.switch_to_greeter()
				.await
		});
	}

	fn set_idle_enabled(&mut self, enabled: bool) {
		if self.idle.send(enabled).is_err() {
			debug!("idle inhibitor task gone");
		}
	}

	fn set_logout_action(&mut self, action: LoginManagerAction) {
		self.logout_action.send_replace(action);
	}
}

/// Holds a logind idle inhibitor for as long as idle tracking is disabled.
async fn run_idle_inhibitor(proxy: LoginManagerProxy<'static>, mut rx: mpsc::UnboundedReceiver<bool>) {
	let mut inhibitor: Option<OwnedFd> = None;
	while let Some(enabled) = rx.recv().await {
		if enabled {
			if inhibitor.take().is_some() {
				debug!("idle tracking enabled");
			}
		} else if inhibitor.is_none() {
			match proxy
				.inhibit("idle", "session-manager", "An application inhibits idle", "block")
				.await
			{
				Ok(fd) => {
					debug!("idle tracking disabled");
					inhibitor = Some(fd);
				}
				Err(error) => warn!("failed to inhibit idle: {}", error),
			}
		}
	}
}

/// Carries out the action recorded for the login manager.
pub async fn perform_logout_action(conn: &Connection, action: LoginManagerAction) -> Result<()> {
	let proxy = LoginManagerProxy::new(conn)
		.await
		.wrap_err("failed to connect to org.freedesktop.login1.Manager")?;
	match action {
		LoginManagerAction::None => {}
		LoginManagerAction::Reboot => {
			info!("rebooting through the login manager");
			proxy.reboot(false).await.wrap_err("failed to reboot")?;
		}
		LoginManagerAction::Shutdown => {
			info!("powering off through the login manager");
			proxy.power_off(false).await.wrap_err("failed to power off")?;
		}
	}
	Ok(())
}
