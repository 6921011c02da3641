// SPDX-License-Identifier: GPL-3.0-only
//! Logout and inhibit dialogs shown by the shell's end-session dialog.

use crate::{
	backend::{Dialogs, InhibitAction, LogoutDialogKind, LogoutResponse},
	event::Event,
	notifications,
};
use color_eyre::{eyre::WrapErr, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zbus::{dbus_proxy, zvariant::ObjectPath, CacheProperties, Connection};

/// Seconds before the dialog acts on its own.
const AUTOMATIC_ACTION_TIMEOUT: u32 = 60;

#[dbus_proxy(
	interface = "org.gnome.SessionManager.EndSessionDialog",
	default_service = "org.cinnamon.Shell",
	default_path = "/org/gnome/SessionManager/EndSessionDialog"
)]
trait EndSessionDialog {
	fn open(
		&self,
		kind: u32,
		timestamp: u32,
		seconds_to_stay_open: u32,
		inhibitor_object_paths: &[ObjectPath<'_>],
	) -> zbus::Result<()>;

	#[dbus_proxy(signal)]
	fn canceled(&self) -> zbus::Result<()>;
	#[dbus_proxy(signal)]
	fn closed(&self) -> zbus::Result<()>;
	#[dbus_proxy(signal)]
	fn confirmed_logout(&self) -> zbus::Result<()>;
	#[dbus_proxy(signal)]
	fn confirmed_reboot(&self) -> zbus::Result<()>;
	#[dbus_proxy(signal)]
	fn confirmed_shutdown(&self) -> zbus::Result<()>;
}

/// Dialog type understood by `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum DialogType {
	Logout = 0,
	Shutdown = 1,
	Restart = 2,
}

impl From<LogoutDialogKind> for DialogType {
	fn from(kind: LogoutDialogKind) -> Self {
		match kind {
			LogoutDialogKind::Logout => Self::Logout,
			LogoutDialogKind::Shutdown => Self::Shutdown,
			LogoutDialogKind::Reboot => Self::Restart,
		}
	}
}

impl DialogType {
	/// The end-session dialog only knows about ending the session.
	fn for_inhibited(action: InhibitAction) -> Option<Self> {
		match action {
			InhibitAction::Logout => Some(Self::Logout),
			InhibitAction::Shutdown => Some(Self::Shutdown),
			InhibitAction::Reboot => Some(Self::Restart),
			InhibitAction::Suspend | InhibitAction::Hibernate | InhibitAction::SwitchUser => None,
		}
	}
}

#[derive(Debug)]
enum Request {
	OpenLogout(LogoutDialogKind),
	OpenInhibit(InhibitAction, Vec<String>),
	PresentInhibit(Vec<String>),
	CloseInhibit,
	FailWhale(bool),
}

/// What the open dialog is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
	Logout(LogoutDialogKind),
	Inhibit(DialogType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
	Canceled,
	Closed,
	ConfirmedLogout,
	ConfirmedShutdown,
	ConfirmedReboot,
}

/// Event for the manager when the open dialog is answered.
fn answer_event(open: Open, answer: Answer) -> Option<Event> {
	match (open, answer) {
		(_, Answer::Closed) => None,
		(Open::Logout(_), Answer::Canceled) => Some(Event::LogoutResponse(LogoutResponse::Cancel)),
		(Open::Logout(_), Answer::ConfirmedLogout) => Some(Event::LogoutResponse(LogoutResponse::Logout)),
		(Open::Logout(_), Answer::ConfirmedShutdown) => {
			Some(Event::LogoutResponse(LogoutResponse::Shutdown))
		}
		(Open::Logout(_), Answer::ConfirmedReboot) => Some(Event::LogoutResponse(LogoutResponse::Reboot)),
		(Open::Inhibit(_), Answer::Canceled) => Some(Event::InhibitResponse { accepted: false }),
		(Open::Inhibit(_), _) => Some(Event::InhibitResponse { accepted: true }),
	}
}

/// Event standing in for a dialog the shell could not show.
fn fallback_event(open: Open) -> Event {
	match open {
		Open::Logout(kind) => Event::LogoutResponse(match kind {
			LogoutDialogKind::Logout => LogoutResponse::Logout,
			LogoutDialogKind::Shutdown => LogoutResponse::Shutdown,
			LogoutDialogKind::Reboot => LogoutResponse::Reboot,
		}),
		Open::Inhibit(_) => Event::InhibitResponse { accepted: false },
	}
}

pub struct ShellDialogs {
	requests: mpsc::UnboundedSender<Request>,
}

impl ShellDialogs {
	pub async fn new(
		conn: Connection,
		tx: mpsc::UnboundedSender<Event>,
		token: CancellationToken,
	) -> Result<Self> {
		let proxy = EndSessionDialogProxy::builder(&conn)
			.cache_properties(CacheProperties::No)
			.build()
			.await
			.wrap_err("failed to create the end-session dialog proxy")?;
		let (requests, rx) = mpsc::unbounded_channel();
		let worker = DialogWorker {
			conn,
			proxy,
			tx,
			open: None,
		};
		tokio::spawn(async move {
			if let Err(error) = worker.run(rx, token).await {
				error!("end-session dialog handling stopped: {:?}", error);
			}
		});
		Ok(Self { requests })
	}

	fn request(&self, request: Request) {
		if self.requests.send(request).is_err() {
			warn!("end-session dialog handling is not running");
		}
	}
}

impl Dialogs for ShellDialogs {
	fn open_logout(&mut self, kind: LogoutDialogKind) {
		self.request(Request::OpenLogout(kind));
	}

	fn open_inhibit(&mut self, action: InhibitAction, inhibitors: Vec<String>) {
		self.request(Request::OpenInhibit(action, inhibitors));
	}

	fn present_inhibit(&mut self, inhibitors: Vec<String>) {
		self.request(Request::PresentInhibit(inhibitors));
	}

	fn close_inhibit(&mut self) {
		self.request(Request::CloseInhibit);
	}

	fn fail_whale(&mut self, allow_logout: bool) {
		self.request(Request::FailWhale(allow_logout));
	}
}

struct DialogWorker {
	conn: Connection,
	proxy: EndSessionDialogProxy<'static>,
	tx: mpsc::UnboundedSender<Event>,
	open: Option<Open>,
}

impl DialogWorker {
	async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>, token: CancellationToken) -> Result<()> {
		let mut canceled = self.proxy.receive_canceled().await?;
		let mut closed = self.proxy.receive_closed().await?;
		let mut confirmed_logout = self.proxy.receive_confirmed_logout().await?;
		let mut confirmed_shutdown = self.proxy.receive_confirmed_shutdown().await?;
		let mut confirmed_reboot = self.proxy.receive_confirmed_reboot().await?;
		loop {
			let answer = tokio::select! {
				request = rx.recv() => match request {
					Some(request) => {
						self.handle(request).await;
						continue;
					}
					None => return Ok(()),
				},
				Some(_) = canceled.next() => Answer::Canceled,
				Some(_) = closed.next() => Answer::Closed,
				Some(_) = confirmed_logout.next() => Answer::ConfirmedLogout,
				Some(_) = confirmed_shutdown.next() => Answer::ConfirmedShutdown,
				Some(_) = confirmed_reboot.next() => Answer::ConfirmedReboot,
				_ = token.cancelled() => return Ok(()),
			};
			let Some(open) = self.open.take() else {
				debug!("ignoring {:?} from the end-session dialog", answer);
				continue;
			};
			debug!("end-session dialog answered {:?}", answer);
			if let Some(event) = answer_event(open, answer) {
				self.send(event);
			}
		}
	}

	async fn handle(&mut self, request: Request) {
		match request {
			Request::OpenLogout(kind) => {
				self.show(Open::Logout(kind), DialogType::from(kind), &[]).await;
			}
			Request::OpenInhibit(action, inhibitors) => match DialogType::for_inhibited(action) {
				Some(kind) => self.show(Open::Inhibit(kind), kind, &inhibitors).await,
				None => {
					info!("no dialog for inhibited {:?}, leaving it inhibited", action);
					self.send(Event::InhibitResponse { accepted: false });
				}
			},
			Request::PresentInhibit(inhibitors) => {
				if let Some(Open::Inhibit(kind)) = self.open {
					self.show(Open::Inhibit(kind), kind, &inhibitors).await;
				}
			}
			Request::CloseInhibit => {
				if matches!(self.open, Some(Open::Inhibit(_))) {
					self.open = None;
				}
			}
			Request::FailWhale(allow_logout) => {
				let conn = self.conn.clone();
				let tx = self.tx.clone();
				tokio::spawn(async move {
					if let Err(error) = notifications::fail_whale(&conn, allow_logout, Some(tx)).await {
						error!("failed to tell the user about the failure: {:?}", error);
					}
				});
			}
		}
	}

	async fn show(&mut self, open: Open, kind: DialogType, inhibitors: &[String]) {
		let paths: Vec<ObjectPath<'_>> = inhibitors
			.iter()
			.filter_map(|id| match ObjectPath::try_from(id.as_str()) {
				Ok(path) => Some(path),
				Err(error) => {
					warn!("skipping inhibitor {}: {}", id, error);
					None
				}
			})
			.collect();
		match self.proxy.open(kind as u32, 0, AUTOMATIC_ACTION_TIMEOUT, &paths).await {
			Ok(()) => self.open = Some(open),
			Err(error) => {
				warn!("unable to show the end-session dialog: {}", error);
				self.open = None;
				self.send(fallback_event(open));
			}
		}
	}

	fn send(&self, event: Event) {
		if self.tx.send(event).is_err() {
			debug!("event loop gone before the dialog answered");
		}
	}
}
