// SPDX-License-Identifier: GPL-3.0-only
//! The `org.gnome.SessionManager` bus surface.
//!
//! Interface methods never touch the manager directly: each call is shipped
//! to the event loop as an `Event::Call` and answered over a oneshot.
//! Outgoing signals and object exports go through a single queue so they
//! reach the bus in the order the manager produced them.

use crate::{
	backend::{LogoutResponse, SessionSignals},
	client::{Client, ClientChannel, ClientKind, EndSessionFlags, EndSessionResponse},
	error::{ClientError, ManagerError},
	event::Event,
	ids::MANAGER_PATH,
	inhibitor::{Inhibitor, InhibitorFlags},
	manager::Manager,
	systemd,
};
use futures_util::StreamExt;
use std::{
	future::Future,
	sync::{
		atomic::{AtomicU32, Ordering},
		Arc,
	},
	time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use zbus::{
	dbus_interface, fdo,
	zvariant::{ObjectPath, OwnedObjectPath},
	Connection, Interface, MessageHeader, ObjectServer, SignalContext,
};

pub const BUS_NAME: &str = "org.gnome.SessionManager";

#[derive(Debug, zbus::DBusError)]
#[dbus_error(prefix = "org.gnome.SessionManager")]
pub enum BusError {
	#[dbus_error(zbus_error)]
	ZBus(zbus::Error),
	GeneralError(String),
	NotInInitialization(String),
	NotInRunning(String),
	AlreadyRegistered(String),
	NotRegistered(String),
	InvalidOption(String),
	LockedDown(String),
}

impl From<ManagerError> for BusError {
	fn from(error: ManagerError) -> Self {
		let message = error.to_string();
		match error {
			ManagerError::General(_) => BusError::GeneralError(message),
			ManagerError::NotInInitialization(_) => BusError::NotInInitialization(message),
			ManagerError::NotInRunning(_) => BusError::NotInRunning(message),
			ManagerError::AlreadyRegistered => BusError::AlreadyRegistered(message),
			ManagerError::NotRegistered => BusError::NotRegistered(message),
			ManagerError::InvalidOption(_) => BusError::InvalidOption(message),
			ManagerError::LockedDown => BusError::LockedDown(message),
		}
	}
}

impl From<zbus::zvariant::Error> for BusError {
	fn from(error: zbus::zvariant::Error) -> Self {
		BusError::ZBus(error.into())
	}
}

/// Sends closures to the event loop and waits for their result.
#[derive(Clone)]
pub struct ManagerHandle {
	tx: mpsc::UnboundedSender<Event>,
}

impl ManagerHandle {
	pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
		Self { tx }
	}

	pub async fn call<T, F>(&self, f: F) -> Result<T, BusError>
	where
		T: Send + 'static,
		F: FnOnce(&mut Manager) -> T + Send + 'static,
	{
		let (reply_tx, reply_rx) = oneshot::channel();
		self.tx
			.send(Event::Call(Box::new(move |manager| {
				let _ = reply_tx.send(f(manager));
			})))
			.map_err(|_| BusError::GeneralError("the session manager is exiting".into()))?;
		reply_rx
			.await
			.map_err(|_| BusError::GeneralError("the session manager is exiting".into()))
	}
}

fn object_paths(ids: Vec<String>) -> Result<Vec<OwnedObjectPath>, BusError> {
	ids.into_iter()
		.map(|id| OwnedObjectPath::try_from(id).map_err(BusError::from))
		.collect()
}

fn sender(header: &MessageHeader<'_>) -> Option<String> {
	header.sender().ok().flatten().map(|sender| sender.to_string())
}

pub struct ManagerInterface {
	handle: ManagerHandle,
	signals: mpsc::UnboundedSender<BusRequest>,
	inhibited_actions: Arc<AtomicU32>,
}

impl ManagerInterface {
	pub fn new(
		handle: ManagerHandle,
		signals: mpsc::UnboundedSender<BusRequest>,
		inhibited_actions: Arc<AtomicU32>,
	) -> Self {
		Self {
			handle,
			signals,
			inhibited_actions,
		}
	}
}

#[dbus_interface(name = "org.gnome.SessionManager")]
impl ManagerInterface {
	async fn register_client(
		&self,
		#[zbus(header)] header: MessageHeader<'_>,
		app_id: String,
		client_startup_id: String,
	) -> Result<OwnedObjectPath, BusError> {
		let bus_name = sender(&header)
			.ok_or_else(|| BusError::GeneralError("Unable to register client: no sender".into()))?;
		let signals = self.signals.clone();
		let id = self
			.handle
			.call(move |manager| {
				manager.register_client(
					&app_id,
					&client_startup_id,
					ClientKind::Bus { bus_name },
					move |id| Box::new(BusClientChannel::new(id, signals)),
				)
			})
			.await??;
		Ok(OwnedObjectPath::try_from(id)?)
	}

	async fn unregister_client(&self, client_id: ObjectPath<'_>) -> Result<(), BusError> {
		let id = client_id.to_string();
		Ok(self
			.handle
			.call(move |manager| manager.unregister_client(&id))
			.await??)
	}

	async fn inhibit(
		&self,
		#[zbus(header)] header: MessageHeader<'_>,
		app_id: String,
		toplevel_xid: u32,
		reason: String,
		flags: u32,
	) -> Result<u32, BusError> {
		let bus_name = sender(&header);
		Ok(self
			.handle
			.call(move |manager| manager.inhibit(&app_id, toplevel_xid, &reason, flags, bus_name))
			.await??)
	}

	async fn uninhibit(&self, inhibit_cookie: u32) -> Result<(), BusError> {
		Ok(self
			.handle
			.call(move |manager| manager.uninhibit(inhibit_cookie))
			.await??)
	}

	async fn is_inhibited(&self, flags: u32) -> Result<bool, BusError> {
		self.handle.call(move |manager| manager.is_inhibited(flags)).await
	}

	async fn get_clients(&self) -> Result<Vec<OwnedObjectPath>, BusError> {
		object_paths(self.handle.call(|manager| manager.get_clients()).await?)
	}

	async fn get_inhibitors(&self) -> Result<Vec<OwnedObjectPath>, BusError> {
		object_paths(self.handle.call(|manager| manager.get_inhibitors()).await?)
	}

	async fn is_autostart_condition_handled(&self, condition: String) -> Result<bool, BusError> {
		self.handle
			.call(move |manager| manager.is_autostart_condition_handled(&condition))
			.await
	}

	async fn shutdown(&self) -> Result<(), BusError> {
		Ok(self.handle.call(|manager| manager.shutdown()).await??)
	}

	async fn reboot(&self) -> Result<(), BusError> {
		Ok(self.handle.call(|manager| manager.reboot()).await??)
	}

	async fn can_shutdown(&self) -> Result<bool, BusError> {
		self.handle.call(|manager| manager.can_shutdown()).await
	}

	async fn logout(&self, mode: u32) -> Result<(), BusError> {
		Ok(self.handle.call(move |manager| manager.logout(mode)).await??)
	}

	async fn is_session_running(&self) -> Result<bool, BusError> {
		self.handle.call(|manager| manager.is_session_running()).await
	}

	async fn request_shutdown(&self) -> Result<(), BusError> {
		Ok(self.handle.call(|manager| manager.request_shutdown()).await??)
	}

	async fn request_reboot(&self) -> Result<(), BusError> {
		Ok(self.handle.call(|manager| manager.request_reboot()).await??)
	}

	async fn setenv(&self, variable: String, value: String) -> Result<(), BusError> {
		Ok(self
			.handle
			.call(move |manager| manager.setenv(&variable, &value))
			.await??)
	}

	async fn initialization_error(&self, message: String, fatal: bool) -> Result<(), BusError> {
		Ok(self
			.handle
			.call(move |manager| manager.initialization_error(&message, fatal))
			.await??)
	}

	#[dbus_interface(property)]
	fn inhibited_actions(&self) -> u32 {
		self.inhibited_actions.load(Ordering::Relaxed)
	}

	#[dbus_interface(signal)]
	async fn session_running(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn client_added(ctxt: &SignalContext<'_>, id: ObjectPath<'_>) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn client_removed(ctxt: &SignalContext<'_>, id: ObjectPath<'_>) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn inhibitor_added(ctxt: &SignalContext<'_>, id: ObjectPath<'_>) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn inhibitor_removed(ctxt: &SignalContext<'_>, id: ObjectPath<'_>) -> zbus::Result<()>;
}

/// Choices made in a quit dialog that the shell's end-session dialog
/// cannot report.
pub struct DialogInterface {
	handle: ManagerHandle,
}

impl DialogInterface {
	pub fn new(handle: ManagerHandle) -> Self {
		Self { handle }
	}

	async fn respond(&self, response: LogoutResponse) -> Result<(), BusError> {
		self.handle
			.call(move |manager| manager.handle(Event::LogoutResponse(response)))
			.await
	}
}

#[dbus_interface(name = "org.cinnamon.SessionManager.DialogPrivate")]
impl DialogInterface {
	async fn suspend(&self) -> Result<(), BusError> {
		self.respond(LogoutResponse::Suspend).await
	}

	async fn hibernate(&self) -> Result<(), BusError> {
		self.respond(LogoutResponse::Hibernate).await
	}

	async fn switch_user(&self) -> Result<(), BusError> {
		self.respond(LogoutResponse::SwitchUser).await
	}
}

pub struct ClientInterface {
	id: String,
	handle: ManagerHandle,
}

impl ClientInterface {
	async fn with_client<T, F>(&self, f: F) -> Result<T, BusError>
	where
		T: Send + 'static,
		F: FnOnce(&Client) -> T + Send + 'static,
	{
		let id = self.id.clone();
		self.handle
			.call(move |manager| manager.client(&id).map(f))
			.await?
			.ok_or_else(|| BusError::from(ManagerError::NotRegistered))
	}
}

#[dbus_interface(name = "org.gnome.SessionManager.Client")]
impl ClientInterface {
	async fn get_app_id(&self) -> Result<String, BusError> {
		self.with_client(|client| client.app_id().unwrap_or_default().to_string())
			.await
	}

	async fn get_startup_id(&self) -> Result<String, BusError> {
		self.with_client(|client| client.startup_id().to_string())
			.await
	}

	async fn get_restart_style_hint(&self) -> Result<u32, BusError> {
		self.with_client(|client| client.restart_style_hint().as_u32())
			.await
	}

	async fn get_status(&self) -> Result<u32, BusError> {
		self.with_client(|client| client.status().as_u32()).await
	}

	async fn stop(&self) -> Result<(), BusError> {
		let id = self.id.clone();
		Ok(self.handle.call(move |manager| manager.client_stop(&id)).await??)
	}
}

pub struct ClientPrivateInterface {
	id: String,
	handle: ManagerHandle,
}

#[dbus_interface(name = "org.gnome.SessionManager.ClientPrivate")]
impl ClientPrivateInterface {
	async fn end_session_response(&self, is_ok: bool, reason: String) -> Result<(), BusError> {
		let id = self.id.clone();
		let response = EndSessionResponse {
			is_ok,
			reason: Some(reason),
			..EndSessionResponse::default()
		};
		self.handle
			.call(move |manager| manager.end_session_response(&id, response))
			.await
	}

	#[dbus_interface(signal)]
	async fn query_end_session(ctxt: &SignalContext<'_>, flags: u32) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn end_session(ctxt: &SignalContext<'_>, flags: u32) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn cancel_end_session(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

	#[dbus_interface(signal)]
	async fn stop(ctxt: &SignalContext<'_>) -> zbus::Result<()>;
}

/// Snapshot of an inhibitor; inhibitors never change once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InhibitorInterface {
	app_id: String,
	client_id: String,
	reason: String,
	flags: u32,
	toplevel_xid: u32,
}

impl From<&Inhibitor> for InhibitorInterface {
	fn from(inhibitor: &Inhibitor) -> Self {
		Self {
			app_id: inhibitor.app_id().to_string(),
			client_id: inhibitor.client_id().unwrap_or("/").to_string(),
			reason: inhibitor.reason().to_string(),
			flags: inhibitor.flags().bits(),
			toplevel_xid: inhibitor.toplevel_xid(),
		}
	}
}

#[dbus_interface(name = "org.gnome.SessionManager.Inhibitor")]
impl InhibitorInterface {
	fn get_app_id(&self) -> String {
		self.app_id.clone()
	}

	fn get_client_id(&self) -> Result<OwnedObjectPath, BusError> {
		Ok(OwnedObjectPath::try_from(self.client_id.clone())?)
	}

	fn get_reason(&self) -> String {
		self.reason.clone()
	}

	fn get_flags(&self) -> u32 {
		self.flags
	}

	fn get_toplevel_xid(&self) -> u32 {
		self.toplevel_xid
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
	QueryEndSession(u32),
	EndSession(u32),
	CancelEndSession,
	Stop,
}

/// Work for the bus task, in the order the manager produced it.
#[derive(Debug)]
pub enum BusRequest {
	SessionRunning,
	ClientAdded { id: String, export: bool },
	ClientRemoved(String),
	InhibitorAdded { id: String, inhibitor: InhibitorInterface },
	InhibitorRemoved(String),
	InhibitedActions(u32),
	Client { id: String, signal: ClientSignal },
	/// Answered once every request queued before it has been handled.
	Sync(oneshot::Sender<()>),
}

/// Callback channel of a client registered over the bus.
pub struct BusClientChannel {
	id: String,
	tx: mpsc::UnboundedSender<BusRequest>,
}

impl BusClientChannel {
	pub fn new(id: &str, tx: mpsc::UnboundedSender<BusRequest>) -> Self {
		Self { id: id.to_string(), tx }
	}

	fn emit(&self, signal: ClientSignal) -> Result<(), ClientError> {
		self.tx
			.send(BusRequest::Client {
				id: self.id.clone(),
				signal,
			})
			.map_err(|_| ClientError::Unreachable {
				id: self.id.clone(),
				reason: "bus connection closed".into(),
			})
	}
}

impl ClientChannel for BusClientChannel {
	fn query_end_session(&self, flags: EndSessionFlags) -> Result<(), ClientError> {
		self.emit(ClientSignal::QueryEndSession(flags.bits()))
	}

	fn end_session(&self, flags: EndSessionFlags) -> Result<(), ClientError> {
		self.emit(ClientSignal::EndSession(flags.bits()))
	}

	fn cancel_end_session(&self) -> Result<(), ClientError> {
		self.emit(ClientSignal::CancelEndSession)
	}

	fn stop(&self) -> Result<(), ClientError> {
		self.emit(ClientSignal::Stop)
	}
}

/// Manager notifications forwarded to the bus task.
pub struct BusSignals {
	tx: mpsc::UnboundedSender<BusRequest>,
}

impl BusSignals {
	pub fn new(tx: mpsc::UnboundedSender<BusRequest>) -> Self {
		Self { tx }
	}

	fn send(&self, request: BusRequest) {
		if self.tx.send(request).is_err() {
			debug!("bus task gone, dropping notification");
		}
	}
}

impl SessionSignals for BusSignals {
	fn session_running(&mut self) {
		self.send(BusRequest::SessionRunning);
	}

	fn client_added(&mut self, client: &Client) {
		self.send(BusRequest::ClientAdded {
			id: client.id().to_string(),
			export: client.bus_name().is_some(),
		});
	}

	fn client_removed(&mut self, id: &str) {
		self.send(BusRequest::ClientRemoved(id.to_string()));
	}

	fn inhibitor_added(&mut self, inhibitor: &Inhibitor) {
		self.send(BusRequest::InhibitorAdded {
			id: inhibitor.id().to_string(),
			inhibitor: InhibitorInterface::from(inhibitor),
		});
	}

	fn inhibitor_removed(&mut self, id: &str) {
		self.send(BusRequest::InhibitorRemoved(id.to_string()));
	}

	fn inhibited_actions_changed(&mut self, flags: InhibitorFlags) {
		self.send(BusRequest::InhibitedActions(flags.bits()));
	}
}

/// Drains [`BusRequest`]s until the manager side goes away.
pub async fn run_bus_requests(
	conn: Connection,
	handle: ManagerHandle,
	inhibited_actions: Arc<AtomicU32>,
	systemd_target: Option<String>,
	rx: mpsc::UnboundedReceiver<BusRequest>,
) {
	let (conn, handle, inhibited_actions) = (&conn, &handle, &*inhibited_actions);
	let systemd_target = systemd_target.as_deref();
	drain_requests(rx, move |request| {
		process_request(conn, handle, inhibited_actions, systemd_target, request)
	})
	.await;
}

async fn drain_requests<F, Fut>(mut rx: mpsc::UnboundedReceiver<BusRequest>, mut process: F)
where
	F: FnMut(BusRequest) -> Fut,
	Fut: Future<Output = zbus::Result<()>>,
{
	while let Some(request) = rx.recv().await {
		if let BusRequest::Sync(done) = request {
			let _ = done.send(());
			continue;
		}
		if let Err(error) = process(request).await {
			warn!("failed to update the bus: {}", error);
		}
	}
}

/// Waits until everything queued for the bus so far has been sent.
pub async fn flush_bus_requests(tx: &mpsc::UnboundedSender<BusRequest>, timeout: Duration) {
	let (done_tx, done_rx) = oneshot::channel();
	if tx.send(BusRequest::Sync(done_tx)).is_err() {
		return;
	}
	if tokio::time::timeout(timeout, done_rx).await.is_err() {
		warn!("timed out waiting for pending bus signals");
	}
}

async fn process_request(
	conn: &Connection,
	handle: &ManagerHandle,
	inhibited_actions: &AtomicU32,
	systemd_target: Option<&str>,
	request: BusRequest,
) -> zbus::Result<()> {
	let manager = SignalContext::new(conn, MANAGER_PATH)?;
	let server = conn.object_server();
	match request {
		BusRequest::SessionRunning => {
			ManagerInterface::session_running(&manager).await?;
			if let Some(unit) = systemd_target {
				if let Err(error) = systemd::start_target(conn, unit).await {
					warn!("{:?}", error);
				}
			}
		}
		BusRequest::ClientAdded { id, export } => {
			if export {
				server
					.at(id.as_str(), ClientInterface {
						id: id.clone(),
						handle: handle.clone(),
					})
					.await?;
				server
					.at(id.as_str(), ClientPrivateInterface {
						id: id.clone(),
						handle: handle.clone(),
					})
					.await?;
			}
			ManagerInterface::client_added(&manager, ObjectPath::try_from(id.as_str())?).await?;
		}
		BusRequest::ClientRemoved(id) => {
			unexport::<ClientInterface>(&server, &id).await?;
			unexport::<ClientPrivateInterface>(&server, &id).await?;
			ManagerInterface::client_removed(&manager, ObjectPath::try_from(id.as_str())?).await?;
		}
		BusRequest::InhibitorAdded { id, inhibitor } => {
			server.at(id.as_str(), inhibitor).await?;
			ManagerInterface::inhibitor_added(&manager, ObjectPath::try_from(id.as_str())?)
				.await?;
		}
		BusRequest::InhibitorRemoved(id) => {
			unexport::<InhibitorInterface>(&server, &id).await?;
			ManagerInterface::inhibitor_removed(&manager, ObjectPath::try_from(id.as_str())?)
				.await?;
		}
		BusRequest::InhibitedActions(flags) => {
			inhibited_actions.store(flags, Ordering::Relaxed);
			let iface = server
				.interface::<_, ManagerInterface>(MANAGER_PATH)
				.await?;
			iface
				.get()
				.await
				.inhibited_actions_changed(iface.signal_context())
				.await?;
		}
		BusRequest::Sync(done) => {
			let _ = done.send(());
		}
		BusRequest::Client { id, signal } => {
			let ctxt = SignalContext::new(conn, id.as_str())?;
			match signal {
				ClientSignal::QueryEndSession(flags) => {
					ClientPrivateInterface::query_end_session(&ctxt, flags).await?
				}
				ClientSignal::EndSession(flags) => {
					ClientPrivateInterface::end_session(&ctxt, flags).await?
				}
				ClientSignal::CancelEndSession => {
					ClientPrivateInterface::cancel_end_session(&ctxt).await?
				}
				ClientSignal::Stop => ClientPrivateInterface::stop(&ctxt).await?,
			}
		}
	}
	Ok(())
}

/// Legacy clients were never exported.
async fn unexport<I: Interface>(server: &ObjectServer, path: &str) -> zbus::Result<()> {
	match server.remove::<I, _>(path).await {
		Ok(_) | Err(zbus::Error::InterfaceNotFound) => Ok(()),
		Err(error) => Err(error),
	}
}

/// Reports every unique bus name that loses its owner.
pub async fn watch_name_owners(
	conn: Connection,
	tx: mpsc::UnboundedSender<Event>,
	token: CancellationToken,
) -> zbus::Result<()> {
	let dbus = fdo::DBusProxy::new(&conn).await?;
	let mut changes = dbus.receive_name_owner_changed().await?;
	loop {
		tokio::select! {
			change = changes.next() => {
				let Some(change) = change else {
					return Ok(());
				};
				let args = change.args()?;
				let name = args.name().to_string();
				if !name.starts_with(':') || args.new_owner().is_some() {
					continue;
				}
				trace!("bus name {} vanished", name);
				if tx.send(Event::NameVanished(name)).is_err() {
					return Ok(());
				}
			}
			_ = token.cancelled() => return Ok(()),
		}
	}
}
