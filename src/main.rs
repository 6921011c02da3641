// SPDX-License-Identifier: GPL-3.0-only
#[macro_use]
extern crate tracing;

mod app;
mod backend;
mod client;
mod config;
mod error;
mod event;
mod ids;
mod inhibitor;
mod manager;
mod notifications;
mod phase;
mod process;
mod service;
mod session_save;
mod shell;
mod store;
mod system;
mod systemd;
#[cfg(test)]
mod testing;
mod timer;

use async_signals::Signals;
use backend::Backends;
use clap::Parser;
use color_eyre::{
	eyre::{eyre, WrapErr},
	Result,
};
use config::SessionConfig;
use event::Event;
use futures_util::StreamExt;
use manager::Manager;
use process::ProcessLauncher;
use service::{BusSignals, DialogInterface, ManagerHandle, ManagerInterface};
use session_save::SessionSave;
use shell::ShellDialogs;
use std::{
	path::PathBuf,
	sync::{atomic::AtomicU32, Arc},
	time::Duration,
};
use system::LoginSystem;
use timer::TokioScheduler;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zbus::{Connection, ConnectionBuilder};

const DATA_DIR: &str = "session-manager";
const BUS_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
	/// Session file to load instead of the default one
	#[arg(long)]
	session: Option<PathBuf>,
	/// Enable debugging code
	#[arg(long)]
	debug: bool,
	/// Do not load user-specified components
	#[arg(long)]
	failsafe: bool,
	/// Show the failure notification for testing
	#[arg(long)]
	whale: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	color_eyre::install().wrap_err("failed to install color_eyre error handler")?;
	let args = Args::parse();

	let default_level = if args.debug {
		LevelFilter::DEBUG
	} else {
		LevelFilter::INFO
	};
	tracing_subscriber::registry()
		.with(fmt::layer())
		.with(
			EnvFilter::builder()
				.with_default_directive(default_level.into())
				.from_env_lossy(),
		)
		.try_init()
		.wrap_err("failed to initialize logger")?;

	if args.whale {
		let conn = Connection::session()
			.await
			.wrap_err("failed to connect to the session bus")?;
		return notifications::fail_whale(&conn, true, None).await;
	}

	info!("Starting session-manager");

	let config_path = args
		.session
		.clone()
		.or_else(SessionConfig::default_path)
		.ok_or_else(|| eyre!("unable to locate the session file"))?;
	let SessionConfig {
		settings,
		mut components,
	} = SessionConfig::load_or_default(&config_path)
		.wrap_err_with(|| format!("failed to load {}", config_path.display()))?;
	let config_dir = dirs::config_dir().unwrap_or_default();
	let session_save = dirs::data_dir().map(|dir| SessionSave::new(dir.join(DATA_DIR)));
	if settings.autosave && !args.failsafe {
		if let Some(session_save) = &session_save {
			match session_save.load() {
				Ok(saved) => components.extend(saved.iter().map(|client| client.to_component())),
				Err(error) => warn!("failed to restore the saved session: {}", error),
			}
		}
	}

	let token = CancellationToken::new();
	let (tx, mut rx) = mpsc::unbounded_channel();
	let (bus_tx, bus_rx) = mpsc::unbounded_channel();
	let handle = ManagerHandle::new(tx.clone());
	let inhibited_actions = Arc::new(AtomicU32::new(0));

	let conn = match acquire_bus(handle.clone(), bus_tx.clone(), inhibited_actions.clone()).await {
		Ok(conn) => conn,
		Err(error) => {
			error!("{:?}", error);
			if let Ok(conn) = Connection::session().await {
				if let Err(error) = notifications::fail_whale(&conn, true, None).await {
					warn!("{:?}", error);
				}
			}
			return Err(error);
		}
	};
	let system_conn = Connection::system()
		.await
		.wrap_err("failed to connect to the system bus")?;

	let (system, logout_action) = LoginSystem::new(system_conn.clone(), tx.clone()).await?;
	let dialogs = ShellDialogs::new(conn.clone(), tx.clone(), token.child_token()).await?;
	let backends = Backends {
		launcher: Box::new(ProcessLauncher::new(tx.clone(), &token)),
		scheduler: Box::new(TokioScheduler::new(tx.clone())),
		system: Box::new(system),
		dialogs: Box::new(dialogs),
		signals: Box::new(BusSignals::new(bus_tx.clone())),
	};

	let systemd_target = settings.systemd_target.clone();
	let mut manager = Manager::new(settings, backends);
	if let Some(session_save) = session_save {
		manager = manager.with_session_save(session_save);
	}
	manager.set_failsafe(args.failsafe);
	manager.fill(&components, &config_dir);

	tokio::spawn(service::run_bus_requests(
		conn.clone(),
		handle,
		inhibited_actions,
		systemd_target.clone(),
		bus_rx,
	));
	let name_owners = service::watch_name_owners(conn.clone(), tx.clone(), token.child_token());
	tokio::spawn(async move {
		if let Err(error) = name_owners.await {
			error!("failed to watch bus names: {}", error);
		}
	});
	tokio::spawn(app::watch_conditions(
		tx.clone(),
		manager.watched_conditions(),
		config_dir,
		token.child_token(),
	));
	tokio::spawn(forward_signals(tx));

	manager.start();
	while let Some(event) = rx.recv().await {
		manager.handle(event);
		if manager.should_quit() {
			break;
		}
	}
	info!("session ended");
	drop(manager);
	service::flush_bus_requests(&bus_tx, BUS_FLUSH_TIMEOUT).await;
	token.cancel();

	if let Some(unit) = systemd_target {
		if let Err(error) = systemd::stop_target(&conn, &unit).await {
			warn!("{:?}", error);
		}
	}
	let action = *logout_action.borrow();
	system::perform_logout_action(&system_conn, action).await
}

async fn acquire_bus(
	handle: ManagerHandle,
	signals: mpsc::UnboundedSender<service::BusRequest>,
	inhibited_actions: Arc<AtomicU32>,
) -> Result<Connection> {
	ConnectionBuilder::session()
		.wrap_err("failed to connect to the session bus")?
		.name(service::BUS_NAME)
		.wrap_err("invalid bus name")?
		.serve_at(
			ids::MANAGER_PATH,
			ManagerInterface::new(handle.clone(), signals, inhibited_actions),
		)
		.wrap_err("failed to serve the session manager interface")?
		.serve_at(ids::MANAGER_PATH, DialogInterface::new(handle))
		.wrap_err("failed to serve the dialog interface")?
		.build()
		.await
		.wrap_err_with(|| format!("failed to acquire {}", service::BUS_NAME))
}

/// SIGTERM and SIGINT end the session.
async fn forward_signals(tx: mpsc::UnboundedSender<Event>) {
	let mut signals = match Signals::new(vec![libc::SIGTERM, libc::SIGINT]) {
		Ok(signals) => signals,
		Err(error) => {
			error!("failed to watch for termination signals: {}", error);
			return;
		}
	};
	while let Some(signal) = signals.next().await {
		info!("received signal {}, ending the session", signal);
		if tx.send(Event::Terminate).is_err() {
			return;
		}
	}
}
