// SPDX-License-Identifier: GPL-3.0-only
use crate::{
	backend::{LaunchRequest, Launcher},
	error::LaunchError,
	event::Event,
};
use std::{
	io,
	os::unix::process::ExitStatusExt,
	process::{ExitStatus, Stdio},
};
use tokio::{
	io::{AsyncBufReadExt, BufReader},
	process::{Child, Command},
	sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Environment variable carrying the startup id to launched components.
pub const STARTUP_ID_VARIABLE: &str = "DESKTOP_AUTOSTART_ID";

#[derive(Debug)]
pub enum ProcessEvent {
	Stdout(String),
	Stderr(String),
	Ended(Option<ExitStatus>),
}

pub struct ProcessHandler {
	tx: mpsc::UnboundedSender<ProcessEvent>,
	cancellation_token: CancellationToken,
}

impl ProcessHandler {
	pub fn new(tx: mpsc::UnboundedSender<ProcessEvent>, cancellation_token: &CancellationToken) -> Self {
		Self {
			tx,
			cancellation_token: cancellation_token.child_token(),
		}
	}

	/// Spawns the process and returns its pid. Output and the exit status
	/// are then reported as [`ProcessEvent`]s; a cancelled handler kills the
	/// process.
	pub fn run(
		self,
		executable: &str,
		args: &[String],
		env_vars: &[(String, String)],
	) -> io::Result<u32> {
		let mut child = Command::new(executable)
			.args(args)
			.envs(env_vars.iter().map(|(key, value)| (key, value)))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()?;
		let pid = child
			.id()
			.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "process exited before it was tracked"))?;
		let executable = executable.to_string();
		tokio::spawn(
			async move { self.watch(&mut child, &executable).await }.in_current_span(),
		);
		Ok(pid)
	}

	async fn watch(self, child: &mut Child, executable: &str) {
		let mut stdout = child.stdout.take().map(|stdout| BufReader::new(stdout).lines());
		let mut stderr = child.stderr.take().map(|stderr| BufReader::new(stderr).lines());
		loop {
			tokio::select! {
				status = child.wait() => {
					match status {
						Ok(status) => {
							info!("'{}' exited with status {}", executable, status);
							self.send(ProcessEvent::Ended(Some(status)));
						}
						Err(error) => {
							error!("failed to wait for '{}' to end: {}", executable, error);
							self.send(ProcessEvent::Ended(None));
						}
					}
					return;
				}
				Some(line) = next_line(&mut stdout) => match line {
					Ok(Some(line)) => self.send(ProcessEvent::Stdout(line)),
					Ok(None) => stdout = None,
					Err(error) => {
						warn!("failed to get stdout line from '{}': {}", executable, error);
						stdout = None;
					}
				},
				Some(line) = next_line(&mut stderr) => match line {
					Ok(Some(line)) => self.send(ProcessEvent::Stderr(line)),
					Ok(None) => stderr = None,
					Err(error) => {
						warn!("failed to get stderr line from '{}': {}", executable, error);
						stderr = None;
					}
				},
				_ = self.cancellation_token.cancelled() => {
					warn!("exiting '{}': cancelled", executable);
					return;
				}
			}
		}
	}

	fn send(&self, event: ProcessEvent) {
		if self.tx.send(event).is_err() {
			trace!("process event receiver dropped");
		}
	}
}

/// Next line of an output stream, or `None` once the stream is closed so
/// the matching `select!` branch is disabled.
async fn next_line<R>(
	lines: &mut Option<tokio::io::Lines<BufReader<R>>>,
) -> Option<io::Result<Option<String>>>
where
	R: tokio::io::AsyncRead + Unpin,
{
	match lines {
		Some(lines) => Some(lines.next_line().await),
		None => None,
	}
}

/// Spawns session components and reports their end to the event loop.
pub struct ProcessLauncher {
	tx: mpsc::UnboundedSender<Event>,
	token: CancellationToken,
}

impl ProcessLauncher {
	pub fn new(tx: mpsc::UnboundedSender<Event>, token: &CancellationToken) -> Self {
		Self {
			tx,
			token: token.clone(),
		}
	}
}

impl Launcher for ProcessLauncher {
	fn launch(&mut self, request: LaunchRequest<'_>) -> Result<u32, LaunchError> {
		let (executable, args) = request
			.argv
			.split_first()
			.ok_or_else(|| LaunchError::NoCommand(request.app.to_string()))?;
		let mut env_vars = request.environment.to_vec();
		env_vars.push((STARTUP_ID_VARIABLE.to_string(), request.startup_id.to_string()));

		let span = info_span!(parent: None, "app", id = request.app);
		let (tx, mut rx) = mpsc::unbounded_channel();
		let pid = span
			.in_scope(|| ProcessHandler::new(tx, &self.token).run(executable, args, &env_vars))
			.map_err(|source| LaunchError::Spawn {
				command: request.argv.join(" "),
				source,
			})?;
		info!("launched '{}' as pid {}", request.app, pid);

		let app = request.app.to_string();
		let events = self.tx.clone();
		tokio::spawn(
			async move {
				while let Some(event) = rx.recv().await {
					match event {
						ProcessEvent::Stdout(line) => info!("{}", line),
						ProcessEvent::Stderr(line) => warn!("{}", line),
						ProcessEvent::Ended(status) => {
							let event = exit_event(app, pid, status);
							if events.send(event).is_err() {
								debug!("event loop gone before process {} ended", pid);
							}
							return;
						}
					}
				}
			}
			.instrument(span),
		);
		Ok(pid)
	}

	fn terminate(&mut self, pid: u32) -> Result<(), LaunchError> {
		let target = libc::pid_t::try_from(pid).map_err(|_| LaunchError::Kill {
			pid,
			source: io::Error::from(io::ErrorKind::InvalidInput),
		})?;
		debug!("sending SIGTERM to {}", pid);
		// SAFETY: kill(2) takes plain integers and touches no memory of ours.
		if unsafe { libc::kill(target, libc::SIGTERM) } != 0 {
			return Err(LaunchError::Kill {
				pid,
				source: io::Error::last_os_error(),
			});
		}
		Ok(())
	}
}

fn exit_event(app: String, pid: u32, status: Option<ExitStatus>) -> Event {
	match status {
		Some(status) => match (status.code(), status.signal()) {
			(Some(code), _) => Event::ProcessExited { app, pid, code },
			(None, Some(signal)) => Event::ProcessDied { app, pid, signal },
			(None, None) => Event::ProcessExited { app, pid, code: -1 },
		},
		None => Event::ProcessExited { app, pid, code: -1 },
	}
}
