// SPDX-License-Identifier: GPL-3.0-only

use color_eyre::{eyre::WrapErr, Result};
use systemd_client::manager::SystemdManagerProxy;

async fn manager(conn: &zbus::Connection) -> Result<SystemdManagerProxy<'static>> {
	SystemdManagerProxy::new(conn)
		.await
		.wrap_err("failed to connect to org.freedesktop.systemd1.Manager")
}

pub async fn start_target(conn: &zbus::Connection, unit: &str) -> Result<()> {
	manager(conn)
		.await?
		.start_unit(unit, "replace")
		.await
		.wrap_err_with(|| format!("failed to start {}", unit))?;
	info!("started {}", unit);
	Ok(())
}

pub async fn stop_target(conn: &zbus::Connection, unit: &str) -> Result<()> {
	manager(conn)
		.await?
		.stop_unit(unit, "replace")
		.await
		.wrap_err_with(|| format!("failed to stop {}", unit))?;
	info!("stopped {}", unit);
	Ok(())
}
