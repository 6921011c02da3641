// SPDX-License-Identifier: GPL-3.0-only
//! Desktop notification shown when a required component fails.

use crate::event::Event;
use color_eyre::{eyre::WrapErr, Result};
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use zbus::{dbus_proxy, zvariant::Value, Connection};

const APP_NAME: &str = "session-manager";
const LOG_OUT_ACTION: &str = "log-out";
const SUMMARY: &str = "Oh no! Something has gone wrong.";
const BODY_LOG_OUT: &str =
	"A problem has occurred and the system can't recover. Please log out and try again.";
const BODY_CONTACT_ADMIN: &str = "A problem has occurred and the system can't recover. Please contact a system administrator.";
/// Urgency hint value for critical notifications.
const URGENCY_CRITICAL: u8 = 2;

#[dbus_proxy(
	interface = "org.freedesktop.Notifications",
	default_service = "org.freedesktop.Notifications",
	default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
	#[allow(clippy::too_many_arguments)]
	fn notify(
		&self,
		app_name: &str,
		replaces_id: u32,
		app_icon: &str,
		summary: &str,
		body: &str,
		actions: &[&str],
		hints: HashMap<&str, Value<'_>>,
		expire_timeout: i32,
	) -> zbus::Result<u32>;

	#[dbus_proxy(signal)]
	fn action_invoked(&self, id: u32, action_key: &str) -> zbus::Result<()>;
}

fn actions(allow_logout: bool) -> Vec<&'static str> {
	if allow_logout {
		vec![LOG_OUT_ACTION, "Log Out"]
	} else {
		Vec::new()
	}
}

fn body(allow_logout: bool) -> &'static str {
	if allow_logout {
		BODY_LOG_OUT
	} else {
		BODY_CONTACT_ADMIN
	}
}

/// Shows the failure notification. When `allow_logout` is set and `tx` is
/// given, picking "Log Out" sends [`Event::Terminate`]; the future then
/// completes once the action is invoked.
pub async fn fail_whale(
	conn: &Connection,
	allow_logout: bool,
	tx: Option<mpsc::UnboundedSender<Event>>,
) -> Result<()> {
	let proxy = NotificationsProxy::new(conn)
		.await
		.wrap_err("failed to connect to org.freedesktop.Notifications")?;
	// subscribe before notifying so the action cannot be missed
	let mut invoked = match (&tx, allow_logout) {
		(Some(_), true) => Some(
			proxy
				.receive_action_invoked()
				.await
				.wrap_err("failed to watch notification actions")?,
		),
		_ => None,
	};

	let hints = HashMap::from([
		("urgency", Value::U8(URGENCY_CRITICAL)),
		("resident", Value::Bool(true)),
	]);
	let id = proxy
		.notify(
			APP_NAME,
			0,
			"dialog-error",
			SUMMARY,
			body(allow_logout),
			&actions(allow_logout),
			hints,
			0,
		)
		.await
		.wrap_err("failed to show the failure notification")?;
	warn!("showed failure notification {}", id);

	let (Some(invoked), Some(tx)) = (invoked.as_mut(), tx) else {
		return Ok(());
	};
	while let Some(signal) = invoked.next().await {
		let args = match signal.args() {
			Ok(args) => args,
			Err(error) => {
				warn!("malformed ActionInvoked signal: {}", error);
				continue;
			}
		};
		if *args.id() == id && *args.action_key() == LOG_OUT_ACTION {
			info!("log out picked from the failure notification");
			if tx.send(Event::Terminate).is_err() {
				debug!("event loop gone before log out");
			}
			break;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn log_out_is_offered_only_when_allowed() {
		assert_eq!(actions(true), vec![LOG_OUT_ACTION, "Log Out"]);
		assert!(actions(false).is_empty());
		assert_ne!(body(true), body(false));
	}
}
