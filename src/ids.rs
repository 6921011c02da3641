// SPDX-License-Identifier: GPL-3.0-only
use std::{
	sync::atomic::{AtomicU32, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

pub const MANAGER_PATH: &str = "/org/gnome/SessionManager";
const CLIENT_PATH_PREFIX: &str = "/org/gnome/SessionManager/Client";
const INHIBITOR_PATH_PREFIX: &str = "/org/gnome/SessionManager/Inhibitor";

/// Monotonic serial that wraps back to 1 before overflowing an `i32`.
#[derive(Debug)]
pub struct Serial(u32);

impl Default for Serial {
	fn default() -> Self {
		Self(1)
	}
}

impl Serial {
	pub fn next(&mut self) -> u32 {
		let serial = self.0;
		self.0 = if serial >= i32::MAX as u32 { 1 } else { serial + 1 };
		serial
	}
}

/// Allocates the object ids handed out for clients and inhibitors.
#[derive(Debug, Default)]
pub struct ObjectIds {
	clients: Serial,
	inhibitors: Serial,
}

impl ObjectIds {
	pub fn next_client(&mut self) -> String {
		format!("{}{}", CLIENT_PATH_PREFIX, self.clients.next())
	}

	pub fn next_inhibitor(&mut self) -> String {
		format!("{}{}", INHIBITOR_PATH_PREFIX, self.inhibitors.next())
	}
}

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Generates a session-management client id in the XSMP form used when no
/// network address is known: version "1", address type "0" with 16 random
/// hex digits, a 13 digit millisecond timestamp, "1" and a 10 digit pid, and
/// a 4 digit sequence number.
pub fn generate_startup_id() -> String {
	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis())
		.unwrap_or_default();
	let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
	format!(
		"10{:016x}{:013}1{:010}{:04}",
		rand::random::<u64>(),
		millis % 10_000_000_000_000,
		std::process::id(),
		sequence
	)
}
