// SPDX-License-Identifier: GPL-3.0-only
use crate::store::Store;
use rand::Rng;
use std::{fmt, ops};

/// Categories of session actions an inhibitor can block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InhibitorFlags(u32);

impl InhibitorFlags {
	pub const LOGOUT: Self = Self(1 << 0);
	pub const SWITCH_USER: Self = Self(1 << 1);
	pub const SUSPEND: Self = Self(1 << 2);
	pub const IDLE: Self = Self(1 << 3);

	pub const fn empty() -> Self {
		Self(0)
	}

	pub const fn from_bits(bits: u32) -> Self {
		Self(bits)
	}

	pub const fn bits(self) -> u32 {
		self.0
	}

	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub const fn intersects(self, other: Self) -> bool {
		self.0 & other.0 != 0
	}
}

impl ops::BitOr for InhibitorFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

impl ops::BitOrAssign for InhibitorFlags {
	fn bitor_assign(&mut self, rhs: Self) {
		self.0 |= rhs.0;
	}
}

impl fmt::Display for InhibitorFlags {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#x}", self.0)
	}
}

/// A record blocking one or more session actions. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inhibitor {
	id: String,
	app_id: String,
	client_id: Option<String>,
	toplevel_xid: u32,
	flags: InhibitorFlags,
	reason: String,
	bus_name: Option<String>,
	cookie: u32,
}

impl Inhibitor {
	pub fn new(
		id: String,
		app_id: String,
		toplevel_xid: u32,
		flags: InhibitorFlags,
		reason: String,
		bus_name: Option<String>,
		cookie: u32,
	) -> Self {
		Self {
			id,
			app_id,
			client_id: None,
			toplevel_xid,
			flags,
			reason,
			bus_name,
			cookie,
		}
	}

	/// Inhibitor created on behalf of a client that did not agree to end the
	/// session.
	pub fn new_for_client(
		id: String,
		client_id: String,
		app_id: String,
		flags: InhibitorFlags,
		reason: String,
		bus_name: Option<String>,
		cookie: u32,
	) -> Self {
		Self {
			client_id: Some(client_id),
			..Self::new(id, app_id, 0, flags, reason, bus_name, cookie)
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	pub fn client_id(&self) -> Option<&str> {
		self.client_id.as_deref()
	}

	pub fn toplevel_xid(&self) -> u32 {
		self.toplevel_xid
	}

	pub fn flags(&self) -> InhibitorFlags {
		self.flags
	}

	pub fn reason(&self) -> &str {
		&self.reason
	}

	pub fn bus_name(&self) -> Option<&str> {
		self.bus_name.as_deref()
	}

	pub fn cookie(&self) -> u32 {
		self.cookie
	}

	/// Created automatically for a client during end-session negotiation.
	pub fn is_jit(&self) -> bool {
		self.client_id.as_deref().is_some_and(|id| !id.is_empty())
	}
}

pub fn generate_cookie(rng: &mut impl Rng) -> u32 {
	rng.gen_range(1..i32::MAX as u32)
}

/// Draws cookies until one is not held by any live inhibitor.
pub fn generate_unique_cookie(inhibitors: &Store<Inhibitor>, rng: &mut impl Rng) -> u32 {
	loop {
		let cookie = generate_cookie(rng);
		if inhibitors.find(|_, inhibitor| inhibitor.cookie == cookie).is_none() {
			return cookie;
		}
	}
}

/// Union of the flags of every live inhibitor.
pub fn collect_flags(inhibitors: &Store<Inhibitor>) -> InhibitorFlags {
	inhibitors
		.values()
		.fold(InhibitorFlags::empty(), |flags, inhibitor| flags | inhibitor.flags)
}
