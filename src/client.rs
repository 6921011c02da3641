// SPDX-License-Identifier: GPL-3.0-only
use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::{fmt, ops};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
	Unregistered,
	Registered,
	Finished,
}

impl ClientStatus {
	pub fn as_u32(self) -> u32 {
		match self {
			ClientStatus::Unregistered => 0,
			ClientStatus::Registered => 1,
			ClientStatus::Finished => 2,
		}
	}
}

/// Restart behaviour a legacy client asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartStyle {
	#[default]
	Never,
	IfRunning,
	Anyway,
	Immediately,
}

impl RestartStyle {
	pub fn as_u32(self) -> u32 {
		match self {
			RestartStyle::Never => 0,
			RestartStyle::IfRunning => 1,
			RestartStyle::Anyway => 2,
			RestartStyle::Immediately => 3,
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndSessionFlags(u32);

impl EndSessionFlags {
	pub const FORCEFUL: Self = Self(1 << 0);
	pub const SAVE: Self = Self(1 << 1);
	pub const LAST: Self = Self(1 << 2);

	pub const fn empty() -> Self {
		Self(0)
	}

	pub const fn bits(self) -> u32 {
		self.0
	}

	#[cfg(test)]
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}
}

impl ops::BitOr for EndSessionFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

impl ops::BitOrAssign for EndSessionFlags {
	fn bitor_assign(&mut self, rhs: Self) {
		self.0 |= rhs.0;
	}
}

/// A client's answer to a query or end-session request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndSessionResponse {
	pub is_ok: bool,
	/// Ask again once every other client has answered.
	pub do_last: bool,
	pub cancel: bool,
	pub reason: Option<String>,
}

impl EndSessionResponse {
	pub fn ok() -> Self {
		Self {
			is_ok: true,
			..Self::default()
		}
	}

	#[cfg(test)]
	pub fn refuse(reason: impl Into<String>) -> Self {
		Self {
			reason: Some(reason.into()),
			..Self::default()
		}
	}

	#[cfg(test)]
	pub fn cancel() -> Self {
		Self {
			cancel: true,
			..Self::default()
		}
	}
}

/// Transport a client registered through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKind {
	Bus { bus_name: String },
	Xsmp,
}

/// Manager to client callbacks. Implementations only queue the message;
/// answers arrive later as end-session responses.
pub trait ClientChannel {
	fn query_end_session(&self, flags: EndSessionFlags) -> Result<(), ClientError>;
	fn end_session(&self, flags: EndSessionFlags) -> Result<(), ClientError>;
	fn cancel_end_session(&self) -> Result<(), ClientError>;
	fn stop(&self) -> Result<(), ClientError>;
}

/// A process registered with the session.
pub struct Client {
	id: String,
	startup_id: String,
	app_id: Option<String>,
	status: ClientStatus,
	restart_style_hint: RestartStyle,
	kind: ClientKind,
	channel: Box<dyn ClientChannel>,
}

impl fmt::Debug for Client {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Client")
			.field("id", &self.id)
			.field("startup_id", &self.startup_id)
			.field("app_id", &self.app_id)
			.field("status", &self.status)
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}

impl Client {
	pub fn new(
		id: String,
		startup_id: String,
		kind: ClientKind,
		channel: Box<dyn ClientChannel>,
	) -> Self {
		Self {
			id,
			startup_id,
			app_id: None,
			status: ClientStatus::Unregistered,
			restart_style_hint: RestartStyle::Never,
			kind,
			channel,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn startup_id(&self) -> &str {
		&self.startup_id
	}

	pub fn app_id(&self) -> Option<&str> {
		self.app_id.as_deref()
	}

	pub fn set_app_id(&mut self, app_id: Option<String>) {
		self.app_id = app_id.filter(|app_id| !app_id.is_empty());
	}

	pub fn status(&self) -> ClientStatus {
		self.status
	}

	pub fn set_status(&mut self, status: ClientStatus) {
		self.status = status;
	}

	pub fn restart_style_hint(&self) -> RestartStyle {
		self.restart_style_hint
	}

	pub fn bus_name(&self) -> Option<&str> {
		match &self.kind {
			ClientKind::Bus { bus_name } => Some(bus_name),
			ClientKind::Xsmp => None,
		}
	}

	pub fn has_startup_id(&self, startup_id: &str) -> bool {
		!self.startup_id.is_empty() && self.startup_id == startup_id
	}

	pub fn query_end_session(&self, flags: EndSessionFlags) -> Result<(), ClientError> {
		if self.status != ClientStatus::Registered {
			return Err(ClientError::NotRegistered(self.id.clone()));
		}
		debug!("sending QueryEndSession to {}", self.id);
		self.channel.query_end_session(flags)
	}

	pub fn end_session(&self, flags: EndSessionFlags) -> Result<(), ClientError> {
		debug!("sending EndSession to {}", self.id);
		self.channel.end_session(flags)
	}

	pub fn cancel_end_session(&self) -> Result<(), ClientError> {
		self.channel.cancel_end_session()
	}

	pub fn stop(&self) -> Result<(), ClientError> {
		self.channel.stop()
	}
}


#[cfg(test)]
mod tests {
	use super::{testing::*, *};

	#[test]
	fn query_requires_registration() {
		let channel = RecordingChannel::default();
		let mut client = Client::new(
			"c1".into(),
			"s1".into(),
			ClientKind::Xsmp,
			Box::new(channel.clone()),
		);
		assert_eq!(
			client.query_end_session(EndSessionFlags::empty()),
			Err(ClientError::NotRegistered("c1".into()))
		);
		client.set_status(ClientStatus::Registered);
		client.query_end_session(EndSessionFlags::FORCEFUL).unwrap();
		client.end_session(EndSessionFlags::SAVE | EndSessionFlags::LAST).unwrap();
		assert_eq!(channel.calls(), vec![
			Call::QueryEndSession(EndSessionFlags::FORCEFUL),
			Call::EndSession(EndSessionFlags::SAVE | EndSessionFlags::LAST),
		]);
	}

	#[test]
	fn empty_app_id_is_none() {
		let mut client = Client::new(
			"c1".into(),
			String::new(),
			ClientKind::Bus {
				bus_name: ":1.7".into(),
			},
			Box::new(RecordingChannel::default()),
		);
		client.set_app_id(Some(String::new()));
		assert_eq!(client.app_id(), None);
		assert!(!client.has_startup_id(""));
		assert_eq!(client.bus_name(), Some(":1.7"));
	}

	#[test]
	fn end_session_flags_compose() {
		let flags = EndSessionFlags::FORCEFUL | EndSessionFlags::LAST;
		assert!(flags.contains(EndSessionFlags::FORCEFUL));
		assert!(!flags.contains(EndSessionFlags::SAVE));
		assert_eq!(flags.bits(), 0b101);
	}
}
