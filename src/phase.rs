// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

/// Ordered stages of a session. Only `QueryEndSession` and `EndSession` may go
/// back, to `Running`, when the end of the session is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
	Startup,
	EarlyInitialization,
	PreDisplayServer,
	Initialization,
	WindowManager,
	Panel,
	Desktop,
	Application,
	Running,
	QueryEndSession,
	EndSession,
	Exit,
}

impl Phase {
	pub const ALL: [Phase; 12] = [
		Phase::Startup,
		Phase::EarlyInitialization,
		Phase::PreDisplayServer,
		Phase::Initialization,
		Phase::WindowManager,
		Phase::Panel,
		Phase::Desktop,
		Phase::Application,
		Phase::Running,
		Phase::QueryEndSession,
		Phase::EndSession,
		Phase::Exit,
	];

	/// The phase that follows this one, `None` once `Exit` is reached.
	pub fn next(self) -> Option<Phase> {
		Self::ALL.get(self as usize + 1).copied()
	}

	pub fn name(self) -> &'static str {
		match self {
			Phase::Startup => "STARTUP",
			Phase::EarlyInitialization => "EARLY_INITIALIZATION",
			Phase::PreDisplayServer => "PRE_DISPLAY_SERVER",
			Phase::Initialization => "INITIALIZATION",
			Phase::WindowManager => "WINDOW_MANAGER",
			Phase::Panel => "PANEL",
			Phase::Desktop => "DESKTOP",
			Phase::Application => "APPLICATION",
			Phase::Running => "RUNNING",
			Phase::QueryEndSession => "QUERY_END_SESSION",
			Phase::EndSession => "END_SESSION",
			Phase::Exit => "EXIT",
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(String);

impl FromStr for Phase {
	type Err = UnknownPhase;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|phase| phase.name().eq_ignore_ascii_case(s))
			.ok_or_else(|| UnknownPhase(s.to_string()))
	}
}

impl<'de> Deserialize<'de> for Phase {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let name = String::deserialize(deserializer)?;
		name.parse().map_err(serde::de::Error::custom)
	}
}
