// SPDX-License-Identifier: GPL-3.0-only
//! Two-round end-of-session negotiation with registered clients.

use super::{LogoutMode, Manager, PHASE_TIMEOUT, QUERY_TIMEOUT};
use crate::{
	backend::InhibitAction,
	client::{EndSessionFlags, EndSessionResponse},
	inhibitor::{self, Inhibitor, InhibitorFlags},
	phase::Phase,
};

const NOT_RESPONDING: &str = "Not responding";

impl Manager {
	fn end_session_flags(&self) -> EndSessionFlags {
		if self.logout_mode == LogoutMode::Force {
			EndSessionFlags::FORCEFUL
		} else {
			EndSessionFlags::empty()
		}
	}

	pub(super) fn do_phase_query_end_session(&mut self) {
		let flags = self.end_session_flags();
		for (id, client) in self.clients.iter() {
			match client.query_end_session(flags) {
				Ok(()) => self.query_clients.push(id.to_string()),
				Err(error) => warn!("unable to query client: {}", error),
			}
		}
		debug!("queried {} clients", self.query_clients.len());

		self.query_timer = Some(self.scheduler.schedule(QUERY_TIMEOUT));
		self.phase_timer = Some(self.scheduler.schedule(PHASE_TIMEOUT));
	}

	/// Clients that have not answered in time are shown as blocking the
	/// logout, unless it is forced.
	pub(super) fn query_timeout(&mut self) {
		for id in std::mem::take(&mut self.query_clients) {
			let name = self
				.clients
				.lookup(&id)
				.and_then(|client| client.app_id())
				.unwrap_or(id.as_str())
				.to_string();
			warn!("client '{}' failed to reply before timeout", name);
			if self.logout_mode != LogoutMode::Force {
				self.add_jit_inhibitor(&id, NOT_RESPONDING);
			}
		}
		self.query_end_session_complete();
	}

	fn add_jit_inhibitor(&mut self, client_id: &str, reason: &str) {
		let Some(client) = self.clients.lookup(client_id) else {
			return;
		};
		let app_id = client.app_id().unwrap_or(client_id).to_string();
		let bus_name = client.bus_name().map(str::to_string);
		debug!("adding inhibitor for '{}': {}", app_id, reason);

		let cookie = inhibitor::generate_unique_cookie(&self.inhibitors, &mut self.rng);
		let id = self.ids.next_inhibitor();
		let inhibitor = Inhibitor::new_for_client(
			id.clone(),
			client_id.to_string(),
			app_id,
			InhibitorFlags::LOGOUT,
			reason.to_string(),
			bus_name,
			cookie,
		);
		self.inhibitors.add(id, inhibitor);
	}

	fn remove_client_inhibitors(&mut self, client_id: &str) {
		self.inhibitors
			.remove_where(|_, inhibitor| inhibitor.client_id() == Some(client_id));
	}

	pub(super) fn query_end_session_complete(&mut self) {
		debug!("query end session complete");
		self.cancel_query_timer();
		self.end_session_or_show_dialog();
	}

	fn end_session_or_show_dialog(&mut self) {
		if !self.is_logout_inhibited() {
			self.end_phase();
			return;
		}

		let inhibitors = self.inhibitor_ids_for(InhibitorFlags::LOGOUT);
		if self.inhibit_dialog.is_some() {
			debug!("inhibit dialog already up, presenting it");
			self.dialogs.present_inhibit(inhibitors);
			return;
		}
		let action = self
			.logout_type
			.map_or(InhibitAction::Logout, |logout_type| logout_type.inhibit_action());
		self.inhibit_dialog = Some(action);
		self.dialogs.open_inhibit(action, inhibitors);
	}

	pub(super) fn do_phase_end_session(&mut self) {
		let mut flags = self.end_session_flags();
		if self.settings.autosave {
			flags |= EndSessionFlags::SAVE;
		}

		if self.clients.is_empty() {
			self.end_phase();
			return;
		}

		self.phase_timer = Some(self.scheduler.schedule(PHASE_TIMEOUT));
		for (id, client) in self.clients.iter() {
			match client.end_session(flags) {
				Ok(()) => self.query_clients.push(id.to_string()),
				Err(error) => debug!("unable to end session for client: {}", error),
			}
		}
		if self.query_clients.is_empty() {
			self.end_phase();
		}
	}

	/// Second round, for the clients that asked to go last.
	fn do_phase_end_session_part_two(&mut self) {
		self.end_session_part_two = true;
		let mut flags = self.end_session_flags() | EndSessionFlags::LAST;
		if self.settings.autosave {
			flags |= EndSessionFlags::SAVE;
		}

		if self.next_query_clients.is_empty() {
			self.end_phase();
			return;
		}
		for id in std::mem::take(&mut self.next_query_clients) {
			let Some(client) = self.clients.lookup(&id) else {
				continue;
			};
			match client.end_session(flags) {
				Ok(()) => self.query_clients.push(id),
				Err(error) => debug!("unable to end session for client: {}", error),
			}
		}
		if self.query_clients.is_empty() {
			self.end_phase();
		}
	}

	/// Answer from a client to a query or end-session request.
	pub fn end_session_response(&mut self, id: &str, response: EndSessionResponse) {
		if !self.clients.contains(id) {
			debug!("end session response from unknown client {}", id);
			return;
		}
		self.handle_end_session_response(id, response);
		self.flush();
	}

	pub(super) fn handle_end_session_response(&mut self, id: &str, response: EndSessionResponse) {
		if self.phase < Phase::QueryEndSession {
			return;
		}
		debug!(
			"response from client {}: ok={} last={} cancel={}",
			id, response.is_ok, response.do_last, response.cancel
		);

		if response.cancel {
			self.cancel_end_session();
			return;
		}

		self.query_clients.retain(|pending| pending != id);

		if !response.is_ok && self.logout_mode != LogoutMode::Force {
			self.remove_client_inhibitors(id);
			let reason = response
				.reason
				.as_deref()
				.filter(|reason| !reason.is_empty())
				.unwrap_or(NOT_RESPONDING);
			self.add_jit_inhibitor(id, reason);
		} else {
			self.remove_client_inhibitors(id);
		}

		match self.phase {
			Phase::QueryEndSession => {
				if self.query_clients.is_empty() {
					self.query_end_session_complete();
				}
			}
			Phase::EndSession => {
				if response.do_last && !self.end_session_part_two {
					self.next_query_clients.push(id.to_string());
				}
				if !self.query_clients.is_empty() || self.is_logout_inhibited() {
					return;
				}
				if self.next_query_clients.is_empty() {
					self.end_phase();
				} else {
					self.do_phase_end_session_part_two();
				}
			}
			_ => {}
		}
	}

	/// Returns to the running phase. Only acts while the session is ending.
	pub(super) fn cancel_end_session(&mut self) {
		if !matches!(self.phase, Phase::QueryEndSession | Phase::EndSession) {
			return;
		}
		info!("cancelling the end of the session");
		self.close_inhibit_dialog();
		self.inhibitors.remove_where(|_, inhibitor| inhibitor.is_jit());

		for client in self.clients.values() {
			if let Err(error) = client.cancel_end_session() {
				warn!("unable to cancel end session: {}", error);
			}
		}

		self.phase = Phase::Running;
		self.logout_mode = LogoutMode::Normal;
		self.logout_type = None;
		self.system
			.set_logout_action(crate::backend::LoginManagerAction::None);
		self.start_phase();
	}
}
