// SPDX-License-Identifier: GPL-3.0-only
use std::collections::BTreeMap;

/// Change notification recorded by a [`Store`] after each successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
	Added(String),
	Removed(String),
}

/// Keyed registry of session entities.
///
/// The store is the sole owner of its entities. Mutations never call back
/// into the owner; they queue [`StoreEvent`]s which the owner drains once the
/// mutation has completed, so listeners never observe a half-updated store.
#[derive(Debug)]
pub struct Store<T> {
	entries: BTreeMap<String, T>,
	events: Vec<StoreEvent>,
}

impl<T> Default for Store<T> {
	fn default() -> Self {
		Self {
			entries: BTreeMap::new(),
			events: Vec::new(),
		}
	}
}

impl<T> Store<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `entity` under `id`. An existing entity with the same id is
	/// replaced and returned.
	pub fn add(&mut self, id: impl Into<String>, entity: T) -> Option<T> {
		let id = id.into();
		let previous = self.entries.insert(id.clone(), entity);
		if previous.is_some() {
			warn!("replacing existing store entry '{}'", id);
			self.events.push(StoreEvent::Removed(id.clone()));
		}
		self.events.push(StoreEvent::Added(id));
		previous
	}

	pub fn lookup(&self, id: &str) -> Option<&T> {
		self.entries.get(id)
	}

	pub fn lookup_mut(&mut self, id: &str) -> Option<&mut T> {
		self.entries.get_mut(id)
	}

	pub fn contains(&self, id: &str) -> bool {
		self.entries.contains_key(id)
	}

	pub fn remove(&mut self, id: &str) -> Option<T> {
		let removed = self.entries.remove(id);
		if removed.is_some() {
			self.events.push(StoreEvent::Removed(id.to_string()));
		}
		removed
	}

	/// First entity matching `predicate`.
	pub fn find(&self, mut predicate: impl FnMut(&str, &T) -> bool) -> Option<&T> {
		self.entries
			.iter()
			.find(|(id, entity)| predicate(id, entity))
			.map(|(_, entity)| entity)
	}

	pub fn find_mut(&mut self, mut predicate: impl FnMut(&str, &T) -> bool) -> Option<&mut T> {
		self.entries
			.iter_mut()
			.find(|(id, entity)| predicate(id, entity))
			.map(|(_, entity)| entity)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
		self.entries.iter().map(|(id, entity)| (id.as_str(), entity))
	}

	pub fn values(&self) -> impl Iterator<Item = &T> {
		self.entries.values()
	}

	pub fn ids(&self) -> Vec<String> {
		self.entries.keys().cloned().collect()
	}

	/// Removes every entity matching `predicate` and returns them. Matches
	/// are collected before anything is removed and the `Removed` events are
	/// queued afterwards.
	pub fn remove_where(&mut self, mut predicate: impl FnMut(&str, &T) -> bool) -> Vec<T> {
		let matches: Vec<String> = self
			.entries
			.iter()
			.filter(|(id, entity)| predicate(id, entity))
			.map(|(id, _)| id.clone())
			.collect();
		let removed = matches
			.iter()
			.filter_map(|id| self.entries.remove(id))
			.collect();
		self.events
			.extend(matches.into_iter().map(StoreEvent::Removed));
		removed
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Pending change notifications, oldest first.
	pub fn drain_events(&mut self) -> Vec<StoreEvent> {
		std::mem::take(&mut self.events)
	}
}
