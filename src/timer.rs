// SPDX-License-Identifier: GPL-3.0-only
use crate::event::Event;
use std::{
	collections::HashMap,
	time::{Duration, Instant},
};
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// One-shot timers whose expiry is delivered as `Event::Timer`.
pub trait Scheduler {
	fn schedule(&mut self, delay: Duration) -> TimerId;
	/// Cancelling an expired or unknown timer is a no-op.
	fn cancel(&mut self, timer: TimerId);
	fn now(&self) -> Instant;
}

pub struct TokioScheduler {
	tx: mpsc::UnboundedSender<Event>,
	next: u64,
	timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
	pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
		Self {
			tx,
			next: 0,
			timers: HashMap::new(),
		}
	}
}

impl Scheduler for TokioScheduler {
	fn schedule(&mut self, delay: Duration) -> TimerId {
		self.next += 1;
		let timer = TimerId(self.next);
		let tx = self.tx.clone();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if tx.send(Event::Timer(timer)).is_err() {
				debug!("event loop gone before timer {:?} fired", timer);
			}
		});
		self.timers.insert(timer, handle);
		timer
	}

	fn cancel(&mut self, timer: TimerId) {
		if let Some(handle) = self.timers.remove(&timer) {
			handle.abort();
		}
	}

	fn now(&self) -> Instant {
		Instant::now()
	}
}

impl Drop for TokioScheduler {
	fn drop(&mut self) {
		for (_, handle) in self.timers.drain() {
			handle.abort();
		}
	}
}
