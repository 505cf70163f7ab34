//! In-memory analytics ring buffer (§4.7): request/page-view events accrue
//! here lock-free-ish behind one mutex and get coalesced into a single
//! `append_events` write-queue call per flush, instead of one substrate
//! write per event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fazt_types::substrate::TrackingEvent;

/// Oldest-dropped once the buffer fills; `dropped()` reports how many events
/// were lost so the system/health surface can surface backpressure instead
/// of hiding it.
pub struct EventBuffer {
	events: Mutex<VecDeque<TrackingEvent>>,
	capacity: usize,
	dropped: AtomicU64,
}

impl EventBuffer {
	pub fn new(capacity: usize) -> Self {
		Self { events: Mutex::new(VecDeque::with_capacity(capacity)), capacity, dropped: AtomicU64::new(0) }
	}

	pub fn push(&self, event: TrackingEvent) {
		let Ok(mut events) = self.events.lock() else { return };
		if events.len() >= self.capacity {
			events.pop_front();
			self.dropped.fetch_add(1, Ordering::Relaxed);
		}
		events.push_back(event);
	}

	/// Takes every buffered event, leaving the buffer empty.
	pub fn drain(&self) -> Vec<TrackingEvent> {
		let Ok(mut events) = self.events.lock() else { return Vec::new() };
		events.drain(..).collect()
	}

	pub fn len(&self) -> usize {
		self.events.lock().map(|e| e.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use fazt_types::prelude::*;

	fn event(kind: &str) -> TrackingEvent {
		TrackingEvent {
			app_id: AppId::new("a"),
			kind: kind.to_string(),
			path: "/".to_string(),
			referrer: None,
			ua: None,
			ts: Timestamp::now(),
		}
	}

	#[test]
	fn drops_oldest_and_counts_on_overflow() {
		let buf = EventBuffer::new(2);
		buf.push(event("1"));
		buf.push(event("2"));
		buf.push(event("3"));
		assert_eq!(buf.dropped(), 1);
		let drained = buf.drain();
		assert_eq!(drained.len(), 2);
		assert_eq!(drained[0].kind, "2");
	}

	#[test]
	fn drain_empties_the_buffer() {
		let buf = EventBuffer::new(10);
		buf.push(event("1"));
		assert_eq!(buf.drain().len(), 1);
		assert!(buf.is_empty());
	}
}

// vim: ts=4
