//! Per-path event debouncing
//!
//! Raw notifications are coalesced per path and released as one settled
//! [`FileEvent`] once the path has been quiet for the configured window.
//!
//! A single scheduler task owns the countdowns. Every `submit` bumps the
//! path's generation and pushes a `(deadline, generation, path)` entry onto a
//! min-heap; entries whose generation no longer matches the pending event are
//! stale and get discarded when popped. Replacing the pending generation under
//! the same lock that holds the heap is what cancels the previous countdown.
//!
//! The output queue is bounded. When the consumer falls behind the scheduler
//! waits on the send while `submit` keeps coalescing into the pending map, so
//! producers never block and no event is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::logging::*;

/// Kind of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Create,
	Modify,
	Delete,
	/// Treated as `Delete`; the new name arrives as its own `Create`
	Rename,
}

impl EventKind {
	/// Merge an incoming notification into a pending one
	///
	/// Delete is sticky for the rest of the window. Create absorbs Modify.
	/// Anything else takes the newer kind.
	pub fn coalesce(self, incoming: EventKind) -> EventKind {
		match (self.normalized(), incoming.normalized()) {
			(EventKind::Delete, _) | (_, EventKind::Delete) => EventKind::Delete,
			(EventKind::Create, EventKind::Modify) => EventKind::Create,
			(_, newer) => newer,
		}
	}

	/// `Rename` collapses to `Delete`
	pub fn normalized(self) -> EventKind {
		match self {
			EventKind::Rename => EventKind::Delete,
			other => other,
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			EventKind::Create => "create",
			EventKind::Modify => "modify",
			EventKind::Delete => "delete",
			EventKind::Rename => "rename",
		};
		write!(f, "{}", s)
	}
}

/// A settled event handed to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
	/// Vault-relative path with `/` separators
	pub path: String,
	pub kind: EventKind,
	/// Time of the most recent notification merged into this event
	pub timestamp: DateTime<Utc>,
}

struct PendingEvent {
	kind: EventKind,
	timestamp: DateTime<Utc>,
	generation: u64,
}

#[derive(Default)]
struct Inner {
	pending: HashMap<String, PendingEvent>,
	deadlines: BinaryHeap<Reverse<(Instant, u64, String)>>,
	next_generation: u64,
	flush_requested: bool,
	/// Checked under this lock by both `submit` and the scheduler exit
	closed: bool,
}

impl Inner {
	/// Take every event that is due, plus the next deadline still pending
	fn take_due(&mut self, now: Instant) -> (Vec<FileEvent>, Option<Instant>) {
		let mut due = Vec::new();

		if self.flush_requested {
			self.flush_requested = false;
			self.deadlines.clear();
			let mut drained: Vec<(String, PendingEvent)> = self.pending.drain().collect();
			drained.sort_by_key(|(_, p)| p.generation);
			due.extend(drained.into_iter().map(|(path, p)| FileEvent {
				path,
				kind: p.kind,
				timestamp: p.timestamp,
			}));
			return (due, None);
		}

		while let Some(Reverse((deadline, generation, _))) = self.deadlines.peek() {
			if *deadline > now {
				break;
			}
			let generation = *generation;
			let Some(Reverse((_, _, path))) = self.deadlines.pop() else {
				break;
			};
			let current = self.pending.get(&path).map(|p| p.generation);
			if current == Some(generation) {
				if let Some(p) = self.pending.remove(&path) {
					due.push(FileEvent { path, kind: p.kind, timestamp: p.timestamp });
				}
			}
		}

		// Drop stale heads so the next wake-up targets a live countdown
		while let Some(Reverse((_, generation, path))) = self.deadlines.peek() {
			if self.pending.get(path).map(|p| p.generation) == Some(*generation) {
				break;
			}
			self.deadlines.pop();
		}

		let next = self.deadlines.peek().map(|Reverse((d, _, _))| *d);
		(due, next)
	}
}

struct Shared {
	window: Duration,
	inner: Mutex<Inner>,
	wake: Notify,
}

/// Handle used by notification producers
///
/// Cloning is cheap; every clone feeds the same pending set.
#[derive(Clone)]
pub struct Debouncer {
	shared: Arc<Shared>,
}

impl Debouncer {
	/// Start a debouncer and return it with the settled-event receiver
	///
	/// Must be called inside a Tokio runtime. The receiver yields `None`
	/// once the debouncer is closed and every pending event was delivered.
	pub fn new(window: Duration, queue_capacity: usize) -> (Self, mpsc::Receiver<FileEvent>) {
		let (tx, rx) = mpsc::channel(queue_capacity.max(1));
		let shared = Arc::new(Shared {
			window,
			inner: Mutex::new(Inner::default()),
			wake: Notify::new(),
		});

		tokio::spawn(run_scheduler(shared.clone(), tx));

		(Self { shared }, rx)
	}

	/// Record a notification for `path`
	///
	/// Returns `false` if the debouncer no longer admits events.
	pub fn submit(&self, path: impl Into<String>, kind: EventKind) -> bool {
		let path = path.into();
		let now = Utc::now();
		let deadline = Instant::now() + self.shared.window;
		{
			let mut inner = self.shared.inner.lock();
			if inner.closed {
				return false;
			}
			inner.next_generation += 1;
			let generation = inner.next_generation;

			let merged = match inner.pending.get_mut(&path) {
				Some(pending) => {
					pending.kind = pending.kind.coalesce(kind);
					pending.timestamp = now;
					pending.generation = generation;
					pending.kind
				}
				None => {
					let kind = kind.normalized();
					inner.pending.insert(path.clone(), PendingEvent { kind, timestamp: now, generation });
					kind
				}
			};
			trace_submit(&path, kind, merged);
			inner.deadlines.push(Reverse((deadline, generation, path)));
		}
		self.shared.wake.notify_one();
		true
	}

	/// Settle every pending event now
	pub fn flush(&self) {
		self.shared.inner.lock().flush_requested = true;
		self.shared.wake.notify_one();
	}

	/// Stop admitting events
	///
	/// Pending events still settle on their own schedule (or immediately
	/// after [`flush`](Self::flush)); the receiver closes afterwards.
	pub fn close(&self) {
		self.shared.inner.lock().closed = true;
		self.shared.wake.notify_one();
	}

	pub fn is_closed(&self) -> bool {
		self.shared.inner.lock().closed
	}

	/// Number of paths with an unsettled event
	pub fn pending_count(&self) -> usize {
		self.shared.inner.lock().pending.len()
	}
}

fn trace_submit(path: &str, submitted: EventKind, merged: EventKind) {
	if submitted != merged {
		debug!(path = %path, submitted = %submitted, pending = %merged, "coalesced event");
	}
}

async fn run_scheduler(shared: Arc<Shared>, tx: mpsc::Sender<FileEvent>) {
	loop {
		let (due, next) = shared.inner.lock().take_due(Instant::now());

		for event in due {
			if tx.send(event).await.is_err() {
				debug!("settled-event receiver dropped, debouncer stopping");
				return;
			}
		}

		let finished = {
			let inner = shared.inner.lock();
			inner.closed && inner.pending.is_empty() && !inner.flush_requested
		};
		if finished {
			debug!("debouncer closed and drained");
			return;
		}

		// A flush requested while we were sending must not wait for a deadline
		if shared.inner.lock().flush_requested {
			continue;
		}

		match next {
			Some(deadline) => {
				tokio::select! {
					_ = shared.wake.notified() => {}
					_ = tokio::time::sleep_until(deadline) => {}
				}
			}
			None => shared.wake.notified().await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::time::timeout;

	const WINDOW: Duration = Duration::from_millis(60);

	async fn next(rx: &mut mpsc::Receiver<FileEvent>) -> FileEvent {
		timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
	}

	#[test]
	fn test_coalescing_policy() {
		use EventKind::*;

		assert_eq!(Create.coalesce(Modify), Create);
		assert_eq!(Modify.coalesce(Modify), Modify);
		assert_eq!(Modify.coalesce(Create), Create);
		assert_eq!(Create.coalesce(Delete), Delete);
		assert_eq!(Modify.coalesce(Delete), Delete);
		assert_eq!(Delete.coalesce(Create), Delete);
		assert_eq!(Delete.coalesce(Modify), Delete);
		assert_eq!(Modify.coalesce(Rename), Delete);
	}

	#[tokio::test]
	async fn test_burst_settles_once() {
		let (debouncer, mut rx) = Debouncer::new(WINDOW, 16);

		debouncer.submit("a.md", EventKind::Create);
		for _ in 0..5 {
			tokio::time::sleep(Duration::from_millis(10)).await;
			debouncer.submit("a.md", EventKind::Modify);
		}
		assert_eq!(debouncer.pending_count(), 1);

		let event = next(&mut rx).await;
		assert_eq!(event.path, "a.md");
		assert_eq!(event.kind, EventKind::Create);
		assert_eq!(debouncer.pending_count(), 0);

		// Nothing else for this burst
		assert!(timeout(WINDOW * 3, rx.recv()).await.is_err());
	}

	#[tokio::test]
	async fn test_delete_dominates_window() {
		let (debouncer, mut rx) = Debouncer::new(WINDOW, 16);

		debouncer.submit("b.md", EventKind::Create);
		debouncer.submit("b.md", EventKind::Delete);
		debouncer.submit("b.md", EventKind::Modify);

		let event = next(&mut rx).await;
		assert_eq!(event.kind, EventKind::Delete);
	}

	#[tokio::test]
	async fn test_rename_submitted_as_delete() {
		let (debouncer, mut rx) = Debouncer::new(WINDOW, 16);

		debouncer.submit("old.md", EventKind::Rename);
		let event = next(&mut rx).await;
		assert_eq!(event.kind, EventKind::Delete);
	}

	#[tokio::test]
	async fn test_countdown_restarts() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(150), 16);

		debouncer.submit("c.md", EventKind::Modify);
		tokio::time::sleep(Duration::from_millis(100)).await;
		debouncer.submit("c.md", EventKind::Modify);

		// The first countdown would have fired at 150ms; it was superseded
		tokio::time::sleep(Duration::from_millis(80)).await;
		assert!(rx.try_recv().is_err());
		assert_eq!(debouncer.pending_count(), 1);

		let event = next(&mut rx).await;
		assert_eq!(event.path, "c.md");
	}

	#[tokio::test]
	async fn test_flush_settles_immediately() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_secs(60), 16);

		debouncer.submit("x.md", EventKind::Create);
		debouncer.submit("y.png", EventKind::Modify);
		debouncer.flush();

		let mut paths = vec![next(&mut rx).await.path, next(&mut rx).await.path];
		paths.sort();
		assert_eq!(paths, vec!["x.md".to_string(), "y.png".to_string()]);
		assert_eq!(debouncer.pending_count(), 0);
	}

	#[tokio::test]
	async fn test_close_rejects_and_drains() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_secs(60), 16);

		assert!(debouncer.submit("keep.md", EventKind::Modify));
		debouncer.close();
		assert!(!debouncer.submit("late.md", EventKind::Modify));
		debouncer.flush();

		assert_eq!(next(&mut rx).await.path, "keep.md");
		let end = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
		assert!(end.is_none());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_close_racing_submit_loses_nothing() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(5), 1024);

		let producer = {
			let d = debouncer.clone();
			std::thread::spawn(move || (0..500).filter(|i| d.submit(format!("r{}.md", i), EventKind::Modify)).count())
		};
		tokio::time::sleep(Duration::from_millis(1)).await;
		debouncer.close();
		let accepted = producer.join().unwrap();
		debouncer.flush();

		// Every accepted submit is delivered before the receiver closes
		let mut delivered = 0;
		while let Some(_event) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
			delivered += 1;
		}
		assert_eq!(delivered, accepted);
	}

	#[tokio::test]
	async fn test_concurrent_producers() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(300), 256);

		let mut handles = Vec::new();
		for worker in 0..8 {
			let d = debouncer.clone();
			handles.push(tokio::spawn(async move {
				for i in 0..20 {
					d.submit(format!("f{}.md", i), EventKind::Modify);
					if worker == 0 && i == 19 {
						d.submit("f19.md", EventKind::Delete);
					}
				}
			}));
		}
		for h in handles {
			h.await.unwrap();
		}
		assert!(debouncer.pending_count() <= 20);

		let mut seen = HashMap::new();
		for _ in 0..20 {
			let event = next(&mut rx).await;
			assert!(seen.insert(event.path.clone(), event.kind).is_none());
		}
		assert_eq!(seen.len(), 20);
		assert_eq!(seen.get("f19.md"), Some(&EventKind::Delete));
	}

	#[tokio::test]
	async fn test_full_queue_keeps_coalescing() {
		let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(10), 1);

		for i in 0..5 {
			debouncer.submit(format!("q{}.md", i), EventKind::Create);
		}
		tokio::time::sleep(Duration::from_millis(100)).await;

		// Consumer is stalled: submits still return immediately
		for i in 0..5 {
			assert!(debouncer.submit(format!("q{}.md", i), EventKind::Modify));
		}

		let mut received = Vec::new();
		while received.len() < 5 {
			let event = next(&mut rx).await;
			if !received.contains(&event.path) {
				received.push(event.path);
			}
		}
		assert_eq!(received.len(), 5);
	}
}

// vim: ts=4
