//! Long-running sync service
//!
//! Runs an initial full reconciliation, then watches the vault and applies
//! settled events as they arrive. A periodic task sweeps the retry queue and
//! persists the state cache. Cancelling the shutdown token drains every
//! pending event before the final save.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SyncSettings;
use crate::debounce::{Debouncer, FileEvent};
use crate::engine::Engine;
use crate::error::SyncError;
use crate::logging::*;
use crate::watcher::VaultWatcher;

/// Timing for the service loop
#[derive(Debug, Clone)]
pub struct DaemonOptions {
	/// Quiet period before an event settles
	pub debounce: Duration,

	/// Settled events buffered ahead of the consumer
	pub queue_capacity: usize,

	/// Period of the retry sweep and state save
	pub save_interval: Duration,

	/// Skip the startup reconciliation
	pub skip_initial_sync: bool,
}

impl From<&SyncSettings> for DaemonOptions {
	fn from(settings: &SyncSettings) -> Self {
		Self {
			debounce: settings.debounce(),
			queue_capacity: settings.queue_capacity,
			save_interval: settings.save_interval(),
			skip_initial_sync: false,
		}
	}
}

/// Counters reported when the service stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
	pub events_handled: usize,
	pub events_failed: usize,
	pub retry_sweeps: usize,
}

/// Run until `shutdown` is cancelled or the watcher fails
///
/// A failed initial reconciliation is logged and the service keeps going.
/// Watcher failure cancels `shutdown`, drains, and is returned.
pub async fn run(
	engine: Arc<Engine>,
	options: DaemonOptions,
	shutdown: CancellationToken,
) -> Result<DaemonStats, SyncError> {
	info!(root = %engine.root().display(), "starting sync daemon");

	if options.skip_initial_sync {
		debug!("initial reconciliation skipped");
	} else if let Err(e) = engine.full_reconcile().await {
		error!("initial reconciliation failed: {}", e);
	}

	let (debouncer, mut rx) = Debouncer::new(options.debounce, options.queue_capacity);
	let watcher = VaultWatcher::new(engine.root(), engine.filter().clone(), debouncer.clone())?;

	let watch_cancel = CancellationToken::new();
	let mut watch_task: Option<JoinHandle<Result<(), SyncError>>> =
		Some(tokio::spawn(watcher.run(watch_cancel.clone())));

	let periodic_cancel = CancellationToken::new();
	let sweeps = Arc::new(AtomicUsize::new(0));
	let periodic = tokio::spawn(run_periodic(
		engine.clone(),
		options.save_interval,
		sweeps.clone(),
		periodic_cancel.clone(),
	));

	let mut stats = DaemonStats::default();
	let mut failure: Option<SyncError> = None;

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				info!("shutdown requested");
				break;
			}
			res = async {
				match watch_task.as_mut() {
					Some(handle) => handle.await,
					None => std::future::pending().await,
				}
			} => {
				watch_task = None;
				match res {
					Ok(Ok(())) => debug!("watcher finished"),
					Ok(Err(e)) => {
						error!("watcher failed: {}", e);
						failure = Some(e);
					}
					Err(e) => {
						error!("watcher task panicked: {}", e);
						failure = Some(SyncError::Watch { message: e.to_string() });
					}
				}
				if failure.is_some() {
					shutdown.cancel();
				}
				break;
			}
			event = rx.recv() => match event {
				Some(event) => apply(&engine, &event, &mut stats).await,
				None => break,
			}
		}
	}

	// Stop new notifications, then settle and apply everything pending
	watch_cancel.cancel();
	if let Some(handle) = watch_task.take() {
		let _ = handle.await;
	}
	drain(&engine, &debouncer, &mut rx, &mut stats).await;

	periodic_cancel.cancel();
	let _ = periodic.await;
	stats.retry_sweeps = sweeps.load(Ordering::Relaxed);

	if let Err(e) = engine.save_state().await {
		error!("failed to save state: {}", e);
	}

	info!(
		handled = stats.events_handled,
		failed = stats.events_failed,
		pending_retries = engine.pending_retries(),
		"sync daemon stopped"
	);

	match failure {
		Some(e) => Err(e),
		None => Ok(stats),
	}
}

async fn apply(engine: &Engine, event: &FileEvent, stats: &mut DaemonStats) {
	match engine.handle_event(event).await {
		Ok(_) => stats.events_handled += 1,
		Err(e) if e.is_vanished() => {
			debug!(path = %event.path, "file vanished while handling event");
			stats.events_handled += 1;
		}
		Err(e) if e.is_transient() => {
			stats.events_failed += 1;
			let attempts = engine.queue_retry(&event.path);
			error!(path = %event.path, kind = %event.kind, attempt = attempts, "failed to handle event: {}", e);
		}
		Err(e) => {
			stats.events_failed += 1;
			error!(path = %event.path, kind = %event.kind, "failed to handle event, not retrying: {}", e);
		}
	}
}

async fn drain(
	engine: &Engine,
	debouncer: &Debouncer,
	rx: &mut mpsc::Receiver<FileEvent>,
	stats: &mut DaemonStats,
) {
	let pending = debouncer.pending_count();
	if pending > 0 {
		info!(pending, "flushing pending events");
	}
	debouncer.close();
	debouncer.flush();
	while let Some(event) = rx.recv().await {
		apply(engine, &event, stats).await;
	}
}

async fn run_periodic(
	engine: Arc<Engine>,
	period: Duration,
	sweeps: Arc<AtomicUsize>,
	cancel: CancellationToken,
) {
	let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	// The first tick completes immediately
	interval.tick().await;

	loop {
		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = interval.tick() => {}
		}

		if engine.pending_retries() > 0 {
			let sweep = engine.retry_failed().await;
			sweeps.fetch_add(1, Ordering::Relaxed);
			if sweep.attempted > 0 {
				info!(
					attempted = sweep.attempted,
					recovered = sweep.recovered.len(),
					still_failing = sweep.still_failing.len(),
					abandoned = sweep.abandoned.len(),
					"retry sweep"
				);
			}
		}

		if engine.cache().is_dirty() {
			if let Err(e) = engine.save_state().await {
				warn!("periodic state save failed: {}", e);
			}
		}
	}
}

// vim: ts=4
