//! Filesystem notification source
//!
//! Every admitted directory under the vault root gets its own non-recursive
//! watch; directories created later are registered as they appear. Raw
//! notifications are mapped to [`EventKind`]s and fed to the debouncer.

use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::debounce::{Debouncer, EventKind};
use crate::error::SyncError;
use crate::exclusion::PathFilter;
use crate::logging::*;
use crate::scan::to_rel_path;

/// Map a raw notification kind; `None` means the event is dropped
///
/// Renames are resolved separately because their meaning depends on the
/// rename mode and the paths carried by the event.
pub fn map_event_kind(kind: &notify::EventKind) -> Option<EventKind> {
	match kind {
		notify::EventKind::Create(_) => Some(EventKind::Create),
		notify::EventKind::Modify(ModifyKind::Metadata(_)) => None,
		notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(EventKind::Rename),
		notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(EventKind::Create),
		notify::EventKind::Modify(_) => Some(EventKind::Modify),
		notify::EventKind::Remove(_) => Some(EventKind::Delete),
		notify::EventKind::Access(_) | notify::EventKind::Any | notify::EventKind::Other => None,
	}
}

/// Watches a vault and submits settled-path candidates to a [`Debouncer`]
pub struct VaultWatcher {
	root: PathBuf,
	filter: Arc<PathFilter>,
	debouncer: Debouncer,
	watcher: RecommendedWatcher,
	watched: HashSet<PathBuf>,
	events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl VaultWatcher {
	/// Create the watcher and register every admitted directory under `root`
	pub fn new(root: &Path, filter: Arc<PathFilter>, debouncer: Debouncer) -> Result<Self, SyncError> {
		let (tx, events) = mpsc::unbounded_channel();
		let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
			let _ = tx.send(res);
		})
		.map_err(|e| SyncError::Watch { message: format!("failed to create watcher: {}", e) })?;

		let mut this = Self {
			root: root.to_path_buf(),
			filter,
			debouncer,
			watcher,
			watched: HashSet::new(),
			events,
		};

		this.watch_tree(root, false);
		if !this.watched.contains(root) {
			return Err(SyncError::Watch {
				message: format!("failed to watch vault root {}", root.display()),
			});
		}
		info!(root = %root.display(), directories = this.watched.len(), "watching vault");
		Ok(this)
	}

	/// Number of directories currently watched
	pub fn watched_dirs(&self) -> usize {
		self.watched.len()
	}

	/// Forward notifications until cancelled
	///
	/// Losing the vault root or the notification channel is fatal and
	/// reported as [`SyncError::Watch`]; individual notification errors are
	/// logged.
	pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SyncError> {
		loop {
			tokio::select! {
				_ = cancel.cancelled() => {
					debug!("watcher stopping");
					return Ok(());
				}
				res = self.events.recv() => match res {
					Some(Ok(event)) => self.handle(event)?,
					Some(Err(e)) => warn!("watch error: {}", e),
					None => {
						return Err(SyncError::Watch {
							message: "notification channel closed".to_string(),
						});
					}
				}
			}
		}
	}

	fn handle(&mut self, event: Event) -> Result<(), SyncError> {
		if self.root_lost(&event) {
			return Err(SyncError::Watch {
				message: format!("vault root {} was removed or moved", self.root.display()),
			});
		}

		if let notify::EventKind::Modify(ModifyKind::Name(mode)) = event.kind {
			match mode {
				RenameMode::Both if event.paths.len() >= 2 => {
					self.submit(&event.paths[0], EventKind::Rename);
					self.submit(&event.paths[1], EventKind::Create);
					return Ok(());
				}
				RenameMode::Any | RenameMode::Other => {
					// The backend cannot tell the two ends apart
					for path in &event.paths {
						let kind = if path.exists() { EventKind::Create } else { EventKind::Rename };
						self.submit(path, kind);
					}
					return Ok(());
				}
				_ => {}
			}
		}

		if let Some(kind) = map_event_kind(&event.kind) {
			for path in &event.paths {
				self.submit(path, kind);
			}
		}
		Ok(())
	}

	/// A removal or rename that leaves the root itself missing
	fn root_lost(&self, event: &Event) -> bool {
		let removal = matches!(
			event.kind,
			notify::EventKind::Remove(_) | notify::EventKind::Modify(ModifyKind::Name(_))
		);
		removal && !self.root.is_dir()
	}

	fn submit(&mut self, path: &Path, kind: EventKind) {
		let Some(rel) = to_rel_path(&self.root, path) else {
			return;
		};
		if rel.is_empty() {
			return;
		}

		match kind.normalized() {
			EventKind::Delete => {
				// A removed directory only retires its watch
				if self.watched.remove(path) {
					let _ = self.watcher.unwatch(path);
					debug!(path = %rel, "directory removed");
					return;
				}
				if !self.filter.admits(&rel) {
					return;
				}
			}
			_ => {
				if path.is_dir() {
					if kind == EventKind::Create && self.filter.admits_dir(&rel) {
						self.watch_tree(path, true);
					}
					return;
				}
				if !self.filter.admits(&rel) {
					return;
				}
			}
		}

		tracing::trace!(path = %rel, kind = %kind, "notification");
		if !self.debouncer.submit(rel, kind) {
			debug!("debouncer closed, dropping event");
		}
	}

	/// Watch `dir` and every admitted directory below it
	///
	/// With `announce`, files already present are submitted as creations;
	/// they may have been written before the watch was in place.
	fn watch_tree(&mut self, dir: &Path, announce: bool) {
		let walk_root = self.root.clone();
		let filter = self.filter.clone();
		let mut builder = WalkBuilder::new(dir);
		builder.standard_filters(false).hidden(false).follow_links(false).filter_entry(move |entry| {
			if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
				return true;
			}
			to_rel_path(&walk_root, entry.path()).map(|rel| filter.admits_dir(&rel)).unwrap_or(false)
		});

		for entry in builder.build().flatten() {
			let path = entry.path().to_path_buf();
			let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
			if is_dir {
				if self.watched.contains(&path) {
					continue;
				}
				match self.watcher.watch(&path, RecursiveMode::NonRecursive) {
					Ok(()) => {
						debug!(path = %path.display(), "directory watched");
						self.watched.insert(path);
					}
					Err(e) => warn!(path = %path.display(), "failed to watch directory: {}", e),
				}
			} else if announce {
				if let Some(rel) = to_rel_path(&self.root, &path) {
					if self.filter.admits(&rel) {
						self.debouncer.submit(rel, EventKind::Create);
					}
				}
			}
		}
	}
}


// vim: ts=4
