//! Sync engine: incremental sync, full reconciliation, retries, pull
//!
//! The engine maps settled events and tree diffs onto remote store calls and
//! keeps the state cache in step. Per path the lifecycle is
//! `Untracked -> Synced` on upsert, `Synced -> Synced` on an unchanged
//! fingerprint, and `Synced -> Untracked` on delete. Conflicts are left to
//! the store's last-write-wins semantics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{StateCache, TrackedFile};
use crate::config::{Config, SyncSettings};
use crate::content::{ContentTransformer, EntityKind, FileTimes, VaultTransformer};
use crate::debounce::{EventKind, FileEvent};
use crate::error::SyncError;
use crate::exclusion::PathFilter;
use crate::fingerprint;
use crate::logging::*;
use crate::scan::{self, ScanResult};
use crate::store::RemoteStore;
use crate::validation;

// ============================================================================
// OPTIONS & OUTCOMES
// ============================================================================

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
	/// Paths per batched remote delete
	pub batch_size: usize,

	/// Retries before a failed path is dropped
	pub retry_attempts: u32,

	/// Base delay before a failed path becomes due again
	pub retry_delay: Duration,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self::from(&SyncSettings::default())
	}
}

impl From<&SyncSettings> for EngineOptions {
	fn from(settings: &SyncSettings) -> Self {
		Self {
			batch_size: settings.batch_size.max(1),
			retry_attempts: settings.retry_attempts,
			retry_delay: settings.retry_delay(),
		}
	}
}

/// Why an upload did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
	/// Excluded by path patterns
	Filtered,
	/// Gone from disk before it could be read
	Vanished,
	Directory,
	/// Attachment over the size ceiling
	TooLarge,
}

/// What handling a path did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	Uploaded(EntityKind),
	/// Fingerprint matched the cache; no remote call
	Unchanged,
	Deleted(EntityKind),
	Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadMode {
	/// Skip when the cache already holds this fingerprint
	Gated,
	/// Upload regardless of the cache
	Force,
}

/// Summary of a full reconciliation
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
	/// Qualifying local files
	pub scanned: usize,
	pub uploaded: usize,
	/// Local files already matching the remote
	pub unchanged: usize,
	pub deleted: usize,
	/// Paths queued for retry
	pub failed: Vec<String>,
	/// Oversized, vanished or otherwise skipped paths
	pub skipped: usize,
	pub duration: Duration,
}

/// Summary of one retry sweep
#[derive(Debug, Clone, Default)]
pub struct RetrySweep {
	pub attempted: usize,
	pub recovered: Vec<String>,
	pub still_failing: Vec<String>,
	/// Dropped after exceeding the attempt ceiling
	pub abandoned: Vec<String>,
}

/// Summary of a pull into the local vault
#[derive(Debug, Clone, Default)]
pub struct PullReport {
	pub total: usize,
	pub written: usize,
	/// Local file already had the remote fingerprint
	pub unchanged: usize,
	pub failed: Vec<String>,
}

// ============================================================================
// RETRY QUEUE
// ============================================================================

#[derive(Debug, Clone)]
struct RetryEntry {
	attempts: u32,
	not_before: Instant,
}

/// Failed paths with their attempt counts
#[derive(Debug, Default)]
pub struct RetryQueue {
	entries: HashMap<String, RetryEntry>,
}

impl RetryQueue {
	/// Count one more failure; the path becomes due after `delay * attempts`
	pub fn record_failure(&mut self, path: &str, delay: Duration) -> u32 {
		let entry = self
			.entries
			.entry(path.to_string())
			.or_insert(RetryEntry { attempts: 0, not_before: Instant::now() });
		entry.attempts += 1;
		entry.not_before = Instant::now() + delay.saturating_mul(entry.attempts);
		entry.attempts
	}

	pub fn remove(&mut self, path: &str) -> bool {
		self.entries.remove(path).is_some()
	}

	pub fn attempts(&self, path: &str) -> Option<u32> {
		self.entries.get(path).map(|e| e.attempts)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Paths whose delay has elapsed, in stable order
	pub fn due(&self, now: Instant) -> Vec<String> {
		let mut due: Vec<String> = self
			.entries
			.iter()
			.filter(|(_, e)| e.not_before <= now)
			.map(|(p, _)| p.clone())
			.collect();
		due.sort();
		due
	}

	/// Earliest instant at which some entry becomes due
	pub fn next_due(&self) -> Option<Instant> {
		self.entries.values().map(|e| e.not_before).min()
	}
}

// ============================================================================
// ENGINE
// ============================================================================

/// Decision logic between the vault, the state cache and the remote store
pub struct Engine {
	root: PathBuf,
	store: Arc<dyn RemoteStore>,
	cache: Arc<StateCache>,
	filter: Arc<PathFilter>,
	transformer: Arc<dyn ContentTransformer>,
	options: EngineOptions,
	retries: Mutex<RetryQueue>,
}

impl Engine {
	pub fn new(
		root: PathBuf,
		store: Arc<dyn RemoteStore>,
		cache: Arc<StateCache>,
		filter: Arc<PathFilter>,
		options: EngineOptions,
	) -> Self {
		Self {
			root,
			store,
			cache,
			filter,
			transformer: Arc::new(VaultTransformer),
			options,
			retries: Mutex::new(RetryQueue::default()),
		}
	}

	/// Build an engine for `config.vault_path`
	pub fn from_config(
		config: &Config,
		store: Arc<dyn RemoteStore>,
		cache: Arc<StateCache>,
	) -> Result<Self, SyncError> {
		let filter = PathFilter::new(
			&config.ignore_patterns,
			&config.include_patterns,
			config.sync.max_binary_size_bytes(),
		)?;
		Ok(Self::new(
			config.vault_path.clone(),
			store,
			cache,
			Arc::new(filter),
			EngineOptions::from(&config.sync),
		))
	}

	/// Replace the content transformer
	pub fn with_transformer(mut self, transformer: Arc<dyn ContentTransformer>) -> Self {
		self.transformer = transformer;
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn cache(&self) -> &Arc<StateCache> {
		&self.cache
	}

	pub fn filter(&self) -> &Arc<PathFilter> {
		&self.filter
	}

	// ------------------------------------------------------------------------
	// Incremental path
	// ------------------------------------------------------------------------

	/// Apply one settled event
	///
	/// Remote errors propagate; the caller decides whether to queue a retry.
	pub async fn handle_event(&self, event: &FileEvent) -> Result<SyncOutcome, SyncError> {
		let started = Instant::now();
		let outcome = match event.kind {
			EventKind::Delete | EventKind::Rename => self.remove_path(&event.path).await?,
			EventKind::Create | EventKind::Modify => {
				self.upload_path(&event.path, UploadMode::Gated).await?
			}
		};
		debug!(
			path = %event.path,
			kind = %event.kind,
			outcome = ?outcome,
			duration_ms = started.elapsed().as_millis() as u64,
			"event handled"
		);
		Ok(outcome)
	}

	/// Bring one path in line with the disk: upload if present, delete if gone
	pub async fn sync_path(&self, rel_path: &str) -> Result<SyncOutcome, SyncError> {
		match tokio::fs::symlink_metadata(self.root.join(rel_path)).await {
			Ok(_) => match self.upload_path(rel_path, UploadMode::Gated).await? {
				SyncOutcome::Skipped(SkipReason::Vanished) => self.remove_path(rel_path).await,
				outcome => Ok(outcome),
			},
			Err(e) if e.kind() == io::ErrorKind::NotFound => self.remove_path(rel_path).await,
			Err(e) => Err(e.into()),
		}
	}

	/// Remove the remote entity and the cache entry; absent rows are fine
	pub async fn remove_path(&self, rel_path: &str) -> Result<SyncOutcome, SyncError> {
		let kind = EntityKind::for_path(rel_path);
		self.store.delete(kind, rel_path).await?;
		self.cache.remove(rel_path);
		info!(path = %rel_path, kind = %kind, "file removed");
		Ok(SyncOutcome::Deleted(kind))
	}

	async fn upload_path(&self, rel_path: &str, mode: UploadMode) -> Result<SyncOutcome, SyncError> {
		if !self.filter.admits(rel_path) {
			return Ok(SyncOutcome::Skipped(SkipReason::Filtered));
		}

		let abs = self.root.join(rel_path);
		let meta = match tokio::fs::metadata(&abs).await {
			Ok(meta) => meta,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!(path = %rel_path, "file vanished before sync");
				return Ok(SyncOutcome::Skipped(SkipReason::Vanished));
			}
			Err(e) => return Err(e.into()),
		};
		if meta.is_dir() {
			return Ok(SyncOutcome::Skipped(SkipReason::Directory));
		}

		let kind = EntityKind::for_path(rel_path);
		if !self.filter.within_size(kind, meta.len()) {
			warn!(
				path = %rel_path,
				size_mb = meta.len() / (1024 * 1024),
				max_mb = self.filter.max_attachment_bytes() / (1024 * 1024),
				"attachment too large, skipping"
			);
			return Ok(SyncOutcome::Skipped(SkipReason::TooLarge));
		}

		let read = tokio::task::spawn_blocking(move || {
			std::fs::read(&abs).map(|bytes| {
				let fp = fingerprint::hash_bytes(&bytes);
				(bytes, fp)
			})
		})
		.await
		.map_err(|e| SyncError::Other { message: format!("read task failed: {}", e) })?;
		let (bytes, fp) = match read {
			Ok(read) => read,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				return Ok(SyncOutcome::Skipped(SkipReason::Vanished));
			}
			Err(e) => return Err(e.into()),
		};

		if mode == UploadMode::Gated && !self.cache.needs_sync(rel_path, &fp) {
			debug!(path = %rel_path, "file unchanged, skipping");
			return Ok(SyncOutcome::Unchanged);
		}

		let size = bytes.len() as u64;
		let times = FileTimes::from_metadata(&meta);
		let entity = self.transformer.transform(rel_path, bytes, &fp, times)?;
		self.store.upsert(&entity).await?;
		self.cache.set(rel_path, TrackedFile::synced_now(fp.clone(), times.modified, size));

		info!(path = %rel_path, kind = %kind, hash = %fingerprint::short(&fp), "file synced");
		Ok(SyncOutcome::Uploaded(kind))
	}

	// ------------------------------------------------------------------------
	// Full reconciliation
	// ------------------------------------------------------------------------

	/// Diff the local tree, the remote inventory and the cache, then converge
	pub async fn full_reconcile(&self) -> Result<ReconcileReport, SyncError> {
		info!(root = %self.root.display(), "starting full reconciliation");
		let started = Instant::now();

		let root = self.root.clone();
		let filter = self.filter.clone();
		let scan: ScanResult = tokio::task::spawn_blocking(move || scan::scan_vault(&root, filter))
			.await
			.map_err(|e| SyncError::Other { message: format!("scan task failed: {}", e) })??;

		let mut remote: HashMap<String, String> = HashMap::new();
		for kind in EntityKind::ALL {
			remote.extend(self.store.list_fingerprints(kind).await?);
		}

		let mut report = ReconcileReport {
			scanned: scan.files.len(),
			skipped: scan.oversized.len(),
			..Default::default()
		};

		// Unreadable files are neither uploaded nor deleted remotely
		for path in &scan.unreadable {
			self.queue_retry(path);
			report.failed.push(path.clone());
		}

		let mut to_sync = Vec::new();
		for (path, local) in &scan.files {
			match remote.get(path) {
				Some(remote_fp) if *remote_fp == local.fingerprint => {
					report.unchanged += 1;
					if self.cache.needs_sync(path, &local.fingerprint) {
						self.cache.set(
							path,
							TrackedFile::synced_now(local.fingerprint.clone(), local.modified, local.size_bytes),
						);
					}
				}
				_ => to_sync.push(path.clone()),
			}
		}

		let mut to_delete: Vec<String> = remote
			.keys()
			.filter(|p| !scan.files.contains_key(*p) && !scan.unreadable.contains(*p))
			.cloned()
			.collect();
		to_delete.sort();

		debug!(sync = to_sync.len(), delete = to_delete.len(), "reconciliation plan");

		for path in &to_sync {
			match self.upload_path(path, UploadMode::Force).await {
				Ok(SyncOutcome::Uploaded(_)) => report.uploaded += 1,
				Ok(SyncOutcome::Skipped(SkipReason::Vanished)) => {
					report.skipped += 1;
					if !remote.contains_key(path) {
						self.cache.remove(path);
					}
				}
				Ok(_) => report.skipped += 1,
				Err(e) if e.is_vanished() => report.skipped += 1,
				Err(e) => {
					error!(path = %path, "failed to sync file: {}", e);
					if e.is_transient() {
						self.queue_retry(path);
					}
					report.failed.push(path.clone());
				}
			}
		}

		report.deleted = self.apply_deletes(&to_delete, &mut report.failed).await;

		// Drop cache entries with neither a local file nor a remote row
		let keep: BTreeSet<&String> = scan.files.keys().chain(scan.unreadable.iter()).collect();
		for path in self.cache.all_paths() {
			if !keep.contains(&path) && !remote.contains_key(&path) {
				self.cache.remove(&path);
			}
		}

		self.cache.set_last_full_sync(Utc::now());
		if let Err(e) = self.cache.save().await {
			warn!("failed to save state: {}", e);
		}

		report.duration = started.elapsed();
		info!(
			scanned = report.scanned,
			uploaded = report.uploaded,
			unchanged = report.unchanged,
			deleted = report.deleted,
			failed = report.failed.len(),
			duration_ms = report.duration.as_millis() as u64,
			"full reconciliation completed"
		);
		Ok(report)
	}

	/// Batched remote deletes per kind; failed batches go to the retry queue
	async fn apply_deletes(&self, paths: &[String], failed: &mut Vec<String>) -> usize {
		let mut deleted = 0;
		for kind in EntityKind::ALL {
			let of_kind: Vec<String> =
				paths.iter().filter(|p| EntityKind::for_path(p) == kind).cloned().collect();

			for chunk in of_kind.chunks(self.options.batch_size.max(1)) {
				match self.store.batch_delete(kind, chunk).await {
					Ok(_) => {
						for path in chunk {
							self.cache.remove(path);
						}
						deleted += chunk.len();
						info!(kind = %kind, count = chunk.len(), "deleted removed files");
					}
					Err(e) => {
						error!(kind = %kind, count = chunk.len(), "batch delete failed: {}", e);
						for path in chunk {
							self.queue_retry(path);
							failed.push(path.clone());
						}
					}
				}
			}
		}
		deleted
	}

	// ------------------------------------------------------------------------
	// Retry queue
	// ------------------------------------------------------------------------

	/// Record a failed attempt for `rel_path`; returns the attempt count
	pub fn queue_retry(&self, rel_path: &str) -> u32 {
		self.retries.lock().record_failure(rel_path, self.options.retry_delay)
	}

	pub fn pending_retries(&self) -> usize {
		self.retries.lock().len()
	}

	pub fn retry_attempts_for(&self, rel_path: &str) -> Option<u32> {
		self.retries.lock().attempts(rel_path)
	}

	/// Re-attempt every due path in the retry queue
	pub async fn retry_failed(&self) -> RetrySweep {
		let due = self.retries.lock().due(Instant::now());
		let mut sweep = RetrySweep { attempted: due.len(), ..Default::default() };

		for path in due {
			match self.sync_path(&path).await {
				Ok(outcome) => {
					self.retries.lock().remove(&path);
					info!(path = %path, outcome = ?outcome, "retry succeeded");
					sweep.recovered.push(path);
				}
				Err(e) => {
					let attempts = self.queue_retry(&path);
					if attempts > self.options.retry_attempts {
						self.retries.lock().remove(&path);
						error!(path = %path, attempts, "max retries exceeded, giving up: {}", e);
						sweep.abandoned.push(path);
					} else {
						warn!(path = %path, attempt = attempts, "retry failed: {}", e);
						sweep.still_failing.push(path);
					}
				}
			}
		}
		sweep
	}

	/// Sweep the retry queue until it is empty, waiting out each delay
	///
	/// Every failed attempt raises a path's count, so the loop ends once each
	/// path has recovered or passed the attempt ceiling.
	pub async fn retry_until_settled(&self) -> RetrySweep {
		let mut total = RetrySweep::default();
		loop {
			let next = self.retries.lock().next_due();
			let Some(at) = next else {
				break;
			};
			tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;

			let sweep = self.retry_failed().await;
			total.attempted += sweep.attempted;
			total.recovered.extend(sweep.recovered);
			total.abandoned.extend(sweep.abandoned);
			total.still_failing = sweep.still_failing;
		}
		total
	}

	// ------------------------------------------------------------------------
	// Materialize / pull
	// ------------------------------------------------------------------------

	/// Write every remote entity into the local vault
	pub async fn pull(&self) -> Result<PullReport, SyncError> {
		info!(root = %self.root.display(), "pulling files from remote store");
		let started = Instant::now();
		let mut report = PullReport::default();

		for kind in EntityKind::ALL {
			let entities = self.store.list_all(kind).await?;
			report.total += entities.len();

			for entity in entities {
				let rel_path = entity.path().to_string();
				if let Err(e) = validation::validate_vault_path(&rel_path) {
					warn!(path = %rel_path, "refusing to write entity: {}", e);
					report.failed.push(rel_path);
					continue;
				}

				let abs = self.root.join(&rel_path);
				let local_fp = fingerprint::hash_bytes(entity.raw_bytes());
				match fingerprint::hash_file(&abs).await {
					Ok(existing) if existing == entity.fingerprint() || existing == local_fp => {
						report.unchanged += 1;
						if self.cache.needs_sync(&rel_path, &existing) {
							self.record_written(&rel_path, existing, entity.size_bytes());
						}
						continue;
					}
					_ => {}
				}

				let data = entity.raw_bytes().to_vec();
				let target = abs.clone();
				let written = tokio::task::spawn_blocking(move || write_file(&target, &data))
					.await
					.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
					.and_then(|r| r);

				match written {
					Ok(()) => {
						info!(path = %rel_path, kind = %kind, "pulled file");
						self.record_written(&rel_path, local_fp, entity.size_bytes());
						report.written += 1;
					}
					Err(e) => {
						error!(path = %rel_path, "failed to write file: {}", e);
						report.failed.push(rel_path);
					}
				}
			}
		}

		if let Err(e) = self.cache.save().await {
			warn!("failed to save state: {}", e);
		}

		info!(
			total = report.total,
			written = report.written,
			unchanged = report.unchanged,
			failed = report.failed.len(),
			duration_ms = started.elapsed().as_millis() as u64,
			"pull completed"
		);
		Ok(report)
	}

	fn record_written(&self, rel_path: &str, fingerprint: String, size_bytes: u64) {
		let modified: Option<DateTime<Utc>> = std::fs::metadata(self.root.join(rel_path))
			.and_then(|m| m.modified())
			.ok()
			.map(DateTime::<Utc>::from);
		self.cache.set(rel_path, TrackedFile::synced_now(fingerprint, modified, size_bytes));
	}

	/// Persist the state cache
	pub async fn save_state(&self) -> Result<(), SyncError> {
		self.cache.save().await.map_err(SyncError::from)
	}
}

/// Create parent directories and replace `path` via a sibling temp file
fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
	let tmp = path.with_file_name(format!("{}.vaultsync-tmp", file_name));
	std::fs::write(&tmp, data)?;
	if let Err(e) = std::fs::rename(&tmp, path) {
		let _ = std::fs::remove_file(&tmp);
		return Err(e);
	}
	Ok(())
}


// vim: ts=4
