//! Durable record of what was last synced
//!
//! The cache maps vault-relative paths to the fingerprint that was last
//! pushed to the remote store. It is kept in memory behind a reader-writer
//! lock and persisted as a JSON snapshot in the state directory. Snapshots
//! are replaced atomically (temp file, fsync, rename), so a crash mid-save
//! leaves the previous snapshot intact.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StateError;
use crate::fingerprint;
use crate::logging::*;

const SNAPSHOT_VERSION: u32 = 1;

/// Sync record of one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
	pub fingerprint: String,
	pub last_synced: DateTime<Utc>,
	pub last_modified: Option<DateTime<Utc>>,
	pub size_bytes: u64,
}

impl TrackedFile {
	/// Record stamped with the current time
	pub fn synced_now(
		fingerprint: impl Into<String>,
		last_modified: Option<DateTime<Utc>>,
		size_bytes: u64,
	) -> Self {
		Self { fingerprint: fingerprint.into(), last_synced: Utc::now(), last_modified, size_bytes }
	}
}

/// On-disk form of the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
	#[serde(default)]
	pub version: u32,

	/// Root identity marker
	pub root: String,

	#[serde(default)]
	pub last_full_sync: Option<DateTime<Utc>>,

	#[serde(default)]
	pub files: BTreeMap<String, TrackedFile>,
}

impl Snapshot {
	fn empty(root: &str) -> Self {
		Self { version: SNAPSHOT_VERSION, root: root.to_string(), last_full_sync: None, files: BTreeMap::new() }
	}
}

/// Path → fingerprint cache with atomic snapshot persistence
pub struct StateCache {
	path: PathBuf,
	root: String,
	data: RwLock<Snapshot>,
	dirty: AtomicBool,
	save_lock: tokio::sync::Mutex<()>,
}

impl StateCache {
	/// Snapshot file name for a vault root
	pub fn snapshot_file_name(root: &str) -> String {
		let digest = fingerprint::hash_str(root);
		format!("state-{}.json", &digest[..12])
	}

	/// Load the snapshot for `root` from `state_dir`
	///
	/// A missing or unreadable snapshot starts empty. A snapshot written for
	/// a different root is discarded, which forces a full resync.
	pub async fn open(state_dir: &Path, root: &Path) -> Result<Self, StateError> {
		if state_dir.exists() && !state_dir.is_dir() {
			return Err(StateError::InvalidDirectory { path: state_dir.display().to_string() });
		}

		let root = root.to_string_lossy().to_string();
		let path = state_dir.join(Self::snapshot_file_name(&root));

		let (snapshot, dirty) = match tokio::fs::read_to_string(&path).await {
			Ok(contents) => match serde_json::from_str::<Snapshot>(&contents) {
				Ok(snapshot) if snapshot.root == root => {
					debug!(path = %path.display(), files = snapshot.files.len(), "state loaded");
					(snapshot, false)
				}
				Ok(snapshot) => {
					warn!(
						stored = %snapshot.root,
						current = %root,
						"state belongs to a different vault root, starting from scratch"
					);
					(Snapshot::empty(&root), true)
				}
				Err(e) => {
					warn!(path = %path.display(), "state snapshot unreadable ({}), starting from scratch", e);
					(Snapshot::empty(&root), true)
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Snapshot::empty(&root), false),
			Err(e) => return Err(StateError::LoadFailed { source: Box::new(e) }),
		};

		Ok(Self {
			path,
			root,
			data: RwLock::new(snapshot),
			dirty: AtomicBool::new(dirty),
			save_lock: tokio::sync::Mutex::new(()),
		})
	}

	/// Location of the snapshot file
	pub fn state_path(&self) -> &Path {
		&self.path
	}

	pub fn root(&self) -> &str {
		&self.root
	}

	/// True if the path is untracked or tracked with a different fingerprint
	pub fn needs_sync(&self, rel_path: &str, fingerprint: &str) -> bool {
		match self.data.read().files.get(rel_path) {
			Some(tracked) => tracked.fingerprint != fingerprint,
			None => true,
		}
	}

	pub fn get(&self, rel_path: &str) -> Option<TrackedFile> {
		self.data.read().files.get(rel_path).cloned()
	}

	pub fn set(&self, rel_path: &str, tracked: TrackedFile) {
		self.data.write().files.insert(rel_path.to_string(), tracked);
		self.mark_dirty();
	}

	pub fn remove(&self, rel_path: &str) -> Option<TrackedFile> {
		let removed = self.data.write().files.remove(rel_path);
		if removed.is_some() {
			self.mark_dirty();
		}
		removed
	}

	pub fn all_paths(&self) -> BTreeSet<String> {
		self.data.read().files.keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.data.read().files.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.data.write().files.clear();
		self.mark_dirty();
	}

	pub fn last_full_sync(&self) -> Option<DateTime<Utc>> {
		self.data.read().last_full_sync
	}

	pub fn set_last_full_sync(&self, at: DateTime<Utc>) {
		self.data.write().last_full_sync = Some(at);
		self.mark_dirty();
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty.load(Ordering::Acquire)
	}

	fn mark_dirty(&self) {
		self.dirty.store(true, Ordering::Release);
	}

	/// Persist the snapshot if anything changed since the last save
	pub async fn save(&self) -> Result<(), StateError> {
		let _guard = self.save_lock.lock().await;

		// Clear the flag together with taking the copy, so writes racing with
		// the file I/O below mark the cache dirty again
		let json = {
			let data = self.data.read();
			if !self.dirty.swap(false, Ordering::AcqRel) {
				return Ok(());
			}
			serde_json::to_vec_pretty(&*data)
		};
		let json = match json {
			Ok(json) => json,
			Err(e) => {
				self.mark_dirty();
				return Err(StateError::SaveFailed { source: Box::new(e) });
			}
		};

		let path = self.path.clone();
		let result = tokio::task::spawn_blocking(move || write_atomically(&path, &json))
			.await
			.map_err(|e| StateError::SaveFailed { source: Box::new(e) })
			.and_then(|r| r.map_err(|e| StateError::SaveFailed { source: Box::new(e) }));

		match result {
			Ok(()) => {
				debug!(path = %self.path.display(), "state saved");
				Ok(())
			}
			Err(e) => {
				self.mark_dirty();
				Err(e)
			}
		}
	}
}

/// Write `data` to a sibling temp file, fsync it, then rename over `path`
fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
	let dir = path.parent().unwrap_or(Path::new("."));
	std::fs::create_dir_all(dir)?;

	let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
	let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

	let result = (|| {
		let mut file = std::fs::File::create(&tmp_path)?;
		file.write_all(data)?;
		file.sync_all()?;
		drop(file);
		std::fs::rename(&tmp_path, path)?;
		// Persist the rename itself where directories can be opened
		if let Ok(d) = std::fs::File::open(dir) {
			let _ = d.sync_all();
		}
		Ok(())
	})();

	if result.is_err() {
		let _ = std::fs::remove_file(&tmp_path);
	}
	result
}


// vim: ts=4
