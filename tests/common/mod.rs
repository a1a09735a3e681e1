//! Shared helpers for integration tests: an in-memory remote store with
//! failure injection and call counting, plus vault fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use vaultsync::cache::StateCache;
use vaultsync::content::{Entity, EntityKind};
use vaultsync::engine::{Engine, EngineOptions};
use vaultsync::error::StoreError;
use vaultsync::exclusion::PathFilter;
use vaultsync::store::{RemoteStore, StoreResult};

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
	notes: Mutex<BTreeMap<String, Entity>>,
	attachments: Mutex<BTreeMap<String, Entity>>,
	failing: Mutex<HashSet<String>>,
	fail_all: AtomicBool,
	upserts: AtomicUsize,
	deletes: AtomicUsize,
	lists: AtomicUsize,
}

impl MemoryStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn table(&self, kind: EntityKind) -> &Mutex<BTreeMap<String, Entity>> {
		match kind {
			EntityKind::Note => &self.notes,
			EntityKind::Attachment => &self.attachments,
		}
	}

	fn check(&self, path: &str) -> StoreResult<()> {
		if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(path) {
			return Err(StoreError::Backend { message: format!("injected failure for {}", path) });
		}
		Ok(())
	}

	/// Make every write touching `path` fail
	pub fn fail_path(&self, path: &str) {
		self.failing.lock().insert(path.to_string());
	}

	pub fn heal_path(&self, path: &str) {
		self.failing.lock().remove(path);
	}

	/// Make every operation fail
	pub fn set_fail_all(&self, fail: bool) {
		self.fail_all.store(fail, Ordering::SeqCst);
	}

	/// Seed an entity without counting it as a call
	pub fn insert(&self, entity: Entity) {
		self.table(entity.kind()).lock().insert(entity.path().to_string(), entity);
	}

	pub fn get(&self, path: &str) -> Option<Entity> {
		self.table(EntityKind::for_path(path)).lock().get(path).cloned()
	}

	pub fn contains(&self, path: &str) -> bool {
		self.get(path).is_some()
	}

	/// Every stored path, notes first
	pub fn paths(&self) -> Vec<String> {
		let mut paths: Vec<String> = self.notes.lock().keys().cloned().collect();
		paths.extend(self.attachments.lock().keys().cloned());
		paths
	}

	pub fn upsert_count(&self) -> usize {
		self.upserts.load(Ordering::SeqCst)
	}

	pub fn delete_count(&self) -> usize {
		self.deletes.load(Ordering::SeqCst)
	}

	pub fn list_count(&self) -> usize {
		self.lists.load(Ordering::SeqCst)
	}

	pub fn reset_counters(&self) {
		self.upserts.store(0, Ordering::SeqCst);
		self.deletes.store(0, Ordering::SeqCst);
		self.lists.store(0, Ordering::SeqCst);
	}
}

#[async_trait]
impl RemoteStore for MemoryStore {
	async fn upsert(&self, entity: &Entity) -> StoreResult<()> {
		self.upserts.fetch_add(1, Ordering::SeqCst);
		self.check(entity.path())?;
		self.insert(entity.clone());
		Ok(())
	}

	async fn delete(&self, kind: EntityKind, path: &str) -> StoreResult<()> {
		self.deletes.fetch_add(1, Ordering::SeqCst);
		self.check(path)?;
		self.table(kind).lock().remove(path);
		Ok(())
	}

	async fn batch_delete(&self, kind: EntityKind, paths: &[String]) -> StoreResult<usize> {
		self.deletes.fetch_add(1, Ordering::SeqCst);
		for path in paths {
			self.check(path)?;
		}
		let mut table = self.table(kind).lock();
		Ok(paths.iter().filter(|p| table.remove(*p).is_some()).count())
	}

	async fn list_fingerprints(&self, kind: EntityKind) -> StoreResult<HashMap<String, String>> {
		self.lists.fetch_add(1, Ordering::SeqCst);
		if self.fail_all.load(Ordering::SeqCst) {
			return Err(StoreError::Backend { message: "injected failure".to_string() });
		}
		Ok(self
			.table(kind)
			.lock()
			.iter()
			.map(|(p, e)| (p.clone(), e.fingerprint().to_string()))
			.collect())
	}

	async fn list_all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
		self.lists.fetch_add(1, Ordering::SeqCst);
		if self.fail_all.load(Ordering::SeqCst) {
			return Err(StoreError::Backend { message: "injected failure".to_string() });
		}
		Ok(self.table(kind).lock().values().cloned().collect())
	}
}

// ============================================================================
// Fixtures
// ============================================================================

/// Write `content` at `rel` under `root`, creating parent directories
pub fn write_file(root: &Path, rel: &str, content: &[u8]) {
	let path = root.join(rel);
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).unwrap();
	}
	fs::write(path, content).unwrap();
}

/// Options with no retry backoff so sweeps run immediately
pub fn test_options() -> EngineOptions {
	EngineOptions { batch_size: 100, retry_attempts: 3, retry_delay: Duration::ZERO }
}

pub fn default_filter() -> Arc<PathFilter> {
	let excludes: Vec<String> = [".obsidian/**", ".trash/**", ".git/**"].iter().map(|s| s.to_string()).collect();
	Arc::new(PathFilter::new(&excludes, &[], 50 * 1024 * 1024).unwrap())
}

/// A vault, a state directory and an engine over a [`MemoryStore`]
pub struct Harness {
	pub vault: TempDir,
	pub state: TempDir,
	pub store: Arc<MemoryStore>,
	pub engine: Engine,
}

impl Harness {
	pub async fn new() -> Self {
		Self::with(test_options(), default_filter()).await
	}

	pub async fn with(options: EngineOptions, filter: Arc<PathFilter>) -> Self {
		let vault = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let store = MemoryStore::new();
		let engine = build_engine(vault.path(), state.path(), store.clone(), options, filter).await;
		Self { vault, state, store, engine }
	}

	pub fn root(&self) -> &Path {
		self.vault.path()
	}

	pub fn write(&self, rel: &str, content: &[u8]) {
		write_file(self.vault.path(), rel, content);
	}

	pub fn remove(&self, rel: &str) {
		fs::remove_file(self.vault.path().join(rel)).unwrap();
	}

	/// A fresh engine over the same vault, state directory and store
	pub async fn restart(&self) -> Engine {
		build_engine(self.vault.path(), self.state.path(), self.store.clone(), test_options(), default_filter())
			.await
	}
}

pub async fn build_engine(
	root: &Path,
	state_dir: &Path,
	store: Arc<MemoryStore>,
	options: EngineOptions,
	filter: Arc<PathFilter>,
) -> Engine {
	let cache = Arc::new(StateCache::open(state_dir, root).await.unwrap());
	Engine::new(root.to_path_buf(), store, cache, filter, options)
}

// vim: ts=4
