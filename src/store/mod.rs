//! Remote store interface
//!
//! The engine talks to its relational backend only through [`RemoteStore`].
//! Notes and attachments live in separate collections keyed by their
//! vault-relative path; the stored fingerprint is what the reconciler diffs
//! against local files.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub use crate::content::EntityKind;
use crate::content::Entity;
use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Summary of the remote inventory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
	pub notes: usize,
	pub attachments: usize,
	pub last_synced_at: Option<DateTime<Utc>>,
}

/// Core trait for the relational backend
///
/// Every operation is last-write-wins on the path key. Deleting a path that
/// does not exist is not an error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
	// === Writes ===

	/// Insert or replace the entity stored under its path
	async fn upsert(&self, entity: &Entity) -> StoreResult<()>;

	/// Remove one entity
	async fn delete(&self, kind: EntityKind, path: &str) -> StoreResult<()>;

	/// Remove many entities of one kind; returns how many rows went away
	async fn batch_delete(&self, kind: EntityKind, paths: &[String]) -> StoreResult<usize>;

	// === Reads ===

	/// Path → fingerprint for every stored entity of a kind
	async fn list_fingerprints(&self, kind: EntityKind) -> StoreResult<HashMap<String, String>>;

	/// Every stored entity of a kind, including raw bytes
	async fn list_all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>>;

	/// Counts per kind and the most recent sync time
	async fn status(&self) -> StoreResult<StoreStatus> {
		let notes = self.list_fingerprints(EntityKind::Note).await?.len();
		let attachments = self.list_fingerprints(EntityKind::Attachment).await?.len();
		Ok(StoreStatus { notes, attachments, last_synced_at: None })
	}
}

// vim: ts=4
