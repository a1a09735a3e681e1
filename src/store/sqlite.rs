//! SQLite-backed remote store
//!
//! Connections come from a bounded `deadpool-sqlite` pool; each operation
//! runs on the pool's blocking thread via `interact` and is bounded by the
//! configured operation deadline. A background sweep recycles connections
//! that exceeded their lifetime or sat idle too long.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config as PoolSettings, Pool, PoolConfig, Runtime};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{RemoteStore, StoreResult, StoreStatus};
use crate::config::DatabaseSettings;
use crate::content::{Attachment, Entity, EntityKind, Note};
use crate::error::StoreError;
use crate::logging::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vault_notes (
	id              TEXT PRIMARY KEY,
	path            TEXT NOT NULL UNIQUE,
	filename        TEXT NOT NULL,
	title           TEXT,
	tags            TEXT NOT NULL DEFAULT '[]',
	aliases         TEXT NOT NULL DEFAULT '[]',
	created_at      TEXT,
	modified_at     TEXT,
	publish         INTEGER NOT NULL DEFAULT 0,
	frontmatter     TEXT NOT NULL DEFAULT '{}',
	body            TEXT NOT NULL,
	raw_content     BLOB NOT NULL,
	content_hash    TEXT NOT NULL,
	file_size_bytes INTEGER NOT NULL,
	outgoing_links  TEXT NOT NULL DEFAULT '[]',
	synced_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vault_notes_hash ON vault_notes(content_hash);

CREATE TABLE IF NOT EXISTS vault_attachments (
	id              TEXT PRIMARY KEY,
	path            TEXT NOT NULL UNIQUE,
	filename        TEXT NOT NULL,
	extension       TEXT,
	mime_type       TEXT NOT NULL,
	file_size_bytes INTEGER NOT NULL,
	content_hash    TEXT NOT NULL,
	data            BLOB NOT NULL,
	synced_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vault_attachments_hash ON vault_attachments(content_hash);
"#;

/// Interval of the connection recycling sweep
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

fn table(kind: EntityKind) -> &'static str {
	match kind {
		EntityKind::Note => "vault_notes",
		EntityKind::Attachment => "vault_attachments",
	}
}

/// Relational store on a local SQLite database
pub struct SqliteStore {
	path: PathBuf,
	pool: Pool,
	op_timeout: Duration,
	max_lifetime: Duration,
	idle_timeout: Duration,
	maintenance: CancellationToken,
}

impl SqliteStore {
	/// Open (creating if needed) the database and its tables
	pub async fn open(path: &Path, settings: &DatabaseSettings) -> StoreResult<Self> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)
					.map_err(|e| StoreError::Pool { message: format!("{}: {}", parent.display(), e) })?;
			}
		}

		let mut pool_settings = PoolSettings::new(path);
		pool_settings.pool = Some(PoolConfig::new(settings.pool_size.max(1)));
		let pool = pool_settings
			.create_pool(Runtime::Tokio1)
			.map_err(|e| StoreError::Pool { message: e.to_string() })?;

		let store = Self {
			path: path.to_path_buf(),
			pool,
			op_timeout: Duration::from_secs(settings.op_timeout_secs),
			max_lifetime: Duration::from_secs(settings.max_lifetime_secs),
			idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
			maintenance: CancellationToken::new(),
		};
		store.ensure_schema().await?;
		store.spawn_maintenance();

		info!(path = %path.display(), pool_size = settings.pool_size, "remote store ready");
		Ok(store)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Create tables and indexes if missing
	pub async fn ensure_schema(&self) -> StoreResult<()> {
		self.run("ensure_schema", |conn| {
			conn.execute_batch("PRAGMA journal_mode=WAL;")?;
			conn.execute_batch(SCHEMA)?;
			Ok(())
		})
		.await
	}

	/// Drop pooled connections past their lifetime or idle limit
	pub fn evict_expired(&self) -> usize {
		let max_lifetime = self.max_lifetime;
		let idle_timeout = self.idle_timeout;
		let before = self.pool.status().size;
		let _ = self
			.pool
			.retain(|_, metrics| metrics.age() < max_lifetime && metrics.last_used() < idle_timeout);
		let removed = before.saturating_sub(self.pool.status().size);
		if removed > 0 {
			debug!(removed, "recycled pooled connections");
		}
		removed
	}

	fn spawn_maintenance(&self) {
		let pool = self.pool.clone();
		let token = self.maintenance.clone();
		let max_lifetime = self.max_lifetime;
		let idle_timeout = self.idle_timeout;

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
			ticker.tick().await;
			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					_ = ticker.tick() => {
						let _ = pool.retain(|_, metrics| {
							metrics.age() < max_lifetime && metrics.last_used() < idle_timeout
						});
					}
				}
			}
		});
	}

	/// Run `f` on a pooled connection within the operation deadline
	async fn run<F, T>(&self, operation: &'static str, f: F) -> StoreResult<T>
	where
		F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
		T: Send + 'static,
	{
		let busy = self.op_timeout;
		let work = async {
			let conn = self.pool.get().await.map_err(|e| StoreError::Pool { message: e.to_string() })?;
			conn.interact(move |conn| {
				conn.busy_timeout(busy)?;
				f(conn)
			})
			.await
			.map_err(|e| StoreError::Interact { message: e.to_string() })?
		};

		match tokio::time::timeout(self.op_timeout, work).await {
			Ok(result) => result,
			Err(_) => {
				warn!(operation, timeout_secs = self.op_timeout.as_secs(), "store operation timed out");
				Err(StoreError::Timeout { operation })
			}
		}
	}
}

impl Drop for SqliteStore {
	fn drop(&mut self) {
		self.maintenance.cancel();
	}
}

// ============================================================================
// ROW MAPPING
// ============================================================================

struct NoteRow {
	path: String,
	filename: String,
	title: String,
	tags: String,
	aliases: String,
	created_at: Option<String>,
	modified_at: Option<String>,
	publish: bool,
	frontmatter: String,
	body: String,
	raw: Vec<u8>,
	fingerprint: String,
	size_bytes: i64,
	links: String,
}

impl NoteRow {
	fn from_note(note: &Note) -> StoreResult<Self> {
		Ok(Self {
			path: note.path.clone(),
			filename: note.filename.clone(),
			title: note.title.clone(),
			tags: serde_json::to_string(&note.tags)?,
			aliases: serde_json::to_string(&note.aliases)?,
			created_at: note.created_at.map(|t| t.to_rfc3339()),
			modified_at: note.modified_at.map(|t| t.to_rfc3339()),
			publish: note.publish,
			frontmatter: serde_json::to_string(&note.frontmatter)?,
			body: note.body.clone(),
			raw: note.raw.clone(),
			fingerprint: note.fingerprint.clone(),
			size_bytes: note.size_bytes as i64,
			links: serde_json::to_string(&note.links)?,
		})
	}
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
	value
		.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
		.map(|t| t.with_timezone(&Utc))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
	let text: String = row.get(idx)?;
	serde_json::from_str(&text).map_err(|e| {
		rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
	})
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
	Ok(Note {
		path: row.get(0)?,
		filename: row.get(1)?,
		title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
		tags: json_column(row, 3)?,
		aliases: json_column(row, 4)?,
		created_at: parse_time(row.get(5)?),
		modified_at: parse_time(row.get(6)?),
		publish: row.get(7)?,
		frontmatter: json_column(row, 8)?,
		body: row.get(9)?,
		raw: row.get(10)?,
		fingerprint: row.get(11)?,
		size_bytes: row.get::<_, i64>(12)?.max(0) as u64,
		links: json_column(row, 13)?,
	})
}

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
	Ok(Attachment {
		path: row.get(0)?,
		filename: row.get(1)?,
		extension: row.get(2)?,
		media_type: row.get(3)?,
		size_bytes: row.get::<_, i64>(4)?.max(0) as u64,
		fingerprint: row.get(5)?,
		data: row.get(6)?,
	})
}

// ============================================================================
// TRAIT IMPLEMENTATION
// ============================================================================

#[async_trait]
impl RemoteStore for SqliteStore {
	async fn upsert(&self, entity: &Entity) -> StoreResult<()> {
		let synced_at = Utc::now().to_rfc3339();
		let id = uuid::Uuid::new_v4().to_string();

		match entity {
			Entity::Note(note) => {
				let row = NoteRow::from_note(note)?;
				self.run("upsert_note", move |conn| {
					conn.execute(
						"INSERT INTO vault_notes (
							id, path, filename, title, tags, aliases, created_at, modified_at,
							publish, frontmatter, body, raw_content, content_hash,
							file_size_bytes, outgoing_links, synced_at
						) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
						ON CONFLICT(path) DO UPDATE SET
							filename = excluded.filename,
							title = excluded.title,
							tags = excluded.tags,
							aliases = excluded.aliases,
							created_at = excluded.created_at,
							modified_at = excluded.modified_at,
							publish = excluded.publish,
							frontmatter = excluded.frontmatter,
							body = excluded.body,
							raw_content = excluded.raw_content,
							content_hash = excluded.content_hash,
							file_size_bytes = excluded.file_size_bytes,
							outgoing_links = excluded.outgoing_links,
							synced_at = excluded.synced_at",
						params![
							id,
							row.path,
							row.filename,
							row.title,
							row.tags,
							row.aliases,
							row.created_at,
							row.modified_at,
							row.publish,
							row.frontmatter,
							row.body,
							row.raw,
							row.fingerprint,
							row.size_bytes,
							row.links,
							synced_at,
						],
					)?;
					Ok(())
				})
				.await
			}
			Entity::Attachment(att) => {
				let att = att.clone();
				self.run("upsert_attachment", move |conn| {
					conn.execute(
						"INSERT INTO vault_attachments (
							id, path, filename, extension, mime_type, file_size_bytes,
							content_hash, data, synced_at
						) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
						ON CONFLICT(path) DO UPDATE SET
							filename = excluded.filename,
							extension = excluded.extension,
							mime_type = excluded.mime_type,
							file_size_bytes = excluded.file_size_bytes,
							content_hash = excluded.content_hash,
							data = excluded.data,
							synced_at = excluded.synced_at",
						params![
							id,
							att.path,
							att.filename,
							att.extension,
							att.media_type,
							att.size_bytes as i64,
							att.fingerprint,
							att.data,
							synced_at,
						],
					)?;
					Ok(())
				})
				.await
			}
		}
	}

	async fn delete(&self, kind: EntityKind, path: &str) -> StoreResult<()> {
		let path = path.to_string();
		let sql = format!("DELETE FROM {} WHERE path = ?1", table(kind));
		self.run("delete", move |conn| {
			conn.execute(&sql, params![path])?;
			Ok(())
		})
		.await
	}

	async fn batch_delete(&self, kind: EntityKind, paths: &[String]) -> StoreResult<usize> {
		if paths.is_empty() {
			return Ok(0);
		}

		let paths = paths.to_vec();
		let placeholders = vec!["?"; paths.len()].join(", ");
		let sql = format!("DELETE FROM {} WHERE path IN ({})", table(kind), placeholders);
		self.run("batch_delete", move |conn| {
			let tx = conn.transaction()?;
			let removed = tx.execute(&sql, params_from_iter(paths.iter()))?;
			tx.commit()?;
			Ok(removed)
		})
		.await
	}

	async fn list_fingerprints(&self, kind: EntityKind) -> StoreResult<HashMap<String, String>> {
		let sql = format!("SELECT path, content_hash FROM {}", table(kind));
		self.run("list_fingerprints", move |conn| {
			let mut stmt = conn.prepare(&sql)?;
			let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
			let mut map = HashMap::new();
			for row in rows {
				let (path, hash) = row?;
				map.insert(path, hash);
			}
			Ok(map)
		})
		.await
	}

	async fn list_all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
		match kind {
			EntityKind::Note => {
				self.run("list_notes", |conn| {
					let mut stmt = conn.prepare(
						"SELECT path, filename, title, tags, aliases, created_at, modified_at,
							publish, frontmatter, body, raw_content, content_hash,
							file_size_bytes, outgoing_links
						FROM vault_notes ORDER BY path",
					)?;
					let rows = stmt.query_map([], note_from_row)?;
					let mut out = Vec::new();
					for row in rows {
						out.push(Entity::Note(row?));
					}
					Ok(out)
				})
				.await
			}
			EntityKind::Attachment => {
				self.run("list_attachments", |conn| {
					let mut stmt = conn.prepare(
						"SELECT path, filename, extension, mime_type, file_size_bytes,
							content_hash, data
						FROM vault_attachments ORDER BY path",
					)?;
					let rows = stmt.query_map([], attachment_from_row)?;
					let mut out = Vec::new();
					for row in rows {
						out.push(Entity::Attachment(row?));
					}
					Ok(out)
				})
				.await
			}
		}
	}

	async fn status(&self) -> StoreResult<StoreStatus> {
		self.run("status", |conn| {
			let notes: i64 = conn.query_row("SELECT COUNT(*) FROM vault_notes", [], |r| r.get(0))?;
			let attachments: i64 =
				conn.query_row("SELECT COUNT(*) FROM vault_attachments", [], |r| r.get(0))?;
			let last: Option<String> = conn
				.query_row(
					"SELECT MAX(synced_at) FROM (
						SELECT synced_at FROM vault_notes
						UNION ALL
						SELECT synced_at FROM vault_attachments
					)",
					[],
					|r| r.get(0),
				)
				.optional()?
				.flatten();
			Ok(StoreStatus {
				notes: notes.max(0) as usize,
				attachments: attachments.max(0) as usize,
				last_synced_at: parse_time(last),
			})
		})
		.await
	}
}


// vim: ts=4
