//! Sync engine integration tests
//!
//! This test suite covers:
//! - Full reconciliation (idempotence, mixed add/delete, batching)
//! - Incremental event handling and the fingerprint gate
//! - Partial-failure isolation and the retry queue ceiling
//! - Skips for excluded, vanished and oversized files

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{default_filter, test_options, Harness};
use vaultsync::content::{Entity, EntityKind};
use vaultsync::debounce::{EventKind, FileEvent};
use vaultsync::engine::{EngineOptions, SkipReason, SyncOutcome};
use vaultsync::exclusion::PathFilter;
use vaultsync::fingerprint::hash_bytes;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpixels";

fn event(path: &str, kind: EventKind) -> FileEvent {
	FileEvent { path: path.to_string(), kind, timestamp: chrono::Utc::now() }
}

// ============================================================================
// Full reconciliation
// ============================================================================

#[tokio::test]
async fn test_reconcile_uploads_new_files() {
	let h = Harness::new().await;
	h.write("a.md", b"---\ntitle: Alpha\n---\nSee [[b]] #idea");
	h.write("img/b.png", PNG);
	h.write(".obsidian/app.json", b"{}");

	let report = h.engine.full_reconcile().await.unwrap();

	assert_eq!(report.scanned, 2);
	assert_eq!(report.uploaded, 2);
	assert_eq!(report.deleted, 0);
	assert!(report.failed.is_empty());
	assert_eq!(h.store.paths(), vec!["a.md".to_string(), "img/b.png".to_string()]);

	match h.store.get("a.md").unwrap() {
		Entity::Note(note) => {
			assert_eq!(note.title, "Alpha");
			assert_eq!(note.links, vec!["b".to_string()]);
			assert_eq!(note.tags, vec!["idea".to_string()]);
		}
		other => panic!("expected note, got {:?}", other.kind()),
	}
	match h.store.get("img/b.png").unwrap() {
		Entity::Attachment(att) => {
			assert_eq!(att.media_type, "image/png");
			assert_eq!(att.data, PNG);
		}
		other => panic!("expected attachment, got {:?}", other.kind()),
	}

	let cache = h.engine.cache();
	assert_eq!(cache.len(), 2);
	assert!(cache.last_full_sync().is_some());
	assert!(!cache.is_dirty(), "reconciliation should persist the cache");
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");
	h.write("notes/b.md", b"beta");
	h.write("c.pdf", b"%PDF-1.4 body");

	h.engine.full_reconcile().await.unwrap();
	h.store.reset_counters();

	let report = h.engine.full_reconcile().await.unwrap();

	assert_eq!(report.uploaded, 0);
	assert_eq!(report.deleted, 0);
	assert_eq!(report.unchanged, 3);
	assert_eq!(h.store.upsert_count(), 0);
	assert_eq!(h.store.delete_count(), 0);
}

#[tokio::test]
async fn test_reconcile_add_and_delete_scenario() {
	let h = Harness::new().await;
	h.write("a.md", b"note a");
	h.write("b.png", PNG);
	h.engine.full_reconcile().await.unwrap();

	let h1 = hash_bytes(b"note a");
	assert_eq!(h.engine.cache().get("a.md").unwrap().fingerprint, h1);
	assert_eq!(h.engine.cache().get("b.png").unwrap().fingerprint, hash_bytes(PNG));

	h.write("c.md", b"note c");
	h.remove("b.png");
	h.store.reset_counters();

	let report = h.engine.full_reconcile().await.unwrap();

	assert_eq!(report.uploaded, 1);
	assert_eq!(report.deleted, 1);
	assert_eq!(report.unchanged, 1);
	// One upsert for c.md, one batched delete for b.png
	assert_eq!(h.store.upsert_count(), 1);
	assert_eq!(h.store.delete_count(), 1);
	assert!(!h.store.contains("b.png"));
	assert!(h.store.contains("c.md"));

	let cache = h.engine.cache();
	let paths: Vec<String> = cache.all_paths().into_iter().collect();
	assert_eq!(paths, vec!["a.md".to_string(), "c.md".to_string()]);
	assert_eq!(cache.get("a.md").unwrap().fingerprint, h1);
	assert_eq!(cache.get("c.md").unwrap().fingerprint, hash_bytes(b"note c"));
}

#[tokio::test]
async fn test_reconcile_batches_deletes() {
	let options = EngineOptions { batch_size: 2, ..test_options() };
	let h = Harness::with(options, default_filter()).await;
	for i in 0..5 {
		h.write(&format!("n{}.md", i), format!("note {}", i).as_bytes());
	}
	h.engine.full_reconcile().await.unwrap();

	for i in 0..5 {
		h.remove(&format!("n{}.md", i));
	}
	h.store.reset_counters();

	let report = h.engine.full_reconcile().await.unwrap();

	assert_eq!(report.deleted, 5);
	assert_eq!(h.store.delete_count(), 3);
	assert!(h.store.paths().is_empty());
	assert!(h.engine.cache().is_empty());
}

#[tokio::test]
async fn test_reconcile_adopts_matching_remote_without_upload() {
	let h = Harness::new().await;
	h.write("a.md", b"same");

	// Remote already holds the same bytes, cache knows nothing
	let seeded = vaultsync::content::VaultTransformer;
	let entity = vaultsync::content::ContentTransformer::transform(
		&seeded,
		"a.md",
		b"same".to_vec(),
		&hash_bytes(b"same"),
		Default::default(),
	)
	.unwrap();
	h.store.insert(entity);

	let report = h.engine.full_reconcile().await.unwrap();

	assert_eq!(report.uploaded, 0);
	assert_eq!(report.unchanged, 1);
	assert_eq!(h.store.upsert_count(), 0);
	assert_eq!(h.engine.cache().get("a.md").unwrap().fingerprint, hash_bytes(b"same"));
}

#[tokio::test]
async fn test_reconcile_propagates_inventory_failure() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");
	h.store.set_fail_all(true);

	assert!(h.engine.full_reconcile().await.is_err());
	assert_eq!(h.store.upsert_count(), 0);
}

// ============================================================================
// Failures and retries
// ============================================================================

#[tokio::test]
async fn test_partial_failure_isolation() {
	let h = Harness::new().await;
	for name in ["a.md", "b.md", "c.md", "d.png"] {
		h.write(name, name.as_bytes());
	}
	h.store.fail_path("c.md");

	let report = h.engine.full_reconcile().await.unwrap();

	assert_eq!(report.uploaded, 3);
	assert_eq!(report.failed, vec!["c.md".to_string()]);
	assert!(h.store.contains("a.md"));
	assert!(h.store.contains("b.md"));
	assert!(h.store.contains("d.png"));
	assert!(!h.store.contains("c.md"));
	assert_eq!(h.engine.pending_retries(), 1);
	assert_eq!(h.engine.retry_attempts_for("c.md"), Some(1));
	assert!(h.engine.cache().get("c.md").is_none());
}

#[tokio::test]
async fn test_retry_recovers_after_heal() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");
	h.store.fail_path("a.md");
	h.engine.full_reconcile().await.unwrap();

	h.store.heal_path("a.md");
	let sweep = h.engine.retry_failed().await;

	assert_eq!(sweep.attempted, 1);
	assert_eq!(sweep.recovered, vec!["a.md".to_string()]);
	assert_eq!(h.engine.pending_retries(), 0);
	assert!(h.store.contains("a.md"));
	assert_eq!(h.engine.cache().get("a.md").unwrap().fingerprint, hash_bytes(b"alpha"));
}

#[tokio::test]
async fn test_retry_ceiling_drops_entry() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");
	h.store.fail_path("a.md");
	h.engine.full_reconcile().await.unwrap();
	assert_eq!(h.engine.retry_attempts_for("a.md"), Some(1));

	let first = h.engine.retry_failed().await;
	assert_eq!(first.still_failing, vec!["a.md".to_string()]);
	assert_eq!(h.engine.retry_attempts_for("a.md"), Some(2));

	let second = h.engine.retry_failed().await;
	assert_eq!(second.still_failing, vec!["a.md".to_string()]);

	let third = h.engine.retry_failed().await;
	assert_eq!(third.abandoned, vec!["a.md".to_string()]);
	assert_eq!(h.engine.pending_retries(), 0);

	let empty = h.engine.retry_failed().await;
	assert_eq!(empty.attempted, 0);
}

#[tokio::test]
async fn test_retry_respects_delay() {
	let options = EngineOptions { retry_delay: Duration::from_secs(3600), ..test_options() };
	let h = Harness::with(options, default_filter()).await;
	h.write("a.md", b"alpha");
	h.store.fail_path("a.md");
	h.engine.full_reconcile().await.unwrap();

	let sweep = h.engine.retry_failed().await;
	assert_eq!(sweep.attempted, 0);
	assert_eq!(h.engine.pending_retries(), 1);
}

#[tokio::test]
async fn test_retry_until_settled_waits_out_delay() {
	let options = EngineOptions { retry_delay: Duration::from_millis(50), ..test_options() };
	let h = Harness::with(options, default_filter()).await;
	h.write("a.md", b"alpha");
	h.store.fail_path("a.md");
	h.engine.full_reconcile().await.unwrap();

	// An immediate sweep finds nothing due
	h.store.heal_path("a.md");
	assert_eq!(h.engine.retry_failed().await.attempted, 0);

	let sweep = h.engine.retry_until_settled().await;
	assert_eq!(sweep.attempted, 1);
	assert_eq!(sweep.recovered, vec!["a.md".to_string()]);
	assert_eq!(h.engine.pending_retries(), 0);
	assert!(h.store.contains("a.md"));
}

#[tokio::test]
async fn test_retry_until_settled_stops_at_ceiling() {
	let options = EngineOptions { retry_delay: Duration::from_millis(10), retry_attempts: 2, ..test_options() };
	let h = Harness::with(options, default_filter()).await;
	h.write("a.md", b"alpha");
	h.store.fail_path("a.md");
	h.engine.full_reconcile().await.unwrap();

	let sweep = h.engine.retry_until_settled().await;
	assert_eq!(sweep.attempted, 2);
	assert!(sweep.recovered.is_empty());
	assert_eq!(sweep.abandoned, vec!["a.md".to_string()]);
	assert_eq!(h.engine.pending_retries(), 0);
}

#[tokio::test]
async fn test_retry_of_deleted_file_removes_remote() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");
	h.engine.full_reconcile().await.unwrap();

	h.remove("a.md");
	h.store.fail_path("a.md");
	assert!(h.engine.handle_event(&event("a.md", EventKind::Delete)).await.is_err());
	h.engine.queue_retry("a.md");

	h.store.heal_path("a.md");
	let sweep = h.engine.retry_failed().await;

	assert_eq!(sweep.recovered, vec!["a.md".to_string()]);
	assert!(!h.store.contains("a.md"));
	assert!(h.engine.cache().get("a.md").is_none());
}

// ============================================================================
// Incremental events
// ============================================================================

#[tokio::test]
async fn test_event_create_then_unchanged() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");

	let first = h.engine.handle_event(&event("a.md", EventKind::Create)).await.unwrap();
	assert_eq!(first, SyncOutcome::Uploaded(EntityKind::Note));
	assert_eq!(h.store.upsert_count(), 1);

	// Same bytes: no remote call at all
	h.store.reset_counters();
	let second = h.engine.handle_event(&event("a.md", EventKind::Modify)).await.unwrap();
	assert_eq!(second, SyncOutcome::Unchanged);
	assert_eq!(h.store.upsert_count(), 0);
	assert_eq!(h.store.delete_count(), 0);
	assert_eq!(h.store.list_count(), 0);

	h.write("a.md", b"alpha v2");
	let third = h.engine.handle_event(&event("a.md", EventKind::Modify)).await.unwrap();
	assert_eq!(third, SyncOutcome::Uploaded(EntityKind::Note));
	assert_eq!(h.engine.cache().get("a.md").unwrap().fingerprint, hash_bytes(b"alpha v2"));
}

#[tokio::test]
async fn test_event_delete_and_rename() {
	let h = Harness::new().await;
	h.write("a.md", b"alpha");
	h.write("pic.png", PNG);
	h.engine.full_reconcile().await.unwrap();

	h.remove("a.md");
	let deleted = h.engine.handle_event(&event("a.md", EventKind::Delete)).await.unwrap();
	assert_eq!(deleted, SyncOutcome::Deleted(EntityKind::Note));
	assert!(!h.store.contains("a.md"));
	assert!(h.engine.cache().get("a.md").is_none());

	std::fs::rename(h.root().join("pic.png"), h.root().join("moved.png")).unwrap();
	let renamed = h.engine.handle_event(&event("pic.png", EventKind::Rename)).await.unwrap();
	assert_eq!(renamed, SyncOutcome::Deleted(EntityKind::Attachment));
	h.engine.handle_event(&event("moved.png", EventKind::Create)).await.unwrap();

	assert_eq!(h.store.paths(), vec!["moved.png".to_string()]);
}

#[tokio::test]
async fn test_delete_of_unknown_path_is_ok() {
	let h = Harness::new().await;
	let outcome = h.engine.handle_event(&event("never.md", EventKind::Delete)).await.unwrap();
	assert_eq!(outcome, SyncOutcome::Deleted(EntityKind::Note));
}

#[tokio::test]
async fn test_event_skips() {
	let filter = Arc::new(PathFilter::new(&[".obsidian/**".to_string()], &[], 16).unwrap());
	let h = Harness::with(test_options(), filter).await;
	h.write(".obsidian/app.json", b"{}");
	h.write("big.png", &[7u8; 64]);
	h.write("big-note.md", &[b'x'; 64]);
	std::fs::create_dir_all(h.root().join("folder")).unwrap();

	let cases = [
		(".obsidian/app.json", SyncOutcome::Skipped(SkipReason::Filtered)),
		("gone.md", SyncOutcome::Skipped(SkipReason::Vanished)),
		("folder", SyncOutcome::Skipped(SkipReason::Directory)),
		("big.png", SyncOutcome::Skipped(SkipReason::TooLarge)),
	];
	for (path, expected) in cases {
		let outcome = h.engine.handle_event(&event(path, EventKind::Create)).await.unwrap();
		assert_eq!(outcome, expected, "path {}", path);
	}
	assert_eq!(h.store.upsert_count(), 0);

	// Size limits apply to attachments only
	let note = h.engine.handle_event(&event("big-note.md", EventKind::Create)).await.unwrap();
	assert_eq!(note, SyncOutcome::Uploaded(EntityKind::Note));
}

#[tokio::test]
async fn test_malformed_frontmatter_still_uploads() {
	let h = Harness::new().await;
	h.write("bad.md", b"---\ntitle: [unclosed\n---\nbody text");

	let outcome = h.engine.handle_event(&event("bad.md", EventKind::Create)).await.unwrap();
	assert_eq!(outcome, SyncOutcome::Uploaded(EntityKind::Note));

	match h.store.get("bad.md").unwrap() {
		Entity::Note(note) => {
			assert_eq!(note.title, "bad");
			assert!(note.body.contains("body text"));
		}
		other => panic!("expected note, got {:?}", other.kind()),
	}
}

// vim: ts=4
