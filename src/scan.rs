//! Local vault enumeration
//!
//! Walks the vault root with `ignore::WalkBuilder` (no gitignore semantics,
//! no symlinked directories), prunes excluded directories, and fingerprints
//! every qualifying file. Runs on the blocking pool.

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Component, Path};
use std::sync::Arc;

use crate::content::EntityKind;
use crate::exclusion::PathFilter;
use crate::fingerprint;
use crate::logging::*;

/// A qualifying local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
	pub fingerprint: String,
	pub size_bytes: u64,
	pub modified: Option<DateTime<Utc>>,
}

/// Result of one walk over the vault
#[derive(Debug, Default)]
pub struct ScanResult {
	/// Qualifying files keyed by relative path
	pub files: BTreeMap<String, LocalFile>,

	/// Files that exist but could not be fingerprinted
	pub unreadable: BTreeSet<String>,

	/// Files left out by size limits
	pub oversized: BTreeSet<String>,
}

/// Vault-relative path with `/` separators, or `None` outside the root
pub fn to_rel_path(root: &Path, path: &Path) -> Option<String> {
	let rel = path.strip_prefix(root).ok()?;
	let mut parts = Vec::new();
	for component in rel.components() {
		match component {
			Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
			Component::CurDir => {}
			_ => return None,
		}
	}
	Some(parts.join("/"))
}

/// Enumerate and fingerprint every qualifying file under `root`
pub fn scan_vault(root: &Path, filter: Arc<PathFilter>) -> io::Result<ScanResult> {
	if !root.is_dir() {
		return Err(io::Error::new(
			io::ErrorKind::NotFound,
			format!("vault root {} is not a directory", root.display()),
		));
	}

	let walk_root = root.to_path_buf();
	let dir_filter = filter.clone();
	let mut builder = WalkBuilder::new(root);
	builder
		.standard_filters(false)
		.hidden(false)
		.follow_links(false)
		.filter_entry(move |entry| {
			let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
			if !is_dir {
				return true;
			}
			match to_rel_path(&walk_root, entry.path()) {
				Some(rel) => dir_filter.admits_dir(&rel),
				None => false,
			}
		});

	let mut result = ScanResult::default();
	for entry in builder.build() {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				warn!("walk error: {}", e);
				continue;
			}
		};
		if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
			continue;
		}

		let Some(rel) = to_rel_path(root, entry.path()) else {
			continue;
		};
		if rel.is_empty() || !filter.admits(&rel) {
			continue;
		}

		let meta = match std::fs::metadata(entry.path()) {
			Ok(meta) => meta,
			Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
			Err(e) => {
				warn!(path = %rel, "cannot stat file: {}", e);
				result.unreadable.insert(rel);
				continue;
			}
		};
		if !meta.is_file() {
			continue;
		}

		let kind = EntityKind::for_path(&rel);
		if !filter.within_size(kind, meta.len()) {
			warn!(
				path = %rel,
				size_mb = meta.len() / (1024 * 1024),
				max_mb = filter.max_attachment_bytes() / (1024 * 1024),
				"attachment too large, skipping"
			);
			result.oversized.insert(rel);
			continue;
		}

		match fingerprint::hash_file_blocking(entry.path()) {
			Ok(fp) => {
				result.files.insert(
					rel,
					LocalFile {
						fingerprint: fp,
						size_bytes: meta.len(),
						modified: meta.modified().ok().map(DateTime::<Utc>::from),
					},
				);
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!(path = %rel, "file vanished during scan");
			}
			Err(e) => {
				if entry.path().exists() {
					warn!(path = %rel, "failed to hash file: {}", e);
					result.unreadable.insert(rel);
				}
			}
		}
	}

	debug!(
		files = result.files.len(),
		unreadable = result.unreadable.len(),
		oversized = result.oversized.len(),
		"vault scanned"
	);
	Ok(result)
}


// vim: ts=4
