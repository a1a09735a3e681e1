//! Turning vault files into sync-ready entities
//!
//! Markdown notes (`.md`, any case) are decoded into structured documents;
//! everything else is carried as an opaque attachment with a sniffed media
//! type. Transformation is best effort: malformed frontmatter or invalid
//! UTF-8 degrade the structured fields but never fail the sync.

mod attachment;
mod markdown;

pub use attachment::detect_media_type;
pub use markdown::{extract_inline_tags, extract_wiki_links, merge_tags, parse_date, parse_note, ParsedNote};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::Path;

use crate::error::ContentError;

/// Which remote collection an entity lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
	Note,
	Attachment,
}

impl EntityKind {
	/// Classify by suffix: `.md` (case-insensitive) is a note
	pub fn for_path(rel_path: &str) -> Self {
		if rel_path.to_ascii_lowercase().ends_with(".md") {
			EntityKind::Note
		} else {
			EntityKind::Attachment
		}
	}

	pub const ALL: [EntityKind; 2] = [EntityKind::Note, EntityKind::Attachment];
}

impl fmt::Display for EntityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EntityKind::Note => write!(f, "note"),
			EntityKind::Attachment => write!(f, "attachment"),
		}
	}
}

/// Structured projection of a markdown note
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
	pub path: String,
	pub filename: String,
	pub title: String,
	pub tags: Vec<String>,
	pub aliases: Vec<String>,
	pub created_at: Option<DateTime<Utc>>,
	pub modified_at: Option<DateTime<Utc>>,
	pub publish: bool,
	/// Frontmatter keys other than the ones mapped to fields above
	pub frontmatter: serde_json::Map<String, serde_json::Value>,
	pub body: String,
	/// Exact file bytes; what pull writes back
	pub raw: Vec<u8>,
	pub fingerprint: String,
	pub size_bytes: u64,
	pub links: Vec<String>,
}

/// Opaque file carried byte for byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
	pub path: String,
	pub filename: String,
	pub extension: Option<String>,
	pub media_type: String,
	pub size_bytes: u64,
	pub fingerprint: String,
	pub data: Vec<u8>,
}

/// A file ready for the remote store
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
	Note(Note),
	Attachment(Attachment),
}

impl Entity {
	pub fn kind(&self) -> EntityKind {
		match self {
			Entity::Note(_) => EntityKind::Note,
			Entity::Attachment(_) => EntityKind::Attachment,
		}
	}

	pub fn path(&self) -> &str {
		match self {
			Entity::Note(n) => &n.path,
			Entity::Attachment(a) => &a.path,
		}
	}

	pub fn fingerprint(&self) -> &str {
		match self {
			Entity::Note(n) => &n.fingerprint,
			Entity::Attachment(a) => &a.fingerprint,
		}
	}

	/// Bytes to write when materializing locally
	pub fn raw_bytes(&self) -> &[u8] {
		match self {
			Entity::Note(n) => &n.raw,
			Entity::Attachment(a) => &a.data,
		}
	}

	pub fn size_bytes(&self) -> u64 {
		match self {
			Entity::Note(n) => n.size_bytes,
			Entity::Attachment(a) => a.size_bytes,
		}
	}
}

/// Filesystem timestamps used when the note does not declare its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
	pub created: Option<DateTime<Utc>>,
	pub modified: Option<DateTime<Utc>>,
}

impl FileTimes {
	/// Birth time when the platform reports it, else the modification time
	pub fn from_metadata(meta: &Metadata) -> Self {
		let modified = meta.modified().ok().map(DateTime::<Utc>::from);
		let created = meta.created().ok().map(DateTime::<Utc>::from).or(modified);
		Self { created, modified }
	}
}

/// Converts file bytes into an [`Entity`]
pub trait ContentTransformer: Send + Sync {
	fn transform(
		&self,
		rel_path: &str,
		bytes: Vec<u8>,
		fingerprint: &str,
		times: FileTimes,
	) -> Result<Entity, ContentError>;
}

/// Default transformer for Obsidian-style vaults
#[derive(Debug, Clone, Copy, Default)]
pub struct VaultTransformer;

impl ContentTransformer for VaultTransformer {
	fn transform(
		&self,
		rel_path: &str,
		bytes: Vec<u8>,
		fingerprint: &str,
		times: FileTimes,
	) -> Result<Entity, ContentError> {
		if rel_path.is_empty() {
			return Err(ContentError::Unreadable {
				path: rel_path.to_string(),
				message: "empty path".to_string(),
			});
		}

		let filename = Path::new(rel_path)
			.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_else(|| rel_path.to_string());
		let size_bytes = bytes.len() as u64;

		match EntityKind::for_path(rel_path) {
			EntityKind::Note => {
				let text = String::from_utf8_lossy(&bytes).into_owned();
				let parsed = parse_note(&text, rel_path);
				let tags = merge_tags(&parsed.frontmatter_tags, &parsed.inline_tags);

				Ok(Entity::Note(Note {
					path: rel_path.to_string(),
					filename,
					title: parsed.title,
					tags,
					aliases: parsed.aliases,
					created_at: parsed.created.or(times.created),
					modified_at: parsed.modified.or(times.modified),
					publish: parsed.publish,
					frontmatter: parsed.extra,
					body: parsed.body,
					raw: bytes,
					fingerprint: fingerprint.to_string(),
					size_bytes,
					links: parsed.links,
				}))
			}
			EntityKind::Attachment => {
				let extension = Path::new(rel_path)
					.extension()
					.map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()));
				let media_type = detect_media_type(&bytes, extension.as_deref());

				Ok(Entity::Attachment(Attachment {
					path: rel_path.to_string(),
					filename,
					extension,
					media_type,
					size_bytes,
					fingerprint: fingerprint.to_string(),
					data: bytes,
				}))
			}
		}
	}
}


// vim: ts=4
