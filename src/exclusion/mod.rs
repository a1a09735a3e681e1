//! Exclusion and filtering system
//!
//! Decides which relative paths under the vault root take part in sync:
//! glob exclude/include patterns plus a size ceiling for attachments.

mod filters;
mod patterns;

pub use filters::SizeFilter;
pub use patterns::PatternMatcher;

use crate::content::EntityKind;

/// Combined path filter applied by the engine, the walker and the watcher
pub struct PathFilter {
	patterns: PatternMatcher,
	attachment_size: SizeFilter,
}

impl PathFilter {
	/// Build a filter from exclude/include patterns and an attachment size cap
	pub fn new(
		exclude_patterns: &[String],
		include_patterns: &[String],
		max_attachment_bytes: u64,
	) -> Result<Self, ExclusionError> {
		Ok(Self {
			patterns: PatternMatcher::new(exclude_patterns, include_patterns)?,
			attachment_size: SizeFilter::new(max_attachment_bytes),
		})
	}

	/// Whether a file path qualifies for sync
	///
	/// Exclusion wins over inclusion; the path and all its ancestor
	/// directories are checked against the exclude set.
	pub fn admits(&self, rel_path: &str) -> bool {
		!self.patterns.is_excluded(rel_path) && self.patterns.is_included(rel_path)
	}

	/// Whether a directory should be descended into / watched
	///
	/// Include patterns apply to files only, so they never prune directories.
	pub fn admits_dir(&self, rel_path: &str) -> bool {
		rel_path.is_empty() || !self.patterns.is_excluded(rel_path)
	}

	/// Whether a file of the given kind and size may be uploaded
	pub fn within_size(&self, kind: EntityKind, size_bytes: u64) -> bool {
		match kind {
			EntityKind::Note => true,
			EntityKind::Attachment => self.attachment_size.matches_len(size_bytes),
		}
	}

	/// Configured attachment ceiling in bytes
	pub fn max_attachment_bytes(&self) -> u64 {
		self.attachment_size.max_bytes()
	}
}

/// Errors that can occur during exclusion processing
#[derive(Debug)]
pub enum ExclusionError {
	/// Failed to parse a glob pattern
	InvalidPattern(String),
}

impl std::fmt::Display for ExclusionError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ExclusionError::InvalidPattern(msg) => {
				write!(f, "Invalid exclusion pattern: {}", msg)
			}
		}
	}
}

impl std::error::Error for ExclusionError {}

#[cfg(test)]
mod tests {
	use super::*;

	fn filter(excludes: &[&str], includes: &[&str]) -> PathFilter {
		let ex: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
		let inc: Vec<String> = includes.iter().map(|s| s.to_string()).collect();
		PathFilter::new(&ex, &inc, 1024).unwrap()
	}

	#[test]
	fn test_exclusion_beats_inclusion() {
		let f = filter(&[".obsidian/**"], &["**/*.json"]);

		assert!(!f.admits(".obsidian/app.json"));
		assert!(f.admits("data/app.json"));
		assert!(!f.admits("notes/a.md"));
	}

	#[test]
	fn test_directories_ignore_includes() {
		let f = filter(&[".trash/**"], &["**/*.md"]);

		assert!(f.admits_dir(""));
		assert!(f.admits_dir("notes"));
		assert!(!f.admits_dir(".trash"));
		assert!(!f.admits_dir(".trash/old"));
	}

	#[test]
	fn test_attachment_size_ceiling() {
		let f = filter(&[], &[]);

		assert!(f.within_size(EntityKind::Attachment, 1024));
		assert!(!f.within_size(EntityKind::Attachment, 1025));
		assert!(f.within_size(EntityKind::Note, 10 * 1024 * 1024));
		assert_eq!(f.max_attachment_bytes(), 1024);
	}
}

// vim: ts=4
