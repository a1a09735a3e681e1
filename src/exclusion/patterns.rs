//! Pattern-based path filtering using glob patterns

use super::ExclusionError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Pattern matcher using globset for efficient matching
///
/// Patterns follow doublestar semantics: `*` stays within one path segment,
/// `**` crosses segments. Paths are relative and use `/` separators.
pub struct PatternMatcher {
	/// Compiled exclusion patterns (user + built-in)
	exclude_set: GlobSet,

	/// Compiled inclusion patterns; `None` admits everything
	include_set: Option<GlobSet>,
}

impl PatternMatcher {
	/// Create a new pattern matcher
	pub fn new(
		exclude_patterns: &[String],
		include_patterns: &[String],
	) -> Result<Self, ExclusionError> {
		let mut excludes: Vec<String> = Self::always_excluded().iter().map(|s| s.to_string()).collect();
		excludes.extend(exclude_patterns.iter().cloned());
		let exclude_set = Self::build_glob_set(&excludes)?;

		let include_set = if !include_patterns.is_empty() {
			Some(Self::build_glob_set(include_patterns)?)
		} else {
			None
		};

		Ok(Self { exclude_set, include_set })
	}

	/// Built-in exclusions applied regardless of configuration
	fn always_excluded() -> &'static [&'static str] {
		&[
			"**/*.vaultsync-tmp", // Pull temporary files
			"**/.DS_Store",       // macOS cruft
			"**/Thumbs.db",       // Windows cruft
			"**/desktop.ini",     // Windows cruft
			"**/*.swp",           // Vim swap files
			"**/*.swo",           // Vim swap files
			"**/*~",              // Editor backups
			"**/.nfs*",           // NFS temp files
		]
	}

	/// Build a GlobSet from patterns
	///
	/// A trailing `/**` also matches the directory itself so that whole
	/// subtrees can be pruned during traversal.
	fn build_glob_set(patterns: &[String]) -> Result<GlobSet, ExclusionError> {
		let mut builder = GlobSetBuilder::new();

		for pattern in patterns {
			let pattern = pattern.trim();
			if pattern.is_empty() {
				continue;
			}
			builder.add(Self::compile(pattern)?);
			if let Some(dir) = pattern.strip_suffix("/**") {
				if !dir.is_empty() {
					builder.add(Self::compile(dir)?);
				}
			}
		}

		builder.build().map_err(|e| {
			ExclusionError::InvalidPattern(format!("Failed to build pattern set: {}", e))
		})
	}

	fn compile(pattern: &str) -> Result<globset::Glob, ExclusionError> {
		GlobBuilder::new(pattern)
			.literal_separator(true)
			.build()
			.map_err(|e| ExclusionError::InvalidPattern(format!("{}: {}", pattern, e)))
	}

	/// Check if a path, or any of its ancestor directories, is excluded
	pub fn is_excluded(&self, rel_path: &str) -> bool {
		if self.exclude_set.is_match(rel_path) {
			return true;
		}

		let mut end = 0;
		while let Some(pos) = rel_path[end..].find('/') {
			let prefix = &rel_path[..end + pos];
			if !prefix.is_empty() && self.exclude_set.is_match(prefix) {
				return true;
			}
			end += pos + 1;
		}
		false
	}

	/// Check if a path satisfies the include patterns (if any are configured)
	pub fn is_included(&self, rel_path: &str) -> bool {
		match self.include_set {
			Some(ref include_set) => include_set.is_match(rel_path),
			None => true,
		}
	}

	/// Whether include patterns are active
	pub fn has_includes(&self) -> bool {
		self.include_set.is_some()
	}
}


// vim: ts=4
