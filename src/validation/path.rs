//! Safety checks for vault-relative paths

use std::path::{Component, Path};

use super::ValidationError;

/// Check a path received from the remote store before writing it
///
/// The path must be non-empty and relative, and no component may step out
/// of the directory it is joined onto.
pub fn validate_vault_path(rel_path: &str) -> Result<(), ValidationError> {
	let reject = |reason| Err(ValidationError::UnsafePath { path: rel_path.to_string(), reason });

	if rel_path.trim().is_empty() {
		return reject("empty path");
	}
	for component in Path::new(rel_path).components() {
		match component {
			Component::Normal(_) | Component::CurDir => {}
			Component::ParentDir => return reject("contains a parent directory reference"),
			Component::RootDir | Component::Prefix(_) => return reject("must be relative"),
		}
	}
	Ok(())
}


// vim: ts=4
