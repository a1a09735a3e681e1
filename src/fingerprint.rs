//! Content fingerprints
//!
//! A fingerprint is the lowercase hex BLAKE3 digest of a file's bytes. The
//! same function is used for local files and for the `content_hash` column of
//! the remote store, so equal strings mean equal content.

use std::io;
use std::path::{Path, PathBuf};

/// Fingerprint of an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> String {
	blake3::hash(data).to_hex().to_string()
}

/// Fingerprint of a string
pub fn hash_str(content: &str) -> String {
	hash_bytes(content.as_bytes())
}

/// Fingerprint of a file, streamed on the blocking pool
///
/// A missing file surfaces as `io::ErrorKind::NotFound`, which callers treat
/// as a vanished path.
pub async fn hash_file(path: &Path) -> io::Result<String> {
	let path: PathBuf = path.to_path_buf();
	tokio::task::spawn_blocking(move || hash_file_blocking(&path))
		.await
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// Blocking variant of [`hash_file`]
pub fn hash_file_blocking(path: &Path) -> io::Result<String> {
	let file = std::fs::File::open(path)?;
	let mut hasher = blake3::Hasher::new();
	hasher.update_reader(file)?;
	Ok(hasher.finalize().to_hex().to_string())
}

/// Short form used in log lines
pub fn short(fingerprint: &str) -> &str {
	&fingerprint[..fingerprint.len().min(8)]
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_hash_is_stable_and_fixed_size() {
		let a = hash_str("hello");
		let b = hash_bytes(b"hello");
		assert_eq!(a, b);
		assert_eq!(a.len(), 64);
		assert_ne!(a, hash_str("hello!"));
	}

	#[tokio::test]
	async fn test_file_hash_matches_content_hash() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("note.md");
		std::fs::write(&path, b"# Title\nbody").unwrap();

		let from_file = hash_file(&path).await.unwrap();
		assert_eq!(from_file, hash_bytes(b"# Title\nbody"));
	}

	#[tokio::test]
	async fn test_missing_file_is_not_found() {
		let tmp = TempDir::new().unwrap();
		let err = hash_file(&tmp.path().join("nope")).await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::NotFound);
	}

	#[test]
	fn test_short() {
		assert_eq!(short("abcdef0123456789"), "abcdef01");
		assert_eq!(short("abc"), "abc");
	}
}

// vim: ts=4
