//! Input checks for settings and for paths coming back from the store
//!
//! Settings are range-checked once after every layer of configuration has
//! been applied. Paths are checked one by one before pull writes a file.

use std::fmt;

pub mod config;
pub mod path;

pub use config::*;
pub use path::*;

/// A setting or path that was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// A setting outside its allowed range
	Setting { name: &'static str, reason: String },

	/// A vault-relative path that would not stay inside the vault
	UnsafePath { path: String, reason: &'static str },
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ValidationError::Setting { name, reason } => write!(f, "invalid {}: {}", name, reason),
			ValidationError::UnsafePath { path, reason } => write!(f, "unsafe path {:?}: {}", path, reason),
		}
	}
}

impl std::error::Error for ValidationError {}

/// Types that can check their own invariants
pub trait Validator {
	fn validate(&self) -> Result<(), ValidationError>;
}


// vim: ts=4
