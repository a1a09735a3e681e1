//! Error types for vaultsync operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::exclusion::ExclusionError;
use crate::validation::ValidationError;

/// Main error type for sync operations
#[derive(Debug)]
pub enum SyncError {
	/// I/O error
	Io(io::Error),

	/// Remote store error (nested)
	Store(StoreError),

	/// State cache error (nested)
	State(StateError),

	/// Content transformation error (nested)
	Content(ContentError),

	/// Path filter construction error (nested)
	Exclusion(ExclusionError),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Filesystem notification source failed
	Watch { message: String },

	/// Operation aborted (cancellation)
	Aborted,

	/// Generic error message
	Other { message: String },
}

impl SyncError {
	/// Transient errors are worth retrying later
	pub fn is_transient(&self) -> bool {
		match self {
			SyncError::Store(e) => e.is_transient(),
			SyncError::Io(e) => e.kind() != io::ErrorKind::NotFound,
			_ => false,
		}
	}

	/// The file the operation was working on disappeared
	pub fn is_vanished(&self) -> bool {
		matches!(self, SyncError::Io(e) if e.kind() == io::ErrorKind::NotFound)
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Store(e) => write!(f, "Store error: {}", e),
			SyncError::State(e) => write!(f, "State error: {}", e),
			SyncError::Content(e) => write!(f, "Content error: {}", e),
			SyncError::Exclusion(e) => write!(f, "Filter error: {}", e),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::Watch { message } => write!(f, "Watcher failed: {}", message),
			SyncError::Aborted => write!(f, "Operation aborted"),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Io(e) => Some(e),
			SyncError::Store(e) => Some(e),
			SyncError::State(e) => Some(e),
			SyncError::Content(e) => Some(e),
			SyncError::Exclusion(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

impl From<ContentError> for SyncError {
	fn from(e: ContentError) -> Self {
		SyncError::Content(e)
	}
}

impl From<ExclusionError> for SyncError {
	fn from(e: ExclusionError) -> Self {
		SyncError::Exclusion(e)
	}
}

impl From<ValidationError> for SyncError {
	fn from(e: ValidationError) -> Self {
		SyncError::InvalidConfig { message: e.to_string() }
	}
}

/// Remote store errors
#[derive(Debug)]
pub enum StoreError {
	/// Could not obtain a pooled connection
	Pool { message: String },

	/// SQL statement failed
	Query { source: rusqlite::Error },

	/// Operation exceeded its deadline
	Timeout { operation: &'static str },

	/// Column payload could not be encoded or decoded
	Serialization { message: String },

	/// Blocking connection task panicked or was aborted
	Interact { message: String },

	/// Backend-specific failure (used by alternative store implementations)
	Backend { message: String },
}

impl StoreError {
	/// Remote failures are all considered transient
	pub fn is_transient(&self) -> bool {
		!matches!(self, StoreError::Serialization { .. })
	}
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Pool { message } => write!(f, "Connection pool error: {}", message),
			StoreError::Query { source } => write!(f, "Query failed: {}", source),
			StoreError::Timeout { operation } => {
				write!(f, "Operation '{}' timed out", operation)
			}
			StoreError::Serialization { message } => {
				write!(f, "Serialization failed: {}", message)
			}
			StoreError::Interact { message } => write!(f, "Connection task failed: {}", message),
			StoreError::Backend { message } => write!(f, "{}", message),
		}
	}
}

impl Error for StoreError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			StoreError::Query { source } => Some(source),
			_ => None,
		}
	}
}

impl From<rusqlite::Error> for StoreError {
	fn from(e: rusqlite::Error) -> Self {
		StoreError::Query { source: e }
	}
}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Serialization { message: e.to_string() }
	}
}

/// State management errors
#[derive(Debug)]
pub enum StateError {
	/// Failed to load state
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save state
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// State file is corrupted
	Corrupted { message: String },

	/// Invalid state directory
	InvalidDirectory { path: String },
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::LoadFailed { source } => write!(f, "Failed to load state: {}", source),
			StateError::SaveFailed { source } => write!(f, "Failed to save state: {}", source),
			StateError::Corrupted { message } => write!(f, "State corrupted: {}", message),
			StateError::InvalidDirectory { path } => {
				write!(f, "Invalid state directory: {}", path)
			}
		}
	}
}

impl Error for StateError {}

/// Content transformation errors
#[derive(Debug)]
pub enum ContentError {
	/// Entity payload could not be produced at all
	Unreadable { path: String, message: String },
}

impl fmt::Display for ContentError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ContentError::Unreadable { path, message } => {
				write!(f, "Cannot transform {}: {}", path, message)
			}
		}
	}
}

impl Error for ContentError {}


// vim: ts=4
