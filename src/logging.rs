//! Logging prelude module for convenient access to tracing macros.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!(path = %rel_path, "file synced");
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// `RUST_LOG` takes precedence when set. Otherwise INFO is used, or DEBUG
/// when `verbose` is requested:
///
/// ```bash
/// RUST_LOG=vaultsync=trace vaultsync daemon
/// RUST_LOG=vaultsync::engine=debug,vaultsync::debounce=trace vaultsync daemon
/// ```
pub fn init_tracing(verbose: bool) {
	let default_level = if verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.init();
}

// vim: ts=4
