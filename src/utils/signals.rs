//! Termination signal handling

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cancel `shutdown` on SIGTERM or SIGINT
///
/// The service loop observes the token and drains pending work before
/// exiting. A second signal terminates the process immediately.
pub fn spawn_signal_handler(shutdown: CancellationToken) {
	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Process will not handle SIGTERM gracefully.", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}. Process will not handle SIGINT gracefully.", e);
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => debug!("Received SIGTERM, shutting down..."),
			_ = sigint.recv() => debug!("Received SIGINT, shutting down..."),
		}
		shutdown.cancel();

		tokio::select! {
			_ = sigterm.recv() => std::process::exit(143), // 128 + SIGTERM(15)
			_ = sigint.recv() => std::process::exit(130), // 128 + SIGINT(2)
		}
	});
}

// vim: ts=4
