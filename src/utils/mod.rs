//! Utility modules for common functionality

pub mod signals;

pub use signals::spawn_signal_handler;

// vim: ts=4
