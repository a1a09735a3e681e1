//! # vaultsync - keeps a notes vault and a relational store in agreement
//!
//! vaultsync watches a directory tree of Markdown notes and attachments and
//! mirrors it into a relational store. Notifications are coalesced per path,
//! content fingerprints skip unchanged files, and a full reconciliation
//! repairs anything missed while the service was down.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vaultsync::{cache::StateCache, config::Config, engine::Engine, store::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let store = Arc::new(SqliteStore::open(&config.resolved_database_path(), &config.database).await?);
//!     let cache = Arc::new(StateCache::open(&config.resolved_state_dir(), &config.vault_path).await?);
//!     let engine = Engine::from_config(&config, store, cache)?;
//!     let report = engine.full_reconcile().await?;
//!     println!("Uploaded {} files", report.uploaded);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod content;
pub mod daemon;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod fingerprint;
pub mod logging;
pub mod scan;
pub mod store;
pub mod utils;
pub mod validation;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, EngineOptions, ReconcileReport};
pub use error::SyncError;

// vim: ts=4
