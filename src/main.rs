use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use vaultsync::cache::StateCache;
use vaultsync::config::Config;
use vaultsync::daemon::{self, DaemonOptions};
use vaultsync::engine::Engine;
use vaultsync::logging::*;
use vaultsync::store::{RemoteStore, SqliteStore};
use vaultsync::utils::spawn_signal_handler;
use vaultsync::validation::Validator;

///////////////////////
// Utility functions //
///////////////////////

fn load_config(matches: &ArgMatches, create_vault: bool) -> Result<Config, Box<dyn Error>> {
	let path = matches.get_one::<String>("config").map(PathBuf::from);
	let mut config = Config::load(path.as_deref())?;

	if let Some(vault) = matches.get_one::<String>("vault") {
		config.vault_path = vaultsync::config::expand_path(&PathBuf::from(vault));
	}
	if config.vault_path.as_os_str().is_empty() {
		return Err("vault path is not configured (use --vault or VAULTSYNC_VAULT_PATH)".into());
	}
	if create_vault {
		std::fs::create_dir_all(&config.vault_path)?;
	}

	config.validate()?;
	config.vault_path = config
		.vault_path
		.canonicalize()
		.map_err(|e| format!("cannot resolve {}: {}", config.vault_path.display(), e))?;
	Ok(config)
}

async fn open_engine(config: &Config) -> Result<(Arc<Engine>, Arc<SqliteStore>), Box<dyn Error>> {
	let state_dir = config.resolved_state_dir();
	std::fs::create_dir_all(&state_dir)
		.map_err(|e| format!("cannot create state directory {}: {}", state_dir.display(), e))?;

	let store = Arc::new(SqliteStore::open(&config.resolved_database_path(), &config.database).await?);
	let cache = Arc::new(StateCache::open(&state_dir, &config.vault_path).await?);
	let engine = Engine::from_config(config, store.clone() as Arc<dyn RemoteStore>, cache)?;
	Ok((Arc::new(engine), store))
}

//////////////
// Commands //
//////////////

async fn cmd_daemon(config: Config) -> Result<(), Box<dyn Error>> {
	let (engine, _store) = open_engine(&config).await?;
	let shutdown = CancellationToken::new();
	spawn_signal_handler(shutdown.clone());

	let stats = daemon::run(engine, DaemonOptions::from(&config.sync), shutdown).await?;
	eprintln!("Handled {} events ({} failed)", stats.events_handled, stats.events_failed);
	Ok(())
}

async fn cmd_sync(config: Config) -> Result<(), Box<dyn Error>> {
	let (engine, _store) = open_engine(&config).await?;
	let report = engine.full_reconcile().await?;

	eprintln!(
		"Scanned {} files: {} uploaded, {} unchanged, {} deleted, {} skipped, {} failed ({:.2}s)",
		report.scanned,
		report.uploaded,
		report.unchanged,
		report.deleted,
		report.skipped,
		report.failed.len(),
		report.duration.as_secs_f64()
	);
	for path in &report.failed {
		eprintln!("  failed: {}", path);
	}

	if engine.pending_retries() > 0 {
		info!(pending = engine.pending_retries(), "retrying failed paths");
		let sweep = engine.retry_until_settled().await;
		eprintln!(
			"Retried {} times: {} recovered, {} given up",
			sweep.attempted,
			sweep.recovered.len(),
			sweep.abandoned.len()
		);
		for path in &sweep.abandoned {
			eprintln!("  gave up: {}", path);
		}
		engine.save_state().await?;
	}
	Ok(())
}

async fn cmd_pull(config: Config) -> Result<(), Box<dyn Error>> {
	let (engine, _store) = open_engine(&config).await?;
	let report = engine.pull().await?;

	eprintln!(
		"Pulled {} entities: {} written, {} unchanged, {} failed",
		report.total,
		report.written,
		report.unchanged,
		report.failed.len()
	);
	for path in &report.failed {
		eprintln!("  failed: {}", path);
	}
	Ok(())
}

async fn cmd_status(config: Config) -> Result<(), Box<dyn Error>> {
	let (engine, store) = open_engine(&config).await?;
	let status = store.status().await?;
	let cache = engine.cache();

	println!("Vault:       {}", config.vault_path.display());
	println!("Database:    {}", store.path().display());
	println!("State file:  {}", cache.state_path().display());
	println!("Notes:       {}", status.notes);
	println!("Attachments: {}", status.attachments);
	println!("Tracked:     {}", cache.len());
	match status.last_synced_at {
		Some(at) => println!("Last upload: {}", at.to_rfc3339()),
		None => println!("Last upload: never"),
	}
	match cache.last_full_sync() {
		Some(at) => println!("Last full:   {}", at.to_rfc3339()),
		None => println!("Last full:   never"),
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("vaultsync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Keeps a notes vault and a relational store in agreement")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file (TOML, or JSON5 for .json/.json5)"),
		)
		.arg(
			Arg::new("vault")
				.long("vault")
				.value_name("DIR")
				.global(true)
				.help("Vault root directory (overrides config)"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.global(true)
				.help("Enable debug logging"),
		)
		.subcommand(Command::new("daemon").about("Watch the vault and sync changes continuously"))
		.subcommand(Command::new("sync").about("Run one full reconciliation and exit"))
		.subcommand(Command::new("pull").about("Write every stored entity into the vault"))
		.subcommand(Command::new("status").about("Show store and state summary"))
		.get_matches();

	init_tracing(matches.get_flag("verbose"));

	match matches.subcommand() {
		Some(("daemon", sub)) => cmd_daemon(load_config(sub, false)?).await,
		Some(("sync", sub)) => cmd_sync(load_config(sub, false)?).await,
		Some(("pull", sub)) => cmd_pull(load_config(sub, true)?).await,
		Some(("status", sub)) => cmd_status(load_config(sub, false)?).await,
		_ => Err("unknown command".into()),
	}
}

// vim: ts=4
