mod args;
mod commands;

use std::sync::Arc;

use services::{ApiConfig, AppServices, Clock, GrantObserver};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, ArgsError, Defaults, print_usage};
use crate::commands::WindowNotice;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match Args::parse(argv, &Defaults::from_env()) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            print_usage();
            return Ok(());
        }
        Err(err) => {
            print_usage();
            return Err(err.into());
        }
    };

    init_tracing();

    // Open + migrate SQLite at startup so services only see a ready store.
    prepare_sqlite_file(&parsed.db_url)?;
    let clock = Clock::default_clock();
    let api = ApiConfig::from_env();
    tracing::debug!(?api, db_url = %parsed.db_url, "starting");

    let observers: Vec<Arc<dyn GrantObserver>> = vec![Arc::new(WindowNotice)];
    let services = AppServices::new_sqlite(&parsed.db_url, clock, api, observers).await?;

    commands::execute(&services, clock, parsed.language, parsed.command).await
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
