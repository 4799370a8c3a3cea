//! Cute VPN shell
//!
//! Console front-end for the session manager. Drives the real lifecycle
//! code against dry-run engine and interface stand-ins.

mod config;
mod console;
mod dry_run;

use anyhow::{Context, Result};
use config::ShellConfig;
use console::Console;
use cute_vpn::{Dispatcher, SessionManager, SettingsStore};
use dry_run::{ConfiguredApps, DryRunEngine, DryRunInterface};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ShellConfig::load(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Cute VPN shell starting, data in {}", config.data_dir.display());

    let settings = Arc::new(SettingsStore::open(&config.data_dir));
    let engine = Arc::new(DryRunEngine::new(
        config.neighbors.clone(),
        Duration::from_secs(config.heartbeat_secs.max(1)),
    ));
    let interface = Arc::new(DryRunInterface::new(
        config.permission_granted,
        config.apps.iter().map(|app| app.package.clone()),
    ));
    let registry = Arc::new(ConfiguredApps::new(config.apps.clone()));

    let manager = Arc::new(SessionManager::new(
        settings,
        engine,
        interface.clone(),
        &config.host_app_id,
        &config.data_dir,
    ));
    let dispatcher = Dispatcher::connect(manager.clone());

    let (line_tx, line_rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("cannot spawn stdin reader")?;

    let console = Console::new(dispatcher, registry, interface, std::io::stdout());
    console.run(line_rx)?;

    // The session outlives the front-end; shut it down with the process
    if manager.is_running() {
        manager.stop()?;
    }

    info!("Cute VPN shell shutting down");
    Ok(())
}
