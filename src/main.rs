use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;

use keymaster::config::{AppConfig, Paths, load_ssh_config, paths};
use keymaster::ssh::RusshConnector;
use keymaster::{Keymaster, KeymasterEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with file output.
    let log_dir = paths::ensure_log_dir().ok();
    let _guard = keymaster::logging::init_logging(log_dir);

    tracing::info!("Starting keymaster {}", env!("CARGO_PKG_VERSION"));
    if let Some(dir) = paths::log_dir() {
        tracing::info!("Logging to {}", dir.display());
    }

    let app_config = match paths::config_file() {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    let settings = app_config.engine_settings(&Paths::from_env());

    let mut names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        names = load_ssh_config(&settings.ssh_config_file)?.toggleable_hosts();
    }
    if names.is_empty() {
        anyhow::bail!(
            "No hosts with a LocalForward found in {}",
            settings.ssh_config_file.display()
        );
    }

    let connector = RusshConnector::from_settings(&settings);
    let keymaster = Keymaster::new(connector, settings);
    let mut events = keymaster.subscribe();

    for name in &names {
        keymaster.activate(name);
    }

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(KeymasterEvent::ConnectionMessage { name, message }) => {
                    println!("{}: {}", name, message);
                }
                Ok(KeymasterEvent::Activating(name)) => println!("{}: activating", name),
                Ok(KeymasterEvent::Deactivating(name)) => println!("{}: deactivating", name),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} log lines", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    tracing::info!("Shutting down {} connection(s)", keymaster.active_names().len());
    keymaster.shutdown().await;
    Ok(())
}
