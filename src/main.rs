use std::process::ExitCode;

use authority_core::center::Center;
use authority_core::config::Config;
use authority_core::log::Logger;
use authority_core::{manager, ExitError};
use camino::Utf8PathBuf;

fn run() -> Result<(), ExitError> {
    let config_path = std::env::args()
        .nth(1)
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| Utf8PathBuf::from("/etc/authority/authority.toml"));

    let config = Config::load(&config_path)?;
    let logger = Logger::launch(&config.logging).map_err(ExitError)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ExitError(format!("building the tokio runtime: {err}")))?;

    runtime.block_on(async move {
        let (update_tx, update_rx) = tokio::sync::mpsc::unbounded_channel();
        let center = Center::new(config, logger, update_tx);
        center
            .load_zones()
            .map_err(|err| ExitError(format!("loading configured zones: {err}")))?;

        tracing::info!(zones = center.zone_count(), "authority core started");

        tokio::select! {
            _ = manager::run(update_rx) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
            }
        }

        Ok(())
    })
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
