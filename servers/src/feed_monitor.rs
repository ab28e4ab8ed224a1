use anyhow::Result;
use feed_core::FeedController;
use tokio::signal;

mod monitor_logic;
use monitor_logic::{config, logger, presenter};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;
    let log_path = logger::setup_logging(&config.log_dir(), config.log_level())?;
    log::info!("Logging to {}", log_path.display());

    let controller = FeedController::with_websocket(config.to_controller_config()?)?;
    controller.start().await;

    tokio::select! {
        _ = presenter::run(&controller) => {
            log::info!("Operator quit, initiating shutdown.");
        }
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    controller.shutdown().await;
    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
