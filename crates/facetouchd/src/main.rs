use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod collector;
mod config;
mod dbus_interface;
mod engine;
mod feedback;
mod inference;
mod monitor;
mod state;

use config::Config;
use dbus_interface::{MonitorService, BUS_NAME, OBJECT_PATH};
use feedback::{DesktopNotifier, Feedback, RodioSound};
use monitor::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        model = %config.model_path.display(),
        threshold = config.confidence_threshold,
        "facetouchd starting"
    );

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;

    let sound = match RodioSound::new(config.sound_path.as_deref()) {
        Ok(sound) => sound,
        Err(e) => {
            tracing::warn!(error = %e, "alert sound unusable; falling back to beep");
            RodioSound::new(None)?
        }
    };
    let feedback = Feedback {
        sound: Arc::new(sound),
        notifier: Arc::new(DesktopNotifier::new(conn.clone(), config.notify_cooldown)),
    };

    let monitor = Monitor::new(config, feedback);

    conn.object_server()
        .at(OBJECT_PATH, MonitorService::new(Arc::clone(&monitor)))
        .await?;
    conn.request_name(BUS_NAME)
        .await
        .with_context(|| format!("failed to acquire bus name {BUS_NAME}"))?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    // Camera + model setup runs in the background; Train/Run are rejected until it finishes.
    let setup = Arc::clone(&monitor);
    tokio::spawn(async move {
        if setup.setup().await.is_ok() {
            tracing::info!("facetouchd ready");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("facetouchd shutting down");
    monitor.shutdown().await;

    Ok(())
}
