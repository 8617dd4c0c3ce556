use anyhow::{Context, Result};
use lookout_hw::V4lOpener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod guard;
mod loader;
mod mode;

#[cfg(test)]
mod testing;

use config::Config;
use dbus_interface::{GuardService, BUS_NAME, OBJECT_PATH};
use engine::LoopSettings;
use guard::{GuardParts, GuardSettings};
use lookout_core::ReadinessGate;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        device = %config.camera_device,
        threshold = config.match_threshold,
        disguise = %config.disguise,
        provider = %config.provider_socket.display(),
        "lookoutd starting"
    );

    let gate = ReadinessGate::new();
    let (engine_events_tx, engine_events) = mpsc::unbounded_channel();
    let opener = V4lOpener {
        device_path: config.camera_device.clone(),
        width: config.frame_width,
        height: config.frame_height,
    };
    let (engine, stats) = engine::spawn_engine(
        Box::new(opener),
        LoopSettings::from(&config),
        gate.clone(),
        engine_events_tx,
    )?;

    let provider = loader::spawn_provider_loader(
        config.provider_socket.clone(),
        config.fallback_provider_socket.clone(),
        engine.clone(),
    )
    .context("failed to spawn provider loader")?;

    let (guard, transitions) = guard::spawn_guard(
        GuardSettings::from(&config),
        GuardParts {
            engine,
            engine_events,
            stats,
            provider,
            gate,
        },
    );

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GuardService::new(guard.clone()))?
        .build()
        .await
        .context("failed to register on the session bus")?;
    tokio::spawn(dbus_interface::forward_signals(
        conn.clone(),
        transitions.subscribe(),
        config.disguise,
    ));

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "lookoutd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("lookoutd shutting down");
    if let Err(e) = guard.shutdown().await {
        tracing::warn!(error = %e, "guard already stopped");
    }

    Ok(())
}
