use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod collab;
mod config;
mod dbus_interface;
mod engine;

use collab::{HttpVerifyClient, JsonlSourceFactory, StillImageCapture};
use config::Config;
use dbus_interface::{AppState, BlinkGateService};
use engine::{spawn_engine, EngineParts};

const BUS_NAME: &str = "org.freedesktop.BlinkGate1";
const OBJECT_PATH: &str = "/org/freedesktop/BlinkGate1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("blinkgated starting");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        source = %config.landmark_source.display(),
        capture = %config.capture_path.display(),
        verify_url = %config.verify_url,
        cooldown_ms = config.cooldown_ms,
        calibration_frames = config.detector.calibration_frames,
        face_loss = ?config.detector.face_loss,
        "configuration loaded"
    );

    let engine = spawn_engine(EngineParts {
        sources: Arc::new(JsonlSourceFactory::new(&config.landmark_source)),
        capture: Arc::new(StillImageCapture::new(&config.capture_path)),
        client: Arc::new(HttpVerifyClient::new(
            config.verify_url.clone(),
            config.verify_timeout(),
        )),
        detector: config.detector.clone(),
        cooldown: config.cooldown(),
    });

    let session_bus = config.session_bus;
    let service = BlinkGateService {
        state: Arc::new(Mutex::new(AppState { config, engine })),
    };

    let builder = if session_bus {
        tracing::warn!("running on the session bus (development mode)");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, "blinkgated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("blinkgated shutting down");

    Ok(())
}
