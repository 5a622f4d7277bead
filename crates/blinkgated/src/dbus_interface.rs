use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::engine::EngineHandle;

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
}

/// D-Bus interface for the blink liveness daemon.
///
/// Bus name: org.freedesktop.BlinkGate1
/// Object path: /org/freedesktop/BlinkGate1
pub struct BlinkGateService {
    pub state: Arc<Mutex<AppState>>,
}

impl BlinkGateService {
    async fn engine(&self) -> EngineHandle {
        self.state.lock().await.engine.clone()
    }
}

#[interface(name = "org.freedesktop.BlinkGate1")]
impl BlinkGateService {
    /// Turn the camera session on and start watching for blinks.
    ///
    /// Returns the id of the new session.
    async fn activate(&self) -> zbus::fdo::Result<String> {
        tracing::info!("activate requested");
        let engine = self.engine().await;
        let id = engine.activate().await.map_err(|e| {
            tracing::warn!(error = %e, "activate failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        Ok(id.to_string())
    }

    /// Stop the session. Returns false if none was running.
    async fn deactivate(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("deactivate requested");
        let engine = self.engine().await;
        engine
            .deactivate()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon and session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let (engine, source, verify_url, cooldown_ms) = {
            let state = self.state.lock().await;
            (
                state.engine.clone(),
                state.config.landmark_source.display().to_string(),
                state.config.verify_url.clone(),
                state.config.cooldown_ms,
            )
        };

        let session = engine
            .status()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "landmark_source": source,
            "verify_url": verify_url,
            "cooldown_ms": cooldown_ms,
            "session": session,
        })
        .to_string())
    }
}
