use std::path::{Path, PathBuf};
use std::time::Duration;

use blinkgate_core::{DetectorConfig, FaceLossPolicy};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Newline-delimited JSON landmark frames written by the external detector
    /// (a FIFO in production, a recording when replaying).
    pub landmark_source: PathBuf,
    /// Still image returned by the capture collaborator.
    pub capture_path: PathBuf,
    /// Verification endpoint that receives the captured still.
    pub verify_url: String,
    /// Timeout for one verification request.
    pub verify_timeout_secs: u64,
    /// Minimum spacing between two outbound verification requests.
    pub cooldown_ms: u64,
    /// Calibration and blink state machine tunables.
    pub detector: DetectorConfig,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `BLINKGATE_*` environment variables with defaults.
    ///
    /// Detector tunables may be seeded from the TOML file named by
    /// `BLINKGATE_CONFIG`; individual environment variables still override it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("blinkgate");

        let mut detector = match std::env::var("BLINKGATE_CONFIG") {
            Ok(path) => load_detector_config(Path::new(&path))?,
            Err(_) => DetectorConfig::default(),
        };
        detector.calibration_frames =
            env_usize("BLINKGATE_CALIBRATION_FRAMES", detector.calibration_frames);
        if let Ok(value) = std::env::var("BLINKGATE_FACE_LOSS") {
            match parse_face_loss(&value) {
                Some(policy) => detector.face_loss = policy,
                None => tracing::warn!(
                    value = %value,
                    keeping = ?detector.face_loss,
                    "unrecognised BLINKGATE_FACE_LOSS, expected \"freeze\" or \"reset\""
                ),
            }
        }

        Ok(Self {
            landmark_source: std::env::var("BLINKGATE_LANDMARK_SOURCE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| runtime_dir.join("landmarks.jsonl")),
            capture_path: std::env::var("BLINKGATE_CAPTURE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| runtime_dir.join("frame.png")),
            verify_url: std::env::var("BLINKGATE_VERIFY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/api/face/verify".to_string()),
            verify_timeout_secs: env_u64("BLINKGATE_VERIFY_TIMEOUT_SECS", 10),
            cooldown_ms: env_u64("BLINKGATE_COOLDOWN_MS", 2000),
            detector,
            session_bus: std::env::var("BLINKGATE_SESSION_BUS").is_ok(),
        })
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

/// Parse detector tunables from a TOML file. Missing keys keep their defaults.
pub fn load_detector_config(path: &Path) -> Result<DetectorConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_detector_config(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_detector_config(text: &str) -> Result<DetectorConfig, toml::de::Error> {
    toml::from_str(text)
}

fn parse_face_loss(value: &str) -> Option<FaceLossPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "freeze" => Some(FaceLossPolicy::Freeze),
        "reset" => Some(FaceLossPolicy::Reset),
        _ => None,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
