//! Per-frame detection pipeline for one session.
//!
//! landmarks -> eye key points -> EAR -> baseline update -> blink machine
//!
//! All mutable per-session values live in [`DetectionState`], which is passed
//! through [`tick`] explicitly so the pipeline can be driven from a camera
//! loop, a recorded stream, or a unit test alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::BaselineCalibrator;
use crate::blink::{BlinkMachine, BlinkPhase};
use crate::config::{DetectorConfig, FaceLossPolicy};
use crate::ear::EarSample;
use crate::landmarks::{GeometryError, Point};

/// One video frame as delivered by the landmark detector.
///
/// This is also the JSONL wire format:
/// `{"timestamp": "...", "landmarks": [{"x": 0.41, "y": 0.37, "z": -0.02}, ...]}`
/// with `landmarks` absent or `null` when no face was found. A line without a
/// timestamp is stamped with the time it was decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Landmarks of the first detected face; `None` when no face was found.
    #[serde(default)]
    pub landmarks: Option<Vec<Point>>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn with_face(landmarks: Vec<Point>, timestamp: DateTime<Utc>) -> Self {
        Self {
            landmarks: Some(landmarks),
            timestamp,
        }
    }

    pub fn no_face(timestamp: DateTime<Utc>) -> Self {
        Self {
            landmarks: None,
            timestamp,
        }
    }
}

/// A confirmed blink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlinkEvent {
    /// Running blink count within the session, starting at 1.
    pub sequence: u32,
    pub trigger_ear: f32,
    pub drop_percent: f32,
    pub timestamp: DateTime<Utc>,
}

/// What happened to a frame inside [`DetectionState::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The frame was measured and fed to the baseline and blink machine.
    Processed(EarSample),
    /// No face in the frame; state left according to the face-loss policy.
    NoFace,
    /// The frame did not carry the landmarks we need; state untouched.
    Malformed(GeometryError),
}

#[derive(Debug, Clone)]
pub struct DetectionState {
    config: DetectorConfig,
    baseline: BaselineCalibrator,
    machine: BlinkMachine,
    blink_count: u32,
    last_sample: Option<EarSample>,
    face_detected: bool,
}

impl DetectionState {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            baseline: BaselineCalibrator::new(&config),
            machine: BlinkMachine::new(&config),
            config,
            blink_count: 0,
            last_sample: None,
            face_detected: false,
        }
    }

    /// Process one frame in place. Returns the blink completed by this frame, if any.
    pub fn advance(&mut self, frame: &Frame) -> (FrameOutcome, Option<BlinkEvent>) {
        let Some(landmarks) = frame.landmarks.as_deref() else {
            if self.face_detected {
                tracing::debug!(phase = %self.machine.phase(), "face lost");
            }
            self.face_detected = false;
            if self.config.face_loss == FaceLossPolicy::Reset {
                self.machine.reset(true);
            }
            return (FrameOutcome::NoFace, None);
        };

        let sample = match EarSample::from_frame(landmarks) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed landmark frame");
                return (FrameOutcome::Malformed(e), None);
            }
        };

        self.face_detected = true;
        self.last_sample = Some(sample);
        self.baseline.update(sample.average);

        let thresholds = self.baseline.thresholds();
        let event = self
            .machine
            .step(sample.average, thresholds.as_ref())
            .map(|blink| {
                self.blink_count += 1;
                BlinkEvent {
                    sequence: self.blink_count,
                    trigger_ear: blink.trigger_ear,
                    drop_percent: blink.drop_percent,
                    timestamp: frame.timestamp,
                }
            });

        if let Some(ev) = &event {
            tracing::debug!(
                sequence = ev.sequence,
                trigger_ear = ev.trigger_ear,
                drop_percent = ev.drop_percent,
                "blink detected"
            );
        }

        (FrameOutcome::Processed(sample), event)
    }

    /// Return to the initial, uncalibrated state. Configuration is kept.
    pub fn reset(&mut self) {
        self.baseline.reset();
        self.machine.reset(false);
        self.blink_count = 0;
        self.last_sample = None;
        self.face_detected = false;
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn phase(&self) -> BlinkPhase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &BlinkMachine {
        &self.machine
    }

    pub fn baseline(&self) -> &BaselineCalibrator {
        &self.baseline
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    pub fn frame_count(&self) -> u64 {
        self.baseline.frame_count()
    }

    pub fn last_sample(&self) -> Option<EarSample> {
        self.last_sample
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

/// Pure form of [`DetectionState::advance`]: consume the state, return the next one.
pub fn tick(mut state: DetectionState, frame: &Frame) -> (DetectionState, Option<BlinkEvent>) {
    let (_, event) = state.advance(frame);
    (state, event)
}
