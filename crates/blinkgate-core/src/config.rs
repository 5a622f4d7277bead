use serde::{Deserialize, Serialize};

/// What a session does with in-progress blink state when the face disappears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceLossPolicy {
    /// Leave every counter untouched and resume on the next face frame.
    #[default]
    Freeze,
    /// Return the blink machine to OPEN. The baseline is kept.
    Reset,
}

/// Tunables for calibration and the blink state machine.
///
/// Ratios are relative to the tracked baseline EAR unless noted otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Frames averaged into the initial baseline.
    pub calibration_frames: usize,
    /// Weight kept by the old baseline on each post-calibration update.
    pub baseline_decay: f32,
    /// Below `baseline * closed_ratio` the eye counts as closed.
    pub closed_ratio: f32,
    /// Below `baseline * fast_blink_ratio` a sudden drop skips CLOSING.
    pub fast_blink_ratio: f32,
    /// At or above `baseline * fast_recovery_ratio` the eye counts as reopened.
    pub fast_recovery_ratio: f32,
    /// Frame-over-frame relative fall that counts as a rapid drop.
    pub rapid_drop_ratio: f32,
    /// Fall from baseline that still confirms a CLOSING glitch-and-recover.
    pub glitch_drop_ratio: f32,
    /// EAR/baseline ratio at which OPENING is confirmed.
    pub reopen_ratio: f32,
    /// EAR/baseline ratio a rapid-drop frame must exceed to confirm OPENING.
    pub rapid_reopen_ratio: f32,
    /// Closed frames required before CLOSING promotes to CLOSED.
    pub min_closed_frames: u32,
    /// Open frames required before OPENING promotes to OPEN.
    pub min_open_frames: u32,
    pub face_loss: FaceLossPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            calibration_frames: 20,
            baseline_decay: 0.99,
            closed_ratio: 0.5,
            fast_blink_ratio: 0.35,
            fast_recovery_ratio: 0.75,
            rapid_drop_ratio: 0.3,
            glitch_drop_ratio: 0.3,
            reopen_ratio: 0.7,
            rapid_reopen_ratio: 0.65,
            min_closed_frames: 0,
            min_open_frames: 0,
            face_loss: FaceLossPolicy::Freeze,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: DetectorConfig =
            serde_json::from_str(r#"{"calibration_frames": 30, "face_loss": "reset"}"#).unwrap();
        assert_eq!(cfg.calibration_frames, 30);
        assert_eq!(cfg.face_loss, FaceLossPolicy::Reset);
        assert_eq!(cfg.closed_ratio, 0.5);
        assert_eq!(cfg.min_open_frames, 0);
    }
}
