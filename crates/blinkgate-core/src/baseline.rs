//! Per-subject "eyes open" reference.
//!
//! The first `calibration_frames` samples are averaged into a starting
//! baseline. After that the baseline follows an exponentially weighted
//! moving average so it tracks slow drift (distance to camera, lighting)
//! without a re-calibration step.

use serde::Serialize;

use crate::config::DetectorConfig;

/// Thresholds derived from the current baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub baseline: f32,
    /// Normal-path closed-eye threshold.
    pub closed: f32,
    /// Stricter threshold for single-frame fast blinks.
    pub fast_blink: f32,
    /// Reopened-enough threshold for closing out a fast blink.
    pub fast_recovery: f32,
}

#[derive(Debug, Clone)]
pub struct BaselineCalibrator {
    window: usize,
    decay: f32,
    closed_ratio: f32,
    fast_blink_ratio: f32,
    fast_recovery_ratio: f32,
    baseline_ear: Option<f32>,
    calibration: Vec<f32>,
    frame_count: u64,
}

impl BaselineCalibrator {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            window: config.calibration_frames,
            decay: config.baseline_decay,
            closed_ratio: config.closed_ratio,
            fast_blink_ratio: config.fast_blink_ratio,
            fast_recovery_ratio: config.fast_recovery_ratio,
            baseline_ear: None,
            calibration: Vec::with_capacity(config.calibration_frames),
            frame_count: 0,
        }
    }

    /// Feed one frame's average EAR.
    pub fn update(&mut self, ear: f32) {
        self.frame_count += 1;

        if !self.past_calibration_window() {
            self.calibration.push(ear);
            if self.calibration.len() == self.window {
                let mean = self.calibration.iter().sum::<f32>() / self.window as f32;
                self.baseline_ear = Some(mean);
                tracing::debug!(baseline = mean, frames = self.window, "baseline calibrated");
            }
            return;
        }

        self.baseline_ear = Some(match self.baseline_ear {
            Some(baseline) => baseline * self.decay + ear * (1.0 - self.decay),
            // Zero-length calibration window: seed from the first sample
            None => ear,
        });
    }

    fn past_calibration_window(&self) -> bool {
        self.frame_count > self.window as u64
    }

    /// Whether the state machine may leave OPEN.
    pub fn is_calibrated(&self) -> bool {
        self.past_calibration_window() && self.baseline_ear.is_some()
    }

    pub fn baseline(&self) -> Option<f32> {
        self.baseline_ear
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn calibration_samples(&self) -> &[f32] {
        &self.calibration
    }

    /// Thresholds for the current frame; `None` until calibration has completed.
    pub fn thresholds(&self) -> Option<Thresholds> {
        if !self.is_calibrated() {
            return None;
        }
        let baseline = self.baseline_ear?;
        Some(Thresholds {
            baseline,
            closed: baseline * self.closed_ratio,
            fast_blink: baseline * self.fast_blink_ratio,
            fast_recovery: baseline * self.fast_recovery_ratio,
        })
    }

    pub fn reset(&mut self) {
        self.baseline_ear = None;
        self.calibration.clear();
        self.frame_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator() -> BaselineCalibrator {
        BaselineCalibrator::new(&DetectorConfig::default())
    }

    #[test]
    fn test_baseline_undefined_before_window_full() {
        let mut cal = calibrator();
        for _ in 0..19 {
            cal.update(0.3);
        }
        assert_eq!(cal.baseline(), None);
        assert_eq!(cal.thresholds(), None);
        assert_eq!(cal.frame_count(), 19);
    }

    #[test]
    fn test_baseline_is_mean_at_window() {
        let mut cal = calibrator();
        for i in 0..20 {
            cal.update(if i % 2 == 0 { 0.2 } else { 0.4 });
        }
        assert!((cal.baseline().unwrap() - 0.3).abs() < 1e-5);
        assert_eq!(cal.calibration_samples().len(), 20);
        // Still inside the window: thresholds not yet meaningful
        assert!(cal.thresholds().is_none());
    }

    #[test]
    fn test_constant_input_calibrates_to_value() {
        let mut cal = calibrator();
        for _ in 0..20 {
            cal.update(0.30);
        }
        assert!((cal.baseline().unwrap() - 0.30).abs() < 1e-5);
    }

    #[test]
    fn test_ewma_after_calibration() {
        let mut cal = calibrator();
        for _ in 0..20 {
            cal.update(0.30);
        }
        cal.update(0.10);
        // 0.30 * 0.99 + 0.10 * 0.01
        assert!((cal.baseline().unwrap() - 0.298).abs() < 1e-5);
        assert_eq!(cal.calibration_samples().len(), 20);
    }

    #[test]
    fn test_thresholds_scale_with_baseline() {
        let mut cal = calibrator();
        for _ in 0..21 {
            cal.update(0.30);
        }
        let t = cal.thresholds().unwrap();
        assert!((t.closed - 0.15).abs() < 1e-5);
        assert!((t.fast_blink - 0.105).abs() < 1e-5);
        assert!((t.fast_recovery - 0.225).abs() < 1e-5);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut cal = calibrator();
        for _ in 0..25 {
            cal.update(0.30);
        }
        cal.reset();
        assert_eq!(cal.frame_count(), 0);
        assert_eq!(cal.baseline(), None);
        assert!(cal.calibration_samples().is_empty());
    }
}
