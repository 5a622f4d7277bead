//! Eye aspect ratio (EAR).
//!
//! `EAR = (|top - bottom| + |top_inner - bottom_inner|) / (2 * |left - right|)`
//!
//! An open eye sits around 0.25-0.35 depending on the subject; a closed eye
//! approaches zero.

use serde::Serialize;

use crate::landmarks::{EyeKeyPoints, EyePair, GeometryError, LandmarkFrame};

/// EAR reported for degenerate geometry (zero horizontal extent).
///
/// Treated as fully open so a tracking glitch can never register as a closure.
pub const DEGENERATE_EAR: f32 = 1.0;

/// Aspect ratio of a single eye.
pub fn eye_aspect_ratio(eye: &EyeKeyPoints) -> f32 {
    let vertical_outer = eye.top.distance(&eye.bottom);
    let vertical_inner = eye.top_inner.distance(&eye.bottom_inner);
    let horizontal = eye.left.distance(&eye.right);

    if horizontal == 0.0 {
        return DEGENERATE_EAR;
    }
    (vertical_outer + vertical_inner) / (2.0 * horizontal)
}

/// Per-frame EAR for both eyes and their mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EarSample {
    pub left: f32,
    pub right: f32,
    pub average: f32,
}

impl EarSample {
    pub fn from_eyes(eyes: &EyePair) -> Self {
        let left = eye_aspect_ratio(&eyes.left);
        let right = eye_aspect_ratio(&eyes.right);
        Self {
            left,
            right,
            average: (left + right) / 2.0,
        }
    }

    pub fn from_frame(frame: LandmarkFrame<'_>) -> Result<Self, GeometryError> {
        EyePair::extract(frame).map(|eyes| Self::from_eyes(&eyes))
    }
}
