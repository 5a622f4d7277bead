//! Eye key-point extraction from a Face Mesh landmark frame.
//!
//! The external detector emits a fixed-length array of normalized 2D points
//! per video frame (MediaPipe Face Mesh, 468 points, 478 with iris refinement).
//! Only twelve of those points matter for blink detection: six per eye.
//!
//! The indices below are bound to that detector's landmark schema. If the
//! detector model or its topology changes, they must be revalidated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single normalized landmark coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in normalized coordinate space.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One frame's landmark set. Borrowed for the duration of a tick, never retained.
pub type LandmarkFrame<'a> = &'a [Point];

/// Landmark indices of the six points used for one eye's aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeIndices {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
    pub top_inner: usize,
    pub bottom_inner: usize,
}

impl EyeIndices {
    fn all(&self) -> [usize; 6] {
        [
            self.top,
            self.bottom,
            self.left,
            self.right,
            self.top_inner,
            self.bottom_inner,
        ]
    }
}

pub const LEFT_EYE: EyeIndices = EyeIndices {
    top: 159,
    bottom: 145,
    left: 33,
    right: 133,
    top_inner: 158,
    bottom_inner: 153,
};

pub const RIGHT_EYE: EyeIndices = EyeIndices {
    top: 386,
    bottom: 374,
    left: 362,
    right: 263,
    top_inner: 385,
    bottom_inner: 380,
};

/// Smallest frame length that contains every index used above.
pub const MIN_FRAME_LEN: usize = 387;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("landmark {index} missing from frame of {len} points")]
    MissingLandmark { index: usize, len: usize },
}

/// The six named points of one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeKeyPoints {
    pub top: Point,
    pub bottom: Point,
    pub left: Point,
    pub right: Point,
    pub top_inner: Point,
    pub bottom_inner: Point,
}

impl EyeKeyPoints {
    /// Pick one eye's key points out of a landmark frame.
    pub fn extract(frame: LandmarkFrame<'_>, indices: &EyeIndices) -> Result<Self, GeometryError> {
        if let Some(&index) = indices.all().iter().find(|&&i| i >= frame.len()) {
            return Err(GeometryError::MissingLandmark {
                index,
                len: frame.len(),
            });
        }

        Ok(Self {
            top: frame[indices.top],
            bottom: frame[indices.bottom],
            left: frame[indices.left],
            right: frame[indices.right],
            top_inner: frame[indices.top_inner],
            bottom_inner: frame[indices.bottom_inner],
        })
    }
}

/// Both eyes of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePair {
    pub left: EyeKeyPoints,
    pub right: EyeKeyPoints,
}

impl EyePair {
    pub fn extract(frame: LandmarkFrame<'_>) -> Result<Self, GeometryError> {
        Ok(Self {
            left: EyeKeyPoints::extract(frame, &LEFT_EYE)?,
            right: EyeKeyPoints::extract(frame, &RIGHT_EYE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(len: usize) -> Vec<Point> {
        (0..len)
            .map(|i| Point::new(i as f32 / 1000.0, i as f32 / 2000.0))
            .collect()
    }

    #[test]
    fn test_min_frame_len_covers_all_indices() {
        let max = LEFT_EYE
            .all()
            .into_iter()
            .chain(RIGHT_EYE.all())
            .max()
            .unwrap();
        assert_eq!(MIN_FRAME_LEN, max + 1);
    }

    #[test]
    fn test_extract_reads_fixed_indices() {
        let frame = frame_with(468);
        let eye = EyeKeyPoints::extract(&frame, &LEFT_EYE).unwrap();
        assert_eq!(eye.top, frame[159]);
        assert_eq!(eye.bottom, frame[145]);
        assert_eq!(eye.left, frame[33]);
        assert_eq!(eye.right, frame[133]);
        assert_eq!(eye.top_inner, frame[158]);
        assert_eq!(eye.bottom_inner, frame[153]);
    }

    #[test]
    fn test_extract_pair_at_min_len() {
        let frame = frame_with(MIN_FRAME_LEN);
        let pair = EyePair::extract(&frame).unwrap();
        assert_eq!(pair.right.top, frame[386]);
        assert_eq!(pair.right.right, frame[263]);
    }

    #[test]
    fn test_short_frame_rejected() {
        let frame = frame_with(200);
        let err = EyePair::extract(&frame).unwrap_err();
        assert_eq!(err, GeometryError::MissingLandmark { index: 386, len: 200 });
    }

    #[test]
    fn test_empty_frame_rejected() {
        let err = EyeKeyPoints::extract(&[], &LEFT_EYE).unwrap_err();
        assert!(matches!(err, GeometryError::MissingLandmark { len: 0, .. }));
    }

    #[test]
    fn test_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(0.3, 0.4);
        assert!((a.distance(&b) - 0.5).abs() < 1e-6);
    }
}
