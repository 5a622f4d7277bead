//! External collaborators of a detection session.
//!
//! The landmark detector, the still-frame capture, and the verification
//! endpoint all live outside this daemon. Each is reached through a small
//! trait so sessions can run against synthetic streams and mock clients.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;
use std::time::Duration;

use blinkgate_core::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open landmark source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("landmark source read failed: {0}")]
    Read(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to load still frame {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode still frame: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("verification endpoint returned HTTP {0}")]
    Status(u16),
    #[error("verification request failed: {0}")]
    Transport(String),
}

/// Per-frame landmark stream from the external detector.
pub trait LandmarkSource: Send {
    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Opens a fresh [`LandmarkSource`] for each activated session.
pub trait SourceFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn LandmarkSource>, SourceError>;
}

/// An encoded still image ready for submission.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub trait FrameCapture: Send + Sync {
    fn capture(&self) -> Result<CapturedImage, CaptureError>;
}

/// One logical verify request.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub image: CapturedImage,
    /// `YYYY-MM-DD HH:mm:ss`, local time.
    pub timestamp: String,
}

/// Raw endpoint answer. Interpreting it is the UI's business.
#[derive(Debug, Clone)]
pub struct VerifyResponse {
    pub status: u16,
    pub body: String,
}

pub trait VerifyClient: Send + Sync {
    fn submit(&self, request: &VerifyRequest) -> Result<VerifyResponse, SubmitError>;
}

// ---------------------------------------------------------------------------
// JSONL landmark stream
// ---------------------------------------------------------------------------

/// Reads one JSON-encoded [`Frame`] per line, skipping lines that do not decode.
pub struct JsonlLandmarkSource<R> {
    reader: R,
    line: String,
    line_no: u64,
}

impl<R: BufRead + Send> JsonlLandmarkSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead + Send> LandmarkSource for JsonlLandmarkSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .map_err(SourceError::Read)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Frame>(trimmed) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    tracing::warn!(line = self.line_no, error = %e, "skipping undecodable landmark line");
                }
            }
        }
    }
}

/// Opens the configured JSONL file or FIFO on each activation.
pub struct JsonlSourceFactory {
    path: PathBuf,
}

impl JsonlSourceFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceFactory for JsonlSourceFactory {
    fn open(&self) -> Result<Box<dyn LandmarkSource>, SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), "landmark source opened");
        Ok(Box::new(JsonlLandmarkSource::new(BufReader::new(file))))
    }
}

// ---------------------------------------------------------------------------
// Still-frame capture
// ---------------------------------------------------------------------------

/// Reads the latest still written by the camera bridge and re-encodes it as JPEG.
pub struct StillImageCapture {
    path: PathBuf,
}

impl StillImageCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameCapture for StillImageCapture {
    fn capture(&self) -> Result<CapturedImage, CaptureError> {
        let img = image::open(&self.path).map_err(|source| CaptureError::Load {
            path: self.path.clone(),
            source,
        })?;
        // JPEG has no alpha channel
        let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());

        let mut bytes = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .map_err(CaptureError::Encode)?;

        Ok(CapturedImage {
            bytes,
            content_type: "image/jpeg",
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP verification client
// ---------------------------------------------------------------------------

/// Blocking HTTP client: POSTs the still as the request body and the capture
/// time in the `X-Capture-Timestamp` header.
pub struct HttpVerifyClient {
    agent: ureq::Agent,
    url: String,
}

impl HttpVerifyClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            url: url.into(),
        }
    }
}

impl VerifyClient for HttpVerifyClient {
    fn submit(&self, request: &VerifyRequest) -> Result<VerifyResponse, SubmitError> {
        let mut resp = self
            .agent
            .post(self.url.as_str())
            .header("Content-Type", request.image.content_type)
            .header("X-Capture-Timestamp", request.timestamp.as_str())
            .send(&request.image.bytes[..])
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => SubmitError::Status(code),
                other => SubmitError::Transport(other.to_string()),
            })?;

        let status = resp.status().as_u16();
        let body = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        Ok(VerifyResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blinkgate_core::Point;

    fn source(text: &str) -> JsonlLandmarkSource<Cursor<Vec<u8>>> {
        JsonlLandmarkSource::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_jsonl_reads_face_and_no_face_frames() {
        let mut src = source(
            "{\"timestamp\":\"2024-05-01T10:00:00Z\",\"landmarks\":[{\"x\":0.1,\"y\":0.2,\"z\":0.0}]}\n\
             {\"timestamp\":\"2024-05-01T10:00:00.033Z\",\"landmarks\":null}\n",
        );

        let first = src.next_frame().unwrap().unwrap();
        let lm = first.landmarks.unwrap();
        assert_eq!(lm.len(), 1);
        assert_eq!(lm[0], Point::new(0.1, 0.2));

        let second = src.next_frame().unwrap().unwrap();
        assert!(second.landmarks.is_none());
        assert!(second.timestamp > first.timestamp);

        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_jsonl_skips_blank_and_bad_lines() {
        let mut src = source("\n   \nnot json\n{\"landmarks\":[]}\n");
        let frame = src.next_frame().unwrap().unwrap();
        assert_eq!(frame.landmarks.unwrap().len(), 0);
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_missing_source_file_fails_open() {
        let factory = JsonlSourceFactory::new("/nonexistent/blinkgate/landmarks.jsonl");
        assert!(matches!(factory.open(), Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_still_capture_encodes_jpeg() {
        let dir = std::env::temp_dir().join(format!(
            "blinkgate-capture-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let captured = StillImageCapture::new(&path).capture().unwrap();
        assert_eq!(captured.content_type, "image/jpeg");
        // JPEG SOI marker
        assert_eq!(&captured.bytes[..2], &[0xFF, 0xD8]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_still_capture_missing_file() {
        let err = StillImageCapture::new("/nonexistent/frame.png")
            .capture()
            .unwrap_err();
        assert!(matches!(err, CaptureError::Load { .. }));
    }
}
