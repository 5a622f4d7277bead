//! Offline replay of recorded landmark streams.
//!
//! Frames go through the same detection state and capture coordinator the
//! daemon uses. Nothing is captured or sent; every accepted submission is
//! treated as settled immediately.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use blinkgate_core::{
    format_capture_timestamp, BlinkEvent, CaptureCoordinator, CaptureDecision, DetectionState,
    DetectorConfig, FaceLossPolicy, Frame, FrameOutcome,
};
use clap::Args;
use serde::Serialize;

/// Arguments for the replay command.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Recorded JSONL landmark stream, one frame per line. Lines without a
    /// timestamp are stamped when read, so cooldowns only replay faithfully
    /// for fully stamped recordings.
    pub file: PathBuf,

    /// Minimum spacing between submissions, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub cooldown_ms: u64,

    /// Number of face frames used to calibrate the baseline
    #[arg(long)]
    pub calibration_frames: Option<usize>,

    /// Return the blink machine to OPEN when the face is lost
    #[arg(long)]
    pub reset_on_face_loss: bool,

    /// Emit JSON lines instead of text
    #[arg(long)]
    pub json: bool,
}

/// One detected blink and what the coordinator decided about it.
#[derive(Debug, Serialize)]
pub struct ReplayBlink {
    #[serde(flatten)]
    pub event: BlinkEvent,
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub frames: u64,
    pub face_frames: u64,
    pub no_face_frames: u64,
    pub malformed_frames: u64,
    pub undecodable_lines: u64,
    pub blinks: u32,
    pub submissions: u32,
    pub baseline: Option<f32>,
}

pub fn run(args: &ReplayArgs) -> Result<()> {
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;

    let mut config = DetectorConfig::default();
    if let Some(n) = args.calibration_frames {
        config.calibration_frames = n;
    }
    if args.reset_on_face_loss {
        config.face_loss = FaceLossPolicy::Reset;
    }

    let json = args.json;
    let summary = replay(
        BufReader::new(file),
        config,
        Duration::from_millis(args.cooldown_ms),
        |blink| print_blink(blink, json),
    )?;

    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

/// Feed every frame in `reader` through a fresh session.
pub fn replay<R, F>(
    reader: R,
    config: DetectorConfig,
    cooldown: Duration,
    mut on_blink: F,
) -> Result<ReplaySummary>
where
    R: BufRead,
    F: FnMut(&ReplayBlink),
{
    let mut state = DetectionState::new(config);
    let mut coordinator = CaptureCoordinator::new(cooldown);
    let mut summary = ReplaySummary::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("failed to read landmark stream")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let frame: Frame = match serde_json::from_str(trimmed) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "skipping undecodable line");
                summary.undecodable_lines += 1;
                continue;
            }
        };

        summary.frames += 1;
        let (outcome, event) = state.advance(&frame);
        match outcome {
            FrameOutcome::Processed(_) => summary.face_frames += 1,
            FrameOutcome::NoFace => summary.no_face_frames += 1,
            FrameOutcome::Malformed(_) => summary.malformed_frames += 1,
        }

        let Some(event) = event else {
            continue;
        };

        let blink = match coordinator.on_blink(&event) {
            CaptureDecision::Submit(ticket) => {
                coordinator.settle(&ticket);
                ReplayBlink {
                    event,
                    submitted: true,
                    cooldown_remaining_ms: None,
                }
            }
            CaptureDecision::CoolingDown { remaining } => ReplayBlink {
                event,
                submitted: false,
                cooldown_remaining_ms: Some(remaining.as_millis() as u64),
            },
            CaptureDecision::InFlight => ReplayBlink {
                event,
                submitted: false,
                cooldown_remaining_ms: None,
            },
        };
        on_blink(&blink);
    }

    summary.blinks = state.blink_count();
    summary.submissions = coordinator.submissions();
    summary.baseline = state.baseline().baseline();
    Ok(summary)
}

fn print_blink(blink: &ReplayBlink, json: bool) {
    if json {
        match serde_json::to_string(blink) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(error = %e, "failed to encode blink"),
        }
        return;
    }

    let verdict = match blink.cooldown_remaining_ms {
        _ if blink.submitted => "submit".to_string(),
        Some(ms) => format!("skipped, cooldown {ms} ms left"),
        None => "skipped, submission in flight".to_string(),
    };
    println!(
        "blink #{:<3} {}  ear={:.3}  drop={:>5.1}%  -> {}",
        blink.event.sequence,
        format_capture_timestamp(blink.event.timestamp),
        blink.event.trigger_ear,
        blink.event.drop_percent,
        verdict,
    );
}

fn print_summary(summary: &ReplaySummary) {
    println!();
    println!(
        "frames: {} ({} face, {} no face, {} malformed, {} undecodable)",
        summary.frames,
        summary.face_frames,
        summary.no_face_frames,
        summary.malformed_frames,
        summary.undecodable_lines,
    );
    match summary.baseline {
        Some(b) => println!("baseline EAR: {b:.3}"),
        None => println!("baseline EAR: not calibrated"),
    }
    println!("blinks: {}", summary.blinks);
    println!("submissions: {}", summary.submissions);
}

#[cfg(test)]
mod tests {
    use super::*;
    use blinkgate_core::landmarks::{EyeIndices, LEFT_EYE, RIGHT_EYE};
    use blinkgate_core::Point;
    use chrono::{DateTime, TimeDelta};
    use std::io::Cursor;

    fn place_eye(points: &mut [Point], idx: &EyeIndices, cx: f32, ear: f32) {
        let w = 0.1;
        let h = ear * w;
        points[idx.left] = Point::new(cx - w / 2.0, 0.5);
        points[idx.right] = Point::new(cx + w / 2.0, 0.5);
        points[idx.top] = Point::new(cx, 0.5 - h / 2.0);
        points[idx.bottom] = Point::new(cx, 0.5 + h / 2.0);
        points[idx.top_inner] = Point::new(cx - 0.01, 0.5 - h / 2.0);
        points[idx.bottom_inner] = Point::new(cx - 0.01, 0.5 + h / 2.0);
    }

    /// Build a JSONL recording; `None` writes a no-face frame.
    fn recording(frames: &[(i64, Option<f32>)]) -> Cursor<Vec<u8>> {
        let t0 = DateTime::from_timestamp(1_714_557_600, 0).unwrap();
        let mut out = String::new();
        for &(ms, ear) in frames {
            let ts = t0 + TimeDelta::milliseconds(ms);
            let frame = match ear {
                Some(ear) => {
                    let mut points = vec![Point::default(); 468];
                    place_eye(&mut points, &LEFT_EYE, 0.4, ear);
                    place_eye(&mut points, &RIGHT_EYE, 0.6, ear);
                    Frame::with_face(points, ts)
                }
                None => Frame::no_face(ts),
            };
            out.push_str(&serde_json::to_string(&frame).unwrap());
            out.push('\n');
        }
        Cursor::new(out.into_bytes())
    }

    fn calibration() -> Vec<(i64, Option<f32>)> {
        (0..20).map(|i| (i * 33, Some(0.30))).collect()
    }

    fn run_replay(frames: &[(i64, Option<f32>)]) -> (ReplaySummary, Vec<ReplayBlink>) {
        let mut blinks = Vec::new();
        let summary = replay(
            recording(frames),
            DetectorConfig::default(),
            Duration::from_millis(2000),
            |b| {
                blinks.push(ReplayBlink {
                    event: b.event,
                    submitted: b.submitted,
                    cooldown_remaining_ms: b.cooldown_remaining_ms,
                })
            },
        )
        .unwrap();
        (summary, blinks)
    }

    #[test]
    fn test_replay_counts_and_debounces() {
        let mut frames = calibration();
        frames.extend([
            (700, Some(0.30)),
            (733, Some(0.05)),
            (766, Some(0.30)),
            // 500 ms after the first blink completes
            (1233, Some(0.05)),
            (1266, Some(0.30)),
            // 2100 ms after the first blink completes
            (2833, Some(0.05)),
            (2866, Some(0.30)),
        ]);

        let (summary, blinks) = run_replay(&frames);

        assert_eq!(summary.frames, 27);
        assert_eq!(summary.blinks, 3);
        assert_eq!(summary.submissions, 2);
        assert_eq!(blinks.len(), 3);
        assert!(blinks[0].submitted);
        assert!(!blinks[1].submitted);
        assert_eq!(blinks[1].cooldown_remaining_ms, Some(1500));
        assert!(blinks[2].submitted);
        assert_eq!(blinks[2].event.sequence, 3);
    }

    #[test]
    fn test_replay_tallies_frame_kinds() {
        let mut frames = calibration();
        frames.push((700, None));
        frames.push((733, Some(0.30)));
        let mut input = recording(&frames).into_inner();
        input.extend_from_slice(b"\nnot a frame\n{\"timestamp\":\"2024-05-01T10:00:01Z\",\"landmarks\":[]}\n");
        // Accepted without a timestamp, as the daemon does
        input.extend_from_slice(b"{\"landmarks\":null}\n");

        let summary = replay(
            Cursor::new(input),
            DetectorConfig::default(),
            Duration::from_millis(2000),
            |_| {},
        )
        .unwrap();

        assert_eq!(summary.frames, 24);
        assert_eq!(summary.face_frames, 21);
        assert_eq!(summary.no_face_frames, 2);
        assert_eq!(summary.malformed_frames, 1);
        assert_eq!(summary.undecodable_lines, 1);
        assert_eq!(summary.blinks, 0);
        assert!((summary.baseline.unwrap() - 0.30).abs() < 1e-4);
    }

    #[test]
    fn test_replay_json_blink_is_flat() {
        let mut frames = calibration();
        frames.extend([(700, Some(0.30)), (733, Some(0.05)), (766, Some(0.30))]);
        let (_, blinks) = run_replay(&frames);

        let value = serde_json::to_value(&blinks[0]).unwrap();
        assert_eq!(value["sequence"], 1);
        assert_eq!(value["submitted"], true);
        assert!(value.get("cooldown_remaining_ms").is_none());
    }
}
