//! Four-phase blink state machine.
//!
//! ```text
//!            fast drop
//!   OPEN ─────────────────────────┐
//!    │ ▲  below closed threshold   ▼
//!    │ └── CLOSING ──────────▶ CLOSED ◀──┐
//!    │        (reverts)          │       │ closes again
//!    │                           ▼       │
//!    └──────────── emit ◀──── OPENING ───┘
//! ```
//!
//! Transitions are driven purely by frame arrivals. There is no wall-clock
//! timeout: a session that stops receiving frames simply does not progress.

use std::fmt;

use serde::Serialize;

use crate::baseline::Thresholds;
use crate::config::DetectorConfig;

/// EAR assumed for the frame before the first one.
const INITIAL_LAST_EAR: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlinkPhase {
    #[default]
    Open,
    Closing,
    Closed,
    Opening,
}

impl fmt::Display for BlinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlinkPhase::Open => "OPEN",
            BlinkPhase::Closing => "CLOSING",
            BlinkPhase::Closed => "CLOSED",
            BlinkPhase::Opening => "OPENING",
        };
        f.write_str(s)
    }
}

/// A completed OPEN → CLOSED → OPEN cycle, before it is stamped with frame time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletedBlink {
    /// Deepest EAR observed while the eyes were closing or closed.
    pub trigger_ear: f32,
    /// How far `trigger_ear` fell below the baseline, in percent.
    pub drop_percent: f32,
}

/// Per-frame comparisons against the current thresholds.
struct Signals {
    ear: f32,
    baseline: f32,
    closed: bool,
    fast_closed: bool,
    recovered: bool,
    rapid_drop: bool,
    drop_from_baseline: f32,
}

impl Signals {
    fn new(ear: f32, prev_ear: f32, t: &Thresholds, rapid_drop_ratio: f32) -> Self {
        let drop_from_baseline = if t.baseline > 0.0 {
            (t.baseline - ear) / t.baseline
        } else {
            0.0
        };
        Self {
            ear,
            baseline: t.baseline,
            closed: ear < t.closed,
            fast_closed: ear < t.fast_blink,
            recovered: ear >= t.fast_recovery,
            rapid_drop: prev_ear > 0.0 && (prev_ear - ear) / prev_ear > rapid_drop_ratio,
            drop_from_baseline,
        }
    }

    fn open_ratio(&self) -> f32 {
        if self.baseline > 0.0 {
            self.ear / self.baseline
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlinkMachine {
    phase: BlinkPhase,
    closed_frames: u32,
    open_frames: u32,
    last_ear: f32,
    min_ear: f32,
    rapid_drop_ratio: f32,
    glitch_drop_ratio: f32,
    reopen_ratio: f32,
    rapid_reopen_ratio: f32,
    min_closed_frames: u32,
    min_open_frames: u32,
}

impl BlinkMachine {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            phase: BlinkPhase::Open,
            closed_frames: 0,
            open_frames: 0,
            last_ear: INITIAL_LAST_EAR,
            min_ear: f32::INFINITY,
            rapid_drop_ratio: config.rapid_drop_ratio,
            glitch_drop_ratio: config.glitch_drop_ratio,
            reopen_ratio: config.reopen_ratio,
            rapid_reopen_ratio: config.rapid_reopen_ratio,
            min_closed_frames: config.min_closed_frames,
            min_open_frames: config.min_open_frames,
        }
    }

    pub fn phase(&self) -> BlinkPhase {
        self.phase
    }

    pub fn closed_frames(&self) -> u32 {
        self.closed_frames
    }

    pub fn open_frames(&self) -> u32 {
        self.open_frames
    }

    pub fn last_ear(&self) -> f32 {
        self.last_ear
    }

    /// Advance by one frame.
    ///
    /// `thresholds` is `None` while the baseline is still calibrating; the
    /// machine then stays in OPEN and only records the EAR.
    pub fn step(&mut self, ear: f32, thresholds: Option<&Thresholds>) -> Option<CompletedBlink> {
        let prev_ear = self.last_ear;
        self.last_ear = ear;

        let t = thresholds?;
        let s = Signals::new(ear, prev_ear, t, self.rapid_drop_ratio);

        if self.phase != BlinkPhase::Open {
            self.min_ear = self.min_ear.min(ear);
        }

        match self.phase {
            BlinkPhase::Open => {
                if s.fast_closed && s.rapid_drop {
                    self.begin_closure(BlinkPhase::Closed, ear);
                } else if s.closed {
                    self.begin_closure(BlinkPhase::Closing, ear);
                }
                None
            }
            BlinkPhase::Closing => {
                if s.closed || s.fast_closed {
                    self.closed_frames += 1;
                    if self.closed_frames > self.min_closed_frames || s.fast_closed || s.rapid_drop {
                        self.enter(BlinkPhase::Closed);
                    }
                } else if s.drop_from_baseline > self.glitch_drop_ratio && self.closed_frames > 0 {
                    self.enter(BlinkPhase::Closed);
                } else {
                    self.enter(BlinkPhase::Open);
                    self.closed_frames = 0;
                    self.min_ear = f32::INFINITY;
                }
                None
            }
            BlinkPhase::Closed => {
                if !s.closed || s.recovered {
                    self.enter(BlinkPhase::Opening);
                    self.open_frames = 0;
                    self.try_reopen(&s)
                } else {
                    None
                }
            }
            BlinkPhase::Opening => {
                if !s.closed || s.recovered {
                    self.try_reopen(&s)
                } else {
                    self.enter(BlinkPhase::Closed);
                    self.open_frames = 0;
                    None
                }
            }
        }
    }

    fn begin_closure(&mut self, phase: BlinkPhase, ear: f32) {
        self.enter(phase);
        self.closed_frames = 1;
        self.open_frames = 0;
        self.min_ear = ear;
    }

    /// Count one open frame and promote to OPEN once the reopening is confirmed.
    fn try_reopen(&mut self, s: &Signals) -> Option<CompletedBlink> {
        self.open_frames += 1;

        let confirmed = self.open_frames > self.min_open_frames
            || s.recovered
            || s.open_ratio() >= self.reopen_ratio
            || (s.rapid_drop && s.ear > s.baseline * self.rapid_reopen_ratio);
        if !confirmed {
            return None;
        }

        let trigger_ear = self.min_ear.min(s.ear);
        let drop_percent = if s.baseline > 0.0 {
            (s.baseline - trigger_ear) / s.baseline * 100.0
        } else {
            0.0
        };

        self.enter(BlinkPhase::Open);
        self.closed_frames = 0;
        self.open_frames = 0;
        self.min_ear = f32::INFINITY;

        Some(CompletedBlink {
            trigger_ear,
            drop_percent,
        })
    }

    fn enter(&mut self, phase: BlinkPhase) {
        if phase != self.phase {
            tracing::trace!(from = %self.phase, to = %phase, "blink phase change");
            self.phase = phase;
        }
    }

    /// Drop any in-progress cycle. `last_ear` is kept when `keep_last_ear` is set.
    pub fn reset(&mut self, keep_last_ear: bool) {
        self.phase = BlinkPhase::Open;
        self.closed_frames = 0;
        self.open_frames = 0;
        self.min_ear = f32::INFINITY;
        if !keep_last_ear {
            self.last_ear = INITIAL_LAST_EAR;
        }
    }
}
