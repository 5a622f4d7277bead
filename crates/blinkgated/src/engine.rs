use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use blinkgate_core::{
    BlinkPhase, CaptureCoordinator, CaptureDecision, CaptureTicket, DetectionState,
    DetectorConfig, Frame, BLINK_INDICATOR,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::collab::{
    FrameCapture, LandmarkSource, SourceFactory, VerifyClient, VerifyRequest, VerifyResponse,
};

/// Frames buffered between the reader thread and the engine loop.
const FRAME_QUEUE: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a detection session is already active")]
    AlreadyActive,
    #[error("engine task exited")]
    ChannelClosed,
}

/// Outcome of the most recent verification submission.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationSummary {
    pub requested_at: String,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub error: Option<String>,
}

/// Snapshot of the running session for the UI collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    pub session_id: Option<Uuid>,
    pub source_ended: bool,
    pub face_detected: bool,
    pub phase: BlinkPhase,
    pub frame_count: u64,
    pub calibrated: bool,
    pub ear: Option<f32>,
    pub baseline: Option<f32>,
    pub blink_count: u32,
    pub blinking: bool,
    pub in_flight: bool,
    pub submissions: u32,
    pub last_error: Option<String>,
    pub last_verification: Option<VerificationSummary>,
}

/// Messages sent from D-Bus handlers to the engine task.
enum EngineRequest {
    Activate {
        reply: oneshot::Sender<Result<Uuid, EngineError>>,
    },
    Deactivate {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Internal traffic from the source reader thread and submission tasks.
enum EngineEvent {
    Frame { epoch: u64, frame: Frame },
    SourceEnded { epoch: u64 },
    SourceFailed { epoch: u64, error: String },
    Settled {
        ticket: CaptureTicket,
        outcome: Result<VerifyResponse, String>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Start a detection session. Returns the new session id.
    pub async fn activate(&self) -> Result<Uuid, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Activate { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Stop the current session and reset all of its state.
    ///
    /// Returns false if no session was active.
    pub async fn deactivate(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Deactivate { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Collaborators and tunables a session engine is built from.
pub struct EngineParts {
    pub sources: Arc<dyn SourceFactory>,
    pub capture: Arc<dyn FrameCapture>,
    pub client: Arc<dyn VerifyClient>,
    pub detector: DetectorConfig,
    pub cooldown: Duration,
}

/// Spawn the engine task on the current tokio runtime.
///
/// The engine owns all per-session state. Frames are processed one at a time,
/// to completion, in arrival order; capture and submission run on the
/// blocking pool and report back through the event channel, so a slow
/// endpoint never delays frame processing.
pub fn spawn_engine(parts: EngineParts) -> EngineHandle {
    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(FRAME_QUEUE);

    let engine = Engine {
        detection: DetectionState::new(parts.detector),
        coordinator: CaptureCoordinator::new(parts.cooldown),
        session: None,
        last_error: None,
        last_verification: None,
        last_blink: None,
        sources: parts.sources,
        capture: parts.capture,
        client: parts.client,
        events: event_tx,
    };

    tokio::spawn(engine.run(rx, event_rx));

    EngineHandle { tx }
}

struct Session {
    id: Uuid,
    epoch: u64,
    source_ended: bool,
    stop: Arc<AtomicBool>,
}

struct Engine {
    detection: DetectionState,
    coordinator: CaptureCoordinator,
    session: Option<Session>,
    last_error: Option<String>,
    last_verification: Option<VerificationSummary>,
    /// Host time the latest blink was processed; frame clocks may be offset.
    last_blink: Option<Instant>,
    sources: Arc<dyn SourceFactory>,
    capture: Arc<dyn FrameCapture>,
    client: Arc<dyn VerifyClient>,
    events: mpsc::Sender<EngineEvent>,
}

impl Engine {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<EngineRequest>,
        mut events: mpsc::Receiver<EngineEvent>,
    ) {
        tracing::info!("engine started");
        loop {
            tokio::select! {
                biased;
                req = requests.recv() => match req {
                    Some(req) => self.handle_request(req),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        self.end_session();
        tracing::info!("engine exiting");
    }

    fn handle_request(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Activate { reply } => {
                let _ = reply.send(self.activate());
            }
            EngineRequest::Deactivate { reply } => {
                let was_active = self.session.is_some();
                if was_active {
                    tracing::info!("deactivate requested");
                }
                self.end_session();
                let _ = reply.send(was_active);
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn activate(&mut self) -> Result<Uuid, EngineError> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyActive);
        }

        self.detection.reset();
        self.coordinator.reset();
        self.last_blink = None;
        self.last_error = None;
        self.last_verification = None;

        let session = Session {
            id: Uuid::new_v4(),
            epoch: self.coordinator.epoch(),
            source_ended: false,
            stop: Arc::new(AtomicBool::new(false)),
        };

        spawn_reader(
            Arc::clone(&self.sources),
            session.epoch,
            Arc::clone(&session.stop),
            self.events.clone(),
        );

        tracing::info!(session = %session.id, epoch = session.epoch, "session activated");
        let id = session.id;
        self.session = Some(session);
        Ok(id)
    }

    /// Tear down the current session, if any, and reset every counter.
    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.store(true, Ordering::Relaxed);
            tracing::info!(
                session = %session.id,
                blinks = self.detection.blink_count(),
                submissions = self.coordinator.submissions(),
                "session stopped"
            );
        }
        self.detection.reset();
        self.coordinator.reset();
        self.last_blink = None;
    }

    fn current_epoch(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.epoch)
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Frame { epoch, frame } => {
                if self.current_epoch() == Some(epoch) {
                    self.process_frame(&frame);
                }
            }
            EngineEvent::SourceEnded { epoch } => {
                if let Some(session) = self.session.as_mut().filter(|s| s.epoch == epoch) {
                    tracing::info!(session = %session.id, "landmark stream ended");
                    session.source_ended = true;
                }
            }
            EngineEvent::SourceFailed { epoch, error } => {
                if self.current_epoch() == Some(epoch) {
                    tracing::error!(error = %error, "landmark source failed, stopping session");
                    self.end_session();
                    self.last_error = Some(error);
                }
            }
            EngineEvent::Settled { ticket, outcome } => {
                if !self.coordinator.settle(&ticket) {
                    return;
                }
                let requested_at = ticket.timestamp_string();
                self.last_verification = Some(match outcome {
                    Ok(resp) => {
                        tracing::info!(status = resp.status, "verification settled");
                        VerificationSummary {
                            requested_at,
                            status: Some(resp.status),
                            body: Some(resp.body),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "verification failed");
                        VerificationSummary {
                            requested_at,
                            status: None,
                            body: None,
                            error: Some(e),
                        }
                    }
                });
            }
        }
    }

    fn process_frame(&mut self, frame: &Frame) {
        let (_, event) = self.detection.advance(frame);
        let Some(event) = event else {
            return;
        };
        self.last_blink = Some(Instant::now());

        match self.coordinator.on_blink(&event) {
            CaptureDecision::Submit(ticket) => {
                tracing::info!(
                    sequence = event.sequence,
                    drop_percent = event.drop_percent,
                    "blink accepted, requesting capture"
                );
                self.dispatch(ticket);
            }
            CaptureDecision::CoolingDown { .. } | CaptureDecision::InFlight => {
                tracing::info!(sequence = event.sequence, "blink counted, capture suppressed");
            }
        }
    }

    /// Fire-and-forget capture + submission. Completion comes back as `Settled`.
    fn dispatch(&self, ticket: CaptureTicket) {
        let capture = Arc::clone(&self.capture);
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let timestamp = ticket.timestamp_string();

        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                submit_capture(capture.as_ref(), client.as_ref(), timestamp)
            })
            .await
            .unwrap_or_else(|e| Err(format!("submission task failed: {e}")));
            let _ = events.send(EngineEvent::Settled { ticket, outcome }).await;
        });
    }

    fn status(&self) -> SessionStatus {
        let sample = self.detection.last_sample();
        SessionStatus {
            active: self.session.is_some(),
            session_id: self.session.as_ref().map(|s| s.id),
            source_ended: self.session.as_ref().is_some_and(|s| s.source_ended),
            face_detected: self.detection.face_detected(),
            phase: self.detection.phase(),
            frame_count: self.detection.frame_count(),
            calibrated: self.detection.baseline().is_calibrated(),
            ear: sample.map(|s| s.average),
            baseline: self.detection.baseline().baseline(),
            blink_count: self.detection.blink_count(),
            blinking: self
                .last_blink
                .is_some_and(|at| at.elapsed() < BLINK_INDICATOR),
            in_flight: self.coordinator.in_flight(),
            submissions: self.coordinator.submissions(),
            last_error: self.last_error.clone(),
            last_verification: self.last_verification.clone(),
        }
    }
}

/// Capture a still and submit it. Runs on the blocking pool.
fn submit_capture(
    capture: &dyn FrameCapture,
    client: &dyn VerifyClient,
    timestamp: String,
) -> Result<VerifyResponse, String> {
    let image = capture.capture().map_err(|e| e.to_string())?;
    tracing::debug!(bytes = image.bytes.len(), %timestamp, "still captured");
    client
        .submit(&VerifyRequest { image, timestamp })
        .map_err(|e| e.to_string())
}

/// Open the landmark source and pump its frames into the engine.
///
/// Runs on its own OS thread because detector streams (FIFOs, pipes) block.
/// A stopped session's reader may stay parked in a read until the next frame
/// arrives; whatever it sends afterwards carries a stale epoch and is dropped.
fn spawn_reader(
    sources: Arc<dyn SourceFactory>,
    epoch: u64,
    stop: Arc<AtomicBool>,
    events: mpsc::Sender<EngineEvent>,
) {
    let spawned = std::thread::Builder::new()
        .name("blinkgate-source".into())
        .spawn({
            let events = events.clone();
            move || {
                let mut source = match sources.open() {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = events.blocking_send(EngineEvent::SourceFailed {
                            epoch,
                            error: e.to_string(),
                        });
                        return;
                    }
                };
                pump_frames(source.as_mut(), epoch, &stop, &events);
            }
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn landmark reader thread");
        let _ = events.try_send(EngineEvent::SourceFailed {
            epoch,
            error: format!("failed to spawn reader thread: {e}"),
        });
    }
}

fn pump_frames(
    source: &mut dyn LandmarkSource,
    epoch: u64,
    stop: &AtomicBool,
    events: &mpsc::Sender<EngineEvent>,
) {
    while !stop.load(Ordering::Relaxed) {
        let event = match source.next_frame() {
            Ok(Some(frame)) => EngineEvent::Frame { epoch, frame },
            Ok(None) => {
                let _ = events.blocking_send(EngineEvent::SourceEnded { epoch });
                return;
            }
            Err(e) => {
                let _ = events.blocking_send(EngineEvent::SourceFailed {
                    epoch,
                    error: e.to_string(),
                });
                return;
            }
        };
        if events.blocking_send(event).is_err() {
            return;
        }
    }
}
