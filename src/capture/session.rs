//! Capture session lifecycle.
//!
//! A session is an actor: one task owns the device and the state and is the
//! only thing that ever changes either. `CaptureSession` is a cloneable
//! handle that sends it commands, so one clone can wait on
//! `request_finish` while another calls `cancel`.
//!
//! ```text
//! Idle ──start──▶ Scanning ──request_finish──▶ Finishing ──▶ Finished
//!   ▲                │                            │  │
//!   │                └──────────cancel────────────┴──┼──▶ Cancelled
//!   └──────────────── device error ◀─────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};

use super::device::{CaptureCompletion, CaptureConfig, CaptureDevice, DeviceResult};
use super::room::RawCapture;
use crate::error::{Error, Result};

/// Snapshot of where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Finishing,
    Finished,
    Cancelled,
}

impl SessionState {
    /// True while the session holds the sensor
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Scanning | SessionState::Finishing)
    }
}

/// How a finish request ended
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Finished(RawCapture),
    Cancelled,
}

// Depth sensing is exclusive across the whole process
static SENSOR_IN_USE: AtomicBool = AtomicBool::new(false);

/// True while any session in the process is scanning or finishing
pub fn sensor_in_use() -> bool {
    SENSOR_IN_USE.load(Ordering::Acquire)
}

/// Held by the one active session; releases the sensor on drop.
#[derive(Debug)]
struct SensorLease(());

impl SensorLease {
    fn acquire() -> Option<Self> {
        SENSOR_IN_USE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SensorLease(()))
    }
}

impl Drop for SensorLease {
    fn drop(&mut self) {
        SENSOR_IN_USE.store(false, Ordering::Release);
    }
}

enum Command {
    Start {
        config: CaptureConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    Finish {
        reply: oneshot::Sender<Result<CaptureOutcome>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    Reset {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to a running capture session.
#[derive(Clone)]
pub struct CaptureSession {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl CaptureSession {
    /// Spawn the session task for `device`. Must be called within a Tokio runtime.
    ///
    /// The task runs until every handle is dropped; an active scan is
    /// aborted at that point.
    pub fn spawn<D: CaptureDevice>(device: D) -> Self {
        let (commands, rx) = mpsc::channel(8);
        let (state_tx, state) = watch::channel(SessionState::Idle);

        let actor = SessionActor {
            device,
            state: state_tx,
            lease: None,
            pending: None,
        };
        tokio::spawn(actor.run(rx));

        Self { commands, state }
    }

    /// Idle → Scanning.
    ///
    /// Fails with `SessionAlreadyActive` if this session is not idle or
    /// another session holds the sensor, and with `CaptureFailed` if the
    /// device refuses to start.
    pub async fn start(&self, config: CaptureConfig) -> Result<()> {
        self.call(|reply| Command::Start { config, reply }).await
    }

    /// Scanning → Finishing, then wait for the device's terminal result.
    ///
    /// On a device error the session goes back to Idle and the error is
    /// returned as `CaptureFailed`, so the caller can start again.
    pub async fn request_finish(&self) -> Result<CaptureOutcome> {
        self.call(|reply| Command::Finish { reply }).await
    }

    /// Scanning or Finishing → Cancelled. Any in-flight capture is discarded.
    pub async fn cancel(&self) -> Result<()> {
        self.call(|reply| Command::Cancel { reply }).await
    }

    /// Finished or Cancelled → Idle.
    pub async fn reset(&self) -> Result<()> {
        self.call(|reply| Command::Reset { reply }).await
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| shut_down())?;
        rx.await.map_err(|_| shut_down())?
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn shut_down() -> Error {
    Error::CaptureFailed("capture session has shut down".to_string())
}

/// A finish request waiting on the device
struct Pending {
    result: oneshot::Receiver<DeviceResult>,
    waiter: oneshot::Sender<Result<CaptureOutcome>>,
}

enum Event {
    Command(Option<Command>),
    Device(std::result::Result<DeviceResult, oneshot::error::RecvError>),
}

struct SessionActor<D> {
    device: D,
    state: watch::Sender<SessionState>,
    lease: Option<SensorLease>,
    pending: Option<Pending>,
}

impl<D: CaptureDevice> SessionActor<D> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let event = tokio::select! {
                cmd = commands.recv() => Event::Command(cmd),
                result = wait_for_device(&mut self.pending) => Event::Device(result),
            };

            match event {
                Event::Command(Some(cmd)) => self.handle(cmd),
                Event::Command(None) => break,
                Event::Device(result) => self.complete(result),
            }
        }

        if self.current().is_active() {
            tracing::debug!("Capture session dropped while active, aborting device");
            self.pending = None;
            self.device.abort();
        }
        self.lease = None;
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&mut self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if !next.is_active() {
            self.lease = None;
        }
        tracing::debug!(from = ?prev, to = ?next, "Capture session transition");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Start { config, reply } => {
                let _ = reply.send(self.start(config));
            }
            Command::Finish { reply } => {
                if self.current() != SessionState::Scanning {
                    let _ = reply.send(Err(Error::SessionNotActive));
                    return;
                }
                let (completion, result) = CaptureCompletion::channel();
                self.transition(SessionState::Finishing);
                self.pending = Some(Pending {
                    result,
                    waiter: reply,
                });
                self.device.stop(completion);
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.cancel());
            }
            Command::Reset { reply } => {
                let result = match self.current() {
                    SessionState::Idle => Ok(()),
                    SessionState::Finished | SessionState::Cancelled => {
                        self.transition(SessionState::Idle);
                        Ok(())
                    }
                    SessionState::Scanning | SessionState::Finishing => {
                        Err(Error::SessionAlreadyActive)
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    fn start(&mut self, config: CaptureConfig) -> Result<()> {
        if self.current() != SessionState::Idle {
            return Err(Error::SessionAlreadyActive);
        }
        let lease = SensorLease::acquire().ok_or(Error::SessionAlreadyActive)?;

        self.device.start(&config).map_err(|reason| {
            tracing::warn!(%reason, "Capture device failed to start");
            Error::CaptureFailed(reason)
        })?;

        self.lease = Some(lease);
        self.transition(SessionState::Scanning);
        tracing::info!(coaching = config.coaching_enabled, "Scan started");
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        if !self.current().is_active() {
            return Err(Error::SessionNotActive);
        }

        self.device.abort();
        self.transition(SessionState::Cancelled);
        if let Some(pending) = self.pending.take() {
            let _ = pending.waiter.send(Ok(CaptureOutcome::Cancelled));
        }
        tracing::info!("Scan cancelled");
        Ok(())
    }

    fn complete(&mut self, result: std::result::Result<DeviceResult, oneshot::error::RecvError>) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let reply = match result {
            Ok(Ok(capture)) => {
                self.transition(SessionState::Finished);
                tracing::info!(elements = capture.elements.len(), "Scan finished");
                Ok(CaptureOutcome::Finished(capture))
            }
            Ok(Err(reason)) => {
                self.transition(SessionState::Idle);
                tracing::warn!(%reason, "Scan failed");
                Err(Error::CaptureFailed(reason))
            }
            Err(_) => {
                self.transition(SessionState::Idle);
                tracing::warn!("Capture device dropped its result");
                Err(Error::CaptureFailed(
                    "capture device stopped without a result".to_string(),
                ))
            }
        };

        if pending.waiter.send(reply).is_err() {
            tracing::warn!("Finish request was abandoned before the result arrived");
        }
    }
}

async fn wait_for_device(
    pending: &mut Option<Pending>,
) -> std::result::Result<DeviceResult, oneshot::error::RecvError> {
    match pending {
        Some(p) => (&mut p.result).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::ReplayDevice;
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    // The sensor lease is process-wide, so session tests take turns
    static SENSOR: Mutex<()> = Mutex::new(());

    fn exclusive() -> MutexGuard<'static, ()> {
        SENSOR.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn room() -> RawCapture {
        RawCapture::rectangular_room(4.0, 3.0, 2.5)
    }

    #[tokio::test]
    async fn test_start_finish_delivers_capture() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::new(room()));
        assert_eq!(session.state(), SessionState::Idle);

        session.start(CaptureConfig::default()).await.unwrap();
        assert_eq!(session.state(), SessionState::Scanning);
        assert!(sensor_in_use());

        let outcome = session.request_finish().await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Finished(room()));
        assert_eq!(session.state(), SessionState::Finished);
        assert!(!sensor_in_use());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::new(room()));
        session.start(CaptureConfig::default()).await.unwrap();
        assert_eq!(
            session.start(CaptureConfig::default()).await,
            Err(Error::SessionAlreadyActive)
        );
        session.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_session_cannot_take_sensor() {
        let _guard = exclusive();
        let first = CaptureSession::spawn(ReplayDevice::new(room()));
        let second = CaptureSession::spawn(ReplayDevice::new(room()));

        first.start(CaptureConfig::default()).await.unwrap();
        assert_eq!(
            second.start(CaptureConfig::default()).await,
            Err(Error::SessionAlreadyActive)
        );
        assert_eq!(second.state(), SessionState::Idle);

        first.cancel().await.unwrap();
        second.start(CaptureConfig::default()).await.unwrap();
        second.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_finish_and_cancel_need_active_scan() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::new(room()));
        assert_eq!(session.request_finish().await, Err(Error::SessionNotActive));
        assert_eq!(session.cancel().await, Err(Error::SessionNotActive));
    }

    #[tokio::test]
    async fn test_cancel_while_scanning() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::new(room()));
        session.start(CaptureConfig::default()).await.unwrap();

        session.cancel().await.unwrap();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(!sensor_in_use());
        assert_eq!(session.request_finish().await, Err(Error::SessionNotActive));
    }

    #[tokio::test]
    async fn test_cancel_while_finishing_discards_capture() {
        let _guard = exclusive();
        let device = ReplayDevice::new(room()).with_delay(Duration::from_secs(60));
        let session = CaptureSession::spawn(device);
        session.start(CaptureConfig::default()).await.unwrap();

        let mut states = session.subscribe();
        let finisher = session.clone();
        let finish = tokio::spawn(async move { finisher.request_finish().await });

        states
            .wait_for(|s| *s == SessionState::Finishing)
            .await
            .unwrap();
        session.cancel().await.unwrap();

        assert_eq!(finish.await.unwrap(), Ok(CaptureOutcome::Cancelled));
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_device_failure_returns_to_idle() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::failing("tracking lost"));
        session.start(CaptureConfig::default()).await.unwrap();

        assert_eq!(
            session.request_finish().await,
            Err(Error::CaptureFailed("tracking lost".to_string()))
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!sensor_in_use());

        // Retry is allowed straight away
        session.start(CaptureConfig::default()).await.unwrap();
        session.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_refusing_to_start() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::unavailable("no LiDAR"));
        assert_eq!(
            session.start(CaptureConfig::default()).await,
            Err(Error::CaptureFailed("no LiDAR".to_string()))
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!sensor_in_use());
    }

    #[tokio::test]
    async fn test_reset_after_terminal_states() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::new(room()));
        session.reset().await.unwrap();

        session.start(CaptureConfig::default()).await.unwrap();
        assert_eq!(session.reset().await, Err(Error::SessionAlreadyActive));
        session.request_finish().await.unwrap();
        assert_eq!(
            session.start(CaptureConfig::default()).await,
            Err(Error::SessionAlreadyActive)
        );

        session.reset().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.start(CaptureConfig::default()).await.unwrap();
        session.cancel().await.unwrap();
        session.reset().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_dropping_handles_releases_sensor() {
        let _guard = exclusive();
        let session = CaptureSession::spawn(ReplayDevice::new(room()));
        session.start(CaptureConfig::default()).await.unwrap();
        let mut states = session.subscribe();
        drop(session);

        // The actor drops its state sender on exit
        while states.changed().await.is_ok() {}
        assert!(!sensor_in_use());
    }
}
