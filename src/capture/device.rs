//! The spatial-capture capability seen from the session.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::room::RawCapture;

/// Options passed to the device when a scan starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Show on-screen guidance while scanning
    pub coaching_enabled: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            coaching_enabled: true,
        }
    }
}

pub(crate) type DeviceResult = std::result::Result<RawCapture, String>;

/// Single-use channel a device reports its terminal result on.
///
/// Consuming `self` guarantees at most one message per stop request.
/// Dropping it without reporting counts as a failure.
#[derive(Debug)]
pub struct CaptureCompletion {
    tx: oneshot::Sender<DeviceResult>,
}

impl CaptureCompletion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<DeviceResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the reconstructed room.
    pub fn ready(self, capture: RawCapture) {
        let _ = self.tx.send(Ok(capture));
    }

    /// Report that reconstruction failed.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }

    /// True once the session no longer wants the result (it was cancelled).
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A spatial-capture backend.
///
/// The session calls these from its own task; implementations should hand
/// heavy work to their own background context and return quickly.
pub trait CaptureDevice: Send + 'static {
    /// Begin consuming sensor data.
    fn start(&mut self, config: &CaptureConfig) -> std::result::Result<(), String>;

    /// Stop scanning and produce a result on `completion`, now or later.
    fn stop(&mut self, completion: CaptureCompletion);

    /// Stop immediately and discard anything in flight.
    fn abort(&mut self);
}

#[derive(Debug, Clone)]
enum Script {
    Deliver(RawCapture),
    Fail(String),
    Unavailable(String),
}

/// A device that replays a recorded capture instead of reading sensors.
///
/// Useful on hardware without a depth sensor and for exercising the save
/// pipeline end to end.
#[derive(Debug)]
pub struct ReplayDevice {
    script: Script,
    delay: Duration,
    in_flight: Option<JoinHandle<()>>,
    last_config: Option<CaptureConfig>,
}

impl ReplayDevice {
    /// Deliver `capture` when stopped.
    pub fn new(capture: RawCapture) -> Self {
        Self::with_script(Script::Deliver(capture))
    }

    /// Report `reason` as a reconstruction failure when stopped.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(reason.into()))
    }

    /// Refuse to start at all.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_script(Script::Unavailable(reason.into()))
    }

    /// Wait this long between stop and the result.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Config of the most recent successful start
    pub fn last_config(&self) -> Option<CaptureConfig> {
        self.last_config
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            in_flight: None,
            last_config: None,
        }
    }
}

impl CaptureDevice for ReplayDevice {
    fn start(&mut self, config: &CaptureConfig) -> std::result::Result<(), String> {
        if let Script::Unavailable(reason) = &self.script {
            return Err(reason.clone());
        }
        self.last_config = Some(*config);
        Ok(())
    }

    fn stop(&mut self, completion: CaptureCompletion) {
        let script = self.script.clone();
        let delay = self.delay;
        self.in_flight = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match script {
                Script::Deliver(capture) => completion.ready(capture),
                Script::Fail(reason) | Script::Unavailable(reason) => completion.fail(reason),
            }
        }));
    }

    fn abort(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_enables_coaching() {
        assert!(CaptureConfig::default().coaching_enabled);
    }

    #[tokio::test]
    async fn test_completion_delivers_once() {
        let (completion, rx) = CaptureCompletion::channel();
        assert!(!completion.is_abandoned());
        completion.fail("tracking lost");
        assert_eq!(rx.await.unwrap(), Err("tracking lost".to_string()));
    }

    #[tokio::test]
    async fn test_completion_sees_abandonment() {
        let (completion, rx) = CaptureCompletion::channel();
        drop(rx);
        assert!(completion.is_abandoned());
    }

    #[tokio::test]
    async fn test_dropped_completion_closes_channel() {
        let (completion, rx) = CaptureCompletion::channel();
        drop(completion);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_replay_device_delivers_capture() {
        let room = RawCapture::rectangular_room(3.0, 3.0, 2.4);
        let mut device = ReplayDevice::new(room.clone());
        device.start(&CaptureConfig { coaching_enabled: false }).unwrap();
        assert_eq!(device.last_config(), Some(CaptureConfig { coaching_enabled: false }));

        let (completion, rx) = CaptureCompletion::channel();
        device.stop(completion);
        assert_eq!(rx.await.unwrap(), Ok(room));
    }

    #[tokio::test]
    async fn test_replay_device_abort_discards_result() {
        let mut device = ReplayDevice::new(RawCapture::rectangular_room(3.0, 3.0, 2.4))
            .with_delay(Duration::from_secs(60));
        device.start(&CaptureConfig::default()).unwrap();

        let (completion, rx) = CaptureCompletion::channel();
        device.stop(completion);
        device.abort();
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_unavailable_device_refuses_start() {
        let mut device = ReplayDevice::unavailable("no LiDAR");
        assert_eq!(device.start(&CaptureConfig::default()), Err("no LiDAR".to_string()));
        assert_eq!(device.last_config(), None);
    }
}
